//! MCTS integration tests: tree bookkeeping and the planner on a corridor.

use odt_planner::core::{SearchRng, Tensor, TensorDict};
use odt_planner::env::{Evaluation, PlanningEnv};
use odt_planner::mcts::{MCTSConfig, MCTSPlanner, MCTSTree, NodeId};
use odt_planner::{PlannerError, Result};
use proptest::prelude::*;

// =============================================================================
// Corridor environment
// =============================================================================

/// Walk along positions `0..=length`. Actions: 0 = left, 1 = right, 2 = stay.
/// Reaching `length` ends the episode with value 1.0.
struct Corridor {
    length: f32,
}

fn position(state: &TensorDict) -> f32 {
    state.get("position").ok().and_then(|t| t.get(0)).unwrap_or(0.0)
}

fn start() -> TensorDict {
    TensorDict::new().with("position", Tensor::scalar(0.0))
}

impl PlanningEnv for Corridor {
    fn action_count(&self, state: &TensorDict) -> usize {
        if position(state) >= self.length {
            0
        } else {
            3
        }
    }

    fn step(&self, state: &TensorDict, action: usize) -> Result<TensorDict> {
        let delta = match action {
            0 => -1.0,
            1 => 1.0,
            2 => 0.0,
            _ => {
                return Err(PlannerError::ActionOutOfRange {
                    action,
                    n_actions: 3,
                })
            }
        };
        let next = (position(state) + delta).max(0.0);
        Ok(state.clone().with("position", Tensor::scalar(next)))
    }

    fn evaluate(&self, _state: &TensorDict) -> Result<Evaluation> {
        Ok(Evaluation::uniform(3).with_value(0.0))
    }

    fn terminal_value(&self, state: &TensorDict) -> Option<f64> {
        (position(state) >= self.length).then_some(1.0)
    }
}

// =============================================================================
// Tree Bookkeeping
// =============================================================================

#[test]
fn test_single_visit_scenario() {
    let mut tree = MCTSTree::new(TensorDict::new(), 3);
    let root = tree.root();
    tree.expand(root, &Evaluation::new(vec![0.2, 0.5, 0.3])).unwrap();

    let child = tree.add_child(root, 1, TensorDict::new(), 3).unwrap();
    tree.backup(child, 1.0).unwrap();

    let root_node = tree.root_node();
    assert_eq!(root_node.child_visit_count(), &[0, 1, 0]);
    assert_eq!(root_node.child_total_value(), &[0.0, 1.0, 0.0]);
    assert_eq!(tree.action_value(child).unwrap(), 0.5);
    assert_eq!(root_node.original_prior(), &[0.2, 0.5, 0.3]);
}

#[test]
fn test_root_statistics_fail() {
    let mut tree = MCTSTree::new(TensorDict::new(), 2);
    let root = tree.root();

    assert!(matches!(tree.visit_count(root), Err(PlannerError::RootHasNoParent(_))));
    assert!(matches!(tree.total_value(root), Err(PlannerError::RootHasNoParent(_))));
    assert!(matches!(
        tree.set_visit_count(root, 3),
        Err(PlannerError::RootHasNoParent(_))
    ));
    assert!(matches!(tree.action_value(root), Err(PlannerError::RootHasNoParent(_))));
}

#[test]
fn test_unknown_node() {
    let tree = MCTSTree::new(TensorDict::new(), 2);
    assert!(matches!(
        tree.visit_count(NodeId::new(99)),
        Err(PlannerError::UnknownNode(_))
    ));
}

#[test]
fn test_snapshot_after_search() {
    let config = MCTSConfig::default().with_seed(5);
    let mut planner = MCTSPlanner::new(Corridor { length: 3.0 }, config, start());
    planner.search(64).unwrap();

    let bytes = planner.tree().to_bytes().unwrap();
    let restored = MCTSTree::from_bytes(&bytes).unwrap();

    assert_eq!(restored.len(), planner.tree().len());
    assert_eq!(
        restored.root_node().child_visit_count(),
        planner.tree().root_node().child_visit_count()
    );
    assert_eq!(
        restored.root_node().child_prior(),
        planner.tree().root_node().child_prior()
    );
}

// =============================================================================
// Planner
// =============================================================================

#[test]
fn test_planner_walks_towards_goal() {
    let config = MCTSConfig::default()
        .with_root_noise(false)
        .with_temperature(0.0);
    let mut planner = MCTSPlanner::new(Corridor { length: 2.0 }, config, start());
    planner.search(400).unwrap();

    let probs = planner.action_probabilities();
    assert!(probs[1] > probs[0], "right should be visited most: {:?}", probs);
    assert!(probs[1] > probs[2], "right should be visited most: {:?}", probs);
    assert_eq!(planner.select_action(0).unwrap(), 1);
}

#[test]
fn test_planner_plays_episode() {
    let config = MCTSConfig::default()
        .with_root_noise(false)
        .with_temperature(0.0);
    let mut planner = MCTSPlanner::new(Corridor { length: 2.0 }, config, start());

    let mut moves = 0;
    while planner.tree().root_node().n_actions() > 0 && moves < 20 {
        planner.search(200).unwrap();
        let action = planner.select_action(moves).unwrap();
        planner.commit(action).unwrap();
        moves += 1;

        // Every committed move leaves a clean root
        assert!(planner.tree().root_node().is_root());
        assert_eq!(planner.tree().stats().in_flight_vlosses, 0);
    }

    assert_eq!(position(&planner.tree().root_node().state), 2.0);
}

#[test]
fn test_planner_deterministic_with_seed() {
    let run = |seed| {
        let config = MCTSConfig::default().with_seed(seed);
        let mut planner = MCTSPlanner::new(Corridor { length: 3.0 }, config, start());
        planner.search(100).unwrap();
        (planner.action_probabilities(), planner.tree().len())
    };

    assert_eq!(run(12345), run(12345));
}

#[test]
fn test_batched_readouts_balance_virtual_loss() {
    let config = MCTSConfig::default().with_parallel_readouts(16);
    let mut planner = MCTSPlanner::new(Corridor { length: 4.0 }, config, start());
    planner.search(160).unwrap();

    let stats = planner.stats();
    assert_eq!(stats.simulations, 160);
    assert!(stats.virtual_losses > 0);
    assert_eq!(planner.tree().stats().in_flight_vlosses, 0);
    assert_eq!(planner.tree().root_node().n_vlosses(), 0);
}

// =============================================================================
// Invariants
// =============================================================================

fn expanded_tree(n_actions: usize) -> (MCTSTree, Vec<NodeId>) {
    let mut tree = MCTSTree::new(TensorDict::new(), n_actions);
    let root = tree.root();
    tree.expand(root, &Evaluation::uniform(n_actions)).unwrap();
    let children = (0..n_actions)
        .map(|a| tree.add_child(root, a, TensorDict::new(), 1).unwrap())
        .collect();
    (tree, children)
}

proptest! {
    #[test]
    fn prop_action_value_formula(n in 0u32..100_000, v in -1.0e6f64..1.0e6) {
        let (mut tree, children) = expanded_tree(1);
        tree.set_visit_count(children[0], n).unwrap();
        tree.set_total_value(children[0], v).unwrap();

        prop_assert_eq!(tree.action_value(children[0]).unwrap(), v / (1.0 + n as f64));
    }

    #[test]
    fn prop_visit_count_aliases_one_slot(
        n_actions in 1usize..10,
        pick in 0usize..10,
        count in 1u32..1000,
    ) {
        let slot = pick % n_actions;
        let (mut tree, children) = expanded_tree(n_actions);
        tree.set_visit_count(children[slot], count).unwrap();

        let visits = tree.root_node().child_visit_count();
        for (a, &n) in visits.iter().enumerate() {
            prop_assert_eq!(n, if a == slot { count } else { 0 });
        }
        prop_assert_eq!(tree.visit_count(children[slot]).unwrap(), count);
    }

    #[test]
    fn prop_noise_keeps_original_prior(
        priors in prop::collection::vec(0.0f32..1.0, 1..12),
        alpha in 0.01f64..2.0,
        epsilon in 0.0f64..1.0,
        seed in any::<u64>(),
    ) {
        let mut tree = MCTSTree::new(TensorDict::new(), priors.len());
        let root = tree.root();
        tree.expand(root, &Evaluation::new(priors.clone())).unwrap();

        let mut rng = SearchRng::new(seed);
        tree.inject_noise(root, &mut rng, alpha, epsilon).unwrap();
        tree.inject_noise(root, &mut rng, alpha, epsilon).unwrap();

        prop_assert_eq!(tree.root_node().original_prior(), priors.as_slice());
    }
}
