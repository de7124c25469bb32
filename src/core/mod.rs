//! Core value types shared by search and training: tensors, tensor
//! dictionaries, devices and the seeded RNG.

pub mod rng;
pub mod tensor;

pub use rng::SearchRng;
pub use tensor::{Device, Tensor, TensorDict};
