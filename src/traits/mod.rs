pub mod network;
pub mod to_tensor;

pub use network::{ActivationRange, ActorNetwork, CompileMode, CriticNetwork, Network, OutputActivation};
pub use to_tensor::ToTensor;
