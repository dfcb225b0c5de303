//! Network capability traits.
//!
//! The trainer is generic over the networks it trains. A network only needs
//! to expose a forward pass for its role, an architecture descriptor that can
//! rebuild a fresh copy on any device, an in-place soft update, and a
//! parameter snapshot. Compilation hooks exist for backends that support a
//! graph-optimized execution variant; the provided defaults are identity.

use burn::{config::Config, module::AutodiffModule, tensor::{backend::AutodiffBackend, Tensor, TensorData}};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output-layer activation of an actor (or critic) head.
///
/// The actor's activation declares the range its raw outputs live in, which
/// the trainer uses to map them onto each agent's action bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum OutputActivation {
    /// No activation; unbounded outputs (typical for critic heads).
    Linear,
    /// Squashes into `[-1, 1]`.
    Tanh,
    /// Squashes into `[0, 1]` elementwise.
    Sigmoid,
    /// Normalizes into `[0, 1]` summing to one.
    Softmax,
    /// Differentiable relaxed-categorical sample in `[0, 1]`, used for
    /// discrete action heads.
    GumbelSoftmax,
}

/// The bounded interval an activation's outputs are confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationRange {
    /// Outputs in `[-1, 1]`.
    SignedUnit,
    /// Outputs in `[0, 1]`.
    Unit,
}

impl OutputActivation {
    /// Declared output range, or `None` for unbounded activations.
    pub fn bounded_range(&self) -> Option<ActivationRange> {
        match self {
            OutputActivation::Tanh => Some(ActivationRange::SignedUnit),
            OutputActivation::Sigmoid | OutputActivation::Softmax | OutputActivation::GumbelSoftmax => {
                Some(ActivationRange::Unit)
            }
            OutputActivation::Linear => None,
        }
    }
}

/// Requested compilation mode for network forward passes.
///
/// Parsed from the string forms `default`, `reduce-overhead` and
/// `max-autotune`; anything else is rejected at trainer construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CompileMode {
    Default,
    ReduceOverhead,
    MaxAutotune,
}

/// A trainable network with a rebuildable architecture.
pub trait Network<B: AutodiffBackend>: AutodiffModule<B> {
    /// Serializable architecture descriptor. Building from an `Arch` yields a
    /// structurally identical network with freshly initialized parameters.
    type Arch: Config + Clone + PartialEq + core::fmt::Debug + Send + Sync;

    /// Recover this network's architecture descriptor.
    fn arch(&self) -> Self::Arch;

    /// Build a freshly initialized network from an architecture descriptor.
    fn build(arch: &Self::Arch, device: &B::Device) -> Self;

    /// The activation applied to this network's output layer.
    fn output_activation(&self) -> OutputActivation;

    /// Input and output feature widths, used to reject structurally
    /// incompatible networks before they reach a forward pass.
    fn io_dims(&self) -> (usize, usize);

    /// In-place EMA update: `self ← tau * other + (1 - tau) * self`.
    ///
    /// Panics if `other` is not structurally identical; diverged target
    /// architectures are unrecoverable trainer corruption.
    fn soft_update(&mut self, other: &Self, tau: f32);

    /// Snapshot of every parameter tensor, in a stable order.
    fn parameters(&self) -> Vec<TensorData>;

    /// Wrap this network in a compiled execution variant. Backends without a
    /// compilation story return the network unchanged.
    fn compiled(self, _mode: CompileMode) -> Self {
        self
    }

    /// Strip any compiled wrapper, returning the plain module.
    fn unwrapped(self) -> Self {
        self
    }
}

/// A policy head: maps a batch of per-agent observations to raw actions in
/// the activation's declared range.
pub trait ActorNetwork<B: AutodiffBackend>: Network<B> {
    fn forward_actor(&self, observations: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// A centralized value head: scores the joint observation and joint action of
/// all agents with a single scalar per batch row.
pub trait CriticNetwork<B: AutodiffBackend>: Network<B> {
    fn forward_critic(&self, joint_observations: Tensor<B, 2>, joint_actions: Tensor<B, 2>) -> Tensor<B, 2>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_mode_parses_kebab_case() {
        assert_eq!("default".parse::<CompileMode>().unwrap(), CompileMode::Default);
        assert_eq!("reduce-overhead".parse::<CompileMode>().unwrap(), CompileMode::ReduceOverhead);
        assert_eq!("max-autotune".parse::<CompileMode>().unwrap(), CompileMode::MaxAutotune);
        assert!("fastest".parse::<CompileMode>().is_err());
    }

    #[test]
    fn activation_ranges() {
        assert_eq!(OutputActivation::Tanh.bounded_range(), Some(ActivationRange::SignedUnit));
        assert_eq!(OutputActivation::Sigmoid.bounded_range(), Some(ActivationRange::Unit));
        assert_eq!(OutputActivation::Softmax.bounded_range(), Some(ActivationRange::Unit));
        assert_eq!(OutputActivation::GumbelSoftmax.bounded_range(), Some(ActivationRange::Unit));
        assert_eq!(OutputActivation::Linear.bounded_range(), None);
    }
}
