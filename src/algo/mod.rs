/// Multi-Agent Twin Delayed DDPG
pub mod matd3;

pub use matd3::{ExperienceBatch, Matd3, Matd3Checkpoint, Matd3Config, TargetSmoothing};
