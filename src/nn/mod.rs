//! Neural network building blocks.

pub mod mlp;

pub use mlp::{Mlp, MlpSpec};
