//! # marl
//!
//! Multi-agent TD3 (MATD3) training for cooperative and competitive agent
//! populations, built on [burn](https://burn.dev).
//!
//! The centerpiece is [`algo::matd3::Matd3`], a twin-critic, delayed-policy
//! actor-critic trainer that keeps one actor and two centralized critics per
//! agent (plus slowly-tracking target copies of each) and exposes the
//! population primitives (duplicate, checkpoint, restore) that an outer
//! evolutionary search needs to mutate and compare many trainer instances.
//!
//! Networks are abstract: anything satisfying the capability traits in
//! [`traits::network`] can be trained. A feed-forward implementation,
//! [`nn::Mlp`], is provided and used by default.
//!
//! ```rust,ignore
//! use burn::backend::{Autodiff, NdArray};
//! use marl::algo::matd3::{Matd3, Matd3Config};
//!
//! type B = Autodiff<NdArray>;
//!
//! let config = Matd3Config::new(
//!     vec!["agent_0".into(), "agent_1".into()],
//!     vec![vec![6], vec![6]],
//!     vec![2, 2],
//! );
//! let mut trainer = Matd3::<B>::new(config, Default::default())?;
//!
//! // outer loop: fill a replay buffer via trainer.get_action(..), then
//! let losses = trainer.learn(&batch)?;
//! let fitness = trainer.test(&mut env, 500, 3, false)?;
//! let offspring = trainer.duplicate(Some(1), true)?;
//! # Ok::<(), marl::MarlError>(())
//! ```

pub mod algo;
pub mod distributed;
pub mod env;
pub mod error;
pub mod nn;
pub mod traits;

pub use error::{MarlError, Result};
