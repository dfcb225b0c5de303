//! Environment capability consumed by the evaluator.
//!
//! Environments speak in per-agent maps keyed by agent id: observations in,
//! actions out, rewards/terminations/truncations back. The trainer never
//! owns an environment; it only drives one during fitness evaluation.

use std::collections::HashMap;

/// Per-agent flat observations, keyed by agent id.
pub type Observations = HashMap<String, Vec<f32>>;

/// An action for a single agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    /// Continuous action vector.
    Continuous(Vec<f32>),
    /// Discrete action index.
    Discrete(i64),
}

/// Side-channel step information.
///
/// `agent_mask` marks which agents should be queried for an action this step
/// (absent agents default to queried). `env_defined_actions` are actions the
/// environment dictates verbatim, taking precedence over both the mask and
/// the policy.
#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    pub agent_mask: Option<HashMap<String, bool>>,
    pub env_defined_actions: Option<HashMap<String, AgentAction>>,
}

/// Result of advancing the environment by one joint action.
#[derive(Debug, Clone)]
pub struct EnvStep {
    pub observations: Observations,
    pub rewards: HashMap<String, f32>,
    pub terminations: HashMap<String, bool>,
    pub truncations: HashMap<String, bool>,
    pub info: StepInfo,
}

/// A multi-agent environment.
pub trait MultiAgentEnv {
    /// Agent ids in the environment's canonical order.
    fn agents(&self) -> Vec<String>;

    /// Reset to an initial state.
    fn reset(&mut self) -> (Observations, StepInfo);

    /// Advance one step with the given joint action. Agents without an entry
    /// in `actions` (masked, unqueried) take no action this step.
    fn step(&mut self, actions: &HashMap<String, AgentAction>) -> EnvStep;
}

/// Rearrange a flat channels-last `[H, W, C]` image observation into
/// channels-first `[C, H, W]` layout.
pub fn hwc_to_chw(observation: &[f32], height: usize, width: usize, channels: usize) -> Vec<f32> {
    debug_assert_eq!(observation.len(), height * width * channels);
    let mut out = vec![0.0; observation.len()];
    for h in 0..height {
        for w in 0..width {
            for c in 0..channels {
                out[c * height * width + h * width + w] = observation[h * width * channels + w * channels + c];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwc_to_chw_rearranges_channels() {
        // 2x2 image, 3 channels; value = 100*c + 10*h + w.
        let mut hwc = Vec::new();
        for h in 0..2 {
            for w in 0..2 {
                for c in 0..3 {
                    hwc.push((100 * c + 10 * h + w) as f32);
                }
            }
        }

        let chw = hwc_to_chw(&hwc, 2, 2, 3);

        let mut expected = Vec::new();
        for c in 0..3 {
            for h in 0..2 {
                for w in 0..2 {
                    expected.push((100 * c + 10 * h + w) as f32);
                }
            }
        }
        assert_eq!(chw, expected);
    }

    #[test]
    fn step_info_defaults_to_unmasked() {
        let info = StepInfo::default();
        assert!(info.agent_mask.is_none());
        assert!(info.env_defined_actions.is_none());
    }
}
