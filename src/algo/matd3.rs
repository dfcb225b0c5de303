//! Multi-Agent Twin Delayed DDPG (MATD3)
//!
//! One trainer instance owns, for every agent, an actor and two centralized
//! critics plus slowly-tracking target copies of all three. Critics score the
//! joint observation and joint action of the whole team (agent tensors
//! concatenated in the fixed `agent_ids` order), which stabilizes learning in
//! mixed cooperative/competitive settings where each agent's reward depends
//! on everyone's behavior.
//!
//! Per learn call:
//! - both critics of every agent take an independent gradient step toward the
//!   shared TD target `y = r + γ·(1 − done)·min(Q1′, Q2′)`, where the target
//!   critics score the target actors' next joint action;
//! - every `policy_freq`-th call, each actor steps along `-Q1` with its own
//!   action substituted into the sampled joint action;
//! - critic targets are soft-updated every call, actor targets only on calls
//!   that updated the actors.
//!
//! The trainer also carries the population-evolution surface: per-instance
//! score/fitness/step bookkeeping, [`Matd3::duplicate`] for cloning into
//! offspring, and [`Matd3::checkpoint`] / [`Matd3::from_checkpoint`] for full
//! state persistence.

use std::collections::HashMap;
use std::sync::Arc;

use burn::{
    module::Module,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::AutodiffBackend, Distribution},
};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    distributed::DistributedContext,
    env::{AgentAction, MultiAgentEnv, Observations},
    error::{MarlError, Result},
    nn::{Mlp, MlpSpec},
    traits::{
        network::{ActivationRange, ActorNetwork, CompileMode, CriticNetwork, Network, OutputActivation},
        ToTensor,
    },
};

/// Target-policy smoothing: Gaussian noise (clipped to `[-clip, clip]`) added
/// to target actions when forming the TD target, with the sum clamped back to
/// the actor activation's declared range. Off by default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSmoothing {
    pub std: f32,
    pub clip: f32,
}

/// MATD3 trainer configuration.
///
/// `state_dims` holds each agent's observation shape (flat `[features]`, or
/// `[channels, height, width]` for image observations consumed flattened);
/// `action_dims` each agent's action dimensionality (branch count when
/// `discrete_actions`). All per-agent lists are indexed in `agent_ids` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matd3Config {
    pub agent_ids: Vec<String>,
    pub state_dims: Vec<Vec<usize>>,
    pub action_dims: Vec<usize>,
    /// Observations are scalar class indices to be one-hot encoded.
    pub one_hot: bool,
    /// Actions are discrete branch choices (gumbel-softmax actor heads).
    pub discrete_actions: bool,
    /// Per-agent action lower bounds.
    pub min_action: Vec<f32>,
    /// Per-agent action upper bounds.
    pub max_action: Vec<f32>,
    /// Hidden widths for the default network architecture.
    pub hidden_size: Vec<usize>,
    /// Gaussian exploration noise std for continuous action selection.
    pub expl_noise: f32,
    /// Position of this instance within a population.
    pub index: usize,
    pub batch_size: usize,
    pub lr_actor: f64,
    pub lr_critic: f64,
    /// How many environment steps the outer loop should collect per learn
    /// call. Carried for the outer loop; `learn` itself is cadence-free.
    pub learn_step: usize,
    pub gamma: f32,
    pub tau: f32,
    /// Delayed policy update period, in learn calls.
    pub policy_freq: usize,
    pub target_smoothing: Option<TargetSmoothing>,
    /// Requested compile mode (`default`, `reduce-overhead`, `max-autotune`).
    pub compile_mode: Option<String>,
}

impl Matd3Config {
    pub fn new(agent_ids: Vec<String>, state_dims: Vec<Vec<usize>>, action_dims: Vec<usize>) -> Self {
        let n_agents = agent_ids.len();
        Self {
            agent_ids,
            state_dims,
            action_dims,
            one_hot: false,
            discrete_actions: false,
            min_action: vec![-1.0; n_agents],
            max_action: vec![1.0; n_agents],
            hidden_size: vec![64, 64],
            expl_noise: 0.1,
            index: 0,
            batch_size: 64,
            lr_actor: 1e-3,
            lr_critic: 1e-2,
            learn_step: 5,
            gamma: 0.95,
            tau: 0.01,
            policy_freq: 2,
            target_smoothing: None,
            compile_mode: None,
        }
    }
}

/// A sampled batch of joint transitions, keyed by agent id.
///
/// Every tensor is `[batch, ·]`: states/next-states carry the agent's
/// observation features (a single class-index column when the trainer
/// one-hot encodes), actions the agent's action vector, rewards and dones a
/// single column (dones as 0/1 floats).
#[derive(Debug, Clone)]
pub struct ExperienceBatch<B: Backend> {
    pub states: HashMap<String, Tensor<B, 2>>,
    pub actions: HashMap<String, Tensor<B, 2>>,
    pub rewards: HashMap<String, Tensor<B, 2>>,
    pub next_states: HashMap<String, Tensor<B, 2>>,
    pub dones: HashMap<String, Tensor<B, 2>>,
}

/// Serializable full-state snapshot of a trainer.
///
/// Network parameters and optimizer moments are stored as opaque recorder
/// byte blobs next to the architecture descriptors needed to rebuild them on
/// any device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matd3Checkpoint<AA, CA> {
    pub agent_ids: Vec<String>,
    pub state_dims: Vec<Vec<usize>>,
    pub action_dims: Vec<usize>,
    pub one_hot: bool,
    pub discrete_actions: bool,
    pub min_action: Vec<f32>,
    pub max_action: Vec<f32>,
    pub expl_noise: Vec<f32>,
    pub batch_size: usize,
    pub lr_actor: f64,
    pub lr_critic: f64,
    pub learn_step: usize,
    pub gamma: f32,
    pub tau: f32,
    pub policy_freq: usize,
    pub learn_counter: u64,
    pub target_smoothing: Option<TargetSmoothing>,
    pub compile_mode: Option<CompileMode>,

    pub actor_archs: Vec<AA>,
    pub actor_states: Vec<Vec<u8>>,
    pub actor_target_archs: Vec<AA>,
    pub actor_target_states: Vec<Vec<u8>>,
    pub critic_1_archs: Vec<CA>,
    pub critic_1_states: Vec<Vec<u8>>,
    pub critic_target_1_archs: Vec<CA>,
    pub critic_target_1_states: Vec<Vec<u8>>,
    pub critic_2_archs: Vec<CA>,
    pub critic_2_states: Vec<Vec<u8>>,
    pub critic_target_2_archs: Vec<CA>,
    pub critic_target_2_states: Vec<Vec<u8>>,

    pub actor_optimizer_states: Vec<Vec<u8>>,
    pub critic_1_optimizer_states: Vec<Vec<u8>>,
    pub critic_2_optimizer_states: Vec<Vec<u8>>,

    pub mutation: Option<String>,
    pub index: usize,
    pub scores: Vec<f32>,
    pub fitness: Vec<f32>,
    pub steps: Vec<u64>,
    pub critic_losses: HashMap<String, Vec<f32>>,
}

/// MATD3 trainer over `B` with actor networks `A` and critic networks `C`.
///
/// Defaults to the built-in [`Mlp`] for both roles; custom networks enter via
/// [`Matd3::from_networks`] or [`Matd3::new_with_overrides`].
pub struct Matd3<B, A = Mlp<B>, C = Mlp<B>>
where
    B: AutodiffBackend,
    A: ActorNetwork<B>,
    C: CriticNetwork<B>,
{
    agent_ids: Vec<String>,
    state_dims: Vec<Vec<usize>>,
    action_dims: Vec<usize>,
    one_hot: bool,
    discrete_actions: bool,
    min_action: Vec<f32>,
    max_action: Vec<f32>,
    expl_noise: Vec<f32>,
    batch_size: usize,
    lr_actor: f64,
    lr_critic: f64,
    learn_step: usize,
    gamma: f32,
    tau: f32,
    policy_freq: usize,
    target_smoothing: Option<TargetSmoothing>,
    compile_mode: Option<CompileMode>,

    total_state_dim: usize,
    total_action_dim: usize,
    learn_counter: u64,

    actors: Vec<A>,
    actor_targets: Vec<A>,
    critics_1: Vec<C>,
    critic_targets_1: Vec<C>,
    critics_2: Vec<C>,
    critic_targets_2: Vec<C>,

    actor_optimizers: Vec<OptimizerAdaptor<Adam, A, B>>,
    critic_1_optimizers: Vec<OptimizerAdaptor<Adam, C, B>>,
    critic_2_optimizers: Vec<OptimizerAdaptor<Adam, C, B>>,

    accelerator: Option<Arc<dyn DistributedContext>>,
    device: B::Device,

    /// Position of this instance within a population.
    pub index: usize,
    /// Label of the last mutation applied by an outer evolution loop.
    pub mutation: Option<String>,
    /// Raw episode scores recorded by the outer loop.
    pub scores: Vec<f32>,
    /// Fitness values from [`Matd3::test`] evaluations.
    pub fitness: Vec<f32>,
    /// Cumulative environment-step counts.
    pub steps: Vec<u64>,

    critic_losses: HashMap<String, Vec<f32>>,
}

impl<B: AutodiffBackend> Matd3<B> {
    /// Build a trainer with default `Mlp` networks for every role.
    ///
    /// Actor heads get Tanh output activation (gumbel-softmax when
    /// `discrete_actions`); critic heads are linear over the concatenated
    /// joint observation and joint action.
    pub fn new(config: Matd3Config, device: B::Device) -> Result<Self> {
        Self::validate_config(&config)?;

        let n_agents = config.agent_ids.len();
        let total_state_dim: usize = config.state_dims.iter().map(|dims| feature_count(dims)).sum();
        let total_action_dim: usize = config.action_dims.iter().sum();
        let actor_activation = if config.discrete_actions {
            OutputActivation::GumbelSoftmax
        } else {
            OutputActivation::Tanh
        };

        let mut actors = Vec::with_capacity(n_agents);
        let mut critics_1 = Vec::with_capacity(n_agents);
        let mut critics_2 = Vec::with_capacity(n_agents);
        for idx in 0..n_agents {
            let actor_spec = MlpSpec::new(
                feature_count(&config.state_dims[idx]),
                config.hidden_size.clone(),
                config.action_dims[idx],
            )
            .with_output_activation(actor_activation);
            actors.push(actor_spec.init(&device));

            let critic_spec = MlpSpec::new(total_state_dim + total_action_dim, config.hidden_size.clone(), 1);
            critics_1.push(critic_spec.init(&device));
            critics_2.push(critic_spec.init(&device));
        }

        Self::from_parts(config, actors, critics_1, critics_2, device)
    }

    /// Build a trainer with optionally overridden networks.
    ///
    /// Overrides are all-or-nothing: actors and both critic lists must be
    /// given together. A partial override falls back to the default
    /// architecture with a warning rather than mixing custom and default
    /// networks.
    pub fn new_with_overrides(
        config: Matd3Config,
        actors: Option<Vec<Mlp<B>>>,
        critics: Option<(Vec<Mlp<B>>, Vec<Mlp<B>>)>,
        device: B::Device,
    ) -> Result<Self> {
        match (actors, critics) {
            (Some(actors), Some((critics_1, critics_2))) => {
                Self::from_networks(config, actors, critics_1, critics_2, device)
            }
            (None, None) => Self::new(config, device),
            _ => {
                warn!("actor and critic networks must be overridden together; falling back to default architectures");
                Self::new(config, device)
            }
        }
    }
}

impl<B, A, C> Matd3<B, A, C>
where
    B: AutodiffBackend,
    A: ActorNetwork<B>,
    C: CriticNetwork<B>,
{
    /// Build a trainer from caller-supplied networks, one per agent per role.
    pub fn from_networks(
        config: Matd3Config,
        actors: Vec<A>,
        critics_1: Vec<C>,
        critics_2: Vec<C>,
        device: B::Device,
    ) -> Result<Self> {
        Self::validate_config(&config)?;

        let n_agents = config.agent_ids.len();
        for (role, len) in [
            ("actors", actors.len()),
            ("first critics", critics_1.len()),
            ("second critics", critics_2.len()),
        ] {
            if len != n_agents {
                return Err(MarlError::InvalidNetworks(format!(
                    "{len} {role} supplied for {n_agents} agents"
                )));
            }
        }

        Self::from_parts(config, actors, critics_1, critics_2, device)
    }

    fn validate_config(config: &Matd3Config) -> Result<()> {
        let n_agents = config.agent_ids.len();
        if n_agents == 0 {
            return Err(MarlError::Config("at least one agent id is required".into()));
        }
        for (name, len) in [
            ("state_dims", config.state_dims.len()),
            ("action_dims", config.action_dims.len()),
            ("min_action", config.min_action.len()),
            ("max_action", config.max_action.len()),
        ] {
            if len != n_agents {
                return Err(MarlError::Config(format!(
                    "{name} has {len} entries for {n_agents} agents"
                )));
            }
        }
        if config.action_dims.iter().any(|&dim| dim == 0) {
            return Err(MarlError::Config("action dimensions must be positive".into()));
        }
        if config.policy_freq == 0 {
            return Err(MarlError::Config("policy_freq must be at least 1".into()));
        }
        Ok(())
    }

    fn from_parts(
        config: Matd3Config,
        actors: Vec<A>,
        critics_1: Vec<C>,
        critics_2: Vec<C>,
        device: B::Device,
    ) -> Result<Self> {
        let compile_mode = match config.compile_mode.as_deref() {
            Some(raw) => Some(
                raw.parse::<CompileMode>()
                    .map_err(|_| MarlError::CompileMode(raw.to_string()))?,
            ),
            None => None,
        };

        let (mut actors, mut critics_1, mut critics_2) = (actors, critics_1, critics_2);
        if let Some(mode) = compile_mode {
            actors = actors.into_iter().map(|net| net.compiled(mode)).collect();
            critics_1 = critics_1.into_iter().map(|net| net.compiled(mode)).collect();
            critics_2 = critics_2.into_iter().map(|net| net.compiled(mode)).collect();
        }

        // Targets start as exact copies of their online networks.
        let actor_targets = actors.clone();
        let critic_targets_1 = critics_1.clone();
        let critic_targets_2 = critics_2.clone();

        let actor_optimizers: Vec<OptimizerAdaptor<Adam, A, B>> =
            actors.iter().map(|_| AdamConfig::new().init()).collect();
        let critic_1_optimizers: Vec<OptimizerAdaptor<Adam, C, B>> =
            critics_1.iter().map(|_| AdamConfig::new().init()).collect();
        let critic_2_optimizers: Vec<OptimizerAdaptor<Adam, C, B>> =
            critics_2.iter().map(|_| AdamConfig::new().init()).collect();

        let n_agents = config.agent_ids.len();
        let critic_losses = config.agent_ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        Ok(Self {
            total_state_dim: config.state_dims.iter().map(|dims| feature_count(dims)).sum(),
            total_action_dim: config.action_dims.iter().sum(),
            agent_ids: config.agent_ids,
            state_dims: config.state_dims,
            action_dims: config.action_dims,
            one_hot: config.one_hot,
            discrete_actions: config.discrete_actions,
            min_action: config.min_action,
            max_action: config.max_action,
            expl_noise: vec![config.expl_noise; n_agents],
            batch_size: config.batch_size,
            lr_actor: config.lr_actor,
            lr_critic: config.lr_critic,
            learn_step: config.learn_step,
            gamma: config.gamma,
            tau: config.tau,
            policy_freq: config.policy_freq,
            target_smoothing: config.target_smoothing,
            compile_mode,
            learn_counter: 0,
            actors,
            actor_targets,
            critics_1,
            critic_targets_1,
            critics_2,
            critic_targets_2,
            actor_optimizers,
            critic_1_optimizers,
            critic_2_optimizers,
            accelerator: None,
            device,
            index: config.index,
            mutation: None,
            scores: Vec::new(),
            fitness: Vec::new(),
            steps: vec![0],
            critic_losses,
        })
    }

    /// Attach a distributed context; its `no_sync` scope wraps the first
    /// critic backward pass of every learn call.
    pub fn with_accelerator(mut self, accelerator: Arc<dyn DistributedContext>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    /// Map a raw actor output onto agent `idx`'s action bounds.
    ///
    /// The mapping is chosen from the actor activation's declared range and
    /// the agent's `[min_action, max_action]` interval; identity when they
    /// already coincide. Unbounded activations cannot be scaled.
    pub fn scale_to_action_space(&self, raw: &[f32], idx: usize) -> Result<Vec<f32>> {
        let activation = self.actors[idx].output_activation();
        let range = activation
            .bounded_range()
            .ok_or_else(|| MarlError::UnsupportedActivation(activation.to_string()))?;
        let (lo, hi) = (self.min_action[idx], self.max_action[idx]);

        Ok(raw.iter().map(|&value| scale_value(range, lo, hi, value)).collect())
    }

    fn scale_action_tensor(&self, raw: Tensor<B, 2>, idx: usize) -> Result<Tensor<B, 2>> {
        let activation = self.actors[idx].output_activation();
        let range = activation
            .bounded_range()
            .ok_or_else(|| MarlError::UnsupportedActivation(activation.to_string()))?;
        let (lo, hi) = (self.min_action[idx], self.max_action[idx]);

        Ok(match range {
            ActivationRange::SignedUnit => {
                if lo == -1.0 && hi == 1.0 {
                    raw
                } else if (lo + hi).abs() <= f32::EPSILON {
                    raw.mul_scalar(hi)
                } else {
                    raw.mul_scalar(0.5).add_scalar(0.5).mul_scalar(hi - lo).add_scalar(lo)
                }
            }
            ActivationRange::Unit => {
                if lo == 0.0 && hi == 1.0 {
                    raw
                } else if lo == 0.0 {
                    raw.mul_scalar(hi)
                } else {
                    raw.mul_scalar(hi - lo).add_scalar(lo)
                }
            }
        })
    }

    /// Select actions for every queried agent.
    ///
    /// Returns per-agent continuous action vectors and, in discrete mode, the
    /// chosen branch indices alongside. During training, continuous actions
    /// get Gaussian exploration noise and are clamped back to the agent's
    /// bounds; evaluation actions are deterministic.
    ///
    /// `agent_mask` skips unqueried agents entirely; `env_defined_actions`
    /// take precedence over everything and are returned verbatim (discrete
    /// overrides are also one-hot encoded into the continuous map).
    pub fn get_action(
        &self,
        states: &Observations,
        training: bool,
        agent_mask: Option<&HashMap<String, bool>>,
        env_defined_actions: Option<&HashMap<String, AgentAction>>,
    ) -> Result<(HashMap<String, Vec<f32>>, Option<HashMap<String, i64>>)> {
        let mut continuous = HashMap::new();
        let mut discrete: Option<HashMap<String, i64>> =
            self.discrete_actions.then(HashMap::new);

        for (idx, agent) in self.agent_ids.iter().enumerate() {
            if let Some(action) = env_defined_actions.and_then(|map| map.get(agent)) {
                match action {
                    AgentAction::Continuous(values) => {
                        if self.discrete_actions {
                            if let Some(map) = discrete.as_mut() {
                                map.insert(agent.clone(), argmax(values));
                            }
                        }
                        continuous.insert(agent.clone(), values.clone());
                    }
                    AgentAction::Discrete(branch) => {
                        let dim = self.action_dims[idx];
                        if *branch < 0 || *branch as usize >= dim {
                            return Err(MarlError::Config(format!(
                                "env-defined action {branch} out of range for agent `{agent}` with {dim} branches"
                            )));
                        }
                        let mut one_hot = vec![0.0; dim];
                        one_hot[*branch as usize] = 1.0;
                        continuous.insert(agent.clone(), one_hot);
                        if let Some(map) = discrete.as_mut() {
                            map.insert(agent.clone(), *branch);
                        }
                    }
                }
                continue;
            }

            let queried = agent_mask.map_or(true, |mask| mask.get(agent).copied().unwrap_or(true));
            if !queried {
                continue;
            }

            let observation = states
                .get(agent)
                .ok_or_else(|| MarlError::Config(format!("no observation for agent `{agent}`")))?;
            let features = feature_count(&self.state_dims[idx]);
            let encoded = if self.one_hot {
                one_hot_observation(observation, features, agent)?
            } else {
                if observation.len() != features {
                    return Err(MarlError::Config(format!(
                        "observation for agent `{agent}` has {} features, expected {features}",
                        observation.len()
                    )));
                }
                observation.clone()
            };

            let input: Tensor<B, 2> = vec![encoded].to_tensor(&self.device);
            let raw = self.actors[idx].forward_actor(input);
            let mut action = self.scale_action_tensor(raw, idx)?;

            if self.discrete_actions {
                let values = tensor_row(action);
                if let Some(map) = discrete.as_mut() {
                    map.insert(agent.clone(), argmax(&values));
                }
                continuous.insert(agent.clone(), values);
            } else {
                if training {
                    let noise = Tensor::random_like(
                        &action,
                        Distribution::Normal(0.0, self.expl_noise[idx] as f64),
                    );
                    action = action.add(noise).clamp(self.min_action[idx], self.max_action[idx]);
                }
                continuous.insert(agent.clone(), tensor_row(action));
            }
        }

        Ok((continuous, discrete))
    }

    /// One MATD3 update over a sampled joint batch.
    ///
    /// Returns the accumulated per-agent critic-loss history; this call's
    /// entry is the mean of the two critic losses.
    pub fn learn(&mut self, batch: &ExperienceBatch<B>) -> Result<HashMap<String, Vec<f32>>> {
        self.validate_batch(batch)?;

        let n_agents = self.agent_ids.len();
        let mut states = Vec::with_capacity(n_agents);
        let mut actions = Vec::with_capacity(n_agents);
        let mut rewards = Vec::with_capacity(n_agents);
        let mut next_states = Vec::with_capacity(n_agents);
        let mut dones = Vec::with_capacity(n_agents);

        for (idx, agent) in self.agent_ids.iter().enumerate() {
            let mut state = fetch(&batch.states, agent)?;
            let mut next_state = fetch(&batch.next_states, agent)?;
            if self.one_hot {
                let classes = feature_count(&self.state_dims[idx]);
                state = self.one_hot_tensor(state, classes);
                next_state = self.one_hot_tensor(next_state, classes);
            }
            states.push(state);
            actions.push(fetch(&batch.actions, agent)?);
            rewards.push(fetch(&batch.rewards, agent)?);
            next_states.push(next_state);
            dones.push(fetch(&batch.dones, agent)?);
        }

        let joint_state = Tensor::cat(states.clone(), 1);
        let joint_action = Tensor::cat(actions.clone(), 1);
        let next_joint_state = Tensor::cat(next_states.clone(), 1);

        // Next joint action from the target policies, optionally smoothed.
        let mut target_actions = Vec::with_capacity(n_agents);
        for idx in 0..n_agents {
            let mut action = self.actor_targets[idx].forward_actor(next_states[idx].clone());
            if let Some(smoothing) = self.target_smoothing {
                let noise = Tensor::random_like(&action, Distribution::Normal(0.0, smoothing.std as f64))
                    .clamp(-smoothing.clip, smoothing.clip);
                action = action.add(noise);
                action = match self.actors[idx].output_activation().bounded_range() {
                    Some(ActivationRange::SignedUnit) => action.clamp(-1.0, 1.0),
                    Some(ActivationRange::Unit) => action.clamp(0.0, 1.0),
                    None => action,
                };
            }
            target_actions.push(action);
        }
        let next_joint_action = Tensor::cat(target_actions, 1);

        // Critic updates: both critics of every agent, every call.
        let mut call_losses = Vec::with_capacity(n_agents);
        for idx in 0..n_agents {
            let target_q1 = self.critic_targets_1[idx]
                .forward_critic(next_joint_state.clone(), next_joint_action.clone());
            let target_q2 = self.critic_targets_2[idx]
                .forward_critic(next_joint_state.clone(), next_joint_action.clone());
            let not_done = dones[idx].clone().neg().add_scalar(1.0);
            let target = rewards[idx]
                .clone()
                .add(target_q1.min_pair(target_q2).mul(not_done).mul_scalar(self.gamma))
                .detach();

            let q1 = self.critics_1[idx].forward_critic(joint_state.clone(), joint_action.clone());
            let loss_1 = q1.sub(target.clone()).powf_scalar(2.0).mean();
            let loss_1_val = loss_1.clone().into_scalar().elem::<f32>();
            // First backward of the pair skips the cross-replica all-reduce.
            let grads_1 = {
                let _guard = self.accelerator.as_ref().map(|ctx| ctx.no_sync());
                loss_1.backward()
            };
            let grads_1 = GradientsParams::from_grads(grads_1, &self.critics_1[idx]);
            let critic_1 = self.critics_1[idx].clone();
            self.critics_1[idx] = self.critic_1_optimizers[idx].step(self.lr_critic, critic_1, grads_1);

            let q2 = self.critics_2[idx].forward_critic(joint_state.clone(), joint_action.clone());
            let loss_2 = q2.sub(target).powf_scalar(2.0).mean();
            let loss_2_val = loss_2.clone().into_scalar().elem::<f32>();
            let grads_2 = GradientsParams::from_grads(loss_2.backward(), &self.critics_2[idx]);
            let critic_2 = self.critics_2[idx].clone();
            self.critics_2[idx] = self.critic_2_optimizers[idx].step(self.lr_critic, critic_2, grads_2);

            call_losses.push(0.5 * (loss_1_val + loss_2_val));
        }

        // Delayed policy updates, then target sync (actor targets only move
        // on calls that moved the actors).
        let update_actors = self.learn_counter % self.policy_freq as u64 == 0;
        if update_actors {
            for idx in 0..n_agents {
                let own_action = self.actors[idx].forward_actor(states[idx].clone());
                let mut parts = Vec::with_capacity(n_agents);
                for other in 0..n_agents {
                    parts.push(if other == idx {
                        own_action.clone()
                    } else {
                        actions[other].clone()
                    });
                }
                let substituted = Tensor::cat(parts, 1);

                let actor_loss = self.critics_1[idx]
                    .forward_critic(joint_state.clone(), substituted)
                    .neg()
                    .mean();
                let grads = GradientsParams::from_grads(actor_loss.backward(), &self.actors[idx]);
                let actor = self.actors[idx].clone();
                self.actors[idx] = self.actor_optimizers[idx].step(self.lr_actor, actor, grads);
            }
            for idx in 0..n_agents {
                let online = self.actors[idx].clone();
                self.actor_targets[idx].soft_update(&online, self.tau);
            }
        }

        for idx in 0..n_agents {
            let online = self.critics_1[idx].clone();
            self.critic_targets_1[idx].soft_update(&online, self.tau);
            let online = self.critics_2[idx].clone();
            self.critic_targets_2[idx].soft_update(&online, self.tau);
        }

        self.learn_counter += 1;

        for (agent, loss) in self.agent_ids.iter().zip(call_losses) {
            if let Some(history) = self.critic_losses.get_mut(agent) {
                history.push(loss);
            }
        }

        Ok(self.critic_losses.clone())
    }

    fn validate_batch(&self, batch: &ExperienceBatch<B>) -> Result<()> {
        let n_agents = self.agent_ids.len();
        let roles: [(&str, &HashMap<String, Tensor<B, 2>>); 5] = [
            ("states", &batch.states),
            ("actions", &batch.actions),
            ("rewards", &batch.rewards),
            ("next_states", &batch.next_states),
            ("dones", &batch.dones),
        ];

        for (name, map) in &roles {
            if map.len() != n_agents {
                return Err(MarlError::MalformedBatch(format!(
                    "{name} holds {} agents, expected {n_agents}",
                    map.len()
                )));
            }
        }

        let mut batch_len: Option<usize> = None;
        for (idx, agent) in self.agent_ids.iter().enumerate() {
            for (name, map) in &roles {
                let tensor = map.get(agent).ok_or_else(|| {
                    MarlError::MalformedBatch(format!("{name} is missing agent `{agent}`"))
                })?;
                let dims = tensor.dims();
                match batch_len {
                    None => batch_len = Some(dims[0]),
                    Some(expected) if expected != dims[0] => {
                        return Err(MarlError::MalformedBatch(format!(
                            "{name} for agent `{agent}` has batch size {}, expected {expected}",
                            dims[0]
                        )));
                    }
                    _ => {}
                }

                let expected_width = match *name {
                    "states" | "next_states" => {
                        if self.one_hot {
                            1
                        } else {
                            feature_count(&self.state_dims[idx])
                        }
                    }
                    "actions" => self.action_dims[idx],
                    _ => 1,
                };
                if dims[1] != expected_width {
                    return Err(MarlError::MalformedBatch(format!(
                        "{name} for agent `{agent}` has width {}, expected {expected_width}",
                        dims[1]
                    )));
                }
            }
        }

        Ok(())
    }

    fn one_hot_tensor(&self, indices: Tensor<B, 2>, classes: usize) -> Tensor<B, 2> {
        let class_range = Tensor::<B, 1, Int>::arange(0..classes as i64, &self.device)
            .float()
            .reshape([1, classes]);
        indices.sub(class_range).abs().lower_elem(0.5).float()
    }

    /// Update `target` toward `online` by this trainer's `tau`.
    pub fn soft_update<N: Network<B>>(&self, online: &N, target: &mut N) {
        target.soft_update(online, self.tau);
    }

    /// Evaluate the current (deterministic) policies.
    ///
    /// Runs `num_episodes` episodes of at most `max_steps` steps, summing
    /// rewards across agents; returns the mean episode score. When
    /// `swap_channels` is set, 3-dimensional observations are rearranged from
    /// channels-last to channels-first before hitting the actors.
    pub fn test<E: MultiAgentEnv>(
        &self,
        env: &mut E,
        max_steps: usize,
        num_episodes: usize,
        swap_channels: bool,
    ) -> Result<f32> {
        let episodes = num_episodes.max(1);
        let mut total = 0.0_f32;

        for _ in 0..episodes {
            let (mut observations, mut info) = env.reset();
            let mut score = 0.0_f32;

            for _ in 0..max_steps {
                let states = if swap_channels {
                    self.rearrange_observations(&observations)
                } else {
                    observations.clone()
                };
                let (continuous, discrete) = self.get_action(
                    &states,
                    false,
                    info.agent_mask.as_ref(),
                    info.env_defined_actions.as_ref(),
                )?;

                let mut joint_action = HashMap::new();
                if let Some(discrete) = discrete {
                    for (agent, branch) in discrete {
                        joint_action.insert(agent, AgentAction::Discrete(branch));
                    }
                } else {
                    for (agent, values) in continuous {
                        joint_action.insert(agent, AgentAction::Continuous(values));
                    }
                }

                let step = env.step(&joint_action);
                score += step.rewards.values().sum::<f32>();

                let finished = self.agent_ids.iter().all(|agent| {
                    step.terminations.get(agent).copied().unwrap_or(false)
                        || step.truncations.get(agent).copied().unwrap_or(false)
                });
                observations = step.observations;
                info = step.info;
                if finished {
                    break;
                }
            }

            total += score;
        }

        Ok(total / episodes as f32)
    }

    fn rearrange_observations(&self, observations: &Observations) -> Observations {
        let mut out = HashMap::with_capacity(observations.len());
        for (idx, agent) in self.agent_ids.iter().enumerate() {
            if let Some(observation) = observations.get(agent) {
                let rearranged = match self.state_dims[idx].as_slice() {
                    [channels, height, width] => {
                        crate::env::hwc_to_chw(observation, *height, *width, *channels)
                    }
                    _ => observation.clone(),
                };
                out.insert(agent.clone(), rearranged);
            }
        }
        out
    }

    /// Clone this trainer into an independent instance.
    ///
    /// Networks are copied through their records so the two instances share
    /// no parameter storage. Optimizer moments are carried over only once
    /// learning has begun; a never-trained trainer duplicates with fresh
    /// optimizers. `index` overrides the population slot; `wrap` keeps the
    /// distributed context attached.
    pub fn duplicate(&self, index: Option<usize>, wrap: bool) -> Result<Self> {
        let device = self.device.clone();
        let mode = self.compile_mode;

        let actors = clone_networks(&self.actors, &device, mode)?;
        let actor_targets = clone_networks(&self.actor_targets, &device, mode)?;
        let critics_1 = clone_networks(&self.critics_1, &device, mode)?;
        let critic_targets_1 = clone_networks(&self.critic_targets_1, &device, mode)?;
        let critics_2 = clone_networks(&self.critics_2, &device, mode)?;
        let critic_targets_2 = clone_networks(&self.critic_targets_2, &device, mode)?;

        let mut actor_optimizers: Vec<OptimizerAdaptor<Adam, A, B>> =
            actors.iter().map(|_| AdamConfig::new().init()).collect();
        let mut critic_1_optimizers: Vec<OptimizerAdaptor<Adam, C, B>> =
            critics_1.iter().map(|_| AdamConfig::new().init()).collect();
        let mut critic_2_optimizers: Vec<OptimizerAdaptor<Adam, C, B>> =
            critics_2.iter().map(|_| AdamConfig::new().init()).collect();
        if self.learn_counter > 0 {
            actor_optimizers = self
                .actor_optimizers
                .iter()
                .zip(actor_optimizers)
                .map(|(source, fresh)| fresh.load_record(source.to_record()))
                .collect();
            critic_1_optimizers = self
                .critic_1_optimizers
                .iter()
                .zip(critic_1_optimizers)
                .map(|(source, fresh)| fresh.load_record(source.to_record()))
                .collect();
            critic_2_optimizers = self
                .critic_2_optimizers
                .iter()
                .zip(critic_2_optimizers)
                .map(|(source, fresh)| fresh.load_record(source.to_record()))
                .collect();
        }

        Ok(Self {
            agent_ids: self.agent_ids.clone(),
            state_dims: self.state_dims.clone(),
            action_dims: self.action_dims.clone(),
            one_hot: self.one_hot,
            discrete_actions: self.discrete_actions,
            min_action: self.min_action.clone(),
            max_action: self.max_action.clone(),
            expl_noise: self.expl_noise.clone(),
            batch_size: self.batch_size,
            lr_actor: self.lr_actor,
            lr_critic: self.lr_critic,
            learn_step: self.learn_step,
            gamma: self.gamma,
            tau: self.tau,
            policy_freq: self.policy_freq,
            target_smoothing: self.target_smoothing,
            compile_mode: self.compile_mode,
            total_state_dim: self.total_state_dim,
            total_action_dim: self.total_action_dim,
            learn_counter: self.learn_counter,
            actors,
            actor_targets,
            critics_1,
            critic_targets_1,
            critics_2,
            critic_targets_2,
            actor_optimizers,
            critic_1_optimizers,
            critic_2_optimizers,
            accelerator: if wrap { self.accelerator.clone() } else { None },
            device,
            index: index.unwrap_or(self.index),
            mutation: self.mutation.clone(),
            scores: self.scores.clone(),
            fitness: self.fitness.clone(),
            steps: self.steps.clone(),
            critic_losses: self.critic_losses.clone(),
        })
    }

    /// Snapshot the full trainer state into a serializable checkpoint.
    pub fn checkpoint(&self) -> Result<Matd3Checkpoint<A::Arch, C::Arch>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();

        let mut actor_optimizer_states = Vec::with_capacity(self.actor_optimizers.len());
        for optimizer in &self.actor_optimizers {
            actor_optimizer_states.push(recorder.record(optimizer.to_record(), ())?);
        }
        let mut critic_1_optimizer_states = Vec::with_capacity(self.critic_1_optimizers.len());
        for optimizer in &self.critic_1_optimizers {
            critic_1_optimizer_states.push(recorder.record(optimizer.to_record(), ())?);
        }
        let mut critic_2_optimizer_states = Vec::with_capacity(self.critic_2_optimizers.len());
        for optimizer in &self.critic_2_optimizers {
            critic_2_optimizer_states.push(recorder.record(optimizer.to_record(), ())?);
        }

        Ok(Matd3Checkpoint {
            agent_ids: self.agent_ids.clone(),
            state_dims: self.state_dims.clone(),
            action_dims: self.action_dims.clone(),
            one_hot: self.one_hot,
            discrete_actions: self.discrete_actions,
            min_action: self.min_action.clone(),
            max_action: self.max_action.clone(),
            expl_noise: self.expl_noise.clone(),
            batch_size: self.batch_size,
            lr_actor: self.lr_actor,
            lr_critic: self.lr_critic,
            learn_step: self.learn_step,
            gamma: self.gamma,
            tau: self.tau,
            policy_freq: self.policy_freq,
            learn_counter: self.learn_counter,
            target_smoothing: self.target_smoothing,
            compile_mode: self.compile_mode,
            actor_archs: self.actors.iter().map(Network::arch).collect(),
            actor_states: record_all(&self.actors)?,
            actor_target_archs: self.actor_targets.iter().map(Network::arch).collect(),
            actor_target_states: record_all(&self.actor_targets)?,
            critic_1_archs: self.critics_1.iter().map(Network::arch).collect(),
            critic_1_states: record_all(&self.critics_1)?,
            critic_target_1_archs: self.critic_targets_1.iter().map(Network::arch).collect(),
            critic_target_1_states: record_all(&self.critic_targets_1)?,
            critic_2_archs: self.critics_2.iter().map(Network::arch).collect(),
            critic_2_states: record_all(&self.critics_2)?,
            critic_target_2_archs: self.critic_targets_2.iter().map(Network::arch).collect(),
            critic_target_2_states: record_all(&self.critic_targets_2)?,
            actor_optimizer_states,
            critic_1_optimizer_states,
            critic_2_optimizer_states,
            mutation: self.mutation.clone(),
            index: self.index,
            scores: self.scores.clone(),
            fitness: self.fitness.clone(),
            steps: self.steps.clone(),
            critic_losses: self.critic_losses.clone(),
        })
    }

    /// Rebuild a trainer from a checkpoint on the given device.
    ///
    /// Optimizer moments are always restored. Structural mismatches (any
    /// per-agent list whose length disagrees with `agent_ids`) are rejected.
    pub fn from_checkpoint(checkpoint: Matd3Checkpoint<A::Arch, C::Arch>, device: B::Device) -> Result<Self> {
        let Matd3Checkpoint {
            agent_ids,
            state_dims,
            action_dims,
            one_hot,
            discrete_actions,
            min_action,
            max_action,
            expl_noise,
            batch_size,
            lr_actor,
            lr_critic,
            learn_step,
            gamma,
            tau,
            policy_freq,
            learn_counter,
            target_smoothing,
            compile_mode,
            actor_archs,
            actor_states,
            actor_target_archs,
            actor_target_states,
            critic_1_archs,
            critic_1_states,
            critic_target_1_archs,
            critic_target_1_states,
            critic_2_archs,
            critic_2_states,
            critic_target_2_archs,
            critic_target_2_states,
            actor_optimizer_states,
            critic_1_optimizer_states,
            critic_2_optimizer_states,
            mutation,
            index,
            scores,
            fitness,
            steps,
            critic_losses,
        } = checkpoint;

        let n_agents = agent_ids.len();
        if n_agents == 0 {
            return Err(MarlError::Checkpoint("checkpoint contains no agents".into()));
        }
        for (name, len) in [
            ("state_dims", state_dims.len()),
            ("action_dims", action_dims.len()),
            ("min_action", min_action.len()),
            ("max_action", max_action.len()),
            ("expl_noise", expl_noise.len()),
            ("actor archs", actor_archs.len()),
            ("actor states", actor_states.len()),
            ("actor target archs", actor_target_archs.len()),
            ("actor target states", actor_target_states.len()),
            ("critic-1 archs", critic_1_archs.len()),
            ("critic-1 states", critic_1_states.len()),
            ("critic-1 target archs", critic_target_1_archs.len()),
            ("critic-1 target states", critic_target_1_states.len()),
            ("critic-2 archs", critic_2_archs.len()),
            ("critic-2 states", critic_2_states.len()),
            ("critic-2 target archs", critic_target_2_archs.len()),
            ("critic-2 target states", critic_target_2_states.len()),
            ("actor optimizer states", actor_optimizer_states.len()),
            ("critic-1 optimizer states", critic_1_optimizer_states.len()),
            ("critic-2 optimizer states", critic_2_optimizer_states.len()),
        ] {
            if len != n_agents {
                return Err(MarlError::Checkpoint(format!(
                    "{name} has {len} entries for {n_agents} agents"
                )));
            }
        }

        let actors = load_all::<B, A>(&actor_archs, actor_states, &device, compile_mode)?;
        let actor_targets = load_all::<B, A>(&actor_target_archs, actor_target_states, &device, compile_mode)?;
        let critics_1 = load_all::<B, C>(&critic_1_archs, critic_1_states, &device, compile_mode)?;
        let critic_targets_1 =
            load_all::<B, C>(&critic_target_1_archs, critic_target_1_states, &device, compile_mode)?;
        let critics_2 = load_all::<B, C>(&critic_2_archs, critic_2_states, &device, compile_mode)?;
        let critic_targets_2 =
            load_all::<B, C>(&critic_target_2_archs, critic_target_2_states, &device, compile_mode)?;

        let total_state_dim: usize = state_dims.iter().map(|dims| feature_count(dims)).sum();
        let total_action_dim: usize = action_dims.iter().sum();
        let joint_dim = total_state_dim + total_action_dim;
        for (idx, id) in agent_ids.iter().enumerate() {
            let expected = (feature_count(&state_dims[idx]), action_dims[idx]);
            for actor in [&actors[idx], &actor_targets[idx]] {
                let (input, output) = actor.io_dims();
                if (input, output) != expected {
                    return Err(MarlError::Checkpoint(format!(
                        "actor for agent `{id}` maps {input}->{output} features, \
                         expected {}->{}",
                        expected.0, expected.1
                    )));
                }
            }
            for critic in [&critics_1[idx], &critic_targets_1[idx], &critics_2[idx], &critic_targets_2[idx]] {
                let (input, output) = critic.io_dims();
                if input != joint_dim || output != 1 {
                    return Err(MarlError::Checkpoint(format!(
                        "critic for agent `{id}` maps {input}->{output} features, \
                         expected {joint_dim}->1"
                    )));
                }
            }
        }

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let mut actor_optimizers: Vec<OptimizerAdaptor<Adam, A, B>> = Vec::with_capacity(n_agents);
        for bytes in actor_optimizer_states {
            let fresh: OptimizerAdaptor<Adam, A, B> = AdamConfig::new().init();
            actor_optimizers.push(fresh.load_record(recorder.load(bytes, &device)?));
        }
        let mut critic_1_optimizers: Vec<OptimizerAdaptor<Adam, C, B>> = Vec::with_capacity(n_agents);
        for bytes in critic_1_optimizer_states {
            let fresh: OptimizerAdaptor<Adam, C, B> = AdamConfig::new().init();
            critic_1_optimizers.push(fresh.load_record(recorder.load(bytes, &device)?));
        }
        let mut critic_2_optimizers: Vec<OptimizerAdaptor<Adam, C, B>> = Vec::with_capacity(n_agents);
        for bytes in critic_2_optimizer_states {
            let fresh: OptimizerAdaptor<Adam, C, B> = AdamConfig::new().init();
            critic_2_optimizers.push(fresh.load_record(recorder.load(bytes, &device)?));
        }

        Ok(Self {
            total_state_dim,
            total_action_dim,
            agent_ids,
            state_dims,
            action_dims,
            one_hot,
            discrete_actions,
            min_action,
            max_action,
            expl_noise,
            batch_size,
            lr_actor,
            lr_critic,
            learn_step,
            gamma,
            tau,
            policy_freq,
            target_smoothing,
            compile_mode,
            learn_counter,
            actors,
            actor_targets,
            critics_1,
            critic_targets_1,
            critics_2,
            critic_targets_2,
            actor_optimizers,
            critic_1_optimizers,
            critic_2_optimizers,
            accelerator: None,
            device,
            index,
            mutation,
            scores,
            fitness,
            steps,
            critic_losses,
        })
    }

    /// Replace the online networks (and their targets) with new ones, as an
    /// architecture mutation does. Targets restart as exact copies and all
    /// optimizers restart fresh; learning history is kept.
    pub fn install_networks(&mut self, actors: Vec<A>, critics_1: Vec<C>, critics_2: Vec<C>) -> Result<()> {
        let n_agents = self.agent_ids.len();
        for (role, len) in [
            ("actors", actors.len()),
            ("first critics", critics_1.len()),
            ("second critics", critics_2.len()),
        ] {
            if len != n_agents {
                return Err(MarlError::InvalidNetworks(format!(
                    "{len} {role} supplied for {n_agents} agents"
                )));
            }
        }

        let (mut actors, mut critics_1, mut critics_2) = (actors, critics_1, critics_2);
        if let Some(mode) = self.compile_mode {
            actors = actors.into_iter().map(|net| net.compiled(mode)).collect();
            critics_1 = critics_1.into_iter().map(|net| net.compiled(mode)).collect();
            critics_2 = critics_2.into_iter().map(|net| net.compiled(mode)).collect();
        }

        self.actor_targets = actors.clone();
        self.critic_targets_1 = critics_1.clone();
        self.critic_targets_2 = critics_2.clone();
        self.actor_optimizers = actors.iter().map(|_| AdamConfig::new().init()).collect();
        self.critic_1_optimizers = critics_1.iter().map(|_| AdamConfig::new().init()).collect();
        self.critic_2_optimizers = critics_2.iter().map(|_| AdamConfig::new().init()).collect();
        self.actors = actors;
        self.critics_1 = critics_1;
        self.critics_2 = critics_2;
        Ok(())
    }

    /// Strip compiled wrappers from every network, leaving plain modules.
    pub fn unwrap_models(&mut self) {
        self.actors = std::mem::take(&mut self.actors).into_iter().map(|n| n.unwrapped()).collect();
        self.actor_targets = std::mem::take(&mut self.actor_targets)
            .into_iter()
            .map(|n| n.unwrapped())
            .collect();
        self.critics_1 = std::mem::take(&mut self.critics_1).into_iter().map(|n| n.unwrapped()).collect();
        self.critic_targets_1 = std::mem::take(&mut self.critic_targets_1)
            .into_iter()
            .map(|n| n.unwrapped())
            .collect();
        self.critics_2 = std::mem::take(&mut self.critics_2).into_iter().map(|n| n.unwrapped()).collect();
        self.critic_targets_2 = std::mem::take(&mut self.critic_targets_2)
            .into_iter()
            .map(|n| n.unwrapped())
            .collect();
        self.compile_mode = None;
    }

    // Accessors.

    pub fn agent_ids(&self) -> &[String] {
        &self.agent_ids
    }

    pub fn n_agents(&self) -> usize {
        self.agent_ids.len()
    }

    pub fn actors(&self) -> &[A] {
        &self.actors
    }

    pub fn actor_targets(&self) -> &[A] {
        &self.actor_targets
    }

    pub fn critics_1(&self) -> &[C] {
        &self.critics_1
    }

    pub fn critic_targets_1(&self) -> &[C] {
        &self.critic_targets_1
    }

    pub fn critics_2(&self) -> &[C] {
        &self.critics_2
    }

    pub fn critic_targets_2(&self) -> &[C] {
        &self.critic_targets_2
    }

    pub fn learn_counter(&self) -> u64 {
        self.learn_counter
    }

    /// Accumulated per-agent critic-loss history.
    pub fn critic_losses(&self) -> &HashMap<String, Vec<f32>> {
        &self.critic_losses
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn learn_step(&self) -> usize {
        self.learn_step
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn tau(&self) -> f32 {
        self.tau
    }

    pub fn policy_freq(&self) -> usize {
        self.policy_freq
    }

    pub fn lr_actor(&self) -> f64 {
        self.lr_actor
    }

    pub fn lr_critic(&self) -> f64 {
        self.lr_critic
    }

    pub fn expl_noise(&self) -> &[f32] {
        &self.expl_noise
    }

    pub fn min_action(&self) -> &[f32] {
        &self.min_action
    }

    pub fn max_action(&self) -> &[f32] {
        &self.max_action
    }

    pub fn total_state_dim(&self) -> usize {
        self.total_state_dim
    }

    pub fn total_action_dim(&self) -> usize {
        self.total_action_dim
    }

    pub fn discrete_actions(&self) -> bool {
        self.discrete_actions
    }

    pub fn one_hot(&self) -> bool {
        self.one_hot
    }

    pub fn compile_mode(&self) -> Option<CompileMode> {
        self.compile_mode
    }

    pub fn target_smoothing(&self) -> Option<TargetSmoothing> {
        self.target_smoothing
    }

    pub fn set_target_smoothing(&mut self, smoothing: Option<TargetSmoothing>) {
        self.target_smoothing = smoothing;
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

fn feature_count(dims: &[usize]) -> usize {
    dims.iter().product()
}

fn scale_value(range: ActivationRange, lo: f32, hi: f32, value: f32) -> f32 {
    match range {
        ActivationRange::SignedUnit => {
            if lo == -1.0 && hi == 1.0 {
                value
            } else if (lo + hi).abs() <= f32::EPSILON {
                value * hi
            } else {
                (0.5 * value + 0.5) * (hi - lo) + lo
            }
        }
        ActivationRange::Unit => {
            if lo == 0.0 && hi == 1.0 {
                value
            } else if lo == 0.0 {
                value * hi
            } else {
                value * (hi - lo) + lo
            }
        }
    }
}

fn argmax(values: &[f32]) -> i64 {
    let mut best = 0;
    for (i, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = i;
        }
    }
    best as i64
}

fn one_hot_observation(observation: &[f32], classes: usize, agent: &str) -> Result<Vec<f32>> {
    let raw = observation
        .first()
        .copied()
        .ok_or_else(|| MarlError::Config(format!("empty observation for agent `{agent}`")))?;
    let class = raw as usize;
    if raw < 0.0 || raw.fract() != 0.0 || class >= classes {
        return Err(MarlError::Config(format!(
            "one-hot observation {raw} is not a class index in 0..{classes} (agent `{agent}`)"
        )));
    }
    let mut encoded = vec![0.0; classes];
    encoded[class] = 1.0;
    Ok(encoded)
}

fn tensor_row<B: Backend>(tensor: Tensor<B, 2>) -> Vec<f32> {
    let data = tensor.to_data();
    data.as_slice::<B::FloatElem>()
        .unwrap()
        .iter()
        .map(|value| value.elem::<f32>())
        .collect()
}

fn fetch<B: Backend>(map: &HashMap<String, Tensor<B, 2>>, agent: &str) -> Result<Tensor<B, 2>> {
    map.get(agent)
        .cloned()
        .ok_or_else(|| MarlError::MalformedBatch(format!("missing tensor for agent `{agent}`")))
}

fn record_bytes<B: AutodiffBackend, N: Network<B>>(net: &N) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Ok(recorder.record(net.clone().unwrapped().into_record(), ())?)
}

fn record_all<B: AutodiffBackend, N: Network<B>>(nets: &[N]) -> Result<Vec<Vec<u8>>> {
    nets.iter().map(|net| record_bytes(net)).collect()
}

fn load_network<B: AutodiffBackend, N: Network<B>>(
    arch: &N::Arch,
    bytes: Vec<u8>,
    device: &B::Device,
) -> Result<N> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record = recorder.load(bytes, device)?;
    Ok(N::build(arch, device).load_record(record))
}

fn load_all<B: AutodiffBackend, N: Network<B>>(
    archs: &[N::Arch],
    states: Vec<Vec<u8>>,
    device: &B::Device,
    mode: Option<CompileMode>,
) -> Result<Vec<N>> {
    archs
        .iter()
        .zip(states)
        .map(|(arch, bytes)| {
            let net = load_network::<B, N>(arch, bytes, device)?;
            Ok(match mode {
                Some(mode) => net.compiled(mode),
                None => net,
            })
        })
        .collect()
}

fn clone_networks<B: AutodiffBackend, N: Network<B>>(
    nets: &[N],
    device: &B::Device,
    mode: Option<CompileMode>,
) -> Result<Vec<N>> {
    nets.iter()
        .map(|net| {
            let copy = load_network::<B, N>(&net.arch(), record_bytes(net)?, device)?;
            Ok(match mode {
                Some(mode) => copy.compiled(mode),
                None => copy,
            })
        })
        .collect()
}
