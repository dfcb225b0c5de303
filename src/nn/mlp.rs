//! Feed-forward network used as the default actor and critic.
//!
//! Hidden layers use ReLU; the output layer applies a configurable
//! [`OutputActivation`]. The same module serves both roles: an actor forwards
//! an observation batch, a critic forwards the concatenation of joint
//! observations and joint actions.

use burn::{
    module::{Ignored, Module, Param},
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::{
        activation::{relu, sigmoid, softmax},
        backend::{AutodiffBackend, Backend},
        Distribution, TensorData,
    },
};

use crate::traits::network::{ActorNetwork, CriticNetwork, Network, OutputActivation};

/// Architecture descriptor for [`Mlp`].
#[derive(Config, Debug, PartialEq)]
pub struct MlpSpec {
    /// Input feature dimension.
    pub input_dim: usize,
    /// Hidden layer widths (e.g. `[64, 64]`).
    pub hidden_size: Vec<usize>,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Activation applied to the output layer.
    #[config(default = "OutputActivation::Linear")]
    pub output_activation: OutputActivation,
}

/// Multi-layer perceptron with a configurable output activation.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
    output_activation: Ignored<OutputActivation>,
}

impl MlpSpec {
    /// Initialize a freshly parameterized network on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        let mut layers = Vec::new();

        if self.hidden_size.is_empty() {
            // Direct input → output connection.
            layers.push(LinearConfig::new(self.input_dim, self.output_dim).init(device));
        } else {
            layers.push(LinearConfig::new(self.input_dim, self.hidden_size[0]).init(device));

            for i in 0..self.hidden_size.len() - 1 {
                layers.push(LinearConfig::new(self.hidden_size[i], self.hidden_size[i + 1]).init(device));
            }

            let last_hidden = *self.hidden_size.last().unwrap();
            layers.push(LinearConfig::new(last_hidden, self.output_dim).init(device));
        }

        Mlp {
            layers,
            output_activation: Ignored(self.output_activation),
        }
    }
}

impl<B: Backend> Mlp<B> {
    /// Forward pass over a `[batch, features]` tensor.
    ///
    /// ReLU between layers, then the configured output activation.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;

        for layer in &self.layers[..self.layers.len() - 1] {
            x = relu(layer.forward(x));
        }

        x = self.layers.last().unwrap().forward(x);

        match self.output_activation.0 {
            OutputActivation::Linear => x,
            OutputActivation::Tanh => x.tanh(),
            OutputActivation::Sigmoid => sigmoid(x),
            OutputActivation::Softmax => softmax(x, 1),
            OutputActivation::GumbelSoftmax => gumbel_softmax(x, 1.0),
        }
    }

    fn input_dim(&self) -> usize {
        self.layers[0].weight.val().dims()[0]
    }

    fn output_dim(&self) -> usize {
        self.layers.last().unwrap().weight.val().dims()[1]
    }

    fn hidden_size(&self) -> Vec<usize> {
        self.layers[..self.layers.len() - 1]
            .iter()
            .map(|layer| layer.weight.val().dims()[1])
            .collect()
    }
}

/// Gumbel-softmax relaxation of a categorical sample.
///
/// `g = -ln(-ln(u + ε) + ε)` with `u ~ U(0, 1)`, then a temperature-scaled
/// softmax over `logits + g`.
pub fn gumbel_softmax<B: Backend>(logits: Tensor<B, 2>, temperature: f32) -> Tensor<B, 2> {
    let uniform = Tensor::random_like(&logits, Distribution::Uniform(0.0, 1.0));
    let gumbel = uniform
        .add_scalar(1e-10)
        .log()
        .neg()
        .add_scalar(1e-10)
        .log()
        .neg();

    softmax(logits.add(gumbel).div_scalar(temperature), 1)
}

// Soft-update helpers: θ′ ← τθ + (1 − τ)θ′, applied per parameter tensor.
// detach() keeps the target's autodiff graph from accumulating across calls.
fn soft_update_tensor_inplace<B: Backend, const D: usize>(
    this: &mut Param<Tensor<B, D>>,
    that: &Param<Tensor<B, D>>,
    tau: f32,
) {
    assert_eq!(
        this.val().dims(),
        that.val().dims(),
        "soft update between structurally different networks"
    );
    *this = this.clone().map(|tensor| tensor * (1.0 - tau) + that.val().detach() * tau);
}

fn soft_update_linear_inplace<B: Backend>(this: &mut Linear<B>, that: &Linear<B>, tau: f32) {
    soft_update_tensor_inplace(&mut this.weight, &that.weight, tau);

    if let (Some(b1), Some(b2)) = (&mut this.bias, &that.bias) {
        soft_update_tensor_inplace(b1, b2, tau);
    }
}

impl<B: AutodiffBackend> Network<B> for Mlp<B> {
    type Arch = MlpSpec;

    fn arch(&self) -> MlpSpec {
        MlpSpec::new(self.input_dim(), self.hidden_size(), self.output_dim())
            .with_output_activation(self.output_activation.0)
    }

    fn build(arch: &MlpSpec, device: &B::Device) -> Self {
        arch.init(device)
    }

    fn output_activation(&self) -> OutputActivation {
        self.output_activation.0
    }

    fn io_dims(&self) -> (usize, usize) {
        (self.input_dim(), self.output_dim())
    }

    fn soft_update(&mut self, other: &Self, tau: f32) {
        assert_eq!(
            self.layers.len(),
            other.layers.len(),
            "soft update between structurally different networks"
        );
        for (target_layer, online_layer) in self.layers.iter_mut().zip(other.layers.iter()) {
            soft_update_linear_inplace(target_layer, online_layer, tau);
        }
    }

    fn parameters(&self) -> Vec<TensorData> {
        let mut params = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            params.push(layer.weight.val().to_data());
            if let Some(bias) = &layer.bias {
                params.push(bias.val().to_data());
            }
        }
        params
    }
}

impl<B: AutodiffBackend> ActorNetwork<B> for Mlp<B> {
    fn forward_actor(&self, observations: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(observations)
    }
}

impl<B: AutodiffBackend> CriticNetwork<B> for Mlp<B> {
    fn forward_critic(&self, joint_observations: Tensor<B, 2>, joint_actions: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(Tensor::cat(vec![joint_observations, joint_actions], 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::backend::Autodiff;

    type TB = Autodiff<NdArray>;

    #[test]
    fn forward_shapes() {
        let device = NdArrayDevice::default();
        let mlp = MlpSpec::new(4, vec![64, 64], 2).init::<NdArray>(&device);

        let input = Tensor::<NdArray, 2>::random([8, 4], Distribution::Uniform(-1.0, 1.0), &device);
        let output = mlp.forward(input);

        assert_eq!(output.shape().dims, [8, 2]);
    }

    #[test]
    fn forward_no_hidden_layers() {
        let device = NdArrayDevice::default();
        let mlp = MlpSpec::new(4, vec![], 2).init::<NdArray>(&device);

        let input = Tensor::<NdArray, 2>::random([1, 4], Distribution::Default, &device);
        assert_eq!(mlp.forward(input).shape().dims, [1, 2]);
    }

    #[test]
    fn tanh_output_bounded() {
        let device = NdArrayDevice::default();
        let mlp = MlpSpec::new(4, vec![64], 2)
            .with_output_activation(OutputActivation::Tanh)
            .init::<NdArray>(&device);

        let input = Tensor::<NdArray, 2>::random([3, 4], Distribution::Default, &device);
        let output = mlp.forward(input);

        for &value in output.to_data().as_slice::<f32>().unwrap() {
            assert!((-1.0..=1.0).contains(&value), "tanh output out of range: {value}");
        }
    }

    #[test]
    fn gumbel_softmax_rows_sum_to_one() {
        let device = NdArrayDevice::default();
        let logits = Tensor::<NdArray, 2>::random([5, 4], Distribution::Normal(0.0, 1.0), &device);

        let sample = gumbel_softmax(logits, 1.0);
        let sums = sample.sum_dim(1);

        for &sum in sums.to_data().as_slice::<f32>().unwrap() {
            assert!((sum - 1.0).abs() < 1e-5, "row sum {sum}");
        }
    }

    #[test]
    fn arch_roundtrip() {
        let device = NdArrayDevice::default();
        let spec = MlpSpec::new(6, vec![32, 16], 3).with_output_activation(OutputActivation::GumbelSoftmax);
        let mlp = spec.init::<TB>(&device);

        assert_eq!(Network::<TB>::arch(&mlp), spec);
    }

    #[test]
    fn soft_update_moves_target_toward_online() {
        let device = NdArrayDevice::default();
        let spec = MlpSpec::new(3, vec![8], 2);
        let online = spec.init::<TB>(&device);
        let mut target = spec.init::<TB>(&device);

        let tau = 0.1;
        let online_params = Network::<TB>::parameters(&online);
        let before = Network::<TB>::parameters(&target);

        Network::<TB>::soft_update(&mut target, &online, tau);
        let after = Network::<TB>::parameters(&target);

        for ((prev, online_p), next) in before.iter().zip(online_params.iter()).zip(after.iter()) {
            let prev = prev.as_slice::<f32>().unwrap();
            let online_p = online_p.as_slice::<f32>().unwrap();
            let next = next.as_slice::<f32>().unwrap();
            for i in 0..prev.len() {
                let expected = tau * online_p[i] + (1.0 - tau) * prev[i];
                assert!((next[i] - expected).abs() < 1e-6);
            }
        }
    }
}
