use crate::error::{Error, Result};
use crate::layers::{
    BatchNormLayer, Conv2Dlayer, DropoutLayer, FcLayer, FlattenLayer, Layer, LogSoftmaxLayer,
    MaxPoolLayer, ReluLayer,
};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Execution context of a forward pass.
///
/// `Train` uses current-batch statistics in batch-norm layers, activates
/// dropout and caches what the backward pass needs. `Eval` uses the running
/// statistics, disables dropout and caches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A learnable tensor together with its gradient, if a backward pass filled one.
pub struct Param<'a> {
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: Option<ArrayViewD<'a, f32>>,
}

pub trait Module {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32>;
    /// Backward pass
    ///
    /// The `backward` function receives a gradient `dz` which corresponds to dLoss/dz,
    /// where z is the current layer output.
    /// The job of the backward pass is to combine its 'local gradients' - namely dz/dx, dz/dw -
    /// with this incoming gradient - dLoss/dz - using the chain rule.
    /// The backward should:
    /// - return dLoss/dx = dz/dx * dLoss/dz
    /// - fill in the gradients for the layer's own weights dLoss/dw = dz/dw * dLoss/dz
    ///
    /// Note:
    /// - the dz/dx Jacobian matrix is not materialized. Instead, each layer
    ///   directly computes the matrix-vector product of interest.
    /// - the returned dLoss/dx has the same shape as the layer input.
    /// - only valid after a `Mode::Train` forward.
    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32>;
    fn zero_grad(&mut self);
    /// Learnable tensors, in a stable order.
    fn parameters(&mut self) -> Vec<Param<'_>> {
        Vec::new()
    }
    /// Every persistent tensor of the layer (parameters and buffers), by name.
    fn state_tensors(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        Vec::new()
    }
}

/// Which architecture variant to build. Picked once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DropoutConfig {
    NoDropout,
    WithDropout(f32),
}

impl DropoutConfig {
    pub fn from_flags(disable_dropout: bool, rate: f32) -> DropoutConfig {
        if disable_dropout {
            DropoutConfig::NoDropout
        } else {
            DropoutConfig::WithDropout(rate)
        }
    }
}

impl Default for DropoutConfig {
    fn default() -> Self {
        DropoutConfig::WithDropout(0.5)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetConfig {
    pub dropout: DropoutConfig,
    pub seed: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            dropout: DropoutConfig::default(),
            seed: 1,
        }
    }
}

/// MNIST classifier:
/// conv(1->10,5) bn pool relu [drop2d] conv(10->20,5) bn pool relu
/// flatten fc(320->50) bn relu [drop] fc(50->10) bn log_softmax
#[derive(Debug, Clone)]
pub struct Net {
    pub layers: Vec<Layer>,
    dropout: DropoutConfig,
}

impl Net {
    /// (channels, height, width) of one input image.
    pub const INPUT_SHAPE: [usize; 3] = [1, 28, 28];
    pub const NUM_CLASSES: usize = 10;

    /// Fails with `Error::InvalidConfig` when the dropout rate is outside [0, 1].
    pub fn new(config: &NetConfig) -> Result<Net> {
        if let DropoutConfig::WithDropout(rate) = config.dropout {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConfig(format!(
                    "dropout probability must be in [0, 1], got {rate}"
                )));
            }
        }
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut layers = vec![
            Layer::Conv(Conv2Dlayer::new(1, 10, (5, 5), &mut rng)), // (1, 28, 28) --> (10, 24, 24)
            Layer::BatchNorm(BatchNormLayer::new(10)),
            Layer::Pool(MaxPoolLayer::new((2, 2))), // (10, 24, 24) --> (10, 12, 12)
            Layer::ReLU(ReluLayer::new()),
        ];
        // Applied to the stage-1 output, before conv2.
        if let DropoutConfig::WithDropout(rate) = config.dropout {
            layers.push(Layer::Dropout(DropoutLayer::channel_wise(rate, rng.gen())));
        }
        layers.extend([
            Layer::Conv(Conv2Dlayer::new(10, 20, (5, 5), &mut rng)), // (10, 12, 12) --> (20, 8, 8)
            Layer::BatchNorm(BatchNormLayer::new(20)),
            Layer::Pool(MaxPoolLayer::new((2, 2))), // (20, 8, 8) --> (20, 4, 4)
            Layer::ReLU(ReluLayer::new()),
            //
            Layer::Flatten(FlattenLayer::new()), // --> 320
            //
            Layer::FC(FcLayer::new(320, 50, &mut rng)),
            Layer::BatchNorm(BatchNormLayer::new(50)),
            Layer::ReLU(ReluLayer::new()),
        ]);
        if let DropoutConfig::WithDropout(rate) = config.dropout {
            layers.push(Layer::Dropout(DropoutLayer::element_wise(rate, rng.gen())));
        }
        layers.extend([
            Layer::FC(FcLayer::new(50, Net::NUM_CLASSES, &mut rng)),
            Layer::BatchNorm(BatchNormLayer::new(Net::NUM_CLASSES)),
            Layer::LogSoftmax(LogSoftmaxLayer::new()),
        ]);

        Ok(Net {
            layers,
            dropout: config.dropout,
        })
    }

    pub fn dropout(&self) -> DropoutConfig {
        self.dropout
    }

    /// Input: (batch_size, 1, 28, 28). Output: (batch_size, 10) log-probabilities.
    pub fn forward(&mut self, input: Array4<f32>, mode: Mode) -> Result<Array2<f32>> {
        let shape = input.shape();
        if shape[0] == 0 || shape[1..] != Net::INPUT_SHAPE {
            let mut expected = vec![shape[0].max(1)];
            expected.extend_from_slice(&Net::INPUT_SHAPE);
            return Err(Error::ShapeMismatch {
                expected,
                got: shape.to_vec(),
            });
        }
        if mode == Mode::Train && shape[0] < 2 {
            return Err(Error::BatchTooSmall(shape[0]));
        }

        let mut x = input.into_dyn();
        for layer in &mut self.layers {
            x = layer.forward(x, mode);
        }
        Ok(x.into_dimensionality::<Ix2>()
            .expect("Network output should be 2D: (batch_size, num_classes)"))
    }

    /// Propagates dLoss/dlog_probs back through every layer, filling the
    /// parameter gradients.
    pub fn backward(&mut self, dz: Array2<f32>) {
        let mut x = dz.into_dyn();
        // Iterate layers in reverse order, mutate each as we go
        for layer in self.layers.iter_mut().rev() {
            x = layer.backward(x);
        }
    }

    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    pub fn parameters(&mut self) -> Vec<Param<'_>> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.parameters())
            .collect()
    }

    /// Named snapshot of every persistent tensor, e.g. `"4.rate"`, `"0.weight"`.
    pub fn state_tensors(&self) -> Vec<(String, ArrayD<f32>)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(idx, layer)| {
                layer
                    .state_tensors()
                    .into_iter()
                    .map(move |(name, t)| (format!("{idx}.{name}"), t))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::DropoutKind;
    use crate::loss::nll_loss;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn no_dropout() -> NetConfig {
        NetConfig {
            dropout: DropoutConfig::NoDropout,
            seed: 7,
        }
    }

    #[test]
    fn output_has_ten_classes() {
        let mut net = Net::new(&NetConfig::default()).unwrap();
        let out = net
            .forward(Array4::zeros((4, 1, 28, 28)), Mode::Train)
            .unwrap();
        assert_eq!(out.dim(), (4, 10));
    }

    #[test]
    fn rejects_wrong_spatial_size() {
        let mut net = Net::new(&no_dropout()).unwrap();
        let err = net
            .forward(Array4::zeros((2, 1, 32, 32)), Mode::Eval)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let mut net = Net::new(&no_dropout()).unwrap();
        let err = net
            .forward(Array4::zeros((2, 3, 28, 28)), Mode::Eval)
            .unwrap_err();
        match err {
            Error::ShapeMismatch { expected, got } => {
                assert_eq!(expected, vec![2, 1, 28, 28]);
                assert_eq!(got, vec![2, 3, 28, 28]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn single_example_needs_eval_mode() {
        let mut net = Net::new(&no_dropout()).unwrap();
        assert!(matches!(
            net.forward(Array4::zeros((1, 1, 28, 28)), Mode::Train),
            Err(Error::BatchTooSmall(1))
        ));
        assert!(net.forward(Array4::zeros((1, 1, 28, 28)), Mode::Eval).is_ok());
    }

    #[test]
    fn dropout_layers_only_exist_when_enabled() {
        let count = |net: &Net| {
            net.layers
                .iter()
                .filter(|l| matches!(l, Layer::Dropout(_)))
                .count()
        };
        assert_eq!(count(&Net::new(&no_dropout()).unwrap()), 0);
        assert_eq!(count(&Net::new(&NetConfig::default()).unwrap()), 2);
        // stage-1 dropout sits right before the second convolution
        let net = Net::new(&NetConfig::default()).unwrap();
        match &net.layers[4] {
            Layer::Dropout(d) => {
                assert_eq!(d.kind(), DropoutKind::ChannelWise);
                assert_eq!(d.rate(), 0.5);
            }
            other => panic!("expected dropout, got {other:?}"),
        }
        assert!(matches!(net.layers[5], Layer::Conv(_)));
    }

    #[test]
    fn learnable_parameter_layout() {
        let mut net = Net::new(&no_dropout()).unwrap();
        // 2 conv + 2 fc + 4 batch-norm layers, two tensors each
        assert_eq!(net.parameters().len(), 16);
        let total: usize = net.parameters().iter().map(|p| p.value.len()).sum();
        let expected = (10 * 25 + 10)
            + (20 * 250 + 20)
            + (320 * 50 + 50)
            + (50 * 10 + 10)
            + 2 * (10 + 20 + 50 + 10);
        assert_eq!(total, expected);
    }

    #[test]
    fn same_seed_same_weights() {
        let a = Net::new(&NetConfig::default()).unwrap().state_tensors();
        let b = Net::new(&NetConfig::default()).unwrap().state_tensors();
        assert_eq!(a, b);
    }

    #[test]
    fn dropout_config_from_flags() {
        assert_eq!(DropoutConfig::from_flags(true, 0.3), DropoutConfig::NoDropout);
        assert_eq!(
            DropoutConfig::from_flags(false, 0.3),
            DropoutConfig::WithDropout(0.3)
        );
    }

    #[test]
    fn dropout_rate_outside_unit_interval_is_rejected() {
        for rate in [-0.1, 1.5, f32::NAN] {
            let config = NetConfig {
                dropout: DropoutConfig::WithDropout(rate),
                seed: 1,
            };
            assert!(matches!(Net::new(&config), Err(Error::InvalidConfig(_))));
        }
        let edge = NetConfig {
            dropout: DropoutConfig::WithDropout(1.0),
            seed: 1,
        };
        assert!(Net::new(&edge).is_ok());
    }

    fn mean_loss(net: &mut Net, x: &Array4<f32>, labels: &[u8]) -> f64 {
        let out = net.forward(x.clone(), Mode::Train).unwrap();
        let (loss, _) = nll_loss(&out, labels);
        loss.iter().map(|&l| l as f64).sum::<f64>() / labels.len() as f64
    }

    fn nudge(net: &mut Net, param_idx: usize, flat_idx: usize, delta: f32) {
        let mut params = net.parameters();
        if let Some(w) = params[param_idx].value.iter_mut().nth(flat_idx) {
            *w += delta;
        }
    }

    #[test]
    fn whole_network_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = Array4::<f32>::random_using((4, 1, 28, 28), Uniform::new(-1.0, 1.0), &mut rng);
        let labels = [3u8, 7, 0, 9];
        let mut net = Net::new(&no_dropout()).unwrap();

        net.zero_grad();
        let out = net.forward(x.clone(), Mode::Train).unwrap();
        let (_, dz) = nll_loss(&out, &labels);
        net.backward(dz);

        // conv1, conv2, fc1 and fc2 weights; checked at their largest gradient entry
        for param_idx in [0, 4, 8, 12] {
            let (flat_idx, analytic) = {
                let params = net.parameters();
                let grad = params[param_idx].grad.as_ref().unwrap();
                let largest = grad
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                    .unwrap();
                largest
            };

            let eps = 1e-3;
            nudge(&mut net, param_idx, flat_idx, eps);
            let plus = mean_loss(&mut net, &x, &labels);
            nudge(&mut net, param_idx, flat_idx, -2.0 * eps);
            let minus = mean_loss(&mut net, &x, &labels);
            nudge(&mut net, param_idx, flat_idx, eps);

            let numeric = (plus - minus) / (2.0 * eps as f64);
            let analytic = analytic as f64;
            assert!(
                (numeric - analytic).abs() <= 0.05 * analytic.abs() + 1e-3,
                "param {param_idx}[{flat_idx}]: analytic {analytic}, numeric {numeric}"
            );
        }
    }
}
