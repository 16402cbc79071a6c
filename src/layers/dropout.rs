use crate::model::{Mode, Module};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropoutKind {
    /// Zero whole feature maps of a (batch_size, channels, height, width) input.
    ChannelWise,
    /// Zero individual activations.
    ElementWise,
}

/// Inverted dropout: kept activations are scaled by 1 / (1 - rate) during
/// training so that `Mode::Eval` is the identity.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    rate: f32,
    kind: DropoutKind,
    rng: StdRng,
    // for backprop
    last_mask: Option<ArrayD<f32>>, // 0 or 1/(1-rate), broadcastable to the input
}

impl DropoutLayer {
    pub fn new(rate: f32, kind: DropoutKind, seed: u64) -> DropoutLayer {
        assert!((0.0..=1.0).contains(&rate), "dropout rate must be in [0, 1]");
        DropoutLayer {
            rate,
            kind,
            rng: StdRng::seed_from_u64(seed),
            last_mask: None,
        }
    }

    pub fn channel_wise(rate: f32, seed: u64) -> DropoutLayer {
        DropoutLayer::new(rate, DropoutKind::ChannelWise, seed)
    }

    pub fn element_wise(rate: f32, seed: u64) -> DropoutLayer {
        DropoutLayer::new(rate, DropoutKind::ElementWise, seed)
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn kind(&self) -> DropoutKind {
        self.kind
    }

    fn sample_mask(&mut self, input_shape: &[usize]) -> ArrayD<f32> {
        let mask_shape: Vec<usize> = match self.kind {
            DropoutKind::ChannelWise => {
                // (batch_size, channels, 1, 1): one draw per feature map
                let mut shape = vec![1; input_shape.len()];
                shape[..2].copy_from_slice(&input_shape[..2]);
                shape
            }
            DropoutKind::ElementWise => input_shape.to_vec(),
        };
        let scale = if self.rate < 1.0 { 1.0 / (1.0 - self.rate) } else { 0.0 };
        let rate = self.rate;
        let rng = &mut self.rng;
        ArrayD::from_shape_simple_fn(mask_shape, || {
            if rng.gen::<f32>() < rate {
                0.0
            } else {
                scale
            }
        })
    }
}

impl Module for DropoutLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        match mode {
            Mode::Eval => input,
            Mode::Train => {
                let mask = self.sample_mask(input.shape());
                let out = input * &mask;
                self.last_mask = Some(mask);
                out
            }
        }
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let mask = self
            .last_mask
            .as_ref()
            .expect("[backward] [dropout] Run a training forward before backward");
        dz * mask
    }

    fn zero_grad(&mut self) {
        self.last_mask = None;
    }

    /// The configured rate is the only persistent state of a dropout layer.
    fn state_tensors(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        vec![("rate", arr0(self.rate).into_dyn())]
    }
}
