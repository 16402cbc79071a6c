use crate::model::{Mode, Module};

use ndarray::prelude::*;

use std::f32;

#[derive(Debug, Clone, Default)]
pub struct ReluLayer {
    last_input: Option<ArrayD<f32>>,
}

impl ReluLayer {
    pub fn new() -> ReluLayer {
        ReluLayer { last_input: None }
    }
}

impl Module for ReluLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        let out = input.mapv(|x| x.max(0.0));
        if mode == Mode::Train {
            self.last_input = Some(input);
        }
        out
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        self.last_input
            .as_ref()
            .expect("run a training forward before backward")
            .mapv(|x| if x > 0.0 { 1.0 } else { 0.0 })
            * dz
    }

    fn zero_grad(&mut self) {
        self.last_input = None;
    }
}

/// Log-softmax over the class axis of a (batch_size, num_classes) input.
#[derive(Debug, Clone, Default)]
pub struct LogSoftmaxLayer {
    last_probs: Option<Array2<f32>>,
}

impl LogSoftmaxLayer {
    pub fn new() -> LogSoftmaxLayer {
        LogSoftmaxLayer { last_probs: None }
    }
}

impl Module for LogSoftmaxLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        let input = input
            .into_dimensionality::<Ix2>()
            .expect("Input to log-softmax should be 2D");

        // x - max - ln(sum(exp(x - max)))
        let max = input.fold_axis(Axis(1), f32::NEG_INFINITY, |&a, &b| a.max(b));
        let shifted = input - max.insert_axis(Axis(1));
        let log_sum = shifted.mapv(f32::exp).sum_axis(Axis(1)).mapv(f32::ln);
        let out = shifted - log_sum.insert_axis(Axis(1));

        if mode == Mode::Train {
            self.last_probs = Some(out.mapv(f32::exp));
        }
        out.into_dyn()
    }

    /// dx = dz - softmax * sum(dz) along the class axis.
    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let dz = dz
            .into_dimensionality::<Ix2>()
            .expect("log-softmax backward input should be 2D");
        let probs = self
            .last_probs
            .as_ref()
            .expect("run a training forward before backward");
        let dz_sum = dz.sum_axis(Axis(1)).insert_axis(Axis(1));
        (&dz - &(probs * &dz_sum)).into_dyn()
    }

    fn zero_grad(&mut self) {
        self.last_probs = None;
    }
}
