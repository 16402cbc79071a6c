use crate::model::{Mode, Module, Param};
use ndarray::prelude::*;

const EPS: f32 = 1e-5;
const MOMENTUM: f32 = 0.1;

/// Batch normalization over the channel axis (axis 1).
///
/// Works for both feature maps (batch_size, channels, height, width) and
/// feature vectors (batch_size, features): statistics are taken over every
/// axis but the channel one.
///
/// In `Mode::Train` the current batch statistics are used and the running
/// statistics are updated (running variance with the unbiased estimate).
/// In `Mode::Eval` the running statistics are used.
#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    num_features: usize,
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    // for backprop
    last_x_hat: Option<Array3<f32>>, // (batch_size, channels, locations)
    last_inv_std: Option<Array1<f32>>,
    last_input_shape: Vec<usize>,
    //
    pub gamma_grad: Option<Array1<f32>>,
    pub beta_grad: Option<Array1<f32>>,
}

impl BatchNormLayer {
    pub fn new(num_features: usize) -> BatchNormLayer {
        BatchNormLayer {
            num_features,
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            last_x_hat: None,
            last_inv_std: None,
            last_input_shape: Vec::new(),
            gamma_grad: None,
            beta_grad: None,
        }
    }

    /// (channels) -> (1, channels, 1), broadcastable against (batch_size, channels, locations)
    fn per_channel(v: &Array1<f32>) -> ArrayView3<'_, f32> {
        v.view().insert_axis(Axis(0)).insert_axis(Axis(2))
    }

    fn channel_sum(a: &Array3<f32>) -> Array1<f32> {
        a.sum_axis(Axis(2)).sum_axis(Axis(0))
    }
}

impl Module for BatchNormLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        let shape = input.shape().to_vec();
        assert!(shape.len() == 2 || shape.len() == 4);
        assert!(shape[1] == self.num_features);
        let (batch_size, channels) = (shape[0], shape[1]);
        let locations: usize = shape[2..].iter().product();

        let x = input
            .to_shape((batch_size, channels, locations))
            .expect("[forward] [batchNorm] input is compatible with (batch_size, channels, locations)")
            .into_owned();

        let (mean, var) = match mode {
            Mode::Train => {
                let m = (batch_size * locations) as f32;
                let mean = BatchNormLayer::channel_sum(&x) / m;
                let centered = &x - &BatchNormLayer::per_channel(&mean);
                let var = BatchNormLayer::channel_sum(&centered.mapv(|v| v * v)) / m;

                let unbiased = if m > 1.0 { &var * (m / (m - 1.0)) } else { var.clone() };
                self.running_mean = &self.running_mean * (1.0 - MOMENTUM) + &mean * MOMENTUM;
                self.running_var = &self.running_var * (1.0 - MOMENTUM) + unbiased * MOMENTUM;
                (mean, var)
            }
            Mode::Eval => (self.running_mean.clone(), self.running_var.clone()),
        };

        let inv_std = var.mapv(|v| 1.0 / (v + EPS).sqrt());
        let x_hat = (&x - &BatchNormLayer::per_channel(&mean)) * &BatchNormLayer::per_channel(&inv_std);
        let out = &x_hat * &BatchNormLayer::per_channel(&self.gamma)
            + &BatchNormLayer::per_channel(&self.beta);

        if mode == Mode::Train {
            self.last_x_hat = Some(x_hat);
            self.last_inv_std = Some(inv_std);
            self.last_input_shape = shape.clone();
        }

        out.into_shape_with_order(shape)
            .expect("[forward] [batchNorm] output goes back to the input shape")
    }

    /// With m = batch_size * locations values per channel:
    /// dx = inv_std / m * (m * dx_hat - sum(dx_hat) - x_hat * sum(dx_hat * x_hat)),
    /// where dx_hat = dz * gamma and sums run over everything but the channel axis.
    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let x_hat = self
            .last_x_hat
            .as_ref()
            .expect("[backward] [batchNorm] Run a training forward before backward");
        let inv_std = self
            .last_inv_std
            .as_ref()
            .expect("[backward] [batchNorm] Run a training forward before backward");

        let (batch_size, channels, locations) = x_hat.dim();
        let m = (batch_size * locations) as f32;
        let dz = dz
            .to_shape((batch_size, channels, locations))
            .expect("[backward] [batchNorm] dz is compatible with the cached input")
            .into_owned();

        self.gamma_grad = Some(BatchNormLayer::channel_sum(&(&dz * x_hat)));
        self.beta_grad = Some(BatchNormLayer::channel_sum(&dz));

        let dx_hat = &dz * &BatchNormLayer::per_channel(&self.gamma);
        let sum_dx_hat = BatchNormLayer::channel_sum(&dx_hat);
        let sum_dx_hat_x_hat = BatchNormLayer::channel_sum(&(&dx_hat * x_hat));

        let dx = (dx_hat * m
            - &BatchNormLayer::per_channel(&sum_dx_hat)
            - x_hat * &BatchNormLayer::per_channel(&sum_dx_hat_x_hat))
            * &BatchNormLayer::per_channel(inv_std)
            / m;

        dx.into_shape_with_order(self.last_input_shape.clone())
            .expect("[backward] [batchNorm] dx goes back to the input shape")
    }

    fn zero_grad(&mut self) {
        self.gamma_grad = None;
        self.beta_grad = None;
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                value: self.gamma.view_mut().into_dyn(),
                grad: self.gamma_grad.as_ref().map(|g| g.view().into_dyn()),
            },
            Param {
                value: self.beta.view_mut().into_dyn(),
                grad: self.beta_grad.as_ref().map(|g| g.view().into_dyn()),
            },
        ]
    }

    fn state_tensors(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        vec![
            ("weight", self.gamma.clone().into_dyn()),
            ("bias", self.beta.clone().into_dyn()),
            ("running_mean", self.running_mean.clone().into_dyn()),
            ("running_var", self.running_var.clone().into_dyn()),
        ]
    }
}
