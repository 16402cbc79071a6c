use crate::model::Net;

use ndarray::prelude::*;

pub trait Optimizer {
    /// Run one optimization step.
    /// Note:
    /// - Assumes forward+backward pass have been done.
    /// - May mutate the optimizer internal state (e.g. momentum).
    /// - Parameters without a gradient are left untouched.
    fn step(&mut self, nn: &mut Net);
}

/// SGD with momentum, in the "velocity" form:
/// delta = viscosity * prev_delta - learning_rate * grad; w := w + delta
pub struct SGDMomentum {
    pub learning_rate: f32,
    pub viscosity: f32,
    pub velocity: Vec<Option<ArrayD<f32>>>, // one per network parameter
}

impl SGDMomentum {
    pub fn new(nn: &mut Net, learning_rate: f32, viscosity: f32) -> SGDMomentum {
        SGDMomentum {
            learning_rate,
            viscosity,
            velocity: vec![None; nn.parameters().len()],
        }
    }
}

impl Optimizer for SGDMomentum {
    fn step(&mut self, nn: &mut Net) {
        let (learning_rate, viscosity) = (self.learning_rate, self.viscosity);
        let params = nn.parameters();
        assert_eq!(
            params.len(),
            self.velocity.len(),
            "optimizer is bound to another network"
        );

        for (param, velocity) in params.into_iter().zip(self.velocity.iter_mut()) {
            let Some(grad) = param.grad else {
                continue;
            };
            let delta = match velocity.take() {
                // First step ever. No velocities yet. Update == vanilla SGD update.
                None => grad.mapv(|g| -g * learning_rate),
                Some(prev_delta) => prev_delta * viscosity - &grad * learning_rate,
            };
            let mut value = param.value;
            value += &delta;
            *velocity = Some(delta);
        }
    }
}
