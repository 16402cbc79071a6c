use crate::model::{Mode, Module, Param};
use ndarray::prelude::*;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use std::f32;

#[derive(Debug, Clone)]
///  z = a_prev.W + b
pub struct FcLayer {
    pub weights: Array2<f32>, // (input_size, output_size)
    pub bias: Array1<f32>,    //  (output_size)
    // for backprop
    last_input: Option<Array2<f32>>, // (batch_size, input_size), this is the prev layer activation
    //
    pub w_grad: Option<Array2<f32>>, // (input_size, output_size)
    pub b_grad: Option<Array1<f32>>, // (output_size)
}

impl FcLayer {
    pub fn new<R: Rng + ?Sized>(input_size: usize, output_size: usize, rng: &mut R) -> FcLayer {
        FcLayer {
            weights: FcLayer::init_2d_mat(input_size, output_size, rng),
            bias: Array1::zeros(output_size),
            //
            last_input: None,
            //
            w_grad: None,
            b_grad: None,
        }
    }
    fn get_scale(input_size: usize) -> f32 {
        (2.0 / input_size as f32).sqrt()
    }
    fn init_2d_mat<R: Rng + ?Sized>(input_size: usize, output_size: usize, rng: &mut R) -> Array2<f32> {
        Array2::<f32>::random_using((input_size, output_size), Uniform::new(-1.0, 1.0), rng)
            * FcLayer::get_scale(input_size)
    }
}

impl Module for FcLayer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        let input = input
            .into_dimensionality::<Ix2>()
            .expect("FC layer input should be 2D");

        // (batch_size, input_size) X (input_size, output_size) = (batch_size, output_size)
        let out = input.dot(&self.weights) + &self.bias;

        if mode == Mode::Train {
            self.last_input = Some(input);
        }
        out.into_dyn()
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        let dz = dz
            .into_dimensionality::<Ix2>()
            .expect("FC layer backward input should be 2D");

        let last_input = self
            .last_input
            .take()
            .expect("Need to do a training forward pass before the backward");

        // The incoming dz already carries the 1/batch_size of the mean loss.
        // w: (batch_size, input_size)^T X (batch_size, output_size) = (input_size, output_size)
        self.w_grad = Some(last_input.t().dot(&dz));
        // b: (batch_size, output_size) summed over batch-axis = (output_size)
        self.b_grad = Some(dz.sum_axis(Axis(0)));

        //  (batch_size, output_size) X (input_size, output_size)^T = (batch_size, input_size)
        dz.dot(&self.weights.t()).into_dyn()
    }

    fn zero_grad(&mut self) {
        self.w_grad = None;
        self.b_grad = None;
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        vec![
            Param {
                value: self.weights.view_mut().into_dyn(),
                grad: self.w_grad.as_ref().map(|g| g.view().into_dyn()),
            },
            Param {
                value: self.bias.view_mut().into_dyn(),
                grad: self.b_grad.as_ref().map(|g| g.view().into_dyn()),
            },
        ]
    }

    fn state_tensors(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        vec![
            ("weight", self.weights.clone().into_dyn()),
            ("bias", self.bias.clone().into_dyn()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn gradients_match_manual_computation() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut fc = FcLayer::new(2, 1, &mut rng);
        fc.weights = array![[2.0], [-1.0]];
        fc.bias = array![0.5];

        let out = fc.forward(array![[1.0f32, 3.0], [2.0, 0.0]].into_dyn(), Mode::Train);
        assert_eq!(out, array![[-0.5f32], [4.5]].into_dyn());

        let dx = fc.backward(array![[1.0f32], [0.5]].into_dyn());
        assert_eq!(fc.w_grad.as_ref().unwrap(), &array![[2.0f32], [3.0]]);
        assert_eq!(fc.b_grad.as_ref().unwrap(), &array![1.5f32]);
        assert_eq!(dx, array![[2.0f32, -1.0], [1.0, -0.5]].into_dyn());
    }

    #[test]
    fn eval_forward_keeps_no_cache() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut fc = FcLayer::new(4, 3, &mut rng);
        fc.forward(Array2::<f32>::ones((2, 4)).into_dyn(), Mode::Eval);
        assert!(fc.last_input.is_none());
    }
}
