pub use crate::layers::activations::{LogSoftmaxLayer, ReluLayer};
pub use crate::layers::conv::{Conv2Dlayer, FlattenLayer, MaxPoolLayer};
pub use crate::layers::dropout::{DropoutKind, DropoutLayer};
pub use crate::layers::fc::FcLayer;
pub use crate::layers::norm::BatchNormLayer;
pub use crate::model::{Mode, Module, Param};

use ndarray::prelude::*;

pub mod activations;
pub mod conv;
pub mod dropout;
pub mod fc;
pub mod norm;

#[derive(Debug, Clone)]
pub enum Layer {
    FC(FcLayer),
    Conv(Conv2Dlayer),
    BatchNorm(BatchNormLayer),
    Pool(MaxPoolLayer),
    ReLU(ReluLayer),
    Dropout(DropoutLayer),
    Flatten(FlattenLayer),
    LogSoftmax(LogSoftmaxLayer),
}

impl Module for Layer {
    fn forward(&mut self, input: ArrayD<f32>, mode: Mode) -> ArrayD<f32> {
        match self {
            Layer::FC(l) => l.forward(input, mode),
            Layer::Conv(l) => l.forward(input, mode),
            Layer::BatchNorm(l) => l.forward(input, mode),
            Layer::Pool(l) => l.forward(input, mode),
            Layer::ReLU(l) => l.forward(input, mode),
            Layer::Dropout(l) => l.forward(input, mode),
            Layer::Flatten(l) => l.forward(input, mode),
            Layer::LogSoftmax(l) => l.forward(input, mode),
        }
    }

    fn backward(&mut self, dz: ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Layer::FC(l) => l.backward(dz),
            Layer::Conv(l) => l.backward(dz),
            Layer::BatchNorm(l) => l.backward(dz),
            Layer::Pool(l) => l.backward(dz),
            Layer::ReLU(l) => l.backward(dz),
            Layer::Dropout(l) => l.backward(dz),
            Layer::Flatten(l) => l.backward(dz),
            Layer::LogSoftmax(l) => l.backward(dz),
        }
    }

    fn zero_grad(&mut self) {
        match self {
            Layer::FC(l) => l.zero_grad(),
            Layer::Conv(l) => l.zero_grad(),
            Layer::BatchNorm(l) => l.zero_grad(),
            Layer::Pool(l) => l.zero_grad(),
            Layer::ReLU(l) => l.zero_grad(),
            Layer::Dropout(l) => l.zero_grad(),
            Layer::Flatten(l) => l.zero_grad(),
            Layer::LogSoftmax(l) => l.zero_grad(),
        }
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        match self {
            Layer::FC(l) => l.parameters(),
            Layer::Conv(l) => l.parameters(),
            Layer::BatchNorm(l) => l.parameters(),
            _ => Vec::new(), // no weights in other layers
        }
    }

    fn state_tensors(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        match self {
            Layer::FC(l) => l.state_tensors(),
            Layer::Conv(l) => l.state_tensors(),
            Layer::BatchNorm(l) => l.state_tensors(),
            Layer::Dropout(l) => l.state_tensors(),
            _ => Vec::new(),
        }
    }
}
