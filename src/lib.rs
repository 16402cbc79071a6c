pub mod config;
pub mod data;
pub mod error;
pub mod layers;
pub mod loss;
pub mod mnist_dataset;
pub mod model;
pub mod optim;
pub mod report;
pub mod train;

pub use config::TrainConfig;
pub use error::{Error, Result};
pub use model::{DropoutConfig, Mode, Net, NetConfig};
