//! Run settings shared by the CLI and the training loop.

use crate::error::{Error, Result};
use crate::model::{DropoutConfig, NetConfig};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TrainConfig {
    /// Mini-batch size for training
    pub batch_size: usize,
    /// Mini-batch size for evaluation of the test split
    pub test_batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// SGD momentum coefficient
    pub momentum: f32,
    /// Seeds weight init, dropout masks and batch order
    pub seed: u64,
    /// How many batches to wait before reporting training progress
    pub log_interval: usize,
    pub disable_dropout: bool,
    pub dropout: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            batch_size: 64,
            test_batch_size: 1000,
            epochs: 10,
            learning_rate: 0.01,
            momentum: 0.5,
            seed: 1,
            log_interval: 10,
            disable_dropout: false,
            dropout: 0.5,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return Err(Error::InvalidConfig("batch sizes must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("at least one epoch is required".into()));
        }
        if self.log_interval == 0 {
            return Err(Error::InvalidConfig("log interval must be positive".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if !self.disable_dropout && !(0.0..=1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout probability must be in [0, 1], got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn net_config(&self) -> NetConfig {
        NetConfig {
            dropout: DropoutConfig::from_flags(self.disable_dropout, self.dropout),
            seed: self.seed,
        }
    }
}
