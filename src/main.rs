use cnn_batchnorm::data::{BatchLoader, BatchSource};
use cnn_batchnorm::mnist_dataset::load_mnist;
use cnn_batchnorm::optim::SGDMomentum;
use cnn_batchnorm::report::{JsonLinesObserver, LogObserver, Observer, ProgressBarObserver};
use cnn_batchnorm::{train, Net, TrainConfig};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "MNIST CNN with batch normalization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new model and report train/test metrics after every epoch
    Train {
        /// Input batch size for training
        #[arg(long, default_value_t = 64)]
        batch_size: usize,
        /// Input batch size for testing
        #[arg(long, default_value_t = 1000)]
        test_batch_size: usize,
        #[arg(long, default_value_t = 10)]
        epochs: usize,
        #[arg(long = "lr", default_value_t = 0.01)]
        learning_rate: f32,
        /// SGD momentum
        #[arg(long, default_value_t = 0.5)]
        momentum: f32,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// How many batches to wait before logging training status
        #[arg(long, default_value_t = 10)]
        log_interval: usize,
        /// Build the network without its dropout layers
        #[arg(long)]
        disable_dropout: bool,
        /// Dropout probability
        #[arg(long, default_value_t = 0.5)]
        dropout: f32,
        /// Directory holding the MNIST idx files
        #[arg(long, env = "MNIST_DATA_DIR", default_value = "data/")]
        data_dir: PathBuf,
        /// Only use the first N training examples
        #[arg(long)]
        train_limit: Option<usize>,
        /// Only use the first N test examples
        #[arg(long)]
        test_limit: Option<usize>,
        /// Append one JSON line of metrics per epoch to this file
        #[arg(long)]
        metrics_path: Option<PathBuf>,
        /// Show a progress bar instead of plain log lines for training progress
        #[arg(long)]
        progress_bar: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            batch_size,
            test_batch_size,
            epochs,
            learning_rate,
            momentum,
            seed,
            log_interval,
            disable_dropout,
            dropout,
            data_dir,
            train_limit,
            test_limit,
            metrics_path,
            progress_bar,
        } => {
            let config = TrainConfig {
                batch_size,
                test_batch_size,
                epochs,
                learning_rate,
                momentum,
                seed,
                log_interval,
                disable_dropout,
                dropout,
            };
            config.validate()?;
            info!(config = %serde_json::to_string(&config)?, "training configuration");

            let (train_dataset, test_dataset) = load_mnist(&data_dir, train_limit, test_limit)
                .with_context(|| format!("loading MNIST from {}", data_dir.display()))?;

            let mut train_loader = BatchLoader::new(train_dataset, config.batch_size, true, seed);
            let mut test_loader = BatchLoader::new(
                test_dataset,
                config.test_batch_size,
                true,
                seed.wrapping_add(1),
            );

            let mut nn = Net::new(&config.net_config())?;
            info!(dropout = ?nn.dropout(), "network built");
            let mut optimizer = SGDMomentum::new(&mut nn, config.learning_rate, config.momentum);

            let mut observers: Vec<Box<dyn Observer>> = Vec::new();
            if progress_bar {
                let total = (config.epochs * train_loader.num_batches()) as u64;
                observers.push(Box::new(ProgressBarObserver::new(total)));
            } else {
                observers.push(Box::new(LogObserver));
            }
            if let Some(path) = &metrics_path {
                let observer = JsonLinesObserver::create(path)
                    .with_context(|| format!("creating metrics file {}", path.display()))?;
                observers.push(Box::new(observer));
            }

            let reports = train::run(
                &mut nn,
                &mut train_loader,
                &mut test_loader,
                &mut optimizer,
                &config,
                &mut observers,
            )
            .context("training failed")?;

            if let Some(last) = reports.last() {
                info!(
                    train_accuracy = last.train.rounded_accuracy(),
                    test_accuracy = last.test.rounded_accuracy(),
                    "training completed"
                );
            }
        }
    }
    Ok(())
}
