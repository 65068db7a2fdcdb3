// MNIST training harness.
//
// Builds a network from an architecture file (or the built-in MLP), trains it
// with mini-batch SGD and reports test accuracy after every epoch.
//
// Expected files:
//   - data/train-images.idx3-ubyte, data/train-labels.idx1-ubyte
//   - data/t10k-images.idx3-ubyte, data/t10k-labels.idx1-ubyte
// Outputs:
//   - logs/training_loss_cnn.txt (epoch,loss,accuracy,time)
//   - the best network, when --save-best (or best_model_path) is given

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rust_cnn::architecture::{build_network, default_mlp, load_architecture};
use rust_cnn::config::{load_config, validate_config, TrainingConfig};
use rust_cnn::dataset::{argmax, load_mnist_limited};
use rust_cnn::network::{TrainOptions, TrainingHistory};
use rust_cnn::utils::SimpleRng;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "mnist_cnn")]
#[command(about = "Train a convolutional network on MNIST with mini-batch SGD")]
struct Cli {
    /// Training configuration (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Architecture description (JSON); overrides the one named in the config
    #[arg(long, value_name = "FILE")]
    architecture: Option<PathBuf>,

    /// Directory holding the four MNIST IDX files
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Seed for initialization and shuffling (default: clock)
    #[arg(long)]
    seed: Option<u64>,

    /// Load at most this many samples from each file
    #[arg(long)]
    limit: Option<usize>,

    /// Save the network here whenever test accuracy improves
    #[arg(long, value_name = "FILE")]
    save_best: Option<PathBuf>,

    /// CSV training log
    #[arg(long, value_name = "FILE", default_value = "logs/training_loss_cnn.txt")]
    log_file: PathBuf,
}

// Config file values first, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<TrainingConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TrainingConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(architecture) = &cli.architecture {
        config.architecture = Some(architecture.clone());
    }
    if let Some(epochs) = cli.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(learning_rate) = cli.learning_rate {
        config.learning_rate = learning_rate;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if cli.limit.is_some() {
        config.limit = cli.limit;
    }
    if let Some(path) = &cli.save_best {
        config.best_model_path = Some(path.clone());
    }

    validate_config(&config)?;
    Ok(config)
}

// One line per epoch: epoch,loss,accuracy,time
fn write_training_log(path: &Path, history: &TrainingHistory) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("could not create {}", path.display()))?;
    let mut log = BufWriter::new(file);

    writeln!(log, "epoch,loss,accuracy,time")?;
    for report in &history.epochs {
        writeln!(
            log,
            "{},{},{},{}",
            report.epoch,
            report.mean_loss,
            report.accuracy.unwrap_or(0.0),
            report.elapsed_secs
        )?;
    }
    log.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let mut rng = config.seed.map_or_else(SimpleRng::from_time, SimpleRng::new);

    let architecture = match &config.architecture {
        Some(path) => load_architecture(path)
            .with_context(|| format!("failed to load architecture {}", path.display()))?,
        None => default_mlp(),
    };
    let mut network = build_network(&architecture, config.learning_rate, &mut rng)
        .context("failed to build network")?;
    println!("{}", network);

    info!("Loading MNIST...");
    let training = load_mnist_limited(&config.train_images, &config.train_labels, config.limit)
        .context("failed to load training set")?;
    let test = load_mnist_limited(&config.test_images, &config.test_labels, config.limit)
        .context("failed to load test set")?;
    info!("Train: {} | Test: {}", training.len(), test.len());

    let mut options = TrainOptions::new(config.epochs, config.batch_size);
    options.best_model_path = config.best_model_path.clone();

    info!(
        "Training: epochs={} batch={} lr={}",
        config.epochs, config.batch_size, config.learning_rate
    );
    let history = network.sgd(&options, &training, Some(test.as_slice()), &mut rng)?;
    write_training_log(&cli.log_file, &history)?;

    if let Some(best) = history.best_accuracy {
        println!("Best test accuracy: {:.2}%", best * 100.0);
    }

    if let Some(sample) = test.first() {
        let prediction = network.predict(sample.input())?;
        println!("Prediction: {} | Label: {}", prediction, argmax(sample.label()));
    }

    Ok(())
}
