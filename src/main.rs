#![recursion_limit = "256"]

use std::path::PathBuf;
use std::process::ExitCode;

use burn::{
    backend::Autodiff,
    config::Config,
    train::{ApplicationLoggerInstaller, FileApplicationLoggerInstaller},
};
use clap::{Args, Parser, Subcommand};
use mnist_cnn::{
    dataset::{self, DigitsDataset},
    inference,
    training::{self, TrainingConfig},
};

#[cfg(feature = "wgpu")]
mod backend {
    pub type Backend = burn::backend::Wgpu;

    pub fn device() -> burn::backend::wgpu::WgpuDevice {
        burn::backend::wgpu::WgpuDevice::default()
    }
}

#[cfg(all(feature = "tch-cpu", not(feature = "wgpu")))]
mod backend {
    pub type Backend = burn::backend::LibTorch;

    pub fn device() -> burn::backend::libtorch::LibTorchDevice {
        burn::backend::libtorch::LibTorchDevice::Cpu
    }
}

#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "tch-cpu"))))]
mod backend {
    pub type Backend = burn::backend::NdArray;

    pub fn device() -> burn::backend::ndarray::NdArrayDevice {
        burn::backend::ndarray::NdArrayDevice::Cpu
    }
}

/// Train and run a convolutional handwritten digit classifier.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on `<data-dir>/train.csv`, holding out a validation split
    Train(TrainArgs),
    /// Classify `<data-dir>/test.csv` with a trained model
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Directory holding train.csv
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory receiving the config, checkpoints, logs and trained model
    #[arg(long, default_value = "artifacts")]
    artifact_dir: String,

    /// JSON training config replacing the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    num_workers: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding a trained model
    #[arg(long, default_value = "artifacts")]
    artifact_dir: String,

    /// Submission file, written as `ImageId,Label`
    #[arg(long, default_value = "submission.csv")]
    output: PathBuf,

    #[arg(long)]
    batch_size: Option<usize>,
}

impl TrainArgs {
    fn training_config(&self) -> mnist_cnn::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };

        if let Some(num_epochs) = self.epochs {
            config.num_epochs = num_epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        Ok(config)
    }
}

fn run_train(args: TrainArgs) -> mnist_cnn::Result<()> {
    let config = args.training_config()?;
    let dataset = DigitsDataset::from_dir(&args.data_dir, config.valid_ratio, config.seed)?;
    let device = backend::device();

    let model = training::train::<Autodiff<backend::Backend>>(
        &args.artifact_dir,
        &dataset,
        config.clone(),
        device.clone(),
    )?;

    let evaluation = inference::evaluate(&model, &dataset.valid(), config.batch_size, &device);
    log::info!(
        "Validation accuracy {:.2}% (loss {:.4}) over {} images",
        evaluation.accuracy * 100.0,
        evaluation.loss,
        evaluation.num_items
    );
    println!(
        "Validation accuracy: {:.2}% over {} images",
        evaluation.accuracy * 100.0,
        evaluation.num_items
    );

    Ok(())
}

fn run_predict(args: PredictArgs) -> mnist_cnn::Result<()> {
    std::fs::create_dir_all(&args.artifact_dir)?;
    let installer =
        FileApplicationLoggerInstaller::new(&format!("{}/predict.log", args.artifact_dir));
    if let Err(err) = installer.install() {
        eprintln!("Failed to install the application logger: {err}");
    }

    let device = backend::device();
    let (config, model) = inference::load_model::<backend::Backend>(&args.artifact_dir, &device)?;
    let test_set = dataset::test_set(&args.data_dir)?;
    let batch_size = args.batch_size.unwrap_or(config.batch_size);

    let predictions = inference::predict(&model, &test_set, batch_size, &device);
    inference::write_submission(&args.output, &predictions)?;
    println!(
        "Wrote {} predictions to {}",
        predictions.len(),
        args.output.display()
    );

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Predict(args) => run_predict(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
