use std::io::IsTerminal;
use std::path::Path;

use crate::{
    data::{DigitBatch, DigitBatcher},
    dataset::DigitsDataset,
    error,
    model::{Model, ModelConfig},
};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        metric::{AccuracyMetric, LossMetric},
        renderer::{MetricState, MetricsRenderer, TrainingProgress},
        ClassificationOutput, LearnerBuilder, TrainOutput, TrainStep, ValidStep,
    },
};

impl<B: AutodiffBackend> TrainStep<DigitBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: DigitBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<DigitBatch<B>, ClassificationOutput<B>> for Model<B> {
    fn step(&self, batch: DigitBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 100)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    #[config(default = 0.1)]
    pub valid_ratio: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(ModelConfig::new(), AdamConfig::new())
    }
}

pub(crate) const CONFIG_FILE: &str = "config.json";
pub(crate) const MODEL_FILE: &str = "model";

/// Reports training progress through the `log` facade instead of a terminal dashboard.
pub struct ProgressLogger;

impl MetricsRenderer for ProgressLogger {
    fn update_train(&mut self, _state: MetricState) {}

    fn update_valid(&mut self, _state: MetricState) {}

    fn render_train(&mut self, item: TrainingProgress) {
        log::debug!(
            "Epoch {}/{}, iteration {} ({}/{} images)",
            item.epoch,
            item.epoch_total,
            item.iteration,
            item.progress.items_processed,
            item.progress.items_total
        );
    }

    fn render_valid(&mut self, _item: TrainingProgress) {}
}

fn create_artifact_dir(artifact_dir: &Path) -> error::Result<()> {
    // Checkpoints from an earlier run would end up in the learner summary
    if artifact_dir.join("checkpoint").exists() {
        std::fs::remove_dir_all(artifact_dir.join("checkpoint"))?;
    }
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

/// Fits a fresh model on the training split, validating after every epoch.
///
/// The effective config is written to `<artifact_dir>/config.json` and the trained weights to
/// `<artifact_dir>/model.mpk`. Progress is drawn on the terminal when there is one and logged
/// otherwise.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    dataset: &DigitsDataset,
    config: TrainingConfig,
    device: B::Device,
) -> error::Result<Model<B::InnerBackend>> {
    let renderer = (!std::io::stdout().is_terminal()).then_some(ProgressLogger);
    fit::<B>(artifact_dir, dataset, config, device, renderer)
}

fn fit<B: AutodiffBackend>(
    artifact_dir: &str,
    dataset: &DigitsDataset,
    config: TrainingConfig,
    device: B::Device,
    renderer: Option<ProgressLogger>,
) -> error::Result<Model<B::InnerBackend>> {
    let artifact_path = Path::new(artifact_dir);
    create_artifact_dir(artifact_path)?;
    config.save(artifact_path.join(CONFIG_FILE))?;

    B::seed(config.seed);

    let batcher_train = DigitBatcher::<B>::new(device.clone());
    let batcher_valid = DigitBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset.train());

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset.valid());

    let mut builder = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary();
    if let Some(renderer) = renderer {
        builder = builder.renderer(renderer);
    }

    let learner = builder.build(
        config.model.init::<B>(&device),
        config.optimizer.init(),
        config.learning_rate,
    );

    // The learner installs the experiment logger on build
    log::info!(
        "Training on {} images, validating on {}",
        dataloader_train.num_items(),
        dataloader_valid.num_items()
    );

    let model_trained = learner.fit(dataloader_train, dataloader_valid).valid();

    let model_path = artifact_path.join(MODEL_FILE);
    model_trained
        .clone()
        .save_file(model_path.clone(), &CompactRecorder::new())?;
    log::info!("Saved trained model to {}", model_path.display());

    Ok(model_trained)
}
