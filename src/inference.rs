use std::path::Path;

use crate::{
    data::{DigitBatch, DigitBatcher},
    dataset::DigitItem,
    error::Result,
    model::Model,
    training::{TrainingConfig, CONFIG_FILE, MODEL_FILE},
};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    record::{CompactRecorder, Recorder},
};

/// Accuracy and mean loss of a model over a labeled dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Fraction of correctly classified images, in `[0, 1]`.
    pub accuracy: f64,
    pub loss: f64,
    pub num_items: usize,
}

/// Rebuilds the trained model stored in `artifact_dir`.
pub fn load_model<B: Backend>(
    artifact_dir: &str,
    device: &B::Device,
) -> Result<(TrainingConfig, Model<B>)> {
    let artifact_dir = Path::new(artifact_dir);
    let config = TrainingConfig::load(artifact_dir.join(CONFIG_FILE))?;
    let record = CompactRecorder::new().load(artifact_dir.join(MODEL_FILE), device)?;
    let model = config.model.init::<B>(device).load_record(record);

    Ok((config, model))
}

/// Feeds `dataset` through `batcher` in order, `batch_size` items at a time.
fn for_each_batch<B: Backend, D: Dataset<DigitItem>>(
    dataset: &D,
    batch_size: usize,
    batcher: &DigitBatcher<B>,
    mut on_batch: impl FnMut(DigitBatch<B>, usize),
) {
    let batch_size = batch_size.max(1);
    let mut items = Vec::with_capacity(batch_size);

    for item in dataset.iter() {
        items.push(item);
        if items.len() == batch_size {
            let num_items = items.len();
            on_batch(batcher.batch(std::mem::take(&mut items)), num_items);
        }
    }

    if !items.is_empty() {
        let num_items = items.len();
        on_batch(batcher.batch(items), num_items);
    }
}

/// Predicted class of every image in `dataset`, in dataset order.
pub fn predict<B: Backend, D: Dataset<DigitItem>>(
    model: &Model<B>,
    dataset: &D,
    batch_size: usize,
    device: &B::Device,
) -> Vec<u8> {
    let batcher = DigitBatcher::<B>::new(device.clone());
    let mut predictions = Vec::with_capacity(dataset.len());

    for_each_batch(dataset, batch_size, &batcher, |batch, _| {
        let classes = model
            .forward(batch.images)
            .argmax(1)
            .flatten::<1>(0, 1)
            .into_data();
        predictions.extend(classes.iter::<i64>().map(|class| class as u8));
    });

    predictions
}

pub fn evaluate<B: Backend, D: Dataset<DigitItem>>(
    model: &Model<B>,
    dataset: &D,
    batch_size: usize,
    device: &B::Device,
) -> Evaluation {
    let batcher = DigitBatcher::<B>::new(device.clone());
    let mut num_items = 0;
    let mut num_correct = 0;
    let mut loss_sum = 0.0;

    for_each_batch(dataset, batch_size, &batcher, |batch, len| {
        let output = model.forward_classification(batch.images, batch.targets);

        num_correct += output
            .output
            .argmax(1)
            .flatten::<1>(0, 1)
            .equal(output.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;
        loss_sum += output.loss.into_scalar().elem::<f64>() * len as f64;
        num_items += len;
    });

    if num_items == 0 {
        return Evaluation {
            accuracy: 0.0,
            loss: 0.0,
            num_items,
        };
    }

    Evaluation {
        accuracy: num_correct as f64 / num_items as f64,
        loss: loss_sum / num_items as f64,
        num_items,
    }
}

/// Writes predictions as an `ImageId,Label` CSV with 1-based image ids.
pub fn write_submission<P: AsRef<Path>>(path: P, predictions: &[u8]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["ImageId", "Label"])?;
    for (index, label) in predictions.iter().enumerate() {
        writer.write_record([(index + 1).to_string(), label.to_string()])?;
    }
    writer.flush()?;

    log::info!(
        "Wrote {} predictions to {}",
        predictions.len(),
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{tests::item, NUM_CLASSES};
    use crate::model::ModelConfig;
    use crate::TestBackend;
    use burn::data::dataset::InMemDataset;

    fn digits() -> InMemDataset<DigitItem> {
        InMemDataset::new((0..7).map(|label| item(label as u8)).collect())
    }

    #[test]
    fn predict_keeps_dataset_order_and_size() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let dataset = digits();

        let batched = predict(&model, &dataset, 3, &device);
        let single = predict(&model, &dataset, 100, &device);

        assert_eq!(batched.len(), 7);
        assert_eq!(batched, single);
        assert!(batched.iter().all(|class| (*class as usize) < NUM_CLASSES));
    }

    #[test]
    fn batches_cover_every_item_in_order() {
        let device = Default::default();
        let batcher = DigitBatcher::<TestBackend>::new(device);
        let mut sizes = Vec::new();
        let mut targets = Vec::new();

        for_each_batch(&digits(), 3, &batcher, |batch, len| {
            assert_eq!(batch.images.dims(), [len, 1, 28, 28]);
            sizes.push(len);
            targets.extend(batch.targets.into_data().iter::<i64>());
        });

        assert_eq!(sizes, [3, 3, 1]);
        assert_eq!(targets, (0..7).collect::<Vec<i64>>());
    }

    #[test]
    fn empty_dataset_yields_no_batches() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let empty = InMemDataset::<DigitItem>::new(Vec::new());

        assert!(predict(&model, &empty, 4, &device).is_empty());
        assert_eq!(evaluate(&model, &empty, 4, &device).num_items, 0);
    }

    #[test]
    fn evaluate_reports_bounded_metrics() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);

        let evaluation = evaluate(&model, &digits(), 4, &device);

        assert_eq!(evaluation.num_items, 7);
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
        assert!(evaluation.loss.is_finite() && evaluation.loss > 0.0);
    }

    #[test]
    fn evaluate_agrees_with_predictions() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let dataset = digits();

        let predictions = predict(&model, &dataset, 7, &device);
        let evaluation = evaluate(&model, &dataset, 2, &device);

        let num_correct = predictions
            .iter()
            .zip(dataset.iter())
            .filter(|(class, item)| Some(**class) == item.label)
            .count();
        assert!((evaluation.accuracy - num_correct as f64 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn load_model_restores_saved_weights() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().to_str().unwrap();
        let device = Default::default();
        let config = TrainingConfig::default();
        let model = config.model.init::<TestBackend>(&device);
        config.save(dir.path().join(CONFIG_FILE)).unwrap();
        model
            .clone()
            .save_file(dir.path().join(MODEL_FILE), &CompactRecorder::new())
            .unwrap();

        let (_, loaded) = load_model::<TestBackend>(artifact_dir, &device).unwrap();

        let dataset = digits();
        assert_eq!(
            predict(&model, &dataset, 7, &device),
            predict(&loaded, &dataset, 7, &device)
        );
    }

    #[test]
    fn load_model_fails_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();

        let result = load_model::<TestBackend>(dir.path().to_str().unwrap(), &Default::default());

        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn submission_has_header_and_one_based_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");

        write_submission(&path, &[2, 0, 9]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ImageId,Label\n1,2\n2,0\n3,9\n");
    }
}
