use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::dataset::{DigitItem, IMAGE_SIZE};

#[derive(Clone, Debug)]
pub struct DigitBatcher<B: Backend> {
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct DigitBatch<B: Backend> {
    /// Images of shape `[batch_size, 1, 28, 28]`.
    pub images: Tensor<B, 4>,
    /// Class ids of shape `[batch_size]`. Unlabeled images get class 0.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> DigitBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<DigitItem, DigitBatch<B>> for DigitBatcher<B> {
    fn batch(&self, items: Vec<DigitItem>) -> DigitBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image))
            .map(|data| Tensor::<B, 2>::from_data(data.convert::<B::FloatElem>(), &self.device))
            .map(|tensor| tensor.reshape([1, 1, IMAGE_SIZE, IMAGE_SIZE]))
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label.unwrap_or_default() as i64).elem::<B::IntElem>()]),
                    &self.device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        DigitBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::item;
    use crate::TestBackend;

    #[test]
    fn batch_has_image_and_target_shapes() {
        let batcher = DigitBatcher::<TestBackend>::new(Default::default());

        let batch = batcher.batch(vec![item(1), item(4), item(9)]);

        assert_eq!(batch.images.dims(), [3, 1, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(batch.targets.dims(), [3]);
        batch
            .targets
            .into_data()
            .assert_eq(&TensorData::from([1i64, 4, 9]), false);
    }

    #[test]
    fn batch_keeps_pixel_values() {
        let batcher = DigitBatcher::<TestBackend>::new(Default::default());
        let mut digit = item(2);
        digit.image[5][7] = 1.0;

        let batch = batcher.batch(vec![digit]);

        let pixels = batch.images.clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(pixels[5 * IMAGE_SIZE + 7], 1.0);
        assert!((pixels[0] - 0.2).abs() < 1e-6);
        assert!(pixels.iter().all(|pixel| (0.0..=1.0).contains(pixel)));
    }

    #[test]
    fn unlabeled_items_get_class_zero() {
        let batcher = DigitBatcher::<TestBackend>::new(Default::default());
        let mut digit = item(6);
        digit.label = None;

        let batch = batcher.batch(vec![digit]);

        batch
            .targets
            .into_data()
            .assert_eq(&TensorData::from([0i64]), false);
    }
}
