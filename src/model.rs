use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    prelude::*,
    train::ClassificationOutput,
};

use crate::dataset::{IMAGE_SIZE, NUM_CLASSES};

const KERNEL_SIZE: usize = 3;
const POOL_SIZE: usize = 3;
const CONV2_STRIDE: usize = 2;

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    dropout: Dropout,
    linear1: Linear<B>,
    linear2: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
    #[config(default = 128)]
    pub conv1_channels: usize,
    #[config(default = 256)]
    pub conv2_channels: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = "0.2")]
    pub dropout: f64,
}

impl ModelConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        Model {
            conv1: Conv2dConfig::new([1, self.conv1_channels], [KERNEL_SIZE, KERNEL_SIZE])
                .init(device),
            pool1: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            conv2: Conv2dConfig::new(
                [self.conv1_channels, self.conv2_channels],
                [KERNEL_SIZE, KERNEL_SIZE],
            )
            .with_stride([CONV2_STRIDE, CONV2_STRIDE])
            .init(device),
            pool2: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            linear1: LinearConfig::new(self.flattened_size(), self.hidden_size).init(device),
            linear2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// Number of features left after the convolution and pooling layers.
    pub fn flattened_size(&self) -> usize {
        let side = output_size(IMAGE_SIZE, KERNEL_SIZE, 1);
        let side = output_size(side, POOL_SIZE, POOL_SIZE);
        let side = output_size(side, KERNEL_SIZE, CONV2_STRIDE);
        let side = output_size(side, POOL_SIZE, POOL_SIZE);

        self.conv2_channels * side * side
    }
}

/// Spatial size after an unpadded window of `kernel` moved by `stride`.
fn output_size(size: usize, kernel: usize, stride: usize) -> usize {
    (size - kernel) / stride + 1
}

impl<B: Backend> Model<B> {
    /// # Shapes
    ///   - Images [batch_size, 1, height, width]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images); // [batch_size, 128, 26, 26]
        let x = self.pool1.forward(x); // [batch_size, 128, 8, 8]
        let x = self.conv2.forward(x); // [batch_size, 256, 3, 3]
        let x = self.pool2.forward(x); // [batch_size, 256, 1, 1]
        let x = self.dropout.forward(x);

        let x = x.flatten::<2>(1, 3);
        let x = self.linear1.forward(x);
        let x = self.activation.forward(x);

        self.linear2.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::tensor::{Distribution, TensorData};

    #[test]
    fn flattened_size_matches_pooled_features() {
        let config = ModelConfig::new();

        assert_eq!(config.flattened_size(), 256);
        assert_eq!(config.with_conv2_channels(64).flattened_size(), 64);
    }

    #[test]
    fn default_model_parameter_count() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);

        // conv1: 1*128*9 + 128, conv2: 128*256*9 + 256, linear1: 256*128 + 128, linear2: 128*10 + 10
        assert_eq!(model.num_params(), 330_634);
    }

    #[test]
    fn forward_outputs_one_logit_per_class() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::random(
            [5, 1, IMAGE_SIZE, IMAGE_SIZE],
            Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let output = model.forward(images);

        assert_eq!(output.dims(), [5, NUM_CLASSES]);
    }

    #[test]
    fn dropout_is_inactive_without_autodiff() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_dropout(0.9)
            .init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([2, 1, IMAGE_SIZE, IMAGE_SIZE], &device);

        let first = model.forward(images.clone()).into_data();
        let second = model.forward(images).into_data();

        first.assert_approx_eq(&second, 5);
    }

    #[test]
    fn classification_output_has_scalar_loss() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([3, 1, IMAGE_SIZE, IMAGE_SIZE], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0i64, 5, 9]), &device);

        let output = model.forward_classification(images, targets);

        assert_eq!(output.loss.dims(), [1]);
        assert_eq!(output.output.dims(), [3, NUM_CLASSES]);
        let loss = output.loss.into_scalar().elem::<f32>();
        assert!(loss.is_finite() && loss > 0.0);
    }
}
