use crate::data::{FreshnessBatch, SIDE_LENGTH};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::backend::AutodiffBackend;
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};

pub const NUM_CLASSES: usize = 2;

// three 2x2 pools
const POOLED_SIDE: usize = SIDE_LENGTH as usize / 8;

#[derive(Debug, Module)]
pub struct FreshnessModel<B: Backend> {
	activation: Relu,
	dropout: Dropout,
	pool: MaxPool2d,
	conv1: Conv2d<B>,
	conv2: Conv2d<B>,
	conv3: Conv2d<B>,
	fc1: Linear<B>,
	fc2: Linear<B>,
}

impl<B: Backend> FreshnessModel<B> {
	/// Images `[batch, 3, 144, 144]` to logits `[batch, 2]`.
	pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
		let x = self.conv1.forward(images);
		let x = self.activation.forward(x);
		let x = self.pool.forward(x);

		let x = self.conv2.forward(x);
		let x = self.activation.forward(x);
		let x = self.pool.forward(x);

		let x = self.conv3.forward(x);
		let x = self.activation.forward(x);
		let x = self.pool.forward(x);

		let x = x.flatten(1, 3);
		let x = self.dropout.forward(x);

		let x = self.fc1.forward(x);
		let x = self.activation.forward(x);
		let x = self.dropout.forward(x);

		self.fc2.forward(x)
	}

	pub fn forward_classification(&self, images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> ClassificationOutput<B> {
		let output = self.forward(images);

		let loss = CrossEntropyLossConfig::new().init(&output.device())
			.forward(output.clone(), targets.clone());

		ClassificationOutput::new(loss, output, targets)
	}
}

impl<B: AutodiffBackend> TrainStep<FreshnessBatch<B>, ClassificationOutput<B>> for FreshnessModel<B> {
	fn step(&self, batch: FreshnessBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
		let item = self.forward_classification(batch.images, batch.targets);

		TrainOutput::new(self, item.loss.backward(), item)
	}
}

impl<B: Backend> ValidStep<FreshnessBatch<B>, ClassificationOutput<B>> for FreshnessModel<B> {
	fn step(&self, batch: FreshnessBatch<B>) -> ClassificationOutput<B> {
		self.forward_classification(batch.images, batch.targets)
	}
}

#[derive(Debug, Config)]
pub struct FreshnessModelConfig {
	#[config(default = 2)]
	pub num_classes: usize,
	#[config(default = 0.3)]
	pub dropout: f64,
	#[config(default = 128)]
	pub hidden_size: usize,
}

impl FreshnessModelConfig {
	pub fn init<B: Backend>(&self, device: &B::Device) -> FreshnessModel<B> {
		let conv1 = Conv2dConfig::new([3, 16], [3, 3])
			.with_padding(PaddingConfig2d::Same)
			.init(device);

		let conv2 = Conv2dConfig::new([16, 32], [3, 3])
			.with_padding(PaddingConfig2d::Same)
			.init(device);

		let conv3 = Conv2dConfig::new([32, 64], [3, 3])
			.with_padding(PaddingConfig2d::Same)
			.init(device);

		let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

		let fc1 = LinearConfig::new(64 * POOLED_SIDE * POOLED_SIDE, self.hidden_size).init(device);
		let fc2 = LinearConfig::new(self.hidden_size, self.num_classes).init(device);

		FreshnessModel {
			activation: Relu::new(),
			dropout: DropoutConfig::new(self.dropout).init(),
			pool,
			conv1,
			conv2,
			conv3,
			fc1,
			fc2,
		}
	}
}
