use crate::category::Freshness;
use crate::data::ImageTransform;
use crate::error::{FreshnessError, Result};
use crate::model::FreshnessModel;
use crate::train::{ModelRecorder, TrainingConfig, MODEL_FILE};
use burn::module::Module;
use burn::prelude::Backend;
use burn::tensor::activation::softmax;
use burn::tensor::{ElementConversion, Tensor};
use image::DynamicImage;
use log::debug;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
	pub label: Freshness,
	pub confidence: f32,
}

impl fmt::Display for Prediction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({:.1}%)", self.label, self.confidence * 100.0)
	}
}

/// Rebuilds the trained model from `config.json` and the saved parameters.
pub fn load_model<B: Backend, P: AsRef<Path>>(artifact_dir: P, device: &B::Device) -> Result<FreshnessModel<B>> {
	let artifact_dir = artifact_dir.as_ref();
	let config = TrainingConfig::load_from(artifact_dir)?;

	let model = config
		.model
		.init::<B>(device)
		.load_file(artifact_dir.join(MODEL_FILE), &ModelRecorder::new(), device)?;

	Ok(model)
}

/// Classifies one image. Call with a non-autodiff backend so no graph is tracked.
pub fn predict<B: Backend>(model: &FreshnessModel<B>, image: &DynamicImage, device: &B::Device) -> Result<Prediction> {
	let data = ImageTransform::default().apply(image);
	let input = Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device).unsqueeze::<4>();

	let probabilities = softmax(model.forward(input), 1);
	let (score, index) = probabilities.max_dim_with_indices(1);

	let index = index.into_scalar().elem::<i64>();
	let confidence = score.into_scalar().elem::<f32>();
	let label = Freshness::from_index(index as usize)?;

	debug!("Predicted class {index} with probability {confidence}");

	Ok(Prediction { label, confidence })
}

pub fn predict_file<B: Backend, P: AsRef<Path>>(model: &FreshnessModel<B>, path: P, device: &B::Device) -> Result<Prediction> {
	let path = path.as_ref();
	let image = image::open(path).map_err(|source| FreshnessError::Image {
		path: path.to_path_buf(),
		source,
	})?;

	predict(model, &image, device)
}
