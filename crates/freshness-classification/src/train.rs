use crate::category::Category;
use crate::data::{build_loader, FreshnessBatch, FreshnessBatcher, FreshnessDataset, LoaderConfig, Split, SplitListing};
use crate::error::{self, FreshnessError};
use crate::model::{FreshnessModel, FreshnessModelConfig};
use burn::config::Config;
use burn::data::dataloader::DataLoader;
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::SgdConfig;
use burn::prelude::Backend;
use burn::record::{CompactRecorder, FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use burn::train::metric::{AccuracyMetric, CpuUse, CudaMetric, LossMetric};
use burn::train::LearnerBuilder;
use log::info;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub const CONFIG_FILE: &str = "config.json";
pub const MODEL_FILE: &str = "model";

pub type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

fn create_artifact_dir(artifact_dir: &Path) -> error::Result<()> {
	// Remove existing artifacts before to get an accurate learner summary
	if artifact_dir.exists() {
		std::fs::remove_dir_all(artifact_dir)?;
	}
	std::fs::create_dir_all(artifact_dir)?;
	Ok(())
}

#[derive(Config)]
pub struct TrainingConfig {
	pub model: FreshnessModelConfig,
	pub optimizer: SgdConfig,
	#[config(default = 7)]
	pub num_epochs: usize,
	#[config(default = 1024)]
	pub batch_size: usize,
	#[config(default = 4)]
	pub num_workers: usize,
	#[config(default = true)]
	pub shuffle: bool,
	#[config(default = 42)]
	pub seed: u64,
	#[config(default = 2e-3)]
	pub learning_rate: f64,
	#[config(default = "Category::all_names()")]
	pub categories: Vec<String>,
}

impl TrainingConfig {
	pub fn train_loader(&self) -> LoaderConfig {
		LoaderConfig::new()
			.with_batch_size(self.batch_size)
			.with_num_workers(self.num_workers)
			.with_shuffle(self.shuffle.then_some(self.seed))
	}

	pub fn test_loader(&self) -> LoaderConfig {
		LoaderConfig::new()
			.with_batch_size(self.batch_size)
			.with_num_workers(self.num_workers)
	}

	pub fn load_from<P: AsRef<Path>>(artifact_dir: P) -> error::Result<Self> {
		let path = artifact_dir.as_ref().join(CONFIG_FILE);
		if !path.is_file() {
			return Err(FreshnessError::Config(format!("missing {}", path.display())));
		}

		Self::load(&path).map_err(|err| FreshnessError::Config(format!("{}: {err:?}", path.display())))
	}
}

/// Aggregate loss and accuracy of one no-gradient pass over a split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
	pub loss: f64,
	pub accuracy: f64,
	pub samples: usize,
}

impl fmt::Display for Evaluation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"accuracy {:.1}%, avg loss {:.6} over {} samples",
			self.accuracy * 100.0,
			self.loss,
			self.samples
		)
	}
}

pub fn evaluate<B: Backend>(
	model: &FreshnessModel<B>,
	loader: Arc<dyn DataLoader<FreshnessBatch<B>>>,
) -> Evaluation {
	let mut loss_sum = 0.0;
	let mut correct = 0i64;
	let mut samples = 0usize;

	for batch in loader.iter() {
		let count = batch.targets.dims()[0];
		let output = model.forward(batch.images);

		let loss = CrossEntropyLossConfig::new().init(&output.device())
			.forward(output.clone(), batch.targets.clone());

		let predicted = output.argmax(1).flatten::<1>(0, 1);

		loss_sum += loss.into_scalar().elem::<f64>() * count as f64;
		correct += predicted.equal(batch.targets).int().sum().into_scalar().elem::<i64>();
		samples += count;
	}

	if samples == 0 {
		return Evaluation { loss: 0.0, accuracy: 0.0, samples };
	}

	Evaluation {
		loss: loss_sum / samples as f64,
		accuracy: correct as f64 / samples as f64,
		samples,
	}
}

pub fn train_run<B: AutodiffBackend>(
	data_dir: &Path,
	artifact_dir: &str,
	config: TrainingConfig,
	device: B::Device,
) -> error::Result<FreshnessModel<B::InnerBackend>> {
	// the previous run's artifacts stay until both splits are known to be usable
	let categories = Category::parse_all(&config.categories)?;
	let train_listing = SplitListing::new(data_dir, Split::Train, &categories)?;
	let test_listing = SplitListing::new(data_dir, Split::Test, &categories)?;

	let train_dataset = FreshnessDataset::from_listing(&train_listing)?;
	let test_dataset = FreshnessDataset::from_listing(&test_listing)?;

	create_artifact_dir(Path::new(artifact_dir))?;
	config.save(format!("{artifact_dir}/{CONFIG_FILE}"))?;

	B::seed(config.seed);

	info!("Train Dataset Size: {}", train_dataset.len());
	info!("Test Dataset Size: {}", test_dataset.len());

	let batcher_train = FreshnessBatcher::<B>::new(device.clone());
	let batcher_test = FreshnessBatcher::<B::InnerBackend>::new(device.clone());

	let dataloader_train = build_loader(batcher_train, &config.train_loader(), train_dataset);
	let dataloader_test = build_loader(batcher_test, &config.test_loader(), test_dataset);

	let learner = LearnerBuilder::new(artifact_dir)
		.metric_train_numeric(AccuracyMetric::new())
		.metric_valid_numeric(AccuracyMetric::new())
		.metric_train_numeric(LossMetric::new())
		.metric_valid_numeric(LossMetric::new())
		.metric_train(CudaMetric::new())
		.metric_train(CpuUse::new())
		.with_file_checkpointer(CompactRecorder::new())
		.devices(vec![device.clone()])
		.num_epochs(config.num_epochs)
		.summary()
		.build(
			config.model.init::<B>(&device),
			config.optimizer.init(),
			config.learning_rate,
		);

	let now = Instant::now();
	let model_trained = learner.fit(dataloader_train, dataloader_test.clone());
	let elapsed = now.elapsed().as_secs();
	info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

	model_trained
		.clone()
		.save_file(format!("{artifact_dir}/{MODEL_FILE}"), &ModelRecorder::new())?;

	let model = model_trained.valid();
	info!("Test split: {}", evaluate(&model, dataloader_test));

	Ok(model)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::tests::{sample_categories, sample_tree, write_category};
	use crate::infer::load_model;
	use burn::backend::{Autodiff, NdArray};
	use burn::tensor::Tensor;
	use tempfile::TempDir;

	fn tiny_tree(splits: &[Split]) -> TempDir {
		let root = TempDir::new().unwrap();
		for split in splits {
			for category in sample_categories() {
				write_category(root.path(), *split, category, 1);
			}
		}
		root
	}

	fn tiny_config() -> TrainingConfig {
		TrainingConfig::new(FreshnessModelConfig::new().with_hidden_size(8), SgdConfig::new())
			.with_num_epochs(1)
			.with_batch_size(2)
			.with_num_workers(0)
			.with_categories(sample_categories().iter().map(Category::dir_name).collect())
	}

	#[test]
	fn default_config_matches_reference_run() {
		let config = TrainingConfig::new(FreshnessModelConfig::new(), SgdConfig::new());

		assert_eq!(config.num_epochs, 7);
		assert_eq!(config.batch_size, 1024);
		assert_eq!(config.learning_rate, 2e-3);
		assert_eq!(config.categories, Category::all_names());
		assert_eq!(config.train_loader().shuffle, Some(42));
		assert_eq!(config.test_loader().shuffle, None);
	}

	#[test]
	fn config_round_trips_through_artifact_dir() {
		let dir = tempfile::tempdir().unwrap();
		let config = TrainingConfig::new(FreshnessModelConfig::new(), SgdConfig::new())
			.with_num_epochs(15)
			.with_shuffle(false)
			.with_categories(vec!["freshokra".to_string()]);

		config.save(dir.path().join(CONFIG_FILE)).unwrap();
		let loaded = TrainingConfig::load_from(dir.path()).unwrap();

		assert_eq!(loaded.num_epochs, 15);
		assert!(!loaded.shuffle);
		assert_eq!(loaded.categories, vec!["freshokra".to_string()]);
		assert_eq!(loaded.train_loader().shuffle, None);
	}

	#[test]
	fn missing_config_is_reported() {
		let dir = tempfile::tempdir().unwrap();

		assert!(matches!(TrainingConfig::load_from(dir.path()), Err(FreshnessError::Config(_))));
	}

	#[test]
	fn evaluation_covers_every_sample() {
		let root = sample_tree(Split::Test);
		let dataset = FreshnessDataset::load(root.path(), Split::Test, &sample_categories()).unwrap();
		let expected = dataset.len();

		let device = Default::default();
		let model = FreshnessModelConfig::new().init::<NdArray>(&device);
		let loader = build_loader(
			FreshnessBatcher::<NdArray>::new(device),
			&LoaderConfig::new().with_batch_size(4),
			dataset,
		);

		let evaluation = evaluate(&model, loader);

		assert_eq!(evaluation.samples, expected);
		assert!((0.0..=1.0).contains(&evaluation.accuracy));
		assert!(evaluation.loss.is_finite());
	}

	#[test]
	fn bad_category_fails_before_artifacts_are_touched() {
		let data = sample_tree(Split::Train);
		let artifacts = tempfile::tempdir().unwrap();
		let marker = artifacts.path().join("keep.txt");
		std::fs::write(&marker, b"previous run").unwrap();

		let config = TrainingConfig::new(FreshnessModelConfig::new(), SgdConfig::new())
			.with_categories(vec!["freshapples".to_string(), "mouldyapples".to_string()]);

		let result = train_run::<Autodiff<NdArray>>(
			data.path(),
			artifacts.path().to_str().unwrap(),
			config,
			Default::default(),
		);

		assert!(matches!(result, Err(FreshnessError::UnknownCategory(name)) if name == "mouldyapples"));
		assert!(marker.exists());
	}

	#[test]
	fn missing_test_split_keeps_previous_model() {
		let data = tiny_tree(&[Split::Train]);
		let artifacts = tempfile::tempdir().unwrap();
		let previous = artifacts.path().join("model.mpk");
		std::fs::write(&previous, b"previous model").unwrap();

		let result = train_run::<Autodiff<NdArray>>(
			data.path(),
			artifacts.path().to_str().unwrap(),
			tiny_config(),
			Default::default(),
		);

		assert!(matches!(&result, Err(FreshnessError::FolderNotFound(path)) if path.ends_with("Test")));
		assert_eq!(std::fs::read(&previous).unwrap(), b"previous model");
	}

	#[test]
	fn one_epoch_run_saves_a_loadable_model() {
		let data = tiny_tree(&[Split::Train, Split::Test]);
		let artifacts = tempfile::tempdir().unwrap();
		let artifact_dir = artifacts.path().join("run");

		let trained = train_run::<Autodiff<NdArray>>(
			data.path(),
			artifact_dir.to_str().unwrap(),
			tiny_config(),
			Default::default(),
		)
		.unwrap();

		assert!(artifact_dir.join(CONFIG_FILE).is_file());
		assert!(artifact_dir.join("model.mpk").is_file());

		let device = Default::default();
		let loaded = load_model::<NdArray, _>(&artifact_dir, &device).unwrap();

		let input = Tensor::<NdArray, 4>::ones([1, 3, 144, 144], &device);
		let expected = trained.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
		let actual = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
		assert_eq!(actual, expected);
	}
}
