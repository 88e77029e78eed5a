// Data folder /srv/freshnessmodel/dataset/{Train,Test}/<category>/*

use crate::category::{Category, Freshness};
use crate::error::{self, FreshnessError};
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::prelude::{Backend, Int};
use burn::tensor::{Tensor, TensorData};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use log::{debug, info};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SIDE_LENGTH: u32 = 144;
pub const CHANNELS: usize = 3;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize and per-channel normalization shared by ingestion and inference.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransform {
	pub side: u32,
	pub mean: [f32; 3],
	pub std: [f32; 3],
}

impl Default for ImageTransform {
	fn default() -> Self {
		Self {
			side: SIDE_LENGTH,
			mean: MEAN,
			std: STD,
		}
	}
}

impl ImageTransform {
	/// Returns a `[3, side, side]` channel-first tensor. Alpha is dropped.
	pub fn apply(&self, image: &DynamicImage) -> TensorData {
		let rgb = image.to_rgb8();
		let rgb = imageops::resize(&rgb, self.side, self.side, imageops::FilterType::Triangle);

		let plane = (self.side * self.side) as usize;
		let mut values = vec![0.0f32; CHANNELS * plane];

		for (i, pixel) in rgb.pixels().enumerate() {
			for c in 0..CHANNELS {
				let x = pixel[c] as f32 / 255.0;
				values[c * plane + i] = (x - self.mean[c]) / self.std[c];
			}
		}

		TensorData::new(values, [CHANNELS, self.side as usize, self.side as usize])
	}

	/// Inverse of [`ImageTransform::apply`], clamped back into 8-bit RGB.
	pub fn denormalize(&self, data: &TensorData) -> error::Result<RgbImage> {
		let values = data
			.to_vec::<f32>()
			.map_err(|err| FreshnessError::TensorData(format!("{err:?}")))?;

		let plane = (self.side * self.side) as usize;
		if values.len() != CHANNELS * plane {
			return Err(FreshnessError::TensorData(format!(
				"expected {} values for a {}x{} image, got {}",
				CHANNELS * plane, self.side, self.side, values.len()
			)));
		}

		Ok(RgbImage::from_fn(self.side, self.side, |x, y| {
			let i = (y * self.side + x) as usize;
			let channel = |c: usize| {
				let v = values[c * plane + i] * self.std[c] + self.mean[c];
				(v * 255.0).round().clamp(0.0, 255.0) as u8
			};
			Rgb([channel(0), channel(1), channel(2)])
		}))
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Split {
	Train,
	Test,
}

impl Split {
	pub fn dir_name(self) -> &'static str {
		match self {
			Split::Train => "Train",
			Split::Test => "Test",
		}
	}
}

impl fmt::Display for Split {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.dir_name())
	}
}

/// Normalized tensors bucketed by their reduced label.
#[derive(Debug, Clone, Default)]
pub struct LabeledImages {
	pub fresh: Vec<TensorData>,
	pub rotten: Vec<TensorData>,
}

impl LabeledImages {
	pub fn bucket(&self, freshness: Freshness) -> &[TensorData] {
		match freshness {
			Freshness::Fresh => &self.fresh,
			Freshness::Rotten => &self.rotten,
		}
	}

	fn bucket_mut(&mut self, freshness: Freshness) -> &mut Vec<TensorData> {
		match freshness {
			Freshness::Fresh => &mut self.fresh,
			Freshness::Rotten => &mut self.rotten,
		}
	}

	pub fn len(&self) -> usize {
		self.fresh.len() + self.rotten.len()
	}
}

fn image_files(dir: &Path) -> error::Result<Vec<PathBuf>> {
	let mut files = Vec::new();

	for entry in dir.read_dir()? {
		let entry = entry?;
		let hidden = entry.file_name().to_string_lossy().starts_with('.');

		if entry.file_type()?.is_file() && !hidden {
			files.push(entry.path());
		}
	}

	files.sort();
	Ok(files)
}

fn load_image(path: &Path, transform: &ImageTransform) -> error::Result<TensorData> {
	let image = image::open(path).map_err(|source| FreshnessError::Image {
		path: path.to_path_buf(),
		source,
	})?;

	Ok(transform.apply(&image))
}

/// Image files of one split, grouped by category. Building it checks every
/// folder without decoding anything.
#[derive(Debug, Clone)]
pub struct SplitListing {
	pub split: Split,
	pub files: Vec<(Category, Vec<PathBuf>)>,
}

impl SplitListing {
	/// Lists `<base_path>/<split>/<category>/*`. A missing split folder, a missing
	/// category folder or a category without images is an error.
	pub fn new<P: AsRef<Path>>(base_path: P, split: Split, categories: &[Category]) -> error::Result<Self> {
		let split_dir = base_path.as_ref().join(split.dir_name());
		if !split_dir.is_dir() {
			return Err(FreshnessError::FolderNotFound(split_dir));
		}

		let mut files = Vec::with_capacity(categories.len());
		for category in categories {
			let dir = split_dir.join(category.dir_name());
			if !dir.is_dir() {
				return Err(FreshnessError::FolderNotFound(dir));
			}

			let images = image_files(&dir)?;
			if images.is_empty() {
				return Err(FreshnessError::EmptyCategory(dir));
			}

			files.push((*category, images));
		}

		Ok(Self { split, files })
	}

	pub fn len(&self) -> usize {
		self.files.iter().map(|(_, images)| images.len()).sum()
	}

	pub fn decode(&self, transform: &ImageTransform) -> error::Result<LabeledImages> {
		let split = self.split;
		let mut images = LabeledImages::default();

		for (category, files) in &self.files {
			let tensors = files
				.par_iter()
				.map(|path| load_image(path, transform))
				.collect::<error::Result<Vec<_>>>()?;

			debug!("{split}/{category}: {} images", tensors.len());
			images.bucket_mut(category.freshness).extend(tensors);
		}

		info!(
			"Loaded {} {split} images ({} fresh, {} rotten)",
			images.len(),
			images.fresh.len(),
			images.rotten.len()
		);

		Ok(images)
	}
}

/// Loads `<base_path>/<split>/<category>/*` for every listed category.
///
/// All folders are checked before any image is decoded, so a missing or empty
/// category fails the load up front.
pub fn load_split<P: AsRef<Path>>(
	base_path: P,
	split: Split,
	categories: &[Category],
	transform: &ImageTransform,
) -> error::Result<LabeledImages> {
	SplitListing::new(base_path, split, categories)?.decode(transform)
}

#[derive(Debug, Clone)]
pub struct FreshnessItem {
	pub image: TensorData, // [3, 144, 144], normalized
	pub label: usize,
}

/// Flat `(tensor, label)` view over [`LabeledImages`]. Read-only once built.
#[derive(Debug, Clone)]
pub struct FreshnessDataset {
	items: Vec<FreshnessItem>,
}

impl FreshnessDataset {
	pub fn from_images(images: LabeledImages) -> Self {
		let LabeledImages { fresh, rotten } = images;

		let fresh = fresh.into_iter().map(|image| FreshnessItem { image, label: Freshness::Fresh.index() });
		let rotten = rotten.into_iter().map(|image| FreshnessItem { image, label: Freshness::Rotten.index() });

		Self { items: fresh.chain(rotten).collect() }
	}

	pub fn load<P: AsRef<Path>>(base_path: P, split: Split, categories: &[Category]) -> error::Result<Self> {
		let images = load_split(base_path, split, categories, &ImageTransform::default())?;
		Ok(Self::from_images(images))
	}

	pub fn from_listing(listing: &SplitListing) -> error::Result<Self> {
		Ok(Self::from_images(listing.decode(&ImageTransform::default())?))
	}

	pub fn label_counts(&self) -> [usize; 2] {
		let mut counts = [0; 2];
		for item in &self.items {
			counts[item.label] += 1;
		}
		counts
	}
}

impl Dataset<FreshnessItem> for FreshnessDataset {
	fn get(&self, index: usize) -> Option<FreshnessItem> {
		self.items.get(index).cloned()
	}

	fn len(&self) -> usize {
		self.items.len()
	}
}

#[derive(Clone)]
pub struct FreshnessBatcher<B: Backend> {
	device: B::Device,
}

impl<B: Backend> FreshnessBatcher<B> {
	pub fn new(device: B::Device) -> Self {
		Self { device }
	}
}

#[derive(Debug, Clone)]
pub struct FreshnessBatch<B: Backend> {
	pub images: Tensor<B, 4>,
	pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<FreshnessItem, FreshnessBatch<B>> for FreshnessBatcher<B> {
	fn batch(&self, items: Vec<FreshnessItem>) -> FreshnessBatch<B> {
		let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
		let count = labels.len();

		let images = items
			.into_iter()
			.map(|item| Tensor::<B, 3>::from_data(item.image.convert::<B::FloatElem>(), &self.device))
			.collect();

		let images = Tensor::stack(images, 0);
		let targets = Tensor::<B, 1, Int>::from_data(
			TensorData::new(labels, [count]).convert::<B::IntElem>(),
			&self.device,
		);

		FreshnessBatch { images, targets }
	}
}

#[derive(Config, Debug)]
pub struct LoaderConfig {
	#[config(default = 1024)]
	pub batch_size: usize,
	#[config(default = 0)]
	pub num_workers: usize,
	/// Shuffle seed; batches follow dataset order when unset.
	pub shuffle: Option<u64>,
}

pub fn build_loader<B: Backend>(
	batcher: FreshnessBatcher<B>,
	config: &LoaderConfig,
	dataset: FreshnessDataset,
) -> Arc<dyn DataLoader<FreshnessBatch<B>>> {
	let mut builder = DataLoaderBuilder::new(batcher).batch_size(config.batch_size);

	if let Some(seed) = config.shuffle {
		builder = builder.shuffle(seed);
	}

	// burn spawns worker threads for any explicit count, including zero
	if config.num_workers > 0 {
		builder = builder.num_workers(config.num_workers);
	}

	builder.build(dataset)
}
