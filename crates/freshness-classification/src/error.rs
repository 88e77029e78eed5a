use std::path::PathBuf;
use burn::record::RecorderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FreshnessError {
	#[error("Folder not found: {}", .0.display())]
	FolderNotFound(PathBuf),
	#[error("Category folder contains no images: {}", .0.display())]
	EmptyCategory(PathBuf),
	#[error("Unknown category '{0}', expected fresh<produce> or rotten<produce>")]
	UnknownCategory(String),
	#[error("Invalid label index {0}, expected 0 (fresh) or 1 (rotten)")]
	InvalidLabel(usize),
	#[error("Could not read image {}", .path.display())]
	Image {
		path: PathBuf,
		#[source]
		source: image::ImageError,
	},
	#[error("Std IO error: {0}")]
	StdIoError(#[from] std::io::Error),
	#[error("Model record error: {0}")]
	Recorder(#[from] RecorderError),
	#[error("Config error: {0}")]
	Config(String),
	#[error("Dataset has no samples to preview")]
	EmptyDataset,
	#[error("Preview grid of {rows}x{cols} tiles is too large")]
	GridTooLarge { rows: u32, cols: u32 },
	#[error("Tensor data error: {0}")]
	TensorData(String),
}

pub type Result<T> = std::result::Result<T, FreshnessError>;
