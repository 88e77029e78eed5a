use crate::category::Freshness;
use crate::data::{FreshnessDataset, ImageTransform};
use crate::error::{FreshnessError, Result};
use burn::data::dataset::Dataset;
use image::{imageops, RgbImage};
use log::info;
use rand::Rng;

/// Tiles `rows * cols` randomly picked samples into one image, row-major.
///
/// Returns the grid together with the label of every tile.
pub fn sample_grid<R: Rng>(dataset: &FreshnessDataset, rows: u32, cols: u32, rng: &mut R) -> Result<(RgbImage, Vec<Freshness>)> {
	if dataset.is_empty() {
		return Err(FreshnessError::EmptyDataset);
	}

	let transform = ImageTransform::default();
	let side = transform.side;
	let too_large = || FreshnessError::GridTooLarge { rows, cols };

	let tiles = rows.checked_mul(cols).ok_or_else(too_large)?;
	let width = cols.checked_mul(side).ok_or_else(too_large)?;
	let height = rows.checked_mul(side).ok_or_else(too_large)?;
	// pixel buffer length must fit in memory addressing as well
	(width as usize)
		.checked_mul(height as usize)
		.and_then(|pixels| pixels.checked_mul(3))
		.filter(|bytes| *bytes <= isize::MAX as usize)
		.ok_or_else(too_large)?;

	let mut grid = RgbImage::new(width, height);
	let mut labels = Vec::with_capacity(tiles as usize);

	for tile in 0..tiles {
		let index = rng.gen_range(0..dataset.len());
		let Some(item) = dataset.get(index) else {
			continue;
		};

		let label = Freshness::from_index(item.label)?;
		let image = transform.denormalize(&item.image)?;

		let (x, y) = ((tile % cols) * side, (tile / cols) * side);
		imageops::replace(&mut grid, &image, x as i64, y as i64);

		info!("Tile {tile}: sample {index} ({label})");
		labels.push(label);
	}

	Ok((grid, labels))
}
