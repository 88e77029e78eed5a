use crate::error::{FreshnessError, Result};
use std::fmt;
use std::str::FromStr;

/// Binary training label. The integer label is the position in [`Freshness::ALL`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Freshness {
	Fresh,
	Rotten,
}

impl Freshness {
	pub const ALL: [Freshness; 2] = [Freshness::Fresh, Freshness::Rotten];

	pub fn index(self) -> usize {
		match self {
			Freshness::Fresh => 0,
			Freshness::Rotten => 1,
		}
	}

	pub fn from_index(index: usize) -> Result<Self> {
		Self::ALL.get(index).copied().ok_or(FreshnessError::InvalidLabel(index))
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Freshness::Fresh => "fresh",
			Freshness::Rotten => "rotten",
		}
	}
}

impl fmt::Display for Freshness {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Produce {
	Apples,
	Banana,
	Cucumber,
	Okra,
	Oranges,
	Potato,
	Tomato,
}

impl Produce {
	pub const ALL: [Produce; 7] = [
		Produce::Apples,
		Produce::Banana,
		Produce::Cucumber,
		Produce::Okra,
		Produce::Oranges,
		Produce::Potato,
		Produce::Tomato,
	];

	// Spelled the way the dataset folders are
	pub fn as_str(self) -> &'static str {
		match self {
			Produce::Apples => "apples",
			Produce::Banana => "banana",
			Produce::Cucumber => "cucumber",
			Produce::Okra => "okra",
			Produce::Oranges => "oranges",
			Produce::Potato => "potato",
			Produce::Tomato => "tomato",
		}
	}
}

/// A dataset folder such as `freshapples` or `rottenbanana`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Category {
	pub freshness: Freshness,
	pub produce: Produce,
}

impl Category {
	pub const ALL: [Category; 14] = {
		let mut all = [Category { freshness: Freshness::Fresh, produce: Produce::Apples }; 14];
		let mut i = 0;
		while i < 7 {
			all[i] = Category { freshness: Freshness::Fresh, produce: Produce::ALL[i] };
			all[i + 7] = Category { freshness: Freshness::Rotten, produce: Produce::ALL[i] };
			i += 1;
		}
		all
	};

	pub fn new(freshness: Freshness, produce: Produce) -> Self {
		Self { freshness, produce }
	}

	pub fn dir_name(&self) -> String {
		format!("{}{}", self.freshness.as_str(), self.produce.as_str())
	}

	/// Parses every name, failing on the first one that does not map to a label.
	pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<Category>> {
		names.iter().map(|name| name.as_ref().parse()).collect()
	}

	pub fn all_names() -> Vec<String> {
		Self::ALL.iter().map(Category::dir_name).collect()
	}
}

impl fmt::Display for Category {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", self.freshness, self.produce.as_str())
	}
}

impl FromStr for Category {
	type Err = FreshnessError;

	fn from_str(name: &str) -> Result<Self> {
		let unknown = || FreshnessError::UnknownCategory(name.to_string());

		let (freshness, rest) = Freshness::ALL
			.iter()
			.find_map(|f| name.strip_prefix(f.as_str()).map(|rest| (*f, rest)))
			.ok_or_else(unknown)?;

		let produce = Produce::ALL
			.iter()
			.find(|p| p.as_str() == rest)
			.copied()
			.ok_or_else(unknown)?;

		Ok(Self { freshness, produce })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_and_rotten_folders_map_to_their_label() {
		for category in Category::ALL {
			let name = category.dir_name();
			let parsed: Category = name.parse().unwrap();

			assert_eq!(parsed, category);
			if name.starts_with("fresh") {
				assert_eq!(parsed.freshness, Freshness::Fresh);
			} else {
				assert!(name.starts_with("rotten"));
				assert_eq!(parsed.freshness, Freshness::Rotten);
			}
		}
	}

	#[test]
	fn all_lists_the_fourteen_dataset_folders() {
		let names = Category::all_names();

		assert_eq!(names.len(), 14);
		assert_eq!(names[0], "freshapples");
		assert_eq!(names[6], "freshtomato");
		assert_eq!(names[7], "rottenapples");
		assert_eq!(names[13], "rottentomato");
	}

	#[test]
	fn unknown_names_are_rejected() {
		for name in ["apples", "freshmango", "Freshapples", "stalebanana", "fresh", ""] {
			assert!(
				matches!(name.parse::<Category>(), Err(FreshnessError::UnknownCategory(_))),
				"{name} should not parse"
			);
		}
	}

	#[test]
	fn label_indices_follow_fixed_ordering() {
		assert_eq!(Freshness::Fresh.index(), 0);
		assert_eq!(Freshness::Rotten.index(), 1);
		assert_eq!(Freshness::from_index(0).unwrap(), Freshness::Fresh);
		assert_eq!(Freshness::from_index(1).unwrap(), Freshness::Rotten);
		assert!(matches!(Freshness::from_index(2), Err(FreshnessError::InvalidLabel(2))));
		assert_eq!(Freshness::Rotten.to_string(), "rotten");
	}

	#[test]
	fn parse_all_stops_at_first_bad_name() {
		let parsed = Category::parse_all(&["freshokra", "rottenokra"]).unwrap();
		assert_eq!(parsed, vec![
			Category::new(Freshness::Fresh, Produce::Okra),
			Category::new(Freshness::Rotten, Produce::Okra),
		]);

		assert!(Category::parse_all(&["freshokra", "okra"]).is_err());
	}
}
