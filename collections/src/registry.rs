//! The timeseries registry: a process-wide `name -> Timeseries` map with a
//! single-threaded create/delete lifecycle.

use hashbrown::HashMap;

use crate::timeseries::Timeseries;

#[derive(Default)]
pub struct Registry {
	series: HashMap<String, Timeseries, ahash::RandomState>,
}

/// Outcome of a CREATE_TS request, matching the dispatcher's state table:
/// creating an already-existing name is not an error, it just leaves the
/// timeseries unchanged and is logged at debug by the caller.
pub enum Created {
	New,
	AlreadyExisted,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// ABSENT -> EXISTS(name, retention, empty); idempotent on EXISTS.
	pub fn create(&mut self, name: &str, retention_ms: u32) -> Created {
		if self.series.contains_key(name) {
			return Created::AlreadyExisted;
		}
		self.series.insert(name.to_owned(), Timeseries::new(name.to_owned(), retention_ms));
		Created::New
	}

	/// EXISTS -> ABSENT. Returns `false` (NOT_FOUND) if the name was absent.
	pub fn delete(&mut self, name: &str) -> bool {
		self.series.remove(name).is_some()
	}

	pub fn get(&self, name: &str) -> Option<&Timeseries> {
		self.series.get(name)
	}

	pub fn get_mut(&mut self, name: &str) -> Option<&mut Timeseries> {
		self.series.get_mut(name)
	}

	/// ABSENT -> EXISTS(name, 0, ...) on first ADDPOINTS (auto-create).
	pub fn get_or_create_mut(&mut self, name: &str) -> &mut Timeseries {
		self.series.entry_ref(name).or_insert_with(|| Timeseries::new(name.to_owned(), 0))
	}

	pub fn len(&self) -> usize {
		self.series.len()
	}

	pub fn is_empty(&self) -> bool {
		self.series.is_empty()
	}
}
