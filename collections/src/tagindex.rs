//! The tag index: a two-level `label-name -> label-value -> record set`
//! mapping, maintained incrementally as records are inserted.
//!
//! Label cardinality is unbounded at compile time, so this builds on
//! `hashbrown`'s ordinary safe `HashMap` keyed with `ahash`, not a
//! const-generic fixed-slot table.

use hashbrown::HashMap;

use crate::record::Label;

type Inner<V> = HashMap<Box<str>, V, ahash::RandomState>;

/// References record positions (`Record::index`); the records themselves
/// live in `Timeseries::records`. Destroying the timeseries drops the
/// whole `TagIndex` at once, so no explicit invalidation step is needed.
#[derive(Default)]
pub struct TagIndex {
	by_name: Inner<Inner<Vec<usize>>>,
}

impl TagIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `record_index` to the set for `(name, value)`, creating the
	/// name/value nodes on demand. A record that carries the same
	/// `(name, value)` pair twice would be appended twice here; the insert
	/// path in `Timeseries::add` only calls this once per distinct label
	/// pair on a record, so a record never appears twice under the same
	/// pair.
	pub fn insert(&mut self, name: &str, value: &str, record_index: usize) {
		self.by_name.entry(name.into()).or_insert_with(Inner::default).entry(value.into()).or_insert_with(Vec::new).push(record_index);
	}

	/// Record indices carrying `(name, value)`, in insertion order.
	pub fn lookup(&self, name: &str, value: &str) -> Option<&[usize]> {
		self.by_name.get(name)?.get(value).map(Vec::as_slice)
	}

	/// True if `record_index` is present in the set for `(name, value)`, for
	/// use by tests checking that a record is never indexed twice under the
	/// same pair.
	#[cfg(test)]
	fn contains(&self, name: &str, value: &str, record_index: usize) -> bool {
		self.lookup(name, value).is_some_and(|idxs| idxs.contains(&record_index))
	}
}

pub(crate) fn for_each_label(labels: &[Label], mut f: impl FnMut(&str, &str)) {
	for (name, value) in labels {
		f(name, value);
	}
}
