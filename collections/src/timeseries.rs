//! The timeseries aggregate: name, retention, the paired timestamp/record
//! vectors, and the tag index.

use utils::{time, Error};

use crate::record::{Label, Record};
use crate::sample::SampleVec;
use crate::tagindex::{for_each_label, TagIndex};

/// A not-yet-inserted sample, as decoded off an ADDPOINTS request.
#[derive(Debug, Clone)]
pub struct NewPoint {
	pub value: f64,
	pub ts_sec: Option<u64>,
	pub ts_nsec: Option<u64>,
	pub labels: Vec<Label>,
}

pub struct Timeseries {
	pub name: String,
	pub retention_ms: u32,
	pub timestamps: SampleVec,
	pub records: Vec<Record>,
	pub tags: TagIndex,
}

impl Timeseries {
	/// A ceiling on records-per-timeseries, standing in for an allocation
	/// failure a caller could act on. Stable safe Rust has no
	/// fallible-allocation API for `Vec`, so true OOM cannot be caught here;
	/// this cap gives the OOM path in the dispatcher something concrete to
	/// trigger on.
	pub const MAX_RECORDS: usize = 64 * 1024 * 1024;

	pub fn new(name: String, retention_ms: u32) -> Self {
		Self { name, retention_ms, timestamps: SampleVec::new(), records: Vec::new(), tags: TagIndex::new() }
	}

	/// Inserts one point, filling any missing timestamp component from the
	/// wall clock, and indexing its labels.
	///
	/// All three appends (timestamp, record, tag-index entries) either all
	/// happen or none do: the capacity check below runs before any of them,
	/// so there is nothing to roll back on the error path, and the
	/// timestamp/record vectors and tag index stay consistent with each
	/// other.
	pub fn add(&mut self, p: NewPoint) -> Result<usize, Error> {
		if self.records.len() >= Self::MAX_RECORDS {
			log::warn!("timeseries {:?} hit its {}-record cap, rejecting ADDPOINTS", self.name, Self::MAX_RECORDS);
			return Err(Error::Oom);
		}

		let (now_sec, now_nsec) = time::split_ns(time::now_ns());
		let ts_sec = p.ts_sec.unwrap_or(now_sec);
		let ts_nsec = p.ts_nsec.unwrap_or(now_nsec);
		let ts = time::join_ns(ts_sec, ts_nsec);

		let index = self.records.len();
		self.timestamps.append(ts);

		for_each_label(&p.labels, |name, value| self.tags.insert(name, value, index));

		self.records.push(Record::new(index, p.value, p.labels));

		debug_assert_eq!(self.timestamps.len(), self.records.len(), "T1: timestamps and records must stay parallel");

		Ok(index)
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}
