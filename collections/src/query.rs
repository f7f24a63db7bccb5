//! The query/aggregation engine: range resolution, first/last, filter
//! intersection, and time-windowed mean.

use hashbrown::HashSet;

use crate::record::Label;
use crate::sample::SampleVec;
use crate::timeseries::Timeseries;

/// One output row. `labels` is empty for rows produced by a mean window,
/// since a window aggregates across samples that may carry different
/// labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
	pub ts: u64,
	pub value: f64,
	pub labels: Vec<Label>,
}

/// A decoded QUERY request, already past the wire format. Durations and
/// windows are nanoseconds throughout internally, converted only at the
/// wire/CLI edges.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
	pub mean_window_ns: Option<u64>,
	pub first: bool,
	pub last: bool,
	pub major_of: Option<u64>,
	pub minor_of: Option<u64>,
	pub filter: Vec<Label>,
}

/// Resolves the inclusive index range `[lo, hi]` covered by
/// `[major_of, minor_of]`, expanding both ends to swallow every timestamp
/// tied with the boundary. Returns `None` when the range is
/// empty: `major_of > minor_of`, or the timeseries has no sample inside
/// `[major_of, minor_of]`.
pub fn get_range_indexes(ts: &SampleVec, major_of: u64, minor_of: u64) -> Option<(usize, usize)> {
	if ts.is_empty() || major_of > minor_of {
		return None;
	}

	let len = ts.len() as isize;
	let mut lo = ts.search(major_of) as isize;
	let mut hi = ts.search(minor_of) as isize - 1;

	while lo > 0 && ts.at((lo - 1) as usize) >= major_of {
		lo -= 1;
	}
	while hi + 1 < len && ts.at((hi + 1) as usize) <= minor_of {
		hi += 1;
	}

	if hi < lo || hi < 0 || lo >= len {
		return None;
	}

	Some((lo as usize, hi as usize))
}

fn intersect_filter(ts: &Timeseries, filter: &[Label]) -> Option<HashSet<usize>> {
	let mut iter = filter.iter();
	let (name, value) = iter.next()?;
	let mut acc: HashSet<usize> = ts.tags.lookup(name, value)?.iter().copied().collect();

	for (name, value) in iter {
		let set: HashSet<usize> = ts.tags.lookup(name, value)?.iter().copied().collect();
		acc.retain(|i| set.contains(i));
	}

	Some(acc)
}

/// Partitions `points` (already ordered by storage position, which need not
/// be timestamp order) into consecutive `window_ns`-wide windows anchored
/// at `anchor0`, emitting one row per non-empty window whose timestamp is
/// the window's upper boundary. `anchor0` is advanced forward by whole
/// windows until it reaches the first point's timestamp, covering a range
/// query anchored before the first in-range sample.
fn compute_mean_rows(points: &[(u64, f64)], window_ns: u64, anchor0: u64) -> Vec<Row> {
	if points.is_empty() || window_ns == 0 {
		return Vec::new();
	}

	let mut anchor = anchor0;
	let first_ts = points[0].0;
	while anchor < first_ts {
		anchor += window_ns;
	}

	let mut rows = Vec::new();
	let mut i = 0;
	let mut boundary = anchor + window_ns;

	while i < points.len() {
		let mut sum = 0.0;
		let mut count = 0u64;

		while i < points.len() && points[i].0 <= boundary {
			sum += points[i].1;
			count += 1;
			i += 1;
		}

		if count > 0 {
			rows.push(Row { ts: boundary, value: sum / count as f64, labels: Vec::new() });
		}

		boundary += window_ns;
	}

	rows
}

/// Runs one query against an existing timeseries. Callers (the dispatcher)
/// are responsible for the NOT_FOUND case when the name itself is absent.
pub fn execute(ts: &Timeseries, spec: &QuerySpec) -> Vec<Row> {
	if ts.is_empty() {
		return Vec::new();
	}

	let has_range = spec.major_of.is_some() || spec.minor_of.is_some();

	let base_indices: Vec<usize> = if has_range {
		let major = spec.major_of.unwrap_or_else(|| ts.timestamps.first().unwrap());
		let minor = spec.minor_of.unwrap_or_else(|| ts.timestamps.last().unwrap());
		match get_range_indexes(&ts.timestamps, major, minor) {
			Some((lo, hi)) => (lo..=hi).collect(),
			None => Vec::new(),
		}
	} else if spec.first {
		vec![0]
	} else if spec.last {
		vec![ts.len() - 1]
	} else {
		(0..ts.len()).collect()
	};

	let selected: Vec<usize> = if spec.filter.is_empty() {
		base_indices
	} else {
		match intersect_filter(ts, &spec.filter) {
			Some(allowed) => base_indices.into_iter().filter(|i| allowed.contains(i)).collect(),
			None => Vec::new(),
		}
	};

	if let Some(window_ns) = spec.mean_window_ns {
		let points: Vec<(u64, f64)> = selected.iter().map(|&i| (ts.timestamps.at(i), ts.records[i].value)).collect();

		let anchor0 = if has_range {
			spec.major_of.unwrap_or_else(|| ts.timestamps.first().unwrap())
		} else {
			points.first().map(|p| p.0).unwrap_or(0)
		};

		compute_mean_rows(&points, window_ns, anchor0)
	} else {
		selected.into_iter().map(|i| Row { ts: ts.timestamps.at(i), value: ts.records[i].value, labels: ts.records[i].labels.clone() }).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::timeseries::NewPoint;

	fn label(k: &str, v: &str) -> Label {
		(k.into(), v.into())
	}

	fn series_with(points: &[(u64, f64)]) -> Timeseries {
		let mut ts = Timeseries::new("t".into(), 0);
		for &(t, v) in points {
			ts.add(NewPoint { value: v, ts_sec: Some(t), ts_nsec: Some(0), labels: vec![] }).unwrap();
		}
		ts
	}

	#[test]
	fn all_returns_every_sample_in_storage_order() {
		let ts = series_with(&[(1, 1.0), (0, 2.0), (2, 3.0)]);
		let rows = execute(&ts, &QuerySpec::default());
		assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
	}

	#[test]
	fn first_and_last() {
		let ts = series_with(&[(7, 7.0), (8, 8.0), (9, 9.0)]);
		let first = execute(&ts, &QuerySpec { first: true, ..Default::default() });
		let last = execute(&ts, &QuerySpec { last: true, ..Default::default() });
		assert_eq!(first[0].value, 7.0);
		assert_eq!(last[0].value, 9.0);
	}

	#[test]
	fn first_last_on_empty_timeseries_yields_zero_rows() {
		let ts = Timeseries::new("t".into(), 0);
		assert!(execute(&ts, &QuerySpec { first: true, ..Default::default() }).is_empty());
		assert!(execute(&ts, &QuerySpec { last: true, ..Default::default() }).is_empty());
	}

	#[test]
	fn range_with_ties_includes_all_equal_neighbors() {
		let ts = series_with(&[(10, 1.0), (20, 2.0), (20, 3.0), (20, 4.0), (30, 5.0)]);
		let rows = execute(&ts, &QuerySpec { major_of: Some(20), minor_of: Some(20), ..Default::default() });
		assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
	}

	#[test]
	fn range_major_greater_than_minor_is_empty() {
		let ts = series_with(&[(10, 1.0), (20, 2.0)]);
		let rows = execute(&ts, &QuerySpec { major_of: Some(20), minor_of: Some(10), ..Default::default() });
		assert!(rows.is_empty());
	}

	#[test]
	fn mean_without_range_partitions_from_first_sample() {
		let ts = series_with(&[(0, 10.0), (1_000_000, 20.0), (2_000_000, 30.0), (3_000_000, 40.0), (4_000_000, 50.0)]);
		let rows = execute(&ts, &QuerySpec { mean_window_ns: Some(2_000_000), ..Default::default() });
		assert_eq!(rows.len(), 2);
		assert!((rows[0].value - 20.0).abs() < 1e-9);
		assert!((rows[1].value - 45.0).abs() < 1e-9);
		assert!(rows.iter().all(|r| r.labels.is_empty()));
	}

	#[test]
	fn filter_restricts_to_intersection() {
		let mut ts = Timeseries::new("t".into(), 0);
		ts.add(NewPoint { value: 1.0, ts_sec: Some(1), ts_nsec: Some(0), labels: vec![label("host", "a")] }).unwrap();
		ts.add(NewPoint { value: 2.0, ts_sec: Some(2), ts_nsec: Some(0), labels: vec![label("host", "b")] }).unwrap();
		ts.add(NewPoint { value: 3.0, ts_sec: Some(3), ts_nsec: Some(0), labels: vec![label("host", "a"), label("dc", "eu")] }).unwrap();

		let rows = execute(&ts, &QuerySpec { filter: vec![label("host", "a")], ..Default::default() });
		assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), vec![1.0, 3.0]);

		let rows = execute(&ts, &QuerySpec { filter: vec![label("host", "a"), label("dc", "eu")], ..Default::default() });
		assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), vec![3.0]);
	}

	#[test]
	fn filter_on_absent_label_is_empty() {
		let ts = series_with(&[(1, 1.0)]);
		let rows = execute(&ts, &QuerySpec { filter: vec![label("host", "nope")], ..Default::default() });
		assert!(rows.is_empty());
	}
}
