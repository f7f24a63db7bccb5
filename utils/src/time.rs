use std::time::{SystemTime, UNIX_EPOCH};

/// The current wall-clock time as nanoseconds since the UNIX epoch.
///
/// Used to fill in timestamp components the client did not supply (the `*`
/// placeholder in the CLI dialect, or an ADDPOINTS point with its flag bits
/// clear). Internally the whole engine works in nanoseconds; this is the one
/// place wall-clock time enters it.
pub fn now_ns() -> u64 {
	let dur = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is before the UNIX epoch");

	dur.as_secs() * 1_000_000_000 + u64::from(dur.subsec_nanos())
}

/// Splits a nanosecond timestamp into (seconds, nanoseconds-within-second),
/// the representation used on the wire.
pub fn split_ns(ts: u64) -> (u64, u64) {
	(ts / 1_000_000_000, ts % 1_000_000_000)
}

/// Joins a (seconds, nanoseconds) pair read off the wire into one internal
/// nanosecond timestamp.
pub fn join_ns(sec: u64, nsec: u64) -> u64 {
	sec * 1_000_000_000 + nsec
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_join_round_trips() {
		let ts = 1_700_000_000_123_456_789u64;
		let (sec, nsec) = split_ns(ts);
		assert_eq!(join_ns(sec, nsec), ts);
	}

	#[test]
	fn now_ns_is_plausible() {
		// Sanity bound: some time after 2023-01-01 and before year 2100.
		let ts = now_ns();
		assert!(ts > 1_672_531_200_000_000_000);
		assert!(ts < 4_102_444_800_000_000_000);
	}
}
