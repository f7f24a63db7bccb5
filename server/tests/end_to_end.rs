//! End-to-end scenarios driven directly against the dispatcher and a fresh
//! `Registry` (no real socket; the reactor and connection layer have their
//! own coverage for framing/I/O).

use collections::Registry;
use runtime::DispatchOutcome;
use server::dispatch;
use wire::{InPoint, Packet, QueryFields, ResultRow, Status};

fn send(registry: &mut Registry, packet: Packet) -> Packet {
	let frame = packet.encode();
	match dispatch::handle(registry, &frame) {
		DispatchOutcome::Response(bytes) => Packet::decode(&bytes).unwrap(),
		other => panic!("expected a response, got {other:?}"),
	}
}

fn label(k: &str, v: &str) -> (String, String) {
	(k.to_owned(), v.to_owned())
}

#[test]
fn create_then_add_then_query_all() {
	let mut reg = Registry::new();

	assert_eq!(send(&mut reg, Packet::CreateTs { name: "cpu".into(), retention_ms: 0 }), Packet::Ack { status: Status::Ok });

	let add = Packet::AddPoints {
		name: "cpu".into(),
		points: vec![
			InPoint { value: 0.5, ts_sec: Some(1_700_000_000), ts_nsec: Some(0), labels: vec![label("host", "a")] },
			InPoint { value: 1.5, ts_sec: Some(1_700_000_000), ts_nsec: Some(1_000), labels: vec![label("host", "a")] },
		],
	};
	assert_eq!(send(&mut reg, add), Packet::Ack { status: Status::Ok });

	let response = send(&mut reg, Packet::Query { name: "cpu".into(), fields: QueryFields::default() });
	match response {
		Packet::QueryResponse { status, rows } => {
			assert_eq!(status, Status::Ok);
			assert_eq!(rows.len(), 2);
			assert_eq!(rows[0], ResultRow { rc: Status::Ok, ts_sec: 1_700_000_000, ts_nsec: 0, value: 0.5, labels: vec![label("host", "a")] });
			assert_eq!(rows[1], ResultRow { rc: Status::Ok, ts_sec: 1_700_000_000, ts_nsec: 1_000, value: 1.5, labels: vec![label("host", "a")] });
		}
		other => panic!("expected QueryResponse, got {other:?}"),
	}
}

#[test]
fn auto_create_on_add() {
	let mut reg = Registry::new();
	assert!(reg.get("mem").is_none());

	let add = Packet::AddPoints { name: "mem".into(), points: vec![InPoint { value: 42.0, ts_sec: None, ts_nsec: None, labels: vec![] }] };
	assert_eq!(send(&mut reg, add), Packet::Ack { status: Status::Ok });

	let ts = reg.get("mem").expect("mem should have been auto-created");
	assert_eq!(ts.len(), 1);
	assert_eq!(ts.records[0].value, 42.0);
}

#[test]
fn range_query_with_ties_includes_all_equal_neighbors() {
	let mut reg = Registry::new();
	reg.create("t", 0);

	let points = [(10, 1.0), (20, 2.0), (20, 3.0), (20, 4.0), (30, 5.0)]
		.into_iter()
		.map(|(ts, v)| InPoint { value: v, ts_sec: Some(0), ts_nsec: Some(ts), labels: vec![] })
		.collect();
	send(&mut reg, Packet::AddPoints { name: "t".into(), points });

	let fields = QueryFields { major_of: Some(20), minor_of: Some(20), ..Default::default() };
	match send(&mut reg, Packet::Query { name: "t".into(), fields }) {
		Packet::QueryResponse { rows, .. } => {
			assert_eq!(rows.iter().map(|r| r.value).collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
		}
		other => panic!("expected QueryResponse, got {other:?}"),
	}
}

#[test]
fn time_windowed_mean() {
	let mut reg = Registry::new();
	reg.create("t", 0);

	let points = [(0, 10.0), (1_000_000, 20.0), (2_000_000, 30.0), (3_000_000, 40.0), (4_000_000, 50.0)]
		.into_iter()
		.map(|(ts, v)| InPoint { value: v, ts_sec: Some(0), ts_nsec: Some(ts), labels: vec![] })
		.collect();
	send(&mut reg, Packet::AddPoints { name: "t".into(), points });

	let fields = QueryFields { mean_window_ms: Some(2), ..Default::default() };
	match send(&mut reg, Packet::Query { name: "t".into(), fields }) {
		Packet::QueryResponse { rows, .. } => {
			assert_eq!(rows.len(), 2);
			assert!((rows[0].value - 20.0).abs() < 1e-9);
			assert!((rows[1].value - 45.0).abs() < 1e-9);
		}
		other => panic!("expected QueryResponse, got {other:?}"),
	}
}

#[test]
fn first_and_last() {
	let mut reg = Registry::new();
	reg.create("t", 0);

	let points = [7.0, 8.0, 9.0].into_iter().enumerate().map(|(i, v)| InPoint { value: v, ts_sec: Some(0), ts_nsec: Some(i as u64), labels: vec![] }).collect();
	send(&mut reg, Packet::AddPoints { name: "t".into(), points });

	let first = send(&mut reg, Packet::Query { name: "t".into(), fields: QueryFields { first: true, ..Default::default() } });
	let last = send(&mut reg, Packet::Query { name: "t".into(), fields: QueryFields { last: true, ..Default::default() } });

	match (first, last) {
		(Packet::QueryResponse { rows: first_rows, .. }, Packet::QueryResponse { rows: last_rows, .. }) => {
			assert_eq!(first_rows[0].value, 7.0);
			assert_eq!(last_rows[0].value, 9.0);
		}
		other => panic!("expected QueryResponse pair, got {other:?}"),
	}
}

#[test]
fn delete_and_not_found() {
	let mut reg = Registry::new();

	assert_eq!(send(&mut reg, Packet::DeleteTs { name: "nope".into() }), Packet::Ack { status: Status::NotFound });

	assert_eq!(send(&mut reg, Packet::CreateTs { name: "x".into(), retention_ms: 0 }), Packet::Ack { status: Status::Ok });
	assert_eq!(send(&mut reg, Packet::DeleteTs { name: "x".into() }), Packet::Ack { status: Status::Ok });

	assert_eq!(send(&mut reg, Packet::Query { name: "x".into(), fields: QueryFields::default() }), Packet::Ack { status: Status::NotFound });
}

#[test]
fn empty_addpoints_body_leaves_timeseries_unchanged() {
	let mut reg = Registry::new();
	reg.create("t", 0);

	assert_eq!(send(&mut reg, Packet::AddPoints { name: "t".into(), points: vec![] }), Packet::Ack { status: Status::Ok });
	assert_eq!(reg.get("t").unwrap().len(), 0);
}

#[test]
fn range_major_greater_than_minor_is_empty() {
	let mut reg = Registry::new();
	reg.create("t", 0);
	send(
		&mut reg,
		Packet::AddPoints {
			name: "t".into(),
			points: vec![InPoint { value: 1.0, ts_sec: Some(0), ts_nsec: Some(10), labels: vec![] }, InPoint { value: 2.0, ts_sec: Some(0), ts_nsec: Some(20), labels: vec![] }],
		},
	);

	let fields = QueryFields { major_of: Some(20), minor_of: Some(10), ..Default::default() };
	match send(&mut reg, Packet::Query { name: "t".into(), fields }) {
		Packet::QueryResponse { rows, .. } => assert!(rows.is_empty()),
		other => panic!("expected QueryResponse, got {other:?}"),
	}
}

#[test]
fn malformed_frame_is_rejected_with_no_response() {
	let mut reg = Registry::new();
	let mut bytes = Packet::CreateTs { name: "cpu".into(), retention_ms: 0 }.encode();
	bytes.pop();
	assert_eq!(dispatch::handle(&mut reg, &bytes), DispatchOutcome::Close);
}
