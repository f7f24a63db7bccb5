//! Opcode -> handler routing: one function per request opcode, each taking
//! the decoded request and a `&mut Registry` and producing exactly one
//! response packet. Handlers are synchronous and never touch the reactor
//! directly; they are plugged into it as the dispatch closure `Reactor::new`
//! takes.

use collections::{query, Created, NewPoint, QuerySpec, Registry, Row};
use log::debug;
use wire::{InPoint, Label as WireLabel, Packet, QueryFields, ResultRow, Status};

use runtime::DispatchOutcome;

fn to_engine_label((k, v): &WireLabel) -> collections::Label {
	(k.as_str().into(), v.as_str().into())
}

fn to_wire_label((k, v): &collections::Label) -> WireLabel {
	(k.to_string(), v.to_string())
}

fn to_query_spec(fields: &QueryFields) -> QuerySpec {
	QuerySpec {
		mean_window_ns: fields.mean_window_ms.map(|ms| ms * 1_000_000),
		first: fields.first,
		last: fields.last,
		major_of: fields.major_of,
		minor_of: fields.minor_of,
		filter: fields.filter.iter().map(to_engine_label).collect(),
	}
}

fn row_to_result(row: Row) -> ResultRow {
	let (ts_sec, ts_nsec) = utils::time::split_ns(row.ts);
	ResultRow { rc: Status::Ok, ts_sec, ts_nsec, value: row.value, labels: row.labels.iter().map(to_wire_label).collect() }
}

fn handle_create_ts(registry: &mut Registry, name: &str, retention_ms: u32) -> Packet {
	match registry.create(name, retention_ms) {
		Created::New => {}
		Created::AlreadyExisted => debug!("CREATE_TS {name:?}: already exists, leaving it unchanged"),
	}
	Packet::Ack { status: Status::Ok }
}

fn handle_delete_ts(registry: &mut Registry, name: &str) -> Packet {
	if registry.delete(name) {
		Packet::Ack { status: Status::Ok }
	} else {
		debug!("DELETE_TS {name:?}: not found");
		Packet::Ack { status: Status::NotFound }
	}
}

fn handle_add_points(registry: &mut Registry, name: &str, points: Vec<InPoint>) -> Packet {
	let ts = registry.get_or_create_mut(name);

	for p in points {
		let new_point = NewPoint { value: p.value, ts_sec: p.ts_sec, ts_nsec: p.ts_nsec, labels: p.labels.iter().map(to_engine_label).collect() };
		if let Err(e) = ts.add(new_point) {
			debug!("ADDPOINTS {name:?}: {e}");
			return Packet::Ack { status: Status::Oom };
		}
	}

	Packet::Ack { status: Status::Ok }
}

fn handle_query(registry: &mut Registry, name: &str, fields: &QueryFields) -> Packet {
	let Some(ts) = registry.get(name) else {
		debug!("QUERY {name:?}: not found");
		return Packet::Ack { status: Status::NotFound };
	};

	let spec = to_query_spec(fields);
	let rows = query::execute(ts, &spec).into_iter().map(row_to_result).collect();
	Packet::QueryResponse { status: Status::Ok, rows }
}

/// Handles one fully-framed request. A malformed frame is caught by
/// [`Packet::decode`] before a packet variant exists to dispatch on, so
/// the only outcomes are a response to send or, on a malformed frame,
/// closing the connection with no response.
pub fn handle(registry: &mut Registry, frame: &[u8]) -> DispatchOutcome {
	let packet = match Packet::decode(frame) {
		Ok(p) => p,
		Err(e) => {
			debug!("rejecting malformed frame: {e}");
			return DispatchOutcome::Close;
		}
	};

	let response = match packet {
		Packet::CreateTs { name, retention_ms } => handle_create_ts(registry, &name, retention_ms),
		Packet::DeleteTs { name } => handle_delete_ts(registry, &name),
		Packet::AddPoints { name, points } => handle_add_points(registry, &name, points),
		Packet::Query { name, fields } => handle_query(registry, &name, &fields),
		// A request-direction decode never yields a response variant; see
		// `Packet::decode`'s `(opcode, is_response)` match.
		Packet::QueryResponse { .. } | Packet::Ack { .. } => {
			debug!("rejecting unexpected response-shaped request frame");
			return DispatchOutcome::Close;
		}
	};

	DispatchOutcome::Response(response.encode())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn decode_ack(bytes: &[u8]) -> Status {
		match Packet::decode(bytes).unwrap() {
			Packet::Ack { status } => status,
			other => panic!("expected Ack, got {other:?}"),
		}
	}

	#[test]
	fn create_then_create_acks_ok_both_times() {
		let mut reg = Registry::new();
		let req = Packet::CreateTs { name: "cpu".into(), retention_ms: 0 }.encode();

		let DispatchOutcome::Response(r1) = handle(&mut reg, &req) else { panic!("expected response") };
		assert_eq!(decode_ack(&r1), Status::Ok);

		let DispatchOutcome::Response(r2) = handle(&mut reg, &req) else { panic!("expected response") };
		assert_eq!(decode_ack(&r2), Status::Ok);
		assert_eq!(reg.len(), 1);
	}

	#[test]
	fn delete_of_absent_name_is_not_found() {
		let mut reg = Registry::new();
		let req = Packet::DeleteTs { name: "nope".into() }.encode();
		let DispatchOutcome::Response(r) = handle(&mut reg, &req) else { panic!("expected response") };
		assert_eq!(decode_ack(&r), Status::NotFound);
	}

	#[test]
	fn query_on_absent_timeseries_is_not_found() {
		let mut reg = Registry::new();
		let req = Packet::Query { name: "nope".into(), fields: QueryFields::default() }.encode();
		let DispatchOutcome::Response(r) = handle(&mut reg, &req) else { panic!("expected response") };
		assert_eq!(decode_ack(&r), Status::NotFound);
	}

	#[test]
	fn addpoints_auto_creates_and_query_all_returns_inserted_points() {
		let mut reg = Registry::new();

		let add = Packet::AddPoints {
			name: "cpu".into(),
			points: vec![
				InPoint { value: 0.5, ts_sec: Some(1_700_000_000), ts_nsec: Some(0), labels: vec![("host".into(), "a".into())] },
				InPoint { value: 1.5, ts_sec: Some(1_700_000_000), ts_nsec: Some(1_000), labels: vec![("host".into(), "a".into())] },
			],
		}
		.encode();
		let DispatchOutcome::Response(r) = handle(&mut reg, &add) else { panic!("expected response") };
		assert_eq!(decode_ack(&r), Status::Ok);

		let query = Packet::Query { name: "cpu".into(), fields: QueryFields::default() }.encode();
		let DispatchOutcome::Response(r) = handle(&mut reg, &query) else { panic!("expected response") };
		match Packet::decode(&r).unwrap() {
			Packet::QueryResponse { status, rows } => {
				assert_eq!(status, Status::Ok);
				assert_eq!(rows.len(), 2);
				assert_eq!(rows[0].value, 0.5);
				assert_eq!(rows[1].value, 1.5);
			}
			other => panic!("expected QueryResponse, got {other:?}"),
		}
	}

	#[test]
	fn malformed_frame_closes_the_connection() {
		let mut reg = Registry::new();
		let mut bytes = Packet::CreateTs { name: "cpu".into(), retention_ms: 0 }.encode();
		bytes.pop();
		assert_eq!(handle(&mut reg, &bytes), DispatchOutcome::Close);
	}
}
