//! Translates one line of the shell dialect into a [`wire::Packet`]: a
//! case-insensitive verb lookup followed by a tokenizing parser per verb.

use wire::{InPoint, Label, Packet, QueryFields};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	Create { name: String, retention_ms: u32 },
	Delete { name: String },
	AddPoints { name: String, points: Vec<InPoint> },
	Query { name: String, fields: QueryFields },
	Quit,
}

/// A timestamp token as written by the user: either `*` ("let the server
/// fill this in from its wall clock") or a decimal number whose digit count
/// selects the unit: 10 digits = seconds, 13 digits = milliseconds, anything
/// else passed through as nanoseconds.
fn normalize_ts(token: &str) -> Result<Option<u64>, String> {
	if token == "*" {
		return Ok(None);
	}

	let n: u64 = token.parse().map_err(|_| format!("not a timestamp: {token:?}"))?;
	let digits = token.trim_start_matches('-').len();

	let ns = match digits {
		10 => n * 1_000_000_000,
		13 => n * 1_000_000,
		_ => n,
	};

	Ok(Some(ns))
}

fn parse_name(tokens: &mut std::str::SplitWhitespace) -> Result<String, String> {
	tokens.next().map(str::to_owned).ok_or_else(|| "expected a timeseries name".to_owned())
}

fn parse_f64(tokens: &mut std::str::SplitWhitespace) -> Result<f64, String> {
	let token = tokens.next().ok_or_else(|| "expected a value".to_owned())?;
	token.parse().map_err(|_| format!("not a number: {token:?}"))
}

/// Parses zero or more trailing `label value` pairs, stopping at end of
/// input or at a literal `-` (the start of the next point block in `add`).
fn parse_labels<'a>(tokens: &mut std::iter::Peekable<std::str::SplitWhitespace<'a>>) -> Result<Vec<Label>, String> {
	let mut labels = Vec::new();
	while let Some(&next) = tokens.peek() {
		if next == "-" {
			break;
		}
		let name = tokens.next().unwrap().to_owned();
		let value = tokens.next().ok_or_else(|| format!("label {name:?} is missing a value"))?.to_owned();
		labels.push((name, value));
	}
	Ok(labels)
}

/// One `<ts> <value> [label value ...]` block, shared by `add` and `madd`.
fn parse_point(tokens: &mut std::iter::Peekable<std::str::SplitWhitespace>) -> Result<InPoint, String> {
	let ts_token = tokens.next().ok_or_else(|| "expected a timestamp or '*'".to_owned())?;
	let ts_ns = normalize_ts(ts_token)?;
	let value_token = tokens.next().ok_or_else(|| "expected a value".to_owned())?;
	let value: f64 = value_token.parse().map_err(|_| format!("not a number: {value_token:?}"))?;
	let labels = parse_labels(tokens)?;

	let (ts_sec, ts_nsec) = match ts_ns {
		Some(ns) => {
			let (sec, nsec) = utils::time::split_ns(ns);
			(Some(sec), Some(nsec))
		}
		None => (None, None),
	};

	Ok(InPoint { value, ts_sec, ts_nsec, labels })
}

fn parse_create(line: &str) -> Result<Command, String> {
	let mut tokens = line.split_whitespace();
	let name = parse_name(&mut tokens)?;
	let retention_ms = match tokens.next() {
		Some(token) => token.parse().map_err(|_| format!("not a retention in ms: {token:?}"))?,
		None => 0,
	};
	Ok(Command::Create { name, retention_ms })
}

fn parse_delete(line: &str) -> Result<Command, String> {
	let mut tokens = line.split_whitespace();
	let name = parse_name(&mut tokens)?;
	Ok(Command::Delete { name })
}

/// `add <name> <ts|*> <value> [label value ...] [- <ts|*> <value> ...]`:
/// one or more point blocks, each separated by a bare `-` token.
fn parse_add(line: &str) -> Result<Command, String> {
	let mut tokens = line.split_whitespace().peekable();
	let name = tokens.next().ok_or_else(|| "expected a timeseries name".to_owned())?.to_owned();

	let mut points = vec![parse_point(&mut tokens)?];
	while tokens.peek() == Some(&"-") {
		tokens.next();
		points.push(parse_point(&mut tokens)?);
	}

	Ok(Command::AddPoints { name, points })
}

/// `madd <name> <ts|*> <value> ...`: the same wire request as `add`, but
/// restricted to a single point per line (no `-`-separated blocks).
fn parse_madd(line: &str) -> Result<Command, String> {
	let mut tokens = line.split_whitespace().peekable();
	let name = tokens.next().ok_or_else(|| "expected a timeseries name".to_owned())?.to_owned();
	let point = parse_point(&mut tokens)?;
	Ok(Command::AddPoints { name, points: vec![point] })
}

/// `query <name> [* | > <ts> | < <ts> | range <lo> <hi>] [first|last] [avg <window_ms>]`
fn parse_query(line: &str) -> Result<Command, String> {
	let mut tokens = line.split_whitespace();
	let name = parse_name(&mut tokens)?;
	let mut fields = QueryFields::default();

	while let Some(token) = tokens.next() {
		match token {
			"*" => {}
			">" => {
				let ts = tokens.next().ok_or_else(|| "'>' expects a timestamp".to_owned())?;
				fields.major_of = normalize_ts(ts)?.or(Some(0));
			}
			"<" => {
				let ts = tokens.next().ok_or_else(|| "'<' expects a timestamp".to_owned())?;
				fields.minor_of = normalize_ts(ts)?.or(Some(u64::MAX));
			}
			"range" => {
				let lo = tokens.next().ok_or_else(|| "'range' expects a lower bound".to_owned())?;
				let hi = tokens.next().ok_or_else(|| "'range' expects an upper bound".to_owned())?;
				fields.major_of = normalize_ts(lo)?.or(Some(0));
				fields.minor_of = normalize_ts(hi)?.or(Some(u64::MAX));
			}
			"first" => fields.first = true,
			"last" => fields.last = true,
			"avg" => {
				let window = tokens.next().ok_or_else(|| "'avg' expects a window in milliseconds".to_owned())?;
				fields.mean_window_ms = Some(window.parse().map_err(|_| format!("not a window: {window:?}"))?);
			}
			other => return Err(format!("unrecognized query term: {other:?}")),
		}
	}

	Ok(Command::Query { name, fields })
}

/// Parses one line. Returns `Ok(None)` for a blank line (reprompt silently).
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
	let line = line.trim();
	if line.is_empty() {
		return Ok(None);
	}

	let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

	let command = match verb.to_ascii_lowercase().as_str() {
		"quit" | "exit" => Command::Quit,
		"create" => parse_create(rest)?,
		"delete" => parse_delete(rest)?,
		"add" => parse_add(rest)?,
		"madd" => parse_madd(rest)?,
		"query" => parse_query(rest)?,
		other => return Err(format!("unknown command: {other:?}")),
	};

	Ok(Some(command))
}

impl Command {
	/// Translates a parsed command into the wire request it sends. `Quit`
	/// never reaches the wire; the REPL loop intercepts it first.
	pub fn into_packet(self) -> Option<Packet> {
		match self {
			Command::Create { name, retention_ms } => Some(Packet::CreateTs { name, retention_ms }),
			Command::Delete { name } => Some(Packet::DeleteTs { name }),
			Command::AddPoints { name, points } => Some(Packet::AddPoints { name, points }),
			Command::Query { name, fields } => Some(Packet::Query { name, fields }),
			Command::Quit => None,
		}
	}
}
