//! `tts-cli`: the line-oriented shell that translates a small text dialect
//! into wire requests over a blocking connection, and prints the decoded
//! response. A plain read-dispatch-loop REPL; see `parser` for the line
//! grammar it accepts.

mod parser;

use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::Parser as ClapParser;
use wire::{Packet, Status, HEADER_LEN};

#[derive(Debug, ClapParser)]
#[command(name = "tts-cli", about = "interactive client for the tts server")]
struct Flags {
	/// Server address (TCP mode).
	#[arg(short = 'a', long = "address", default_value = "127.0.0.1")]
	address: String,

	/// Server port (TCP mode).
	#[arg(short = 'p', long = "port", default_value_t = server_config_default_port())]
	port: u16,

	/// Connect over a Unix-domain socket at this path instead of TCP.
	#[arg(short = 'u', long = "unix")]
	unix_socket: Option<PathBuf>,
}

/// The server's default listen port.
fn server_config_default_port() -> u16 {
	19191
}

enum Conn {
	Tcp(TcpStream),
	Unix(UnixStream),
}

impl Conn {
	fn connect(flags: &Flags) -> io::Result<Self> {
		if let Some(path) = &flags.unix_socket {
			return Ok(Conn::Unix(UnixStream::connect(path)?));
		}
		Ok(Conn::Tcp(TcpStream::connect((flags.address.as_str(), flags.port))?))
	}

	fn send_packet(&mut self, packet: &Packet) -> io::Result<Packet> {
		let frame = packet.encode();
		match self {
			Conn::Tcp(s) => s.write_all(&frame)?,
			Conn::Unix(s) => s.write_all(&frame)?,
		}
		self.read_frame()
	}

	fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
		match self {
			Conn::Tcp(s) => s.read_exact(buf),
			Conn::Unix(s) => s.read_exact(buf),
		}
	}

	fn read_frame(&mut self) -> io::Result<Packet> {
		let mut prefix = [0u8; HEADER_LEN];
		self.read_exact(&mut prefix)?;
		let body_len = Packet::peek_body_len(&prefix) as usize;

		let mut frame = Vec::with_capacity(HEADER_LEN + body_len);
		frame.extend_from_slice(&prefix);
		frame.resize(HEADER_LEN + body_len, 0);
		self.read_exact(&mut frame[HEADER_LEN..])?;

		Packet::decode(&frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
	}
}

fn print_response(packet: &Packet) {
	match packet {
		Packet::Ack { status } => println!("{}", describe_status(*status)),
		Packet::QueryResponse { status, .. } if *status != Status::Ok => println!("{}", describe_status(*status)),
		Packet::QueryResponse { rows, .. } => {
			if rows.is_empty() {
				println!("(no rows)");
			}
			for row in rows {
				let labels: Vec<String> = row.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
				println!("{}.{:09} {} [{}]", row.ts_sec, row.ts_nsec, row.value, labels.join(", "));
			}
		}
		other => println!("unexpected response: {other:?}"),
	}
}

fn describe_status(status: Status) -> &'static str {
	match status {
		Status::Ok => "OK",
		Status::NotFound => "NOT_FOUND",
		Status::UnknownCmd => "UNKNOWN_CMD",
		Status::Oom => "OOM",
	}
}

fn main() -> io::Result<()> {
	let flags = Flags::parse();
	let mut conn = Conn::connect(&flags)?;

	let stdin = io::stdin();
	let mut lines = stdin.lock().lines();

	loop {
		print!("> ");
		io::stdout().flush()?;

		let Some(line) = lines.next() else {
			break;
		};
		let line = line?;

		match parser::parse_line(&line) {
			Ok(None) => continue,
			Ok(Some(parser::Command::Quit)) => break,
			Ok(Some(command)) => {
				let packet = command.into_packet().expect("non-Quit commands always produce a packet");
				match conn.send_packet(&packet) {
					Ok(response) => print_response(&response),
					Err(e) => {
						eprintln!("connection error: {e}");
						break;
					}
				}
			}
			Err(message) => println!("error: {message}"),
		}
	}

	Ok(())
}
