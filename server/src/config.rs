//! Startup configuration: an optional `key = value` file, merged with
//! command-line flags that mirror its keys one-for-one. Later source wins;
//! unknown keys are warned about and ignored rather than rejected.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use log::{warn, LevelFilter};
use utils::{Error, Result};

/// Default listen port when no config/flag overrides it.
pub const DEFAULT_PORT: u16 = 19191;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
	Tcp { addr: SocketAddr },
	Unix { path: PathBuf },
}

impl Default for Mode {
	fn default() -> Self {
		Mode::Tcp { addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT) }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub log_level: LevelFilter,
	pub log_path: Option<PathBuf>,
	/// Capped at `SOMAXCONN` by [`Config::apply_key`].
	pub tcp_backlog: i32,
	pub mode: Mode,
}

impl Default for Config {
	fn default() -> Self {
		Self { log_level: LevelFilter::Info, log_path: None, tcp_backlog: somaxconn(), mode: Mode::default() }
	}
}

fn somaxconn() -> i32 {
	// libc's compiled-in SOMAXCONN: 4096 on Linux/glibc, 128 on most BSDs.
	libc::SOMAXCONN as i32
}

fn parse_log_level(value: &str) -> Option<LevelFilter> {
	match value.to_ascii_uppercase().as_str() {
		"FATAL" => Some(LevelFilter::Error),
		"ERROR" => Some(LevelFilter::Error),
		"WARNING" | "WARN" => Some(LevelFilter::Warn),
		"INFO" | "INFORMATION" => Some(LevelFilter::Info),
		"DEBUG" => Some(LevelFilter::Debug),
		_ => None,
	}
}

impl Config {
	/// Applies one `key = value` line. Unknown keys are warned about and
	/// ignored rather than rejected; the only fatal config error is failing
	/// to open the file at all.
	fn apply_key(&mut self, key: &str, value: &str) {
		match key {
			"log_level" => match parse_log_level(value) {
				Some(level) => self.log_level = level,
				None => warn!("unrecognized log_level {value:?}, leaving it at {:?}", self.log_level),
			},
			"log_path" => self.log_path = Some(PathBuf::from(value)),
			"tcp_backlog" => match value.parse::<i32>() {
				Ok(n) => self.tcp_backlog = n.min(somaxconn()),
				Err(_) => warn!("unrecognized tcp_backlog {value:?}, leaving it at {}", self.tcp_backlog),
			},
			"ip_address" => {
				let port = match &self.mode {
					Mode::Tcp { addr } => addr.port(),
					Mode::Unix { .. } => DEFAULT_PORT,
				};
				match value.parse::<IpAddr>() {
					Ok(ip) => self.mode = Mode::Tcp { addr: SocketAddr::new(ip, port) },
					Err(_) => warn!("unrecognized ip_address {value:?}, ignoring"),
				}
			}
			"ip_port" => match value.parse::<u16>() {
				Ok(port) => {
					let ip = match &self.mode {
						Mode::Tcp { addr } => *addr.ip(),
						Mode::Unix { .. } => IpAddr::V4(Ipv4Addr::LOCALHOST),
					};
					self.mode = Mode::Tcp { addr: SocketAddr::new(ip, port) };
				}
				Err(_) => warn!("unrecognized ip_port {value:?}, ignoring"),
			},
			"unix_socket" => self.mode = Mode::Unix { path: PathBuf::from(value) },
			other => warn!("unrecognized configuration key {other:?}, ignoring"),
		}
	}

	/// Parses a `key = value` file, skipping blank lines and lines whose
	/// first non-whitespace character is `#`.
	pub fn merge_file(&mut self, path: &std::path::Path) -> Result<()> {
		let text = fs::read_to_string(path).map_err(Error::Io)?;

		for (lineno, raw_line) in text.lines().enumerate() {
			let line = raw_line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let Some((key, value)) = line.split_once('=') else {
				warn!("ignoring malformed configuration line {}: {raw_line:?}", lineno + 1);
				continue;
			};

			self.apply_key(key.trim(), value.trim());
		}

		Ok(())
	}

	/// Overlays command-line flags on top of whatever the config file (or
	/// the defaults) already produced. Flags always win.
	pub fn merge_flags(&mut self, flags: &Flags) {
		if let Some(addr) = &flags.address {
			let ip = addr.parse::<IpAddr>().unwrap_or_else(|_| {
				warn!("unrecognized -a address {addr:?}, keeping {:?}", self.mode);
				IpAddr::V4(Ipv4Addr::LOCALHOST)
			});
			let port = match &self.mode {
				Mode::Tcp { addr } => addr.port(),
				Mode::Unix { .. } => DEFAULT_PORT,
			};
			self.mode = Mode::Tcp { addr: SocketAddr::new(ip, port) };
		}

		if let Some(port) = flags.port {
			let ip = match &self.mode {
				Mode::Tcp { addr } => *addr.ip(),
				Mode::Unix { .. } => IpAddr::V4(Ipv4Addr::LOCALHOST),
			};
			self.mode = Mode::Tcp { addr: SocketAddr::new(ip, port) };
		}

		match flags.mode.as_deref() {
			Some("unix") => {
				if let Mode::Tcp { .. } = &self.mode {
					warn!("-m unix given with no unix_socket path configured; pass ip_address's value as the path via -a");
				}
			}
			Some("tcp") => {
				if let Mode::Unix { .. } = &self.mode {
					self.mode = Mode::default();
				}
			}
			_ => {}
		}

		if flags.verbose {
			self.log_level = LevelFilter::Debug;
		}

		if flags.daemonize {
			warn!("-d (daemonize) acknowledged but not implemented: this process stays in the foreground");
		}
	}
}

/// Command-line flags: `-c <path> -a <addr> -p <port> -m tcp|unix -v -d -h`.
/// `-h`/`--help` is handled by `clap` itself.
#[derive(Debug, Parser)]
#[command(name = "ttsd", about = "in-memory time-series database server")]
pub struct Flags {
	/// Configuration file path.
	#[arg(short = 'c', long = "config")]
	pub config: Option<PathBuf>,

	/// Listen address (TCP mode).
	#[arg(short = 'a', long = "address")]
	pub address: Option<String>,

	/// Listen port (TCP mode).
	#[arg(short = 'p', long = "port")]
	pub port: Option<u16>,

	/// Transport mode: `tcp` or `unix`.
	#[arg(short = 'm', long = "mode")]
	pub mode: Option<String>,

	/// Debug-level logging.
	#[arg(short = 'v')]
	pub verbose: bool,

	/// Daemonize after startup. Acknowledged but not implemented;
	/// daemonization is handled by whatever process supervisor runs this
	/// binary rather than by the binary itself.
	#[arg(short = 'd')]
	pub daemonize: bool,
}

/// Builds the effective configuration: defaults, overlaid by the config
/// file named on the command line (if any), overlaid by the remaining
/// flags.
pub fn load(flags: &Flags) -> Result<Config> {
	let mut config = Config::default();

	if let Some(path) = &flags.config {
		config.merge_file(path)?;
	}

	config.merge_flags(flags);
	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_documented_listen_address() {
		let config = Config::default();
		assert_eq!(config.mode, Mode::Tcp { addr: "127.0.0.1:19191".parse().unwrap() });
	}

	#[test]
	fn unknown_config_key_is_ignored_not_fatal() {
		let mut config = Config::default();
		config.apply_key("bogus", "value");
		assert_eq!(config, Config::default());
	}

	#[test]
	fn tcp_backlog_is_capped_at_somaxconn() {
		let mut config = Config::default();
		config.apply_key("tcp_backlog", &(somaxconn() as i64 + 1000).to_string());
		assert_eq!(config.tcp_backlog, somaxconn());
	}

	#[test]
	fn unix_socket_key_switches_mode() {
		let mut config = Config::default();
		config.apply_key("unix_socket", "/tmp/tts.sock");
		assert_eq!(config.mode, Mode::Unix { path: PathBuf::from("/tmp/tts.sock") });
	}

	#[test]
	fn flags_override_file_values() {
		let mut config = Config::default();
		config.apply_key("ip_port", "9999");
		let flags = Flags { config: None, address: None, port: Some(1234), mode: None, verbose: false, daemonize: false };
		config.merge_flags(&flags);
		assert_eq!(config.mode, Mode::Tcp { addr: "127.0.0.1:1234".parse().unwrap() });
	}

	#[test]
	fn verbose_flag_forces_debug_logging() {
		let mut config = Config::default();
		let flags = Flags { config: None, address: None, port: None, mode: None, verbose: true, daemonize: false };
		config.merge_flags(&flags);
		assert_eq!(config.log_level, LevelFilter::Debug);
	}
}
