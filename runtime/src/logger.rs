//! The process-wide logger: colored, timestamped lines on stderr, with an
//! optional mirror to a file (the `log_path` config key), and an `install`
//! entry point that also sets the global max level from configuration.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use log::{Level, LevelFilter};
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

use utils::{Error, Result};

pub struct Logger {
	mirror: Option<Mutex<File>>,
}

impl Logger {
	/// Installs a process-wide logger writing colored lines to stderr and,
	/// when `mirror_path` is set, plain lines appended to that file.
	pub fn install(level: LevelFilter, mirror_path: Option<&Path>) -> Result<()> {
		let mirror = mirror_path.map(|p| OpenOptions::new().create(true).append(true).open(p).map(Mutex::new)).transpose().map_err(Error::Io)?;

		log::set_boxed_logger(Box::new(Logger { mirror })).map_err(|e| Error::Config(format!("logger already installed: {e}")))?;
		log::set_max_level(level);

		Ok(())
	}
}

impl log::Log for Logger {
	fn enabled(&self, _: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let time = humantime::format_rfc3339_nanos(SystemTime::now());

		if let Some(mirror) = &self.mirror {
			if let Ok(mut file) = mirror.lock() {
				let _ = writeln!(file, "{time} {:5} {}: {}", record.level(), record.target(), record.args());
			}
		}

		let dim = Style::new().dimmed().prefix();

		eprintln!(
			"{dim}{time}{RESET} {}{:5}{RESET} {}{}{RESET}{dim}:{RESET} {}",
			match record.level() {
				Level::Trace => Color::Purple,
				Level::Debug => Color::Blue,
				Level::Info => Color::Green,
				Level::Warn => Color::Yellow,
				Level::Error => Color::Red,
			}
			.bold()
			.prefix(),
			record.level(),
			Style::new().bold().prefix(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}
