//! `ttsd`: wires together configuration, logging, the registry, and the
//! reactor into a running server.

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use collections::Registry;
use log::info;
use runtime::Reactor;
use server::config::{self, Flags, Mode};
use server::dispatch;

fn run() -> utils::Result<()> {
	let flags = Flags::parse();
	let config = config::load(&flags)?;

	runtime::Logger::install(config.log_level, config.log_path.as_deref())?;

	info!("ttsd starting");
	info!("log level: {:?}", config.log_level);
	info!("tcp backlog: {}", config.tcp_backlog);

	let registry = Rc::new(RefCell::new(Registry::new()));
	let dispatch_registry = Rc::clone(&registry);

	let mut reactor = Reactor::new(move |frame: &[u8]| dispatch::handle(&mut dispatch_registry.borrow_mut(), frame))?;

	match &config.mode {
		Mode::Tcp { addr } => {
			info!("listening on tcp://{addr}");
			reactor.listen_tcp(*addr, config.tcp_backlog)?;
		}
		Mode::Unix { path } => {
			info!("listening on unix://{}", path.display());
			reactor.listen_unix(path, config.tcp_backlog)?;
		}
	}

	reactor.run()
}

fn main() -> ExitCode {
	match run() {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			// The logger may not have been installed yet (e.g. the config
			// file itself failed to read), so a fatal startup error is
			// reported directly rather than through `log::error!`.
			eprintln!("ttsd: fatal: {e}");
			ExitCode::FAILURE
		}
	}
}
