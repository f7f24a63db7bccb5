//! The single-threaded, readiness-based event loop: a `libc::poll`
//! multiplexer over a growable array of monitored descriptors, FD→callback
//! dispatch, software cron timers, and signal-driven shutdown via a
//! self-pipe.
//!
//! Parallel `fds`/`slots` arrays indexed identically, re-armed on
//! `WouldBlock`, with `swap_remove` on close. Each slot owns a
//! [`Connection`] directly and shares one dispatch closure: request/response
//! framing over a registry, with no actor graph.

use std::io;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use utils::{Error, Result};

use crate::connection::{Connection, DispatchOutcome, Flow};

enum Listener {
	Tcp(TcpListener),
	Unix(UnixListener),
}

impl Listener {
	fn accept_all(&self) -> io::Result<Vec<Box<dyn crate::connection::Stream>>> {
		let mut out = Vec::new();
		loop {
			let accepted = match self {
				Listener::Tcp(l) => l.accept().map(|(s, _)| -> Box<dyn crate::connection::Stream> { Box::new(s) }),
				Listener::Unix(l) => l.accept().map(|(s, _)| -> Box<dyn crate::connection::Stream> { Box::new(s) }),
			};

			match accepted {
				Ok(stream) => out.push(stream),
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(out),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}
	}
}

impl AsRawFd for Listener {
	fn as_raw_fd(&self) -> RawFd {
		match self {
			Listener::Tcp(l) => l.as_raw_fd(),
			Listener::Unix(l) => l.as_raw_fd(),
		}
	}
}

enum Slot {
	Listener(Listener),
	Connection(Connection),
	/// Read end of the self-pipe signal handlers write into. A signal
	/// handler writes one byte, and the reactor turns the readable fd
	/// into a stop event.
	Wake,
}

struct Timer {
	period: Duration,
	next: Instant,
	callback: Box<dyn FnMut()>,
}

/// Schedules repeated work on the reactor thread (`register_cron`).
/// Implemented as a software timer checked once per loop iteration, not a
/// platform timer FD (`timerfd`/`kqueue EVFILT_TIMER`).
pub struct Reactor {
	fds: Vec<libc::pollfd>,
	slots: Vec<Slot>,
	timers: Vec<Timer>,
	dispatch: Box<dyn FnMut(&[u8]) -> DispatchOutcome>,
	stop: bool,
	wake_write_fd: RawFd,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
	let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
	if flags < 0 {
		return Err(io::Error::last_os_error());
	}
	if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(())
}

/// Binds and listens on a raw socket so the configured `tcp_backlog` can be
/// honored. `std::net::TcpListener::bind` always uses a fixed internal
/// backlog and doesn't expose a way to override it.
fn bind_tcp(addr: std::net::SocketAddr, backlog: i32) -> io::Result<TcpListener> {
	use std::net::SocketAddr;

	let domain = match addr {
		SocketAddr::V4(_) => libc::AF_INET,
		SocketAddr::V6(_) => libc::AF_INET6,
	};

	let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
	if fd < 0 {
		return Err(io::Error::last_os_error());
	}

	let reuse: libc::c_int = 1;
	unsafe {
		libc::setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &reuse as *const _ as *const libc::c_void, std::mem::size_of_val(&reuse) as u32);
	}

	let result = (|| -> io::Result<()> {
		match addr {
			SocketAddr::V4(a) => {
				let sin = libc::sockaddr_in {
					sin_family: libc::AF_INET as _,
					sin_port: a.port().to_be(),
					sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(a.ip().octets()) },
					sin_zero: [0; 8],
				};
				if unsafe { libc::bind(fd, &sin as *const _ as *const libc::sockaddr, std::mem::size_of_val(&sin) as u32) } < 0 {
					return Err(io::Error::last_os_error());
				}
			}
			SocketAddr::V6(a) => {
				let sin6 = libc::sockaddr_in6 {
					sin6_family: libc::AF_INET6 as _,
					sin6_port: a.port().to_be(),
					sin6_flowinfo: 0,
					sin6_addr: libc::in6_addr { s6_addr: a.ip().octets() },
					sin6_scope_id: 0,
				};
				if unsafe { libc::bind(fd, &sin6 as *const _ as *const libc::sockaddr, std::mem::size_of_val(&sin6) as u32) } < 0 {
					return Err(io::Error::last_os_error());
				}
			}
		}

		if unsafe { libc::listen(fd, backlog) } < 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(())
	})();

	if let Err(e) = result {
		unsafe { libc::close(fd) };
		return Err(e);
	}

	set_nonblocking(fd)?;
	Ok(unsafe { TcpListener::from_raw_fd(fd) })
}

fn bind_unix(path: &std::path::Path, backlog: i32) -> io::Result<UnixListener> {
	let _ = std::fs::remove_file(path);

	let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
	if fd < 0 {
		return Err(io::Error::last_os_error());
	}

	let result = (|| -> io::Result<()> {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as _;

		let bytes = path.as_os_str().as_encoded_bytes();
		if bytes.len() >= addr.sun_path.len() {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "unix socket path too long"));
		}
		for (dst, &b) in addr.sun_path.iter_mut().zip(bytes) {
			*dst = b as libc::c_char;
		}

		let len = std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1;
		if unsafe { libc::bind(fd, &addr as *const _ as *const libc::sockaddr, len as u32) } < 0 {
			return Err(io::Error::last_os_error());
		}
		if unsafe { libc::listen(fd, backlog) } < 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(())
	})();

	if let Err(e) = result {
		unsafe { libc::close(fd) };
		return Err(e);
	}

	set_nonblocking(fd)?;
	Ok(unsafe { UnixListener::from_raw_fd(fd) })
}

impl Reactor {
	/// Builds a reactor around one shared dispatch closure (the full
	/// request handler) and arms `SIGINT`/`SIGTERM` to wake it for a
	/// graceful `stop()`.
	pub fn new(dispatch: impl FnMut(&[u8]) -> DispatchOutcome + 'static) -> Result<Self> {
		let mut pipe_fds = [0 as RawFd; 2];
		if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } < 0 {
			return Err(Error::Io(io::Error::last_os_error()));
		}
		let [read_fd, write_fd] = pipe_fds;
		set_nonblocking(read_fd).map_err(Error::Io)?;
		set_nonblocking(write_fd).map_err(Error::Io)?;

		ctrlc::set_handler(move || {
			let byte: u8 = 1;
			unsafe {
				libc::write(write_fd, &byte as *const u8 as *const libc::c_void, 1);
			}
		})
		.map_err(|e| Error::Config(format!("failed to install signal handler: {e}")))?;

		let mut reactor = Self { fds: Vec::new(), slots: Vec::new(), timers: Vec::new(), dispatch: Box::new(dispatch), stop: false, wake_write_fd: write_fd };

		reactor.push(read_fd, libc::POLLIN, Slot::Wake);

		Ok(reactor)
	}

	fn push(&mut self, fd: RawFd, events: libc::c_short, slot: Slot) {
		self.fds.push(libc::pollfd { fd, events, revents: 0 });
		self.slots.push(slot);
	}

	/// Binds a TCP listener and registers it for accept readiness.
	pub fn listen_tcp(&mut self, addr: std::net::SocketAddr, backlog: i32) -> Result<()> {
		let listener = bind_tcp(addr, backlog).map_err(|source| Error::Bind { addr: addr.to_string(), source })?;
		let fd = listener.as_raw_fd();
		self.push(fd, libc::POLLIN, Slot::Listener(Listener::Tcp(listener)));
		Ok(())
	}

	/// Binds a Unix-domain listener and registers it for accept readiness.
	pub fn listen_unix(&mut self, path: &std::path::Path, backlog: i32) -> Result<()> {
		let listener = bind_unix(path, backlog).map_err(|source| Error::Bind { addr: path.display().to_string(), source })?;
		let fd = listener.as_raw_fd();
		self.push(fd, libc::POLLIN, Slot::Listener(Listener::Unix(listener)));
		Ok(())
	}

	/// Schedules `callback` to run every `period`, starting one period from
	/// now.
	pub fn register_cron(&mut self, period: Duration, callback: impl FnMut() + 'static) {
		self.timers.push(Timer { period, next: Instant::now() + period, callback: Box::new(callback) });
	}

	/// Sets the flag `run()` observes at the top of its next iteration.
	pub fn stop(&mut self) {
		self.stop = true;
	}

	fn accept_on(&mut self, idx: usize) -> io::Result<()> {
		let Slot::Listener(listener) = &self.slots[idx] else { unreachable!() };
		let streams = listener.accept_all()?;

		for stream in streams {
			let fd = stream.as_raw_fd();
			if let Err(e) = set_nonblocking(fd) {
				warn!("failed to set accepted connection non-blocking: {e}");
				continue;
			}
			self.push(fd, libc::POLLIN, Slot::Connection(Connection::new(stream)));
		}

		Ok(())
	}

	fn close(&mut self, idx: usize) {
		self.fds.swap_remove(idx);
		self.slots.swap_remove(idx);
	}

	fn next_timeout(&self) -> i32 {
		let Some(deadline) = self.timers.iter().map(|t| t.next).min() else {
			return -1;
		};

		let now = Instant::now();
		if deadline <= now {
			0
		} else {
			(deadline - now).as_millis().try_into().unwrap_or(i32::MAX)
		}
	}

	fn fire_timers(&mut self) {
		let now = Instant::now();
		for timer in &mut self.timers {
			if timer.next <= now {
				(timer.callback)();
				timer.next = now + timer.period;
			}
		}
	}

	/// Drains the self-pipe after a wake event; the byte values carry no
	/// meaning, only the fact that a write happened.
	fn drain_wake(fd: RawFd) {
		let mut buf = [0u8; 64];
		loop {
			let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
			if n <= 0 {
				break;
			}
		}
	}

	/// Blocks on `poll()` and dispatches each ready descriptor once. Returns
	/// after one full cycle; callers loop until [`Reactor::stop`].
	fn cycle(&mut self) -> Result<()> {
		let timeout = self.next_timeout();
		let ready = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout) };

		if ready < 0 {
			let err = io::Error::last_os_error();
			if err.kind() == io::ErrorKind::Interrupted {
				return Ok(());
			}
			return Err(Error::Io(err));
		}

		self.fire_timers();

		if ready == 0 {
			return Ok(());
		}

		let mut to_close = Vec::new();

		for idx in 0..self.fds.len() {
			let revents = self.fds[idx].revents;
			if revents == 0 {
				continue;
			}
			self.fds[idx].revents = 0;

			if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
				error!("descriptor {} reported an error condition, closing", self.fds[idx].fd);
				to_close.push(idx);
				continue;
			}

			match &self.slots[idx] {
				Slot::Wake => {
					trace!("wake fd signaled, stopping reactor");
					Self::drain_wake(self.fds[idx].fd);
					self.stop = true;
				}
				Slot::Listener(_) => {
					if let Err(e) = self.accept_on(idx) {
						error!("accept() failed: {e}");
					}
				}
				Slot::Connection(_) => {
					let mut closed = false;

					if revents & libc::POLLIN != 0 {
						let Slot::Connection(conn) = &mut self.slots[idx] else { unreachable!() };
						match conn.readable(&mut *self.dispatch) {
							Ok(Flow::Closed) => closed = true,
							Ok(Flow::Open) => {}
							Err(e) => {
								debug!("connection {} read error: {e}", self.fds[idx].fd);
								closed = true;
							}
						}
					}

					if !closed && revents & libc::POLLOUT != 0 {
						let Slot::Connection(conn) = &mut self.slots[idx] else { unreachable!() };
						match conn.writable() {
							Ok(Flow::Closed) => closed = true,
							Ok(Flow::Open) => {}
							Err(e) => {
								debug!("connection {} write error: {e}", self.fds[idx].fd);
								closed = true;
							}
						}
					}

					if revents & libc::POLLHUP != 0 {
						closed = true;
					}

					if closed {
						to_close.push(idx);
					} else {
						let Slot::Connection(conn) = &self.slots[idx] else { unreachable!() };
						self.fds[idx].events = if conn.has_pending_writes() { libc::POLLIN | libc::POLLOUT } else { libc::POLLIN };
					}
				}
			}
		}

		// Highest indices first so earlier `swap_remove`s don't invalidate
		// later ones.
		to_close.sort_unstable();
		for idx in to_close.into_iter().rev() {
			self.close(idx);
		}

		Ok(())
	}

	/// Runs until [`Reactor::stop`] is called or a signal arrives.
	pub fn run(&mut self) -> Result<()> {
		while !self.stop {
			self.cycle()?;
		}
		Ok(())
	}
}

impl Drop for Reactor {
	fn drop(&mut self) {
		unsafe {
			libc::close(self.wake_write_fd);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn next_timeout_is_blocking_with_no_timers() {
		let reactor = Reactor { fds: Vec::new(), slots: Vec::new(), timers: Vec::new(), dispatch: Box::new(|_| DispatchOutcome::NoResponse), stop: false, wake_write_fd: -1 };
		assert_eq!(reactor.next_timeout(), -1);
	}

	#[test]
	fn next_timeout_reflects_soonest_timer() {
		let mut reactor = Reactor { fds: Vec::new(), slots: Vec::new(), timers: Vec::new(), dispatch: Box::new(|_| DispatchOutcome::NoResponse), stop: false, wake_write_fd: -1 };
		reactor.register_cron(Duration::from_secs(60), || {});
		reactor.register_cron(Duration::from_millis(5), || {});
		assert!(reactor.next_timeout() <= 5);
	}
}
