// Copyright 2022 The TinyHttpd Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The web server reactor.
//!
//! A single thread owns the listening socket and multiplexes readiness
//! events; socket I/O runs on the worker pool. Each connection is
//! registered one-shot, so a worker and the reactor never race on the
//! same connection: the kernel will not redeliver until the worker rearms
//! the descriptor after finishing its buffer mutations.
//!
//! Connections are only added and removed on the reactor thread. Workers
//! and close events retire a connection by zeroing its timer entry, which
//! the next tick collects.

use crate::addr::parse_endpoint;
use crate::epoll::Epoller;
use crate::pool::ThreadPool;
use crate::timer::HeapTimer;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::epoll::EpollFlags;
use nix::sys::socket::{
	accept, bind, getpeername, listen, setsockopt, socket, sockopt, AddressFamily, InetAddr,
	SockAddr, SockFlag, SockType,
};
use nix::unistd::{close, pipe, read, write};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tinyhttpd_http::Connection;
use tinyhttpd_log::{debug, error, info, root_logger, warn, Logger};
use tinyhttpd_util::{lock, lockp};
use tinyhttpd_util::{Error, ErrorKind};

const INVALID_FD: RawFd = -1;

/// How long the reactor waits when no timers are pending. New work can
/// only arrive through listener events, which interrupt the wait anyway.
const IDLE_WAIT: Duration = Duration::from_secs(1);

fn listen_mode() -> EpollFlags {
	EpollFlags::EPOLLIN | EpollFlags::EPOLLET | EpollFlags::EPOLLRDHUP
}

fn connect_mode() -> EpollFlags {
	EpollFlags::EPOLLONESHOT | EpollFlags::EPOLLET | EpollFlags::EPOLLRDHUP
}

/// The server configuration.
pub struct ServerConfig {
	/// The host to bind to, which also selects the address family.
	pub host: String,
	/// The listening TCP port; must be at least 1024.
	pub port: u16,
	/// A client's timer is refreshed on I/O events and the client is
	/// disconnected when its timer reaches zero.
	pub alive_time: Duration,
	/// The asset directory requested files are resolved against.
	pub root_dir: PathBuf,
	/// Worker count; `None` or zero means the hardware concurrency.
	pub thread_count: Option<usize>,
	/// The logger; the global root logger if `None`.
	pub logger: Option<Arc<Logger>>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			host: "0.0.0.0".to_string(),
			port: 10000,
			alive_time: Duration::from_secs(60),
			root_dir: PathBuf::from("assets"),
			thread_count: None,
			logger: None,
		}
	}
}

struct Inner {
	addr: SocketAddr,
	alive_time: Duration,
	root_dir: PathBuf,
	logger: Arc<Logger>,
	listener: AtomicI32,
	closed: AtomicBool,
	// closing writes one byte here so a blocked wait returns promptly
	wakeup_rx: RawFd,
	wakeup_tx: RawFd,
	epoller: Epoller,
	pool: ThreadPool,
	timer: Mutex<HeapTimer<RawFd>>,
	conns: Mutex<HashMap<RawFd, Arc<Mutex<Connection>>>>,
}

/// The web server. Clones share one underlying server.
#[derive(Clone)]
pub struct WebServer {
	inner: Arc<Inner>,
}

impl WebServer {
	pub fn new(config: ServerConfig) -> Result<Self, Error> {
		if config.port < 1024 {
			return Err(ErrorKind::SetupError(format!(
				"the listening port must be at least 1024, got {}",
				config.port
			))
			.into());
		}

		let addr = parse_endpoint(&config.host, config.port)?;
		let logger = config.logger.unwrap_or_else(root_logger);
		let (wakeup_rx, wakeup_tx) = pipe()?;

		Ok(WebServer {
			inner: Arc::new(Inner {
				addr,
				alive_time: config.alive_time,
				root_dir: config.root_dir,
				logger: logger.clone(),
				listener: AtomicI32::new(INVALID_FD),
				closed: AtomicBool::new(false),
				wakeup_rx,
				wakeup_tx,
				epoller: Epoller::new()?,
				pool: ThreadPool::new(config.thread_count, Some(logger.clone())),
				timer: Mutex::new(HeapTimer::with_logger(logger)),
				conns: Mutex::new(HashMap::new()),
			}),
		})
	}

	/// Start the server and run the event loop until it is closed.
	/// Startup failures (socket, bind, listen) are returned; errors inside
	/// the loop are logged and the loop continues.
	pub fn start(&self) -> Result<(), Error> {
		let inner = &self.inner;
		inner.pool.start()?;
		Inner::init_network(inner)?;
		info!(inner.logger, "Listening on {}", inner.addr);

		while !inner.closed.load(Ordering::SeqCst) {
			if let Err(e) = Inner::run_once(inner) {
				error!(inner.logger, "Error raised in server: {}", e);
			}
		}
		Ok(())
	}

	/// Close the server: the listener, the pool (discarding pending
	/// tasks), the timer and every connection. Safe to call more than
	/// once and from any thread.
	pub fn close(&self) {
		self.inner.close();
	}
}

impl Inner {
	fn init_network(inner: &Arc<Inner>) -> Result<(), Error> {
		let family = match inner.addr {
			SocketAddr::V4(_) => AddressFamily::Inet,
			SocketAddr::V6(_) => AddressFamily::Inet6,
		};
		let fd = socket(family, SockType::Stream, SockFlag::empty(), None)?;

		match Self::setup_listener(inner, fd) {
			Ok(()) => {
				inner.listener.store(fd, Ordering::SeqCst);
				Ok(())
			}
			Err(e) => {
				let _ = close(fd);
				Err(e)
			}
		}
	}

	fn setup_listener(inner: &Arc<Inner>, fd: RawFd) -> Result<(), Error> {
		let linger = libc::linger {
			l_onoff: 1,
			l_linger: 1,
		};
		setsockopt(fd, sockopt::Linger, &linger)?;
		setsockopt(fd, sockopt::ReuseAddr, &true)?;
		bind(fd, &SockAddr::new_inet(InetAddr::from_std(&inner.addr)))?;
		listen(fd, libc::SOMAXCONN as usize)?;
		fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
		inner.epoller.add(inner.wakeup_rx, EpollFlags::EPOLLIN)?;
		inner.epoller.add(fd, listen_mode())?;
		Ok(())
	}

	/// One pass of the event loop: collect due timers, wait for readiness,
	/// dispatch.
	fn run_once(inner: &Arc<Inner>) -> Result<(), Error> {
		let wait_time = Self::to_next_tick(inner)?;
		let ready = match inner.epoller.wait(Some(wait_time)) {
			Ok(ready) => ready,
			Err(e) => {
				if inner.closed.load(Ordering::SeqCst) {
					return Ok(());
				}
				return Err(e);
			}
		};

		for event in ready {
			if inner.closed.load(Ordering::SeqCst) {
				break;
			}

			if event.fd == inner.wakeup_rx {
				let mut byte = [0u8; 1];
				let _ = read(inner.wakeup_rx, &mut byte);
			} else if event.fd == inner.listener.load(Ordering::SeqCst) {
				Self::on_listen(inner)?;
			} else if event.events.intersects(
				EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR,
			) {
				Self::mark_client_as_to_be_closed(inner, event.fd)?;
			} else if event.events.contains(EpollFlags::EPOLLIN) {
				Self::on_receive(inner, event.fd)?;
			} else if event.events.contains(EpollFlags::EPOLLOUT) {
				Self::on_send(inner, event.fd)?;
			} else {
				warn!(
					inner.logger,
					"Unexpected events for socket {}: {:?}", event.fd, event.events
				);
			}
		}
		Ok(())
	}

	/// Run due timer callbacks and return how long to wait for the next
	/// one.
	fn to_next_tick(inner: &Arc<Inner>) -> Result<Duration, Error> {
		let mut timer = lock!(inner.timer);
		let next = timer.to_next_tick();
		if timer.is_empty() {
			Ok(IDLE_WAIT)
		} else {
			Ok(next)
		}
	}

	fn on_listen(inner: &Arc<Inner>) -> Result<(), Error> {
		loop {
			match accept(inner.listener.load(Ordering::SeqCst)) {
				Ok(fd) => {
					if let Err(e) = Self::add_client(inner, fd) {
						error!(inner.logger, "Failed to add a new client: {}", e);
						let _ = close(fd);
					}
				}
				Err(nix::errno::Errno::EAGAIN) => break,
				Err(e) => {
					error!(inner.logger, "Failed to accept a new client: {}", e);
					return Err(e.into());
				}
			}
		}
		Ok(())
	}

	fn add_client(inner: &Arc<Inner>, fd: RawFd) -> Result<(), Error> {
		fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;

		let addr = match getpeername(fd) {
			Ok(SockAddr::Inet(inet)) => inet.to_std(),
			_ => crate::addr::family_of(&inner.addr).any(0),
		};
		let ip = addr.ip().to_string();

		{
			let mut conns = lock!(inner.conns);
			conns.insert(
				fd,
				Arc::new(Mutex::new(Connection::new(fd, addr, &inner.root_dir))),
			);
		}
		inner.epoller.add(fd, connect_mode() | EpollFlags::EPOLLIN)?;

		{
			let weak = Arc::downgrade(inner);
			let logger = inner.logger.clone();
			let mut timer = lock!(inner.timer);
			timer.push(
				fd,
				inner.alive_time,
				Box::new(move |key: &RawFd| {
					if let Some(inner) = weak.upgrade() {
						info!(logger, "Client on socket {} has timed-out", key);
						inner.close_client(*key)?;
					}
					Ok(())
				}),
			);
		}

		info!(inner.logger, "A new client {} has connected", ip);
		debug!(inner.logger, "Client {} is bound to socket {}", ip, fd);
		Ok(())
	}

	/// Remove a client. Runs on the reactor thread only, from the timer
	/// callback or shutdown.
	fn close_client(&self, fd: RawFd) -> Result<(), Error> {
		let conn = {
			let mut conns = lock!(self.conns);
			conns.remove(&fd)
		};

		if let Some(conn) = conn {
			if let Err(e) = self.epoller.remove(fd) {
				debug!(
					self.logger,
					"Failed to delete socket {} from the epoller: {}", fd, e
				);
			}
			let ip = lockp!(conn).ip_address();
			info!(self.logger, "Client {} has disconnected", ip);
		}
		Ok(())
	}

	/// Extend a client's alive time. Reports whether the client is still
	/// tracked.
	fn extend_client_alive_time(&self, fd: RawFd) -> Result<bool, Error> {
		let mut timer = lock!(self.timer);
		if timer.contains(&fd) {
			timer.adjust(&fd, self.alive_time)?;
			Ok(true)
		} else {
			Ok(false)
		}
	}

	/// Zero a client's timer so the next tick removes it on the reactor
	/// thread.
	fn mark_client_as_to_be_closed(&self, fd: RawFd) -> Result<(), Error> {
		let mut timer = lock!(self.timer);
		if timer.contains(&fd) {
			timer.adjust(&fd, Duration::from_secs(0))?;
		}
		Ok(())
	}

	fn on_receive(inner: &Arc<Inner>, fd: RawFd) -> Result<(), Error> {
		if inner.extend_client_alive_time(fd)? {
			let cloned = inner.clone();
			inner
				.pool
				.push(Box::new(move || Self::receive_from(&cloned, fd)))?;
		}
		Ok(())
	}

	fn on_send(inner: &Arc<Inner>, fd: RawFd) -> Result<(), Error> {
		if inner.extend_client_alive_time(fd)? {
			let cloned = inner.clone();
			inner
				.pool
				.push(Box::new(move || Self::send_to(&cloned, fd)))?;
		}
		Ok(())
	}

	fn conn(&self, fd: RawFd) -> Result<Option<Arc<Mutex<Connection>>>, Error> {
		let conns = lock!(self.conns);
		Ok(conns.get(&fd).cloned())
	}

	/// Receive and process on a pool thread, then rearm the descriptor.
	/// The connection guard is dropped before the timer is touched.
	fn receive_from(inner: &Arc<Inner>, fd: RawFd) -> Result<(), Error> {
		let conn = match inner.conn(fd)? {
			Some(conn) => conn,
			None => return Ok(()),
		};

		let received = {
			let mut conn = lock!(conn);
			info!(
				inner.logger,
				"Start to receive data from client {}",
				conn.ip_address()
			);
			conn.receive()
				.and_then(|_| inner.arm_next(&mut conn, fd))
		};

		if let Err(e) = received {
			error!(inner.logger, "Failed to receive data from a client: {}", e);
			inner.mark_client_as_to_be_closed(fd)?;
		}
		Ok(())
	}

	/// Send on a pool thread; a keep-alive connection goes straight back
	/// to processing, anything else is retired.
	fn send_to(inner: &Arc<Inner>, fd: RawFd) -> Result<(), Error> {
		let conn = match inner.conn(fd)? {
			Some(conn) => conn,
			None => return Ok(()),
		};

		let sent: Result<bool, Error> = {
			let mut conn = lock!(conn);
			info!(
				inner.logger,
				"Start to send data to client {}",
				conn.ip_address()
			);
			conn.send().and_then(|_| {
				if conn.keep_alive() {
					inner.arm_next(&mut conn, fd)?;
					Ok(true)
				} else {
					Ok(false)
				}
			})
		};

		match sent {
			Ok(true) => Ok(()),
			Ok(false) => inner.mark_client_as_to_be_closed(fd),
			Err(e) => {
				error!(inner.logger, "Failed to send data to a client: {}", e);
				inner.mark_client_as_to_be_closed(fd)
			}
		}
	}

	/// Rearm the one-shot registration: for writing once a response is
	/// ready, for reading while the request buffer is still empty.
	fn arm_next(&self, conn: &mut Connection, fd: RawFd) -> Result<(), Error> {
		if conn.process() {
			self.epoller.modify(fd, connect_mode() | EpollFlags::EPOLLOUT)
		} else {
			self.epoller.modify(fd, connect_mode() | EpollFlags::EPOLLIN)
		}
	}

	fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		// wake the reactor so it observes the flag; the pipe and the
		// epoller stay open until the last handle drops
		let _ = write(self.wakeup_tx, &[1u8]);

		let listener = self.listener.swap(INVALID_FD, Ordering::SeqCst);
		if listener >= 0 {
			let _ = close(listener);
		}

		self.pool.close();
		lockp!(self.timer).clear();
		lockp!(self.conns).clear();
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.close();
		let _ = close(self.wakeup_rx);
		let _ = close(self.wakeup_tx);
	}
}

#[cfg(test)]
fn test_root(tag: &str) -> Result<PathBuf, Error> {
	use tinyhttpd_util::testutil::temp_file_path;

	let root = temp_file_path(tag);
	std::fs::create_dir_all(&root)?;
	std::fs::write(
		root.join("index.html"),
		b"<p hidden=<$hide-msg$>><$user$>: <$msg$></p>",
	)?;
	std::fs::write(
		root.join("http-status.html"),
		b"<p><$status-code$> : <$status$></p>\n<p><$msg$></p>",
	)?;
	Ok(root)
}

#[cfg(test)]
fn run_server(port: u16, alive_time: Duration, root: &PathBuf) -> (WebServer, std::thread::JoinHandle<Result<(), Error>>) {
	let config = ServerConfig {
		host: "127.0.0.1".to_string(),
		port,
		alive_time,
		root_dir: root.clone(),
		thread_count: Some(2),
		logger: None,
	};
	let server = WebServer::new(config).expect("server must build");
	let runner = server.clone();
	let handle = std::thread::spawn(move || runner.start());
	std::thread::sleep(Duration::from_millis(300));
	(server, handle)
}

#[test]
fn test_server_rejects_privileged_port() -> Result<(), Error> {
	let config = ServerConfig {
		port: 80,
		..Default::default()
	};
	assert!(WebServer::new(config).is_err());
	Ok(())
}

#[test]
fn test_server_end_to_end() -> Result<(), Error> {
	use std::io::{Read, Write};
	use std::net::TcpStream;

	let root = test_root("server-e2e")?;
	let (server, handle) = run_server(9990, Duration::from_secs(60), &root);

	let mut stream = TcpStream::connect("127.0.0.1:9990")?;
	let request = "POST / HTTP/1.1\r\n\
		Host: s\r\n\
		Connection: keep-alive\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 19\r\n\
		\r\n\
		user=mike&msg=hello";
	stream.write_all(request.as_bytes())?;

	std::thread::sleep(Duration::from_millis(300));
	let mut reply = [0u8; 0x10000];
	let n = stream.read(&mut reply)?;
	let reply = String::from_utf8_lossy(&reply[..n]);
	assert!(reply.starts_with("HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n"));
	assert!(reply.ends_with("<p hidden=false>mike: hello</p>"));

	// the connection is kept alive, reuse it for a missing file
	let request = "POST /missing.txt HTTP/1.1\r\n\
		Host: s\r\n\
		Connection: keep-alive\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 0\r\n\
		\r\n";
	stream.write_all(request.as_bytes())?;

	std::thread::sleep(Duration::from_millis(300));
	let mut reply = [0u8; 0x10000];
	let n = stream.read(&mut reply)?;
	let reply = String::from_utf8_lossy(&reply[..n]);
	assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));

	server.close();
	server.close();
	handle.join().expect("the server thread must not panic")?;
	std::fs::remove_dir_all(&root)?;
	Ok(())
}

#[test]
fn test_server_idle_timeout() -> Result<(), Error> {
	use std::io::Read;
	use std::net::TcpStream;

	let root = test_root("server-idle")?;
	let (server, handle) = run_server(9991, Duration::from_millis(300), &root);

	// never send anything; the idle timer must retire the connection
	let mut stream = TcpStream::connect("127.0.0.1:9991")?;
	std::thread::sleep(Duration::from_millis(1200));

	let mut reply = [0u8; 16];
	assert_eq!(stream.read(&mut reply)?, 0);

	server.close();
	handle.join().expect("the server thread must not panic")?;
	std::fs::remove_dir_all(&root)?;
	Ok(())
}
