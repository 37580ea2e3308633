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

//! The HTTP connection.
//!
//! A connection composes the request parser, the response builder and two
//! buffers, and drives the receive / process / send steps the reactor
//! schedules onto the worker pool.

use crate::request::Request;
use crate::response::{error_message, Response};
use crate::types::{Params, StatusCode};
use nix::unistd::{close, write};
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use tinyhttpd_util::buffer::Buffer;
use tinyhttpd_util::io::FdIo;
use tinyhttpd_util::mapped::MappedFile;
use tinyhttpd_util::{Error, ErrorKind};

const INVALID_SOCKET: RawFd = -1;

const INDEX_PAGE: &str = "/index.html";
const USER_TAG: &str = "user";
const MSG_TAG: &str = "msg";
const HIDE_MSG_TAG: &str = "hide-msg";
const TRUE_TAG: &str = "true";
const FALSE_TAG: &str = "false";

pub struct Connection {
	socket: RawFd,
	addr: SocketAddr,
	root_dir: PathBuf,
	keep_alive: bool,
	read_buf: Buffer,
	write_buf: Buffer,
	file: Option<MappedFile>,
}

impl Connection {
	/// Create a connection over an accepted socket. Requested files are
	/// resolved against `root_dir`.
	pub fn new<P: AsRef<Path>>(socket: RawFd, addr: SocketAddr, root_dir: P) -> Self {
		Connection {
			socket,
			addr,
			root_dir: root_dir.as_ref().to_path_buf(),
			keep_alive: false,
			read_buf: Buffer::new(),
			write_buf: Buffer::new(),
			file: None,
		}
	}

	pub fn socket(&self) -> RawFd {
		self.socket
	}

	pub fn is_valid(&self) -> bool {
		self.socket >= 0
	}

	pub fn keep_alive(&self) -> bool {
		self.keep_alive
	}

	pub fn ip_address(&self) -> String {
		self.addr.ip().to_string()
	}

	pub fn port(&self) -> u16 {
		self.addr.port()
	}

	/// Close the socket. Safe to call more than once; also runs on drop.
	pub fn close(&mut self) {
		if self.is_valid() {
			let _ = close(self.socket);
			self.socket = INVALID_SOCKET;
		}
	}

	/// Drain the socket into the read buffer until the kernel reports no
	/// more data. Returns the total bytes read; a peer that closed before
	/// sending anything is an error.
	pub fn receive(&mut self) -> Result<usize, Error> {
		let mut io = FdIo::new(self.socket, self.socket);
		let mut size = 0;
		loop {
			match self.read_buf.read_from(&mut io) {
				Ok(0) => {
					if size == 0 {
						return Err(ErrorKind::ConnectionClosed(format!(
							"client {} closed the connection",
							self.ip_address()
						))
						.into());
					}
					break;
				}
				Ok(n) => size += n,
				Err(e) => {
					if e.is_would_block() {
						break;
					}
					return Err(e);
				}
			}
		}
		Ok(size)
	}

	/// Process the buffered request and build the response.
	///
	/// Returns `false` if the read buffer holds nothing yet (the reactor
	/// should rearm for reading), `true` once a response is ready in the
	/// write buffer (the reactor should rearm for writing). A parse
	/// failure produces a Bad Request page rather than an error.
	pub fn process(&mut self) -> bool {
		self.file = None;
		if self.read_buf.readable_size() == 0 {
			return false;
		}

		let mut request = Request::new();
		let parsed = request.parse(&mut self.read_buf);
		self.keep_alive = match &parsed {
			Ok(()) => request.keep_alive(),
			Err(_) => false,
		};

		let mut response = Response::new(&self.root_dir);
		response.set_keep_alive(self.keep_alive);

		match parsed {
			Ok(()) => {
				let mut path = request.path().to_string();
				if path.is_empty() || path == "/" {
					path = INDEX_PAGE.to_string();
				}

				if path == INDEX_PAGE {
					let params = index_params(&request);
					response.build_template(&mut self.write_buf, INDEX_PAGE, &params);
				} else {
					let (_, mapped) = response.build_file(&mut self.write_buf, &path);
					self.file = mapped;
				}
			}
			Err(e) => {
				response.build_status(
					&mut self.write_buf,
					StatusCode::BadRequest,
					&error_message(&e),
				);
			}
		}

		true
	}

	/// Write the response to the socket: first the header buffer, then the
	/// mapped file bytes if a file is held. Returns the total bytes sent.
	pub fn send(&mut self) -> Result<usize, Error> {
		let mut io = FdIo::new(self.socket, self.socket);
		let mut size = 0;
		while !self.write_buf.is_empty() {
			size += self.write_buf.write_to(&mut io)?;
		}

		if let Some(file) = &self.file {
			let data = file.data();
			let mut sent = 0;
			while sent < data.len() {
				sent += write(self.socket, &data[sent..])?;
			}
			size += sent;
		}

		Ok(size)
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.close();
	}
}

/// Extract the index-page parameters from a request: when both the `user`
/// and `msg` form fields are present and non-empty they populate the
/// template and the message is shown, otherwise only `hide-msg` is set.
fn index_params(request: &Request) -> Params {
	let user = request.post(USER_TAG).unwrap_or("");
	let msg = request.post(MSG_TAG).unwrap_or("");

	let mut params = Params::new();
	if !user.is_empty() && !msg.is_empty() {
		params.insert(USER_TAG.to_string(), user.to_string());
		params.insert(MSG_TAG.to_string(), msg.to_string());
		params.insert(HIDE_MSG_TAG.to_string(), FALSE_TAG.to_string());
	} else {
		params.insert(HIDE_MSG_TAG.to_string(), TRUE_TAG.to_string());
	}
	params
}

#[cfg(test)]
fn test_pair() -> Result<(RawFd, RawFd), Error> {
	use nix::fcntl::{fcntl, FcntlArg, OFlag};
	use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

	let (server, client) = socketpair(
		AddressFamily::Unix,
		SockType::Stream,
		None,
		SockFlag::empty(),
	)?;
	fcntl(server, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
	Ok((server, client))
}

#[cfg(test)]
fn read_reply(fd: RawFd) -> Result<String, Error> {
	use nix::unistd::read;

	// the test sockets are local, a short wait settles the reply
	std::thread::sleep(std::time::Duration::from_millis(100));
	let mut reply = vec![];
	let mut chunk = [0u8; 0x10000];
	loop {
		match read(fd, &mut chunk) {
			Ok(0) => break,
			Ok(n) => reply.extend_from_slice(&chunk[..n]),
			Err(nix::errno::Errno::EAGAIN) => break,
			Err(e) => return Err(e.into()),
		}
	}
	Ok(String::from_utf8_lossy(&reply).into_owned())
}

#[test]
fn test_connection_index_page() -> Result<(), Error> {
	use nix::fcntl::{fcntl, FcntlArg, OFlag};
	use tinyhttpd_util::testutil::temp_file_path;

	let root = temp_file_path("conn-root");
	std::fs::create_dir_all(&root)?;
	std::fs::write(
		root.join("index.html"),
		b"<p hidden=<$hide-msg$>><$user$> said <$msg$></p>",
	)?;

	let (server, client) = test_pair()?;
	fcntl(client, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
	let mut conn = Connection::new(server, "127.0.0.1:1234".parse()?, &root);
	assert!(conn.is_valid());
	assert_eq!(conn.ip_address(), "127.0.0.1");
	assert_eq!(conn.port(), 1234);

	// nothing buffered yet
	assert!(!conn.process());

	let request = "POST / HTTP/1.1\r\n\
		Host: server.id\r\n\
		Connection: keep-alive\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 19\r\n\
		\r\n\
		user=mike&msg=hello";
	write(client, request.as_bytes())?;

	assert!(conn.receive()? > 0);
	assert!(conn.process());
	assert!(conn.keep_alive());
	conn.send()?;

	let reply = read_reply(client)?;
	assert!(reply.starts_with("HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n"));
	assert!(reply.ends_with("<p hidden=false>mike said hello</p>"));

	conn.close();
	assert!(!conn.is_valid());
	conn.close();
	nix::unistd::close(client)?;
	std::fs::remove_dir_all(&root)?;
	Ok(())
}

#[test]
fn test_connection_hides_message_without_form() -> Result<(), Error> {
	use nix::fcntl::{fcntl, FcntlArg, OFlag};
	use tinyhttpd_util::testutil::temp_file_path;

	let root = temp_file_path("conn-root-hide");
	std::fs::create_dir_all(&root)?;
	std::fs::write(
		root.join("index.html"),
		b"<p hidden=<$hide-msg$>><$user$> said <$msg$></p>",
	)?;

	let (server, client) = test_pair()?;
	fcntl(client, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
	let mut conn = Connection::new(server, "127.0.0.1:1234".parse()?, &root);

	let request = "POST /index.html HTTP/1.1\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 0\r\n\
		\r\n";
	write(client, request.as_bytes())?;

	conn.receive()?;
	assert!(conn.process());
	assert!(!conn.keep_alive());
	conn.send()?;

	// placeholders for the absent fields stay intact
	let reply = read_reply(client)?;
	assert!(reply.ends_with("<p hidden=true><$user$> said <$msg$></p>"));

	nix::unistd::close(client)?;
	std::fs::remove_dir_all(&root)?;
	Ok(())
}

#[test]
fn test_connection_serves_static_file() -> Result<(), Error> {
	use nix::fcntl::{fcntl, FcntlArg, OFlag};
	use tinyhttpd_util::testutil::temp_file_path;

	let root = temp_file_path("conn-root-static");
	std::fs::create_dir_all(&root)?;
	std::fs::write(root.join("data.txt"), b"static body")?;

	let (server, client) = test_pair()?;
	fcntl(client, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
	let mut conn = Connection::new(server, "127.0.0.1:1234".parse()?, &root);

	let request = "POST /data.txt HTTP/1.1\r\n\
		Content-Type: application/x-www-form-urlencoded\r\n\
		Content-Length: 0\r\n\
		\r\n";
	write(client, request.as_bytes())?;

	conn.receive()?;
	assert!(conn.process());
	conn.send()?;

	let reply = read_reply(client)?;
	assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
	assert!(reply.contains("Content-type: text/plain\r\n"));
	assert!(reply.contains("Content-length: 11\r\n"));
	assert!(reply.ends_with("\r\n\r\nstatic body"));

	nix::unistd::close(client)?;
	std::fs::remove_dir_all(&root)?;
	Ok(())
}

#[test]
fn test_connection_bad_request_page() -> Result<(), Error> {
	use nix::fcntl::{fcntl, FcntlArg, OFlag};

	let (server, client) = test_pair()?;
	fcntl(client, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
	let mut conn = Connection::new(server, "127.0.0.1:1234".parse()?, "");

	write(client, b"NOT A REQUEST\r\n\r\n")?;
	conn.receive()?;
	assert!(conn.process());
	assert!(!conn.keep_alive());
	conn.send()?;

	let reply = read_reply(client)?;
	assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\nConnection: close\r\n"));
	assert!(reply.contains("<p>400 : Bad Request</p>"));

	nix::unistd::close(client)?;
	Ok(())
}
