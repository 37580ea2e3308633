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

use failure::{Backtrace, Context, Fail};
use std::fmt;
use std::fmt::Display;

/// Base Error struct which is used throughout this crate and other crates
#[derive(Debug, Fail)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Kinds of errors that can occur
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// IOError Error
	#[fail(display = "IOError Error: {}", _0)]
	IOError(String),
	/// Malformed input (bad HTTP, bad URL-encoding, bad config value)
	#[fail(display = "Invalid Input Error: {}", _0)]
	InvalidInput(String),
	/// A requested file does not exist
	#[fail(display = "Not Found Error: {}", _0)]
	NotFound(String),
	/// A requested file is not readable
	#[fail(display = "Forbidden Error: {}", _0)]
	Forbidden(String),
	/// Kernel-level failure (bind, listen, accept, epoll, mmap, ...)
	#[fail(display = "System Error: {}", _0)]
	SystemError(String),
	/// A non-blocking operation would block
	#[fail(display = "Operation would block")]
	WouldBlock,
	/// Timer operation on a missing key
	#[fail(display = "Key Absent Error: {}", _0)]
	KeyAbsent(String),
	/// A blocking queue was closed while waiting
	#[fail(display = "Closed Error: {}", _0)]
	Closed(String),
	/// The peer closed the connection
	#[fail(display = "Connection Closed Error: {}", _0)]
	ConnectionClosed(String),
	/// Internal Error
	#[fail(display = "Internal Error: {}", _0)]
	InternalError(String),
	/// Setup Error
	#[fail(display = "Setup Error: {}", _0)]
	SetupError(String),
	/// Log not configured
	#[fail(display = "Log not configured Error: {}", _0)]
	LogNotConfigured(String),
	/// Poison error multiple locks
	#[fail(display = "Poison Error: {}", _0)]
	PoisonError(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}
	/// whether this error is the benign "would block" signal of a
	/// non-blocking descriptor
	pub fn is_would_block(&self) -> bool {
		self.kind() == ErrorKind::WouldBlock
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		let kind = match e.kind() {
			std::io::ErrorKind::NotFound => ErrorKind::NotFound(format!("{}", e)),
			std::io::ErrorKind::PermissionDenied => ErrorKind::Forbidden(format!("{}", e)),
			std::io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
			_ => ErrorKind::IOError(format!("{}", e)),
		};
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<nix::Error> for Error {
	fn from(e: nix::Error) -> Error {
		let kind = match e {
			nix::errno::Errno::EAGAIN => ErrorKind::WouldBlock,
			nix::errno::Errno::ENOENT => ErrorKind::NotFound(format!("{}", e)),
			nix::errno::Errno::EACCES => ErrorKind::Forbidden(format!("{}", e)),
			_ => ErrorKind::SystemError(format!("{}", e)),
		};
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<std::net::AddrParseError> for Error {
	fn from(e: std::net::AddrParseError) -> Error {
		Error {
			inner: Context::new(ErrorKind::InvalidInput(format!("{}", e))),
		}
	}
}

#[test]
fn test_error_kinds() -> Result<(), Error> {
	let e: Error = ErrorKind::KeyAbsent("5".to_string()).into();
	assert_eq!(e.kind(), ErrorKind::KeyAbsent("5".to_string()));
	assert!(!e.is_would_block());

	let e: Error = nix::errno::Errno::EAGAIN.into();
	assert!(e.is_would_block());

	let e: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
	match e.kind() {
		ErrorKind::NotFound(_) => {}
		k => panic!("unexpected kind: {:?}", k),
	}

	let e: Error = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
	match e.kind() {
		ErrorKind::Forbidden(_) => {}
		k => panic!("unexpected kind: {:?}", k),
	}
	Ok(())
}
