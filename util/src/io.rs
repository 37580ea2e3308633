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

//! I/O adapters that move data between buffers and descriptors.

use crate::buffer::Buffer;
use crate::Error;
use nix::sys::uio::{readv, IoVec};
use nix::unistd::write;
use std::os::unix::io::RawFd;

/// Side buffer used by the scatter read when the target buffer's writable
/// span is small.
const EXTRA_BUF_SIZE: usize = 0x10000;

/// An I/O object interacting with buffers.
///
/// `fill` moves data from the I/O object into a buffer, `drain` moves a
/// buffer's readable bytes out to the I/O object.
pub trait BufIo {
	fn fill(&mut self, buf: &mut Buffer) -> Result<usize, Error>;
	fn drain(&mut self, buf: &mut Buffer) -> Result<usize, Error>;
}

/// I/O over file descriptors. A descriptor uses the same offset for reading
/// and writing, so reading and writing descriptors are passed separately.
pub struct FdIo {
	read_fd: RawFd,
	write_fd: RawFd,
}

impl FdIo {
	pub fn new(read_fd: RawFd, write_fd: RawFd) -> Self {
		FdIo { read_fd, write_fd }
	}
}

impl BufIo for FdIo {
	fn fill(&mut self, buf: &mut Buffer) -> Result<usize, Error> {
		let mut extra = [0u8; EXTRA_BUF_SIZE];
		let main_len = buf.writable_size();

		// Scatter read: if the writable span of the buffer is small, the
		// remaining data lands in the side buffer and is appended after.
		let size = {
			let iov = &mut [
				IoVec::from_mut_slice(buf.writable_bytes()),
				IoVec::from_mut_slice(&mut extra),
			];
			readv(self.read_fd, iov)?
		};

		if size <= main_len {
			buf.has_written(size);
		} else {
			buf.has_written(main_len);
			buf.append(&extra[..size - main_len]);
		}

		Ok(size)
	}

	fn drain(&mut self, buf: &mut Buffer) -> Result<usize, Error> {
		let size = write(self.write_fd, buf.readable_bytes())?;
		buf.retrieve(size);
		Ok(size)
	}
}

/// Null I/O. It consumes a buffer's whole writable or readable span without
/// moving any data.
pub struct NullIo;

impl BufIo for NullIo {
	fn fill(&mut self, buf: &mut Buffer) -> Result<usize, Error> {
		let size = buf.writable_size();
		buf.has_written(size);
		Ok(size)
	}

	fn drain(&mut self, buf: &mut Buffer) -> Result<usize, Error> {
		Ok(buf.retrieve_all())
	}
}

#[test]
fn test_fd_io_round_trip() -> Result<(), Error> {
	use nix::unistd::{close, read};

	let (rx, tx) = nix::unistd::pipe()?;
	write(tx, b"hello")?;

	let mut buf = Buffer::new();
	let mut io = FdIo::new(rx, tx);
	assert_eq!(buf.read_from(&mut io)?, 5);
	assert_eq!(buf.readable_string(), "hello");

	assert_eq!(buf.write_to(&mut io)?, 5);
	assert!(buf.is_empty());
	let mut out = [0u8; 16];
	let n = read(rx, &mut out)?;
	assert_eq!(&out[..n], b"hello");

	close(rx)?;
	close(tx)?;
	Ok(())
}

#[test]
fn test_fd_io_scatter_read() -> Result<(), Error> {
	use nix::unistd::close;

	let (rx, tx) = nix::unistd::pipe()?;
	let data = vec![b'x'; 100];
	write(tx, &data)?;

	// The buffer's writable span is smaller than the incoming data, so the
	// scatter read must spill into the side buffer.
	let mut buf = Buffer::with_capacity(8);
	let mut io = FdIo::new(rx, tx);
	assert_eq!(buf.read_from(&mut io)?, 100);
	assert_eq!(buf.readable_size(), 100);
	assert_eq!(buf.readable_bytes(), &data[..]);

	close(rx)?;
	close(tx)?;
	Ok(())
}

#[test]
fn test_null_io() -> Result<(), Error> {
	let mut buf = Buffer::with_capacity(8);
	let mut io = NullIo;
	assert_eq!(buf.read_from(&mut io)?, 8);
	assert_eq!(buf.readable_size(), 8);
	assert_eq!(buf.write_to(&mut io)?, 8);
	assert!(buf.is_empty());
	Ok(())
}
