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

//! An auto-expandable byte buffer, supporting storing bytes and strings.
//!
//! ```text
//!                 Writing Offset ------+
//! Reading Offset ------+               |
//!                      |               |
//! +--------------------v---------------v----------------+
//! | Prependable Bytes  | Readable Bytes | Writable Bytes |
//! +--------------------+----------------+----------------+
//! ```
//! Prependable space can be reused: when an append does not fit the
//! writable span but fits writable + prependable, the readable region is
//! shifted to offset zero instead of reallocating.

use crate::io::BufIo;
use crate::Error;

const INITIAL_SIZE: usize = 1000;

/// New-line characters appended after a string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NewLine {
	Lf,
	CrLf,
}

pub struct Buffer {
	buf: Vec<u8>,
	read_pos: usize,
	write_pos: usize,
}

impl Default for Buffer {
	fn default() -> Self {
		Buffer::with_capacity(INITIAL_SIZE)
	}
}

impl Buffer {
	pub fn new() -> Self {
		Default::default()
	}

	/// Create a buffer with an initial capacity.
	pub fn with_capacity(size: usize) -> Self {
		Buffer {
			buf: vec![0u8; size],
			read_pos: 0,
			write_pos: 0,
		}
	}

	/// Create a buffer holding the given bytes.
	pub fn from_bytes(bytes: &[u8]) -> Self {
		let mut buf = Buffer::with_capacity(bytes.len().max(INITIAL_SIZE));
		buf.append(bytes);
		buf
	}

	/// Create a buffer holding the given string.
	pub fn from_str(s: &str) -> Self {
		Self::from_bytes(s.as_bytes())
	}

	/// Get the current writable size without expanding.
	pub fn writable_size(&self) -> usize {
		self.buf.len() - self.write_pos
	}

	/// Get the readable size.
	pub fn readable_size(&self) -> usize {
		self.write_pos - self.read_pos
	}

	/// Get the prependable size which can be reused.
	fn prependable_size(&self) -> usize {
		self.read_pos
	}

	/// The underlying allocation size. Only meaningful for growth tests.
	pub fn capacity(&self) -> usize {
		self.buf.len()
	}

	/// Peek the first byte without moving the reading offset.
	pub fn peek(&self) -> Option<u8> {
		if self.is_empty() {
			None
		} else {
			Some(self.buf[self.read_pos])
		}
	}

	/// Get readable bytes without moving the reading offset.
	pub fn readable_bytes(&self) -> &[u8] {
		&self.buf[self.read_pos..self.write_pos]
	}

	/// Get a readable string without moving the reading offset.
	/// Non UTF-8 bytes are replaced.
	pub fn readable_string(&self) -> String {
		String::from_utf8_lossy(self.readable_bytes()).into_owned()
	}

	/// Get writable space for editing. Callers that write into this span
	/// directly must adjust the writing offset with [`Buffer::has_written`].
	pub fn writable_bytes(&mut self) -> &mut [u8] {
		let write_pos = self.write_pos;
		&mut self.buf[write_pos..]
	}

	/// Append bytes to the buffer and move forward the writing offset.
	pub fn append(&mut self, data: &[u8]) {
		if data.is_empty() {
			return;
		}
		self.ensure_writable(data.len());
		let write_pos = self.write_pos;
		self.buf[write_pos..write_pos + data.len()].copy_from_slice(data);
		self.has_written(data.len());
	}

	/// Append a string and an optional new-line character to the buffer.
	pub fn append_str(&mut self, s: &str, new_line: Option<NewLine>) {
		self.append(s.as_bytes());
		match new_line {
			Some(NewLine::Lf) => self.append(b"\n"),
			Some(NewLine::CrLf) => self.append(b"\r\n"),
			None => {}
		}
	}

	/// Append another buffer's readable bytes.
	pub fn append_buffer(&mut self, other: &Buffer) {
		self.append(other.readable_bytes());
	}

	/// Ensure the buffer has enough writable space.
	pub fn ensure_writable(&mut self, size: usize) {
		if self.writable_size() < size {
			self.make_space(size);
		}
		assert!(self.writable_size() >= size);
	}

	/// Make enough writable space, compacting before reallocating.
	fn make_space(&mut self, size: usize) {
		if self.writable_size() + self.prependable_size() < size {
			let write_pos = self.write_pos;
			self.buf.resize(write_pos + size, 0);
		} else {
			let readable = self.readable_size();
			self.buf.copy_within(self.read_pos..self.write_pos, 0);
			self.read_pos = 0;
			self.write_pos = readable;
		}
	}

	/// Manually move forward the writing offset after a direct write into
	/// the writable span.
	pub fn has_written(&mut self, size: usize) {
		assert!(self.writable_size() >= size);
		self.write_pos += size;
	}

	/// Manually move forward the reading offset by a specific size.
	pub fn retrieve(&mut self, size: usize) {
		assert!(self.readable_size() >= size);
		self.read_pos += size;
	}

	/// Move forward the reading offset until it reaches the given address,
	/// which must lie within the readable region.
	pub fn retrieve_until(&mut self, addr: *const u8) -> usize {
		let begin = self.readable_bytes().as_ptr() as usize;
		let end = addr as usize;
		assert!(begin <= end);
		let size = end - begin;
		self.retrieve(size);
		size
	}

	/// Move the reading offset to the end. Returns the bytes consumed.
	pub fn retrieve_all(&mut self) -> usize {
		let size = self.readable_size();
		self.clear();
		size
	}

	/// Move the reading offset to the end and extract the rest as a string.
	pub fn retrieve_all_to_string(&mut self) -> String {
		let s = self.readable_string();
		self.clear();
		s
	}

	/// Clear the buffer.
	pub fn clear(&mut self) {
		self.read_pos = 0;
		self.write_pos = 0;
	}

	/// Whether the buffer is empty.
	pub fn is_empty(&self) -> bool {
		self.readable_size() == 0
	}

	/// Read data from an I/O object into the buffer.
	pub fn read_from(&mut self, io: &mut dyn BufIo) -> Result<usize, Error> {
		io.fill(self)
	}

	/// Write the buffer's readable bytes to an I/O object.
	pub fn write_to(&mut self, io: &mut dyn BufIo) -> Result<usize, Error> {
		io.drain(self)
	}
}

#[test]
fn test_buffer_construction() -> Result<(), Error> {
	let buf = Buffer::new();
	assert!(buf.is_empty());
	assert_eq!(buf.readable_size(), 0);
	assert!(buf.readable_string().is_empty());
	assert_eq!(buf.peek(), None);

	let buf = Buffer::from_str("");
	assert!(buf.is_empty());
	assert_eq!(buf.peek(), None);

	let buf = Buffer::from_str("hello");
	assert!(!buf.is_empty());
	assert_eq!(buf.readable_size(), 5);
	assert_eq!(buf.readable_string(), "hello");
	assert_eq!(buf.peek(), Some(b'h'));
	assert_eq!(buf.readable_bytes(), b"hello");
	Ok(())
}

#[test]
fn test_buffer_offsets() -> Result<(), Error> {
	let mut buf = Buffer::with_capacity(0x10);
	assert_eq!(buf.writable_size(), 0x10);

	buf.append_str("hello", None);
	assert_eq!(buf.readable_size(), 5);

	// "hello" -> "ello"
	buf.retrieve(1);
	assert_eq!(buf.readable_size(), 4);
	assert_eq!(buf.readable_string(), "ello");

	// "ello" -> "lo"
	let addr = &buf.readable_bytes()[2] as *const u8;
	assert_eq!(buf.retrieve_until(addr), 2);
	assert_eq!(buf.readable_string(), "lo");

	assert_eq!(buf.retrieve_all(), 2);
	assert!(buf.is_empty());

	buf.ensure_writable(0x1000);
	assert!(buf.writable_size() >= 0x1000);
	Ok(())
}

#[test]
fn test_buffer_append() -> Result<(), Error> {
	let mut buf = Buffer::with_capacity(0x10);
	buf.append_str("1", None);
	assert_eq!(buf.peek(), Some(b'1'));
	buf.append_str("2", None);
	assert_eq!(buf.readable_string(), "12");
	buf.append_buffer(&Buffer::from_str("3"));
	assert_eq!(buf.readable_string(), "123");
	assert_eq!(buf.writable_size(), 0x10 - 3);

	assert_eq!(buf.retrieve_all_to_string(), "123");
	assert!(buf.is_empty());

	buf.append_str("hello", Some(NewLine::CrLf));
	assert_eq!(buf.retrieve_all_to_string(), "hello\r\n");
	buf.append_str("hello", Some(NewLine::Lf));
	assert_eq!(buf.retrieve_all_to_string(), "hello\n");
	Ok(())
}

#[test]
fn test_buffer_compaction_before_growth() -> Result<(), Error> {
	let mut buf = Buffer::with_capacity(8);
	buf.append(b"abcdefgh");
	assert_eq!(buf.writable_size(), 0);

	// Consume a prefix so prependable space covers the next append. The
	// buffer must compact in place rather than grow.
	buf.retrieve(4);
	let cap = buf.capacity();
	buf.append(b"1234");
	assert_eq!(buf.capacity(), cap);
	assert_eq!(buf.readable_string(), "efgh1234");

	// No prependable space left now, so this append must grow.
	buf.append(b"xyz");
	assert!(buf.capacity() > cap);
	assert_eq!(buf.readable_string(), "efgh1234xyz");
	Ok(())
}

#[test]
fn test_buffer_consumed_plus_readable() -> Result<(), Error> {
	let mut buf = Buffer::with_capacity(4);
	let mut consumed = 0;
	let mut appended = 0;
	for i in 0..100 {
		let chunk = vec![b'a' + (i % 26) as u8; (i % 7) + 1];
		buf.append(&chunk);
		appended += chunk.len();
		if i % 3 == 0 {
			let n = buf.readable_size().min(4);
			buf.retrieve(n);
			consumed += n;
		}
		assert_eq!(consumed + buf.readable_size(), appended);
	}
	Ok(())
}

#[test]
fn test_buffer_clear() -> Result<(), Error> {
	let mut buf = Buffer::from_str("hello");
	buf.clear();
	assert!(buf.is_empty());
	assert_eq!(buf.readable_size(), 0);
	assert_eq!(buf.peek(), None);
	// clear is safe to call again
	buf.clear();
	assert!(buf.is_empty());
	Ok(())
}
