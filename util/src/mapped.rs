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

//! A read-only memory-mapped file. The mapping is owned and released on
//! drop; a response that holds one keeps the bytes readable until the body
//! has been fully transmitted.

use crate::{Error, ErrorKind};
use memmap2::Mmap;
use std::fs::{metadata, File};
use std::path::{Path, PathBuf};

pub struct MappedFile {
	path: PathBuf,
	map: Mmap,
}

impl MappedFile {
	/// Map a file read-only.
	///
	/// Fails with [`ErrorKind::NotFound`] if the file does not exist,
	/// [`ErrorKind::Forbidden`] if it is not readable, and
	/// [`ErrorKind::InvalidInput`] if the path names a directory.
	pub fn map<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
		let path = path.as_ref().to_path_buf();
		let md = metadata(&path)?;
		if md.is_dir() {
			return Err(ErrorKind::InvalidInput(format!(
				"'{}' is a directory",
				path.display()
			))
			.into());
		}

		let file = File::open(&path)?;
		let map = unsafe { Mmap::map(&file) }.map_err(|e| {
			let error: Error =
				ErrorKind::SystemError(format!("mmap of '{}' failed: {}", path.display(), e))
					.into();
			error
		})?;

		Ok(MappedFile { path, map })
	}

	pub fn data(&self) -> &[u8] {
		&self.map[..]
	}

	pub fn size(&self) -> usize {
		self.map.len()
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[test]
fn test_mapped_file() -> Result<(), Error> {
	use crate::testutil::temp_file_path;
	use std::io::Write;

	let path = temp_file_path("mapped");
	{
		let mut file = File::create(&path)?;
		file.write_all(b"hello")?;
	}

	let mapped = MappedFile::map(&path)?;
	assert_eq!(mapped.size(), 5);
	assert_eq!(mapped.data(), b"hello");
	assert_eq!(mapped.path(), path.as_path());

	drop(mapped);
	std::fs::remove_file(&path)?;
	Ok(())
}

#[test]
fn test_mapped_file_errors() -> Result<(), Error> {
	match MappedFile::map("this-file-does-not-exist") {
		Err(e) => match e.kind() {
			ErrorKind::NotFound(_) => {}
			k => panic!("unexpected kind: {:?}", k),
		},
		Ok(_) => panic!("mapping a missing file must fail"),
	}

	match MappedFile::map(std::env::temp_dir()) {
		Err(e) => match e.kind() {
			ErrorKind::InvalidInput(_) => {}
			k => panic!("unexpected kind: {:?}", k),
		},
		Ok(_) => panic!("mapping a directory must fail"),
	}
	Ok(())
}
