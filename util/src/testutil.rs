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

//! Helpers for unit tests across the workspace.

use crate::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// A temp-directory path unique to this process and call site tag.
pub fn temp_file_path(tag: &str) -> PathBuf {
	let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
	let mut path = std::env::temp_dir();
	path.push(format!(
		"tinyhttpd-test-{}-{}-{}",
		tag,
		std::process::id(),
		id
	));
	path
}

/// Create a temp file holding `contents` and return its path.
pub fn write_temp_file(tag: &str, contents: &[u8]) -> Result<PathBuf, Error> {
	let path = temp_file_path(tag);
	std::fs::write(&path, contents)?;
	Ok(path)
}
