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

//! Containers and utilities shared by the tinyhttpd crates.

mod error;
#[macro_use]
pub mod macros;
pub mod buffer;
pub mod deque;
pub mod io;
pub mod mapped;
pub mod testutil;

pub use crate::error::{Error, ErrorKind};
