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

//! A logging library.
//!
//! Loggers are looked up by name through a global [`Manager`] and write
//! [`Event`]s through a list of appenders, each formatted by a `%`-tag
//! pattern. A logger constructed with a queue capacity becomes
//! asynchronous: events are pushed onto a bounded deque and drained by a
//! dedicated writer thread.

#[macro_use]
mod logger;

pub use crate::logger::{
	root_logger, root_manager, Appender, Event, FileAppender, Formatter, Level, Logger, Manager,
	StdOutAppender,
};
