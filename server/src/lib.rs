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

//! The event-driven runtime: an epoll readiness multiplexer, a min-heap
//! timer, a worker pool and the reactor that ties them to HTTP
//! connections.

pub mod addr;
pub mod epoll;
pub mod pool;
pub mod server;
pub mod timer;

pub use crate::epoll::Epoller;
pub use crate::pool::ThreadPool;
pub use crate::server::{ServerConfig, WebServer};
pub use crate::timer::HeapTimer;
