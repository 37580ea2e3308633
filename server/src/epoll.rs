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

//! The I/O readiness multiplexer over epoll.
//!
//! `wait` runs on the reactor thread only; `add`, `modify` and `remove`
//! may be called from pool threads while the reactor is waiting, which the
//! kernel permits without additional locking.

use nix::sys::epoll::{
	epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
};
use nix::unistd::close;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tinyhttpd_util::lock;
use tinyhttpd_util::{Error, ErrorKind};

/// The default size of the ready-event array.
const DEFAULT_CAPACITY: usize = 1024;

const INVALID_FD: RawFd = -1;

/// One ready descriptor reported by [`Epoller::wait`].
#[derive(Debug, Clone, Copy)]
pub struct Ready {
	pub fd: RawFd,
	pub events: EpollFlags,
}

pub struct Epoller {
	epoll_fd: AtomicI32,
	events: Mutex<Vec<EpollEvent>>,
}

impl Epoller {
	pub fn new() -> Result<Self, Error> {
		Self::with_capacity(DEFAULT_CAPACITY)
	}

	/// Create an epoller able to report up to `capacity` ready events per
	/// wait.
	pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
		assert!(capacity > 0);
		let epoll_fd = epoll_create1(EpollCreateFlags::empty())?;
		Ok(Epoller {
			epoll_fd: AtomicI32::new(epoll_fd),
			events: Mutex::new(vec![EpollEvent::empty(); capacity]),
		})
	}

	fn fd(&self) -> Result<RawFd, Error> {
		let fd = self.epoll_fd.load(Ordering::SeqCst);
		if fd == INVALID_FD {
			Err(ErrorKind::SetupError("the epoller is closed".to_string()).into())
		} else {
			Ok(fd)
		}
	}

	/// Register a descriptor with an interest mask.
	pub fn add(&self, fd: RawFd, events: EpollFlags) -> Result<(), Error> {
		let mut event = EpollEvent::new(events, fd as u64);
		epoll_ctl(self.fd()?, EpollOp::EpollCtlAdd, fd, &mut event)?;
		Ok(())
	}

	/// Change a registered descriptor's interest mask. Also rearms a
	/// one-shot registration.
	pub fn modify(&self, fd: RawFd, events: EpollFlags) -> Result<(), Error> {
		let mut event = EpollEvent::new(events, fd as u64);
		epoll_ctl(self.fd()?, EpollOp::EpollCtlMod, fd, &mut event)?;
		Ok(())
	}

	/// Remove a descriptor.
	pub fn remove(&self, fd: RawFd) -> Result<(), Error> {
		epoll_ctl(self.fd()?, EpollOp::EpollCtlDel, fd, None)?;
		Ok(())
	}

	/// Block up to `time_out` (indefinitely if `None`) and return the ready
	/// descriptors. A benign signal interruption reports no events.
	pub fn wait(&self, time_out: Option<Duration>) -> Result<Vec<Ready>, Error> {
		let ms: isize = match time_out {
			Some(dur) => dur.as_millis() as isize,
			None => -1,
		};

		let epoll_fd = self.fd()?;
		let mut events = lock!(self.events);
		let count = match epoll_wait(epoll_fd, &mut events, ms) {
			Ok(count) => count,
			Err(nix::errno::Errno::EINTR) => 0,
			Err(e) => return Err(e.into()),
		};

		Ok(events[..count]
			.iter()
			.map(|event| Ready {
				fd: event.data() as RawFd,
				events: event.events(),
			})
			.collect())
	}

	/// Close the epoller. Safe to call more than once; also runs on drop.
	pub fn close(&self) {
		let fd = self.epoll_fd.swap(INVALID_FD, Ordering::SeqCst);
		if fd != INVALID_FD {
			let _ = close(fd);
		}
	}
}

impl Drop for Epoller {
	fn drop(&mut self) {
		self.close();
	}
}

#[test]
fn test_epoller_wait() -> Result<(), Error> {
	use nix::unistd::write;

	let epoller = Epoller::new()?;
	let (rx, tx) = nix::unistd::pipe()?;
	epoller.add(rx, EpollFlags::EPOLLIN)?;

	// nothing is ready, a zero timeout returns immediately with 0
	let ready = epoller.wait(Some(Duration::from_millis(0)))?;
	assert!(ready.is_empty());

	write(tx, b"x")?;
	let ready = epoller.wait(Some(Duration::from_millis(100)))?;
	assert_eq!(ready.len(), 1);
	assert_eq!(ready[0].fd, rx);
	assert!(ready[0].events.contains(EpollFlags::EPOLLIN));

	epoller.modify(rx, EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT)?;
	epoller.remove(rx)?;
	// removing an unregistered descriptor is a kernel rejection
	assert!(epoller.remove(rx).is_err());

	nix::unistd::close(rx)?;
	nix::unistd::close(tx)?;
	Ok(())
}

#[test]
fn test_epoller_one_shot() -> Result<(), Error> {
	use nix::unistd::write;

	let epoller = Epoller::new()?;
	let (rx, tx) = nix::unistd::pipe()?;
	epoller.add(rx, EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT)?;

	write(tx, b"x")?;
	let ready = epoller.wait(Some(Duration::from_millis(100)))?;
	assert_eq!(ready.len(), 1);

	// the event does not re-fire until the registration is rearmed
	let ready = epoller.wait(Some(Duration::from_millis(0)))?;
	assert!(ready.is_empty());
	epoller.modify(rx, EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT)?;
	let ready = epoller.wait(Some(Duration::from_millis(100)))?;
	assert_eq!(ready.len(), 1);

	nix::unistd::close(rx)?;
	nix::unistd::close(tx)?;
	Ok(())
}

#[test]
fn test_epoller_close_is_idempotent() -> Result<(), Error> {
	let epoller = Epoller::new()?;
	epoller.close();
	epoller.close();
	assert!(epoller.wait(Some(Duration::from_millis(0))).is_err());
	Ok(())
}
