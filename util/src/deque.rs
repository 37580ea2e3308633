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

//! A bounded blocking deque. Producers block while the deque is full,
//! consumers block while it is empty, and both wake when it is closed.
//! It backs asynchronous loggers only.

use crate::{Error, ErrorKind};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

const DEFAULT_CAPACITY: usize = 1000;

struct Inner<T> {
	items: VecDeque<T>,
	closed: bool,
}

pub struct BlockDeque<T> {
	inner: Mutex<Inner<T>>,
	capacity: usize,
	not_empty: Condvar,
	not_full: Condvar,
}

impl<T> Default for BlockDeque<T> {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

impl<T> BlockDeque<T> {
	/// Create a deque with the given maximum capacity.
	pub fn new(capacity: usize) -> Self {
		assert!(capacity > 0);
		BlockDeque {
			inner: Mutex::new(Inner {
				items: VecDeque::new(),
				closed: false,
			}),
			capacity,
			not_empty: Condvar::new(),
			not_full: Condvar::new(),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn size(&self) -> Result<usize, Error> {
		let inner = lock!(self.inner);
		Ok(inner.items.len())
	}

	pub fn is_empty(&self) -> Result<bool, Error> {
		Ok(self.size()? == 0)
	}

	pub fn is_full(&self) -> Result<bool, Error> {
		Ok(self.size()? == self.capacity)
	}

	/// Add an element to the end and notify a consumer. Blocks while the
	/// deque is full. Fails with [`ErrorKind::Closed`] once closed.
	pub fn push_back(&self, item: T) -> Result<(), Error> {
		let mut inner = lock!(self.inner);
		while inner.items.len() == self.capacity && !inner.closed {
			inner = self.not_full.wait(inner).map_err(|e| {
				let error: Error = ErrorKind::PoisonError(format!("{}", e)).into();
				error
			})?;
		}
		if inner.closed {
			return Err(ErrorKind::Closed("deque closed".to_string()).into());
		}
		inner.items.push_back(item);
		self.not_empty.notify_one();
		Ok(())
	}

	/// Insert an element at the front and notify a consumer. Blocks while
	/// the deque is full. Fails with [`ErrorKind::Closed`] once closed.
	pub fn push_front(&self, item: T) -> Result<(), Error> {
		let mut inner = lock!(self.inner);
		while inner.items.len() == self.capacity && !inner.closed {
			inner = self.not_full.wait(inner).map_err(|e| {
				let error: Error = ErrorKind::PoisonError(format!("{}", e)).into();
				error
			})?;
		}
		if inner.closed {
			return Err(ErrorKind::Closed("deque closed".to_string()).into());
		}
		inner.items.push_front(item);
		self.not_empty.notify_one();
		Ok(())
	}

	/// Pop the first element, waiting up to `time_out` if one is given,
	/// indefinitely otherwise. Returns `None` on a time-out or once the
	/// deque is closed.
	pub fn pop(&self, time_out: Option<Duration>) -> Result<Option<T>, Error> {
		let mut inner = lock!(self.inner);
		loop {
			if let Some(item) = inner.items.pop_front() {
				self.not_full.notify_one();
				return Ok(Some(item));
			}
			if inner.closed {
				return Ok(None);
			}
			match time_out {
				Some(dur) => {
					let (guard, res) = self.not_empty.wait_timeout(inner, dur).map_err(|e| {
						let error: Error = ErrorKind::PoisonError(format!("{}", e)).into();
						error
					})?;
					inner = guard;
					if res.timed_out() && inner.items.is_empty() {
						return Ok(None);
					}
				}
				None => {
					inner = self.not_empty.wait(inner).map_err(|e| {
						let error: Error = ErrorKind::PoisonError(format!("{}", e)).into();
						error
					})?;
				}
			}
		}
	}

	/// Notify one waiting consumer.
	pub fn flush(&self) {
		self.not_empty.notify_one();
	}

	/// Clear all elements.
	pub fn clear(&self) -> Result<(), Error> {
		let mut inner = lock!(self.inner);
		inner.items.clear();
		self.not_full.notify_all();
		Ok(())
	}

	/// Clear all elements and close the deque, waking every waiter.
	/// Closing twice is a no-op.
	pub fn close(&self) -> Result<(), Error> {
		let mut inner = lock!(self.inner);
		inner.closed = true;
		inner.items.clear();
		self.not_empty.notify_all();
		self.not_full.notify_all();
		Ok(())
	}
}

#[test]
fn test_deque_order() -> Result<(), Error> {
	let deque = BlockDeque::new(10);
	deque.push_back(1)?;
	deque.push_back(2)?;
	deque.push_front(0)?;
	assert_eq!(deque.size()?, 3);
	assert_eq!(deque.pop(None)?, Some(0));
	assert_eq!(deque.pop(None)?, Some(1));
	assert_eq!(deque.pop(None)?, Some(2));
	assert!(deque.is_empty()?);
	Ok(())
}

#[test]
fn test_deque_pop_timeout() -> Result<(), Error> {
	let deque: BlockDeque<u32> = BlockDeque::new(10);
	assert_eq!(deque.pop(Some(Duration::from_millis(10)))?, None);
	Ok(())
}

#[test]
fn test_deque_close_wakes_consumer() -> Result<(), Error> {
	use std::sync::Arc;
	use std::thread;

	let deque: Arc<BlockDeque<u32>> = Arc::new(BlockDeque::new(10));
	let consumer = {
		let deque = deque.clone();
		thread::spawn(move || deque.pop(None))
	};

	thread::sleep(Duration::from_millis(50));
	deque.close()?;
	let popped = consumer.join().expect("consumer panicked")?;
	assert_eq!(popped, None);

	// pushes after close fail with Closed
	match deque.push_back(1) {
		Err(e) => match e.kind() {
			ErrorKind::Closed(_) => {}
			k => panic!("unexpected kind: {:?}", k),
		},
		Ok(_) => panic!("push after close must fail"),
	}

	// closing again is safe
	deque.close()?;
	Ok(())
}

#[test]
fn test_deque_blocks_producer_when_full() -> Result<(), Error> {
	use std::sync::Arc;
	use std::thread;

	let deque: Arc<BlockDeque<u32>> = Arc::new(BlockDeque::new(2));
	deque.push_back(1)?;
	deque.push_back(2)?;
	assert!(deque.is_full()?);

	let producer = {
		let deque = deque.clone();
		thread::spawn(move || deque.push_back(3))
	};

	// The producer must still be blocked while the deque is full.
	thread::sleep(Duration::from_millis(50));
	assert_eq!(deque.size()?, 2);

	assert_eq!(deque.pop(None)?, Some(1));
	producer.join().expect("producer panicked")?;
	assert_eq!(deque.pop(None)?, Some(2));
	assert_eq!(deque.pop(None)?, Some(3));
	Ok(())
}
