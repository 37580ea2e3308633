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

//! The worker pool: a fixed set of threads consuming a FIFO task queue
//! with condition-variable signaling.
//!
//! The pool starts closed; `start` spawns the workers. Closing the pool
//! discards the tasks still queued, so delivery is at-least-once-assigned:
//! every pushed task is either executed or dropped on close. Task errors
//! and panics are logged and never take a worker down.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tinyhttpd_log::{error, root_logger, Logger};
use tinyhttpd_util::lock;
use tinyhttpd_util::{Error, ErrorKind};

pub type Task = Box<dyn FnOnce() -> Result<(), Error> + Send + 'static>;

struct Queue {
	tasks: VecDeque<Task>,
	closed: bool,
}

struct Shared {
	queue: Mutex<Queue>,
	cond: Condvar,
	logger: Arc<Logger>,
}

pub struct ThreadPool {
	shared: Arc<Shared>,
	thread_count: usize,
	threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
	/// Create a pool with `thread_count` workers. `None` or zero means the
	/// hardware concurrency.
	pub fn new(thread_count: Option<usize>, logger: Option<Arc<Logger>>) -> Self {
		let mut thread_count = thread_count.unwrap_or(0);
		if thread_count == 0 {
			thread_count = std::thread::available_parallelism()
				.map(|count| count.get())
				.unwrap_or(1);
		}

		ThreadPool {
			shared: Arc::new(Shared {
				queue: Mutex::new(Queue {
					tasks: VecDeque::new(),
					closed: true,
				}),
				cond: Condvar::new(),
				logger: logger.unwrap_or_else(root_logger),
			}),
			thread_count,
			threads: Mutex::new(vec![]),
		}
	}

	pub fn thread_count(&self) -> usize {
		self.thread_count
	}

	/// Run the pool, spawning the worker threads.
	pub fn start(&self) -> Result<(), Error> {
		{
			let mut queue = lock!(self.shared.queue);
			if !queue.closed {
				return Err(
					ErrorKind::SetupError("the thread pool is already running".to_string()).into(),
				);
			}
			queue.closed = false;
		}

		let mut threads = lock!(self.threads);
		for _ in 0..self.thread_count {
			let shared = self.shared.clone();
			threads.push(std::thread::spawn(move || Self::exec_proc(&shared)));
		}
		Ok(())
	}

	/// Push a task. Fails with [`ErrorKind::SetupError`] while the pool is
	/// not running.
	pub fn push(&self, task: Task) -> Result<(), Error> {
		let mut queue = lock!(self.shared.queue);
		if queue.closed {
			return Err(ErrorKind::SetupError("the thread pool is closed".to_string()).into());
		}
		queue.tasks.push_back(task);
		self.shared.cond.notify_one();
		Ok(())
	}

	/// Continually pop and execute tasks until the pool is closed.
	fn exec_proc(shared: &Arc<Shared>) {
		loop {
			let task = {
				let mut queue = match shared.queue.lock() {
					Ok(queue) => queue,
					Err(e) => e.into_inner(),
				};
				// A worker may not have started waiting when the pool is
				// closed, so the predicate must check the flag as well.
				while queue.tasks.is_empty() && !queue.closed {
					queue = match shared.cond.wait(queue) {
						Ok(queue) => queue,
						Err(e) => e.into_inner(),
					};
				}
				if queue.closed {
					return;
				}
				match queue.tasks.pop_front() {
					Some(task) => task,
					None => continue,
				}
			};

			match catch_unwind(AssertUnwindSafe(task)) {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					error!(shared.logger, "Error raised in thread pool's task: {}", e);
				}
				Err(_) => {
					error!(shared.logger, "Panic raised in thread pool's task");
				}
			}
		}
	}

	/// Close the pool. The tasks still queued are not executed. Safe to
	/// call more than once; the destructor closes and joins the workers.
	pub fn close(&self) {
		let mut queue = match self.shared.queue.lock() {
			Ok(queue) => queue,
			Err(e) => e.into_inner(),
		};
		queue.closed = true;
		self.shared.cond.notify_all();
	}
}

impl Drop for ThreadPool {
	fn drop(&mut self) {
		self.close();
		if let Ok(mut threads) = self.threads.lock() {
			for thread in threads.drain(..) {
				let _ = thread.join();
			}
		}
	}
}

#[test]
fn test_pool_executes_tasks() -> Result<(), Error> {
	use std::sync::atomic::{AtomicUsize, Ordering};

	let pool = ThreadPool::new(Some(4), None);
	assert_eq!(pool.thread_count(), 4);
	pool.start()?;

	let counter = Arc::new(AtomicUsize::new(0));
	for _ in 0..100 {
		let counter = counter.clone();
		pool.push(Box::new(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}))?;
	}

	std::thread::sleep(std::time::Duration::from_millis(300));
	assert_eq!(counter.load(Ordering::SeqCst), 100);
	Ok(())
}

#[test]
fn test_pool_survives_errors_and_panics() -> Result<(), Error> {
	use std::sync::atomic::{AtomicUsize, Ordering};

	let pool = ThreadPool::new(Some(1), None);
	pool.start()?;

	pool.push(Box::new(|| {
		Err(ErrorKind::InternalError("boom".to_string()).into())
	}))?;
	pool.push(Box::new(|| panic!("boom")))?;

	let counter = Arc::new(AtomicUsize::new(0));
	let cloned = counter.clone();
	pool.push(Box::new(move || {
		cloned.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}))?;

	std::thread::sleep(std::time::Duration::from_millis(300));
	assert_eq!(counter.load(Ordering::SeqCst), 1);
	Ok(())
}

#[test]
fn test_pool_close_discards_pending_tasks() -> Result<(), Error> {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::mpsc;

	let pool = ThreadPool::new(Some(1), None);
	pool.start()?;

	// block the only worker on a channel so further tasks stay queued
	let (tx, rx) = mpsc::channel::<()>();
	let rx = Arc::new(Mutex::new(rx));
	let blocker = rx.clone();
	pool.push(Box::new(move || {
		let _ = blocker.lock().unwrap().recv();
		Ok(())
	}))?;

	let counter = Arc::new(AtomicUsize::new(0));
	for _ in 0..10 {
		let counter = counter.clone();
		pool.push(Box::new(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}))?;
	}

	pool.close();
	pool.close();
	tx.send(()).ok();
	drop(pool);

	// the queued tasks were discarded on close
	assert_eq!(counter.load(Ordering::SeqCst), 0);

	Ok(())
}

#[test]
fn test_pool_rejects_tasks_while_closed() -> Result<(), Error> {
	let pool = ThreadPool::new(Some(1), None);
	match pool.push(Box::new(|| Ok(()))) {
		Err(e) => match e.kind() {
			ErrorKind::SetupError(_) => {}
			k => panic!("unexpected kind: {:?}", k),
		},
		Ok(_) => panic!("push on a closed pool must fail"),
	}
	Ok(())
}
