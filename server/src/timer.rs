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

//! The timer system based on a min-heap.
//!
//! Nodes are keyed by a user-defined unique key and ordered by expiration
//! time, with a side map from keys to heap indices for O(1) membership and
//! O(log n) adjustment. When a node expires its callback is invoked;
//! callback failures and panics are logged, never propagated.
//!
//! The timer is not internally synchronized.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinyhttpd_log::{error, root_logger, Logger};
use tinyhttpd_util::{Error, ErrorKind};

pub type TimeoutCallback<K> = Box<dyn FnMut(&K) -> Result<(), Error> + Send>;

struct Node<K> {
	key: K,
	expiration: Instant,
	callback: TimeoutCallback<K>,
}

pub struct HeapTimer<K> {
	logger: Arc<Logger>,
	nodes: Vec<Node<K>>,
	key_to_idx: HashMap<K, usize>,
}

impl<K> HeapTimer<K>
where
	K: Eq + Hash + Copy + Display,
{
	pub fn new() -> Self {
		Self::with_logger(root_logger())
	}

	pub fn with_logger(logger: Arc<Logger>) -> Self {
		HeapTimer {
			logger,
			nodes: vec![],
			key_to_idx: HashMap::new(),
		}
	}

	pub fn size(&self) -> usize {
		debug_assert_eq!(self.nodes.len(), self.key_to_idx.len());
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	pub fn contains(&self, key: &K) -> bool {
		self.key_to_idx.contains_key(key)
	}

	pub fn clear(&mut self) {
		self.nodes.clear();
		self.key_to_idx.clear();
	}

	/// Push a node expiring after `expiration`. An existing key is
	/// adjusted in place, replacing its callback.
	pub fn push(&mut self, key: K, expiration: Duration, callback: TimeoutCallback<K>) {
		self.push_at(key, Instant::now() + expiration, callback);
	}

	/// Push a node with an absolute expiration time.
	pub fn push_at(&mut self, key: K, expiration: Instant, callback: TimeoutCallback<K>) {
		if !self.contains(&key) {
			let idx = self.size();
			self.key_to_idx.insert(key, idx);
			self.nodes.push(Node {
				key,
				expiration,
				callback,
			});
			self.sift_up(idx);
		} else {
			// known-present, the adjust cannot fail
			let _ = self.adjust_impl(&key, expiration, Some(callback));
		}
	}

	/// Move a node's expiration `expiration` from now.
	/// Fails with [`ErrorKind::KeyAbsent`] for an unknown key.
	pub fn adjust(&mut self, key: &K, expiration: Duration) -> Result<(), Error> {
		self.adjust_at(key, Instant::now() + expiration)
	}

	/// Move a node's expiration to an absolute time.
	/// Fails with [`ErrorKind::KeyAbsent`] for an unknown key.
	pub fn adjust_at(&mut self, key: &K, expiration: Instant) -> Result<(), Error> {
		self.adjust_impl(key, expiration, None)
	}

	fn adjust_impl(
		&mut self,
		key: &K,
		expiration: Instant,
		callback: Option<TimeoutCallback<K>>,
	) -> Result<(), Error> {
		let idx = *self
			.key_to_idx
			.get(key)
			.ok_or_else(|| -> Error { ErrorKind::KeyAbsent(format!("{}", key)).into() })?;

		if let Some(callback) = callback {
			self.nodes[idx].callback = callback;
		}

		let sift_up = expiration < self.nodes[idx].expiration;
		self.nodes[idx].expiration = expiration;
		if sift_up {
			self.sift_up(idx);
		} else {
			self.sift_down(idx);
		}
		Ok(())
	}

	/// Remove a node by its key. Returns whether the node existed.
	pub fn remove(&mut self, key: &K) -> bool {
		match self.key_to_idx.get(key) {
			Some(&idx) => {
				self.remove_by_index(idx);
				true
			}
			None => false,
		}
	}

	/// Remove a node by its key and invoke its callback.
	/// Fails with [`ErrorKind::KeyAbsent`] for an unknown key.
	pub fn invoke(&mut self, key: &K) -> Result<(), Error> {
		let idx = *self
			.key_to_idx
			.get(key)
			.ok_or_else(|| -> Error { ErrorKind::KeyAbsent(format!("{}", key)).into() })?;

		let mut node = self.remove_by_index(idx);
		self.run_callback(&mut node);
		debug_assert!(!self.contains(key));
		Ok(())
	}

	/// Pop the top node and return its key, or `None` if the timer is
	/// empty.
	pub fn pop(&mut self) -> Option<K> {
		if self.is_empty() {
			None
		} else {
			Some(self.remove_by_index(0).key)
		}
	}

	/// Remove expired nodes and invoke their callbacks in expiration
	/// order.
	pub fn tick(&mut self) {
		let now = Instant::now();
		while !self.is_empty() {
			if self.nodes[0].expiration > now {
				break;
			}
			let mut node = self.remove_by_index(0);
			self.run_callback(&mut node);
		}
	}

	/// Remove expired nodes, then return the interval from now to the next
	/// expiration. An empty timer yields zero.
	pub fn to_next_tick(&mut self) -> Duration {
		self.tick();
		if !self.is_empty() {
			let now = Instant::now();
			if self.nodes[0].expiration > now {
				return self.nodes[0].expiration - now;
			}
		}
		Duration::from_secs(0)
	}

	fn run_callback(&self, node: &mut Node<K>) {
		let key = node.key;
		match catch_unwind(AssertUnwindSafe(|| (node.callback)(&key))) {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				error!(self.logger, "Error raised in timer's callback: {}", e);
			}
			Err(_) => {
				error!(self.logger, "Panic raised in timer's callback");
			}
		}
	}

	/// Remove the node at `idx`: swap it with the last node, pop, then
	/// sift the swapped-in node to its place.
	fn remove_by_index(&mut self, idx: usize) -> Node<K> {
		debug_assert!(idx < self.size());
		let last = self.size() - 1;
		self.swap(idx, last);

		let node = match self.nodes.pop() {
			Some(node) => node,
			None => unreachable!(),
		};
		self.key_to_idx.remove(&node.key);

		if idx < self.size() {
			self.sift_up(idx);
			self.sift_down(idx);
		}

		debug_assert_eq!(self.nodes.len(), self.key_to_idx.len());
		node
	}

	/// Recursively swap a node with its parent while it is not larger than
	/// the parent, so that a node adjusted to an equal minimum reaches the
	/// top.
	fn sift_up(&mut self, mut idx: usize) {
		while idx != 0 {
			let parent = (idx - 1) / 2;
			if self.nodes[parent].expiration >= self.nodes[idx].expiration {
				self.swap(parent, idx);
				idx = parent;
			} else {
				break;
			}
		}
	}

	/// Recursively swap a node with its smallest child while it is larger
	/// than the child.
	fn sift_down(&mut self, mut idx: usize) {
		loop {
			let left = idx * 2 + 1;
			if left >= self.size() {
				break;
			}
			let right = left + 1;
			let mut child = left;
			if right < self.size() && self.nodes[right].expiration < self.nodes[left].expiration {
				child = right;
			}
			if self.nodes[idx].expiration > self.nodes[child].expiration {
				self.swap(idx, child);
				idx = child;
			} else {
				break;
			}
		}
	}

	fn swap(&mut self, idx1: usize, idx2: usize) {
		if idx1 != idx2 {
			self.nodes.swap(idx1, idx2);
			self.key_to_idx.insert(self.nodes[idx1].key, idx1);
			self.key_to_idx.insert(self.nodes[idx2].key, idx2);
		}
	}
}

#[cfg(test)]
fn shuffled_heap(
	keys: &[i32],
	fired: &std::sync::Arc<std::sync::Mutex<Vec<i32>>>,
) -> HeapTimer<i32> {
	use rand::seq::SliceRandom;

	let mut shuffled = keys.to_vec();
	shuffled.shuffle(&mut rand::thread_rng());

	// nodes with larger keys expire later, a few milliseconds from now
	let base = Instant::now();
	let mut heap = HeapTimer::new();
	for key in shuffled {
		let fired = fired.clone();
		heap.push_at(
			key,
			base + Duration::from_millis(key as u64),
			Box::new(move |k: &i32| {
				fired.lock().unwrap().push(*k);
				Ok(())
			}),
		);
	}
	heap
}

#[test]
fn test_timer_push_pop_order() -> Result<(), Error> {
	use std::sync::{Arc, Mutex};

	let fired = Arc::new(Mutex::new(vec![]));
	let keys = [1, 2, 3, 4, 5];
	let mut heap = shuffled_heap(&keys, &fired);

	assert!(!heap.is_empty());
	assert_eq!(heap.size(), keys.len());
	for key in &keys {
		assert!(heap.contains(key));
	}

	// popped nodes appear in non-decreasing order of expiration
	let mut popped = vec![];
	while let Some(key) = heap.pop() {
		popped.push(key);
	}
	assert_eq!(popped, keys);
	assert_eq!(heap.pop(), None);
	Ok(())
}

#[test]
fn test_timer_adjust() -> Result<(), Error> {
	use std::sync::{Arc, Mutex};

	let fired = Arc::new(Mutex::new(vec![]));
	let mut heap = shuffled_heap(&[1, 2, 3, 4, 5], &fired);

	// give node 2 the longest expiration
	heap.adjust(&2, Duration::from_secs(100))?;
	let mut popped = vec![];
	while let Some(key) = heap.pop() {
		popped.push(key);
	}
	assert_eq!(popped, vec![1, 3, 4, 5, 2]);

	// adjusting an unknown key fails with KeyAbsent
	match heap.adjust(&1, Duration::from_secs(1)) {
		Err(e) => match e.kind() {
			ErrorKind::KeyAbsent(_) => {}
			k => panic!("unexpected kind: {:?}", k),
		},
		Ok(_) => panic!("adjust of a missing key must fail"),
	}
	Ok(())
}

#[test]
fn test_timer_remove() -> Result<(), Error> {
	use std::sync::{Arc, Mutex};

	let fired = Arc::new(Mutex::new(vec![]));
	let mut heap = shuffled_heap(&[1, 2, 3, 4, 5], &fired);

	assert!(heap.remove(&2));
	assert!(!heap.contains(&2));
	assert_eq!(heap.size(), 4);

	let mut popped = vec![];
	while let Some(key) = heap.pop() {
		popped.push(key);
	}
	assert_eq!(popped, vec![1, 3, 4, 5]);

	// removing a missing key reports false
	assert!(!heap.remove(&0));
	Ok(())
}

#[test]
fn test_timer_invoke() -> Result<(), Error> {
	use std::sync::{Arc, Mutex};

	let fired = Arc::new(Mutex::new(vec![]));
	let mut heap = shuffled_heap(&[1, 2, 3], &fired);

	heap.invoke(&2)?;
	assert_eq!(heap.size(), 2);
	assert_eq!(*fired.lock().unwrap(), vec![2]);

	// invoking an unknown key fails with KeyAbsent
	match heap.invoke(&2) {
		Err(e) => match e.kind() {
			ErrorKind::KeyAbsent(_) => {}
			k => panic!("unexpected kind: {:?}", k),
		},
		Ok(_) => panic!("invoke of a missing key must fail"),
	}
	Ok(())
}

#[test]
fn test_timer_tick() -> Result<(), Error> {
	use std::sync::{Arc, Mutex};

	let fired = Arc::new(Mutex::new(vec![]));
	let keys = [1, 2, 3, 4, 5];
	let mut heap = shuffled_heap(&keys, &fired);

	// let every node's millisecond-scale expiration elapse before ticking
	std::thread::sleep(Duration::from_millis(20));

	// callbacks run in order of expiration
	heap.tick();
	assert!(heap.is_empty());
	assert_eq!(*fired.lock().unwrap(), keys);

	// all nodes have been consumed, the next tick is immediate
	assert_eq!(heap.to_next_tick(), Duration::from_secs(0));
	Ok(())
}

#[test]
fn test_timer_callback_failures_are_contained() -> Result<(), Error> {
	let mut heap: HeapTimer<i32> = HeapTimer::new();
	heap.push(
		1,
		Duration::from_secs(0),
		Box::new(|_| Err(ErrorKind::InternalError("boom".to_string()).into())),
	);
	heap.push(2, Duration::from_secs(0), Box::new(|_| panic!("boom")));

	heap.tick();
	assert!(heap.is_empty());
	Ok(())
}

#[test]
fn test_timer_to_next_tick_pending() -> Result<(), Error> {
	let mut heap: HeapTimer<i32> = HeapTimer::new();
	heap.push(1, Duration::from_secs(60), Box::new(|_| Ok(())));

	let next = heap.to_next_tick();
	assert!(next > Duration::from_secs(0) && next <= Duration::from_secs(60));
	assert_eq!(heap.size(), 1);

	heap.clear();
	assert!(heap.is_empty());
	assert_eq!(heap.to_next_tick(), Duration::from_secs(0));
	Ok(())
}

#[test]
fn test_timer_push_existing_key_adjusts() -> Result<(), Error> {
	use std::sync::{Arc, Mutex};

	let fired = Arc::new(Mutex::new(vec![]));
	let mut heap = shuffled_heap(&[1, 2, 3], &fired);

	// re-pushing key 1 replaces its expiration and callback
	heap.push(1, Duration::from_secs(100), Box::new(|_| Ok(())));
	assert_eq!(heap.size(), 3);

	let mut popped = vec![];
	while let Some(key) = heap.pop() {
		popped.push(key);
	}
	assert_eq!(popped, vec![2, 3, 1]);
	Ok(())
}
