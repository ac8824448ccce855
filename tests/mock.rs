use std::sync::{Arc, Mutex, MutexGuard};

use mockall::*;

#[automock]
pub trait Watcher {
	fn changed(&self, value: i64);
}

#[derive(Clone)]
pub struct SharedWatcher(Arc<Mutex<MockWatcher>>);

impl SharedWatcher {
	pub fn new() -> SharedWatcher {
		SharedWatcher(Arc::new(Mutex::new(MockWatcher::new())))
	}

	pub fn get<'a>(&'a self) -> MutexGuard<'a, MockWatcher> {
		return self.0.lock().unwrap();
	}
}
