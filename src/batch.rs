use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use fxhash::FxHashSet;

use crate::context;
use crate::diag::{self, Diagnostic};
use crate::node::{refresh, Mode, NodeBody};

struct Timer {
	id: u64,
	node: Weak<NodeBody>,
	remaining: u32,
}

#[derive(Default)]
struct Scheduler {
	queue: VecDeque<(u64, Weak<NodeBody>)>,
	scheduled: FxHashSet<u64>,
	finished: FxHashSet<u64>,
	timers: Vec<Timer>,
	watchdogs: Vec<(u64, Weak<NodeBody>)>,
	draining: bool,
}

thread_local! {
	static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// True while a batch is being drained on this thread.
pub fn in_batch() -> bool {
	SCHEDULER.with(|s| s.borrow().draining)
}

/// Defer a dependent's recompute into the current batch. Repeated triggers of
/// the same dependent coalesce; a trigger arriving after the dependent
/// already finished within this batch is a propagation loop and aborts that
/// edge with a diagnostic instead of re-running.
pub(crate) fn schedule(dependent: &Rc<NodeBody>) {
	match dependent.mode {
		Mode::Eager => schedule_eager(dependent),
		Mode::Debounce(quantum) => schedule_timer(dependent, quantum, true),
		Mode::Delay(quantum) => schedule_timer(dependent, quantum, false),
	}
}

/// Timer path of the loop guard: an arm coming from the cell's own recompute,
/// or arriving after the cell already finished within this batch, aborts the
/// edge just as the eager path does at dequeue time.
fn schedule_timer(dependent: &Rc<NodeBody>, quantum: u32, reset: bool) {
	let looped = context::recomputing(dependent.id)
		|| SCHEDULER.with(|s| s.borrow().finished.contains(&dependent.id));
	if looped {
		diag::emit(Diagnostic::PropagationLoop {
			origin: dependent.origin(),
		});
		return;
	}
	SCHEDULER.with(|s| {
		let mut s = s.borrow_mut();
		match s.timers.iter().position(|t| t.id == dependent.id) {
			// A re-trigger before a debounce quantum elapsed starts it over;
			// a delay quantum keeps counting from the first trigger.
			Some(index) if reset => s.timers[index].remaining = quantum,
			Some(_) => {}
			None => s.timers.push(Timer {
				id: dependent.id,
				node: Rc::downgrade(dependent),
				remaining: quantum,
			}),
		}
	});
}

fn schedule_eager(dependent: &Rc<NodeBody>) {
	let mut looped = false;
	SCHEDULER.with(|s| {
		let mut s = s.borrow_mut();
		if s.finished.contains(&dependent.id) {
			looped = true;
		} else if s.scheduled.insert(dependent.id) {
			s.queue.push_back((dependent.id, Rc::downgrade(dependent)));
		}
	});
	if looped {
		diag::emit(Diagnostic::PropagationLoop {
			origin: dependent.origin(),
		});
	}
}

/// Put a locked cell with freshly queued pending writes under watch; it is
/// inspected when the current tick ends.
pub(crate) fn watch(body: &Rc<NodeBody>) {
	SCHEDULER.with(|s| {
		let mut s = s.borrow_mut();
		if !s.watchdogs.iter().any(|(id, _)| *id == body.id) {
			s.watchdogs.push((body.id, Rc::downgrade(body)));
		}
	});
}

/// Run one propagation round: drain the current batch (each dependent
/// recomputes at most once, in discovery order), then inspect watched cells
/// for unresolved pending writes, then advance debounce/delay timers. Timer
/// expirations enqueue for the next tick.
pub fn tick() {
	SCHEDULER.with(|s| s.borrow_mut().draining = true);
	run_queue();
	SCHEDULER.with(|s| {
		let mut s = s.borrow_mut();
		s.finished.clear();
		s.scheduled.clear();
		s.draining = false;
	});
	check_watchdogs();
	advance_timers();
}

/// Tick until no deferred work remains.
pub fn drain() {
	while has_work() {
		tick();
	}
}

/// Run `func`, then drain every propagation round it triggered.
pub fn batch(func: impl FnOnce()) {
	func();
	drain();
}

fn has_work() -> bool {
	SCHEDULER.with(|s| {
		let s = s.borrow();
		!s.queue.is_empty() || !s.timers.is_empty() || !s.watchdogs.is_empty()
	})
}

enum Job {
	Run(Rc<NodeBody>),
	Looped(Rc<NodeBody>),
	Empty,
}

fn run_queue() {
	loop {
		let job = SCHEDULER.with(|s| {
			let mut s = s.borrow_mut();
			loop {
				match s.queue.pop_front() {
					Some((id, weak)) => {
						s.scheduled.remove(&id);
						let Some(body) = weak.upgrade() else {
							// Dependent dropped since scheduling.
							continue;
						};
						if s.finished.contains(&id) {
							// Scheduled mid-recompute, finished by the time
							// it was dequeued.
							return Job::Looped(body);
						}
						return Job::Run(body);
					}
					None => return Job::Empty,
				}
			}
		});
		match job {
			Job::Run(body) => {
				tracing::trace!(id = body.id, name = body.name, "recompute");
				refresh(&body);
				SCHEDULER.with(|s| {
					s.borrow_mut().finished.insert(body.id);
				});
			}
			Job::Looped(body) => {
				diag::emit(Diagnostic::PropagationLoop {
					origin: body.origin(),
				});
			}
			Job::Empty => break,
		}
	}
}

fn check_watchdogs() {
	let watched = SCHEDULER.with(|s| std::mem::take(&mut s.borrow_mut().watchdogs));
	for (_, weak) in watched {
		let Some(body) = weak.upgrade() else {
			continue;
		};
		if let Some((locker, pending)) = body.conflict_report() {
			diag::emit(Diagnostic::ConflictingConstraints { locker, pending });
		}
	}
}

fn advance_timers() {
	let fired = SCHEDULER.with(|s| {
		let mut s = s.borrow_mut();
		let mut fired = Vec::new();
		for timer in s.timers.iter_mut() {
			timer.remaining = timer.remaining.saturating_sub(1);
		}
		s.timers.retain(|timer| {
			if timer.remaining == 0 {
				fired.push(timer.node.clone());
				false
			} else {
				true
			}
		});
		fired
	});
	for weak in fired {
		if let Some(body) = weak.upgrade() {
			SCHEDULER.with(|s| {
				let mut s = s.borrow_mut();
				if s.scheduled.insert(body.id) {
					s.queue.push_back((body.id, Rc::downgrade(&body)));
				}
			});
		}
	}
}
