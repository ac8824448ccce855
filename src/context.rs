use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::constraint::Recorder;
use crate::node::{Node, NodeBody};

/// Activation record for a node whose very first evaluation is in flight.
/// Reads performed anywhere beneath it register the frame's node as a
/// dependent of the cell being read.
struct CreationFrame {
	node: Weak<NodeBody>,
}

/// Activation record for a re-evaluation. Its presence suppresses dependency
/// registration, and its cursor replays memoized children by call order.
struct RecomputeFrame {
	node: Rc<NodeBody>,
	index: Cell<usize>,
}

thread_local! {
	static CREATION: RefCell<Vec<CreationFrame>> = RefCell::new(Vec::new());
	static RECOMPUTE: RefCell<Vec<RecomputeFrame>> = RefCell::new(Vec::new());
	static RECORDER: RefCell<Option<Recorder>> = RefCell::new(None);
	static NEXT_ID: Cell<u64> = Cell::new(1);
}

pub(crate) fn next_id() -> u64 {
	NEXT_ID.with(|id| {
		let next = id.get();
		id.set(next + 1);
		next
	})
}

pub(crate) fn push_creation(node: Weak<NodeBody>) {
	CREATION.with(|stack| stack.borrow_mut().push(CreationFrame { node }));
}

pub(crate) fn pop_creation() {
	CREATION.with(|stack| stack.borrow_mut().pop());
}

pub(crate) fn creation_top() -> Option<Rc<NodeBody>> {
	CREATION.with(|stack| {
		stack
			.borrow()
			.last()
			.and_then(|frame| frame.node.upgrade())
	})
}

pub(crate) fn push_recompute(node: Rc<NodeBody>) {
	RECOMPUTE.with(|stack| {
		stack.borrow_mut().push(RecomputeFrame {
			node,
			index: Cell::new(0),
		})
	});
}

pub(crate) fn pop_recompute() {
	RECOMPUTE.with(|stack| stack.borrow_mut().pop());
}

pub(crate) fn in_recompute() -> bool {
	RECOMPUTE.with(|stack| !stack.borrow().is_empty())
}

/// True while the given node's own recompute is somewhere on the stack.
pub(crate) fn recomputing(id: u64) -> bool {
	RECOMPUTE.with(|stack| stack.borrow().iter().any(|frame| frame.node.id == id))
}

/// Advance the current recompute frame's call cursor and return the child
/// created at that position on the first pass. `None` means no recompute is
/// in flight; `Some(None)` means the cursor ran past the first pass's
/// creations and the caller must build a fresh, unmemoized node.
pub(crate) fn next_memoized() -> Option<Option<Node>> {
	RECOMPUTE.with(|stack| {
		let stack = stack.borrow();
		let frame = stack.last()?;
		let index = frame.index.get();
		frame.index.set(index + 1);
		Some(frame.node.memoized_child(index))
	})
}

pub(crate) fn recorder() -> Option<Recorder> {
	RECORDER.with(|slot| slot.borrow().clone())
}

pub(crate) fn set_recorder(recorder: Option<Recorder>) {
	RECORDER.with(|slot| *slot.borrow_mut() = recorder);
}

/// The read-time registrar. Edges of the dependency graph are never declared,
/// only observed here: the node currently being constructed becomes a
/// dependent of the node being read. Registration is suppressed while a
/// constraint recorder is installed and during re-entrant recomputation.
pub(crate) fn track_read(read: &Rc<NodeBody>) {
	if RECORDER.with(|slot| slot.borrow().is_some()) {
		return;
	}
	if in_recompute() {
		return;
	}
	let Some(top) = creation_top() else {
		return;
	};
	read.register_dependent(&top);
}
