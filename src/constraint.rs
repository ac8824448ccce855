use std::cell::RefCell;
use std::panic::Location;
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::context;
use crate::diag::Origin;
use crate::node::{Node, Options};
use crate::value::Value;

struct Capture {
	node: Node,
	key: String,
	prev: Value,
}

#[derive(Default)]
struct ConstraintState {
	activated: bool,
	captured: Vec<Capture>,
	seen: FxHashMap<(u64, String), usize>,
}

/// The write interceptor installed while a constraint's setter runs, and kept
/// alive by pending writes queued against locked cells.
#[derive(Clone)]
pub(crate) struct Recorder {
	state: Rc<RefCell<ConstraintState>>,
	origin: Origin,
}

impl Recorder {
	pub(crate) fn origin(&self) -> Origin {
		self.origin
	}

	/// Capture a cell's pre-write value for restoration on deactivation. A
	/// cell/key pair is captured at most once per activation; later records
	/// overwrite the stored value, so the last one wins.
	pub(crate) fn record(&self, node: &Node, key: &str, prev: Value) {
		let mut state = self.state.borrow_mut();
		let slot = (node.id(), key.to_string());
		if let Some(&index) = state.seen.get(&slot) {
			state.captured[index].prev = prev;
		} else {
			state.captured.push(Capture {
				node: node.clone(),
				key: key.to_string(),
				prev,
			});
			let index = state.captured.len() - 1;
			state.seen.insert(slot, index);
		}
	}
}

/// A governing rule over a set of cells.
///
/// While `predicate` holds, every cell written by `setter` is forced to the
/// value it set and locked against external writes; writes arriving in the
/// meantime queue as pending. When the predicate stops holding, the cells are
/// unlocked (replaying at most the oldest pending write each), restored to
/// their captured pre-activation values, and `unsetter` runs.
///
/// The returned node is the constraint itself; drop it and the rule stops
/// firing.
#[track_caller]
pub fn constraint(
	predicate: impl Fn() -> bool + 'static,
	setter: impl Fn() + 'static,
	unsetter: Option<Box<dyn Fn()>>,
) -> Node {
	constraint_named("constraint", predicate, setter, unsetter)
}

#[track_caller]
pub fn constraint_named(
	name: &'static str,
	predicate: impl Fn() -> bool + 'static,
	setter: impl Fn() + 'static,
	unsetter: Option<Box<dyn Fn()>>,
) -> Node {
	let location = Location::caller();
	let origin = Origin { name, location };
	let state = Rc::new(RefCell::new(ConstraintState::default()));

	Node::compute_with(
		move || {
			let active = predicate();
			let was_active = state.borrow().activated;
			if active == was_active {
				return Value::Bool(active);
			}

			if active {
				{
					let mut state = state.borrow_mut();
					state.activated = true;
					state.captured.clear();
					state.seen.clear();
				}
				context::set_recorder(Some(Recorder {
					state: state.clone(),
					origin,
				}));
				setter();
				context::set_recorder(None);

				let captured = state
					.borrow()
					.captured
					.iter()
					.map(|capture| capture.node.clone())
					.collect::<Vec<_>>();
				for node in captured {
					node.lock(origin);
				}
			} else {
				state.borrow_mut().activated = false;
				let captured = state
					.borrow()
					.captured
					.iter()
					.map(|capture| Capture {
						node: capture.node.clone(),
						key: capture.key.clone(),
						prev: capture.prev.clone(),
					})
					.collect::<Vec<_>>();
				for capture in &captured {
					capture.node.unlock();
				}
				for capture in &captured {
					capture.node.set_key(&capture.key, capture.prev.clone());
				}
				if let Some(unsetter) = &unsetter {
					unsetter();
				}
			}

			Value::Bool(active)
		},
		Options {
			name,
			..Options::default()
		},
	)
}
