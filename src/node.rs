use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::panic::Location;
use std::rc::{Rc, Weak};

use fxhash::FxHashSet;
use smallvec::SmallVec;

use crate::batch;
use crate::constraint::Recorder;
use crate::context;
use crate::diag::Origin;
use crate::external::External;
use crate::value::Value;

pub(crate) type RecomputeFn = Rc<dyn Fn(&[Value]) -> Value>;
type ShouldUpdate = Rc<dyn Fn(&Value, &Value) -> bool>;

/// A reactive cell. Cloning a `Node` clones the handle, not the cell.
pub struct Node {
	pub(crate) body: Rc<NodeBody>,
}

impl Clone for Node {
	fn clone(&self) -> Self {
		Node {
			body: self.body.clone(),
		}
	}
}

impl PartialEq for Node {
	fn eq(&self, other: &Self) -> bool {
		self.body.id == other.body.id
	}
}

impl Eq for Node {}

#[derive(Clone)]
pub(crate) enum Kind {
	Primitive,
	Object,
	Function,
	Remote(Rc<dyn External>),
	Reference(Rc<dyn External>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
	Eager,
	Debounce(u32),
	Delay(u32),
}

/// Construction options. `debounce` coalesces rapid re-triggers of this
/// node's recompute into one run after the quantum elapses; `delay` always
/// waits the full quantum from the first trigger. Quanta are scheduler ticks.
pub struct Options {
	pub debounce: Option<u32>,
	pub delay: Option<u32>,
	pub name: &'static str,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			debounce: None,
			delay: None,
			name: "<unnamed>",
		}
	}
}

pub(crate) struct NodeBody {
	pub(crate) id: u64,
	pub(crate) name: &'static str,
	pub(crate) location: &'static Location<'static>,
	pub(crate) kind: Kind,
	pub(crate) mode: Mode,
	cached: RefCell<Value>,
	state: RefCell<Value>,
	inner: RefCell<NodeInner>,
}

struct NodeInner {
	dependents: SmallVec<[(u64, Weak<NodeBody>); 4]>,
	registered: FxHashSet<u64>,
	should_update: ShouldUpdate,
	locked: bool,
	lock_origin: Option<Origin>,
	pending: VecDeque<PendingWrite>,
	creations: Vec<Node>,
	recompute: Option<RecomputeFn>,
	args: Vec<Value>,
	this: Weak<NodeBody>,
}

pub(crate) struct PendingWrite {
	key: String,
	value: Value,
	prev: Value,
	recorder: Option<Recorder>,
	origin: Origin,
}

impl Node {
	/// Wrap a value. A handle passed in is returned unchanged (cells are
	/// never re-wrapped), a map or list becomes an object cell shared by
	/// reference, anything else becomes a primitive cell boxing the scalar.
	#[track_caller]
	pub fn new(value: impl Into<Value>) -> Node {
		Node::new_with(value, Options::default())
	}

	#[track_caller]
	pub fn new_with(value: impl Into<Value>, options: Options) -> Node {
		let value = match value.into() {
			Value::Handle(node) => return node,
			value => value,
		};
		if let Some(Some(memoized)) = context::next_memoized() {
			return memoized;
		}
		let kind = match value {
			Value::Map(_) | Value::List(_) => Kind::Object,
			_ => Kind::Primitive,
		};
		build(kind, value.clone(), value, None, Vec::new(), options, Location::caller())
	}

	/// Wrap a reactive expression. The closure runs once immediately, inside
	/// a fresh creation frame, and every cell it reads records this node as a
	/// dependent.
	#[track_caller]
	pub fn compute(func: impl Fn() -> Value + 'static) -> Node {
		Node::compute_with(func, Options::default())
	}

	#[track_caller]
	pub fn compute_with(func: impl Fn() -> Value + 'static, options: Options) -> Node {
		let func: RecomputeFn = Rc::new(move |_args| func());
		construct_function(func, Vec::new(), options, Location::caller())
	}

	#[track_caller]
	pub fn remote(external: Rc<dyn External>) -> Node {
		build(
			Kind::Remote(external),
			Value::Null,
			Value::Null,
			None,
			Vec::new(),
			Options::default(),
			Location::caller(),
		)
	}

	#[track_caller]
	pub fn reference(external: Rc<dyn External>) -> Node {
		build(
			Kind::Reference(external),
			Value::Null,
			Value::Null,
			None,
			Vec::new(),
			Options::default(),
			Location::caller(),
		)
	}

	pub fn id(&self) -> u64 {
		self.body.id
	}

	pub fn name(&self) -> &'static str {
		self.body.name
	}

	pub fn origin(&self) -> Origin {
		self.body.origin()
	}

	/// Unbox the current cached value, registering the read.
	pub fn get(&self) -> Value {
		context::track_read(&self.body);
		self.body.unbox()
	}

	/// Unbox without dependency registration.
	pub fn get_once(&self) -> Value {
		self.body.unbox()
	}

	pub fn get_key(&self, key: &str) -> Value {
		context::track_read(&self.body);
		match &self.body.kind {
			Kind::Remote(external) => external.get(key),
			Kind::Reference(external) => {
				if external.resolved() {
					external.get(key)
				} else {
					Value::Null
				}
			}
			_ => self.body.current(key),
		}
	}

	pub fn index(&self, index: usize) -> Value {
		context::track_read(&self.body);
		match &*self.body.state.borrow() {
			Value::List(list) => list.borrow().get(index).cloned().unwrap_or(Value::Null),
			_ => Value::Null,
		}
	}

	/// Explicit invocation. With no arguments this is an unbox; a function
	/// cell called with arguments re-runs its recompute against them.
	pub fn invoke(&self, args: &[Value]) -> Value {
		context::track_read(&self.body);
		match &self.body.kind {
			Kind::Remote(external) => {
				if external.resolved() {
					external.invoke(args)
				} else {
					Value::Handle(self.clone())
				}
			}
			Kind::Reference(external) => {
				if external.resolved() {
					external.invoke(args)
				} else {
					Value::Absent
				}
			}
			Kind::Function if !args.is_empty() => {
				self.body.replace_args(args.to_vec());
				refresh(&self.body);
				self.body.cached.borrow().clone()
			}
			_ => self.body.unbox(),
		}
	}

	/// Whole-cell write: primitives replace their scalar, a map argument is
	/// merged key by key.
	#[track_caller]
	pub fn set(&self, value: impl Into<Value>) {
		let value = value.into();
		match (&self.body.kind, &value) {
			(Kind::Primitive, _) => write(self, "_", value),
			(_, Value::Map(map)) => {
				let entries = map
					.borrow()
					.iter()
					.map(|(k, v)| (k.clone(), v.clone()))
					.collect::<Vec<_>>();
				for (key, item) in entries {
					write(self, &key, item);
				}
			}
			_ => write(self, "_", value),
		}
	}

	#[track_caller]
	pub fn set_key(&self, key: &str, value: impl Into<Value>) {
		write(self, key, value.into());
	}

	/// Notify dependents without a value change. Integration point for
	/// externals: remote resolution, reference focus/input events.
	pub fn touch(&self) {
		propagate(&self.body);
	}

	/// Replace the change predicate gating writes and recomputes.
	pub fn set_should_update(&self, func: impl Fn(&Value, &Value) -> bool + 'static) {
		self.body.inner.borrow_mut().should_update = Rc::new(func);
	}

	pub fn is_remote(&self) -> bool {
		matches!(self.body.kind, Kind::Remote(_))
	}

	pub fn is_reference(&self) -> bool {
		matches!(self.body.kind, Kind::Reference(_))
	}

	pub fn is_resolved(&self) -> bool {
		match &self.body.kind {
			Kind::Remote(external) | Kind::Reference(external) => external.resolved(),
			_ => true,
		}
	}

	pub fn is_locked(&self) -> bool {
		self.body.inner.borrow().locked
	}

	pub(crate) fn lock(&self, origin: Origin) {
		let mut inner = self.body.inner.borrow_mut();
		if !inner.locked {
			inner.lock_origin = Some(origin);
		}
		inner.locked = true;
	}

	/// Unlock and replay exactly the oldest deferred write, if any. A
	/// replayed constraint write re-locks the cell on behalf of the
	/// constraint that queued it and re-records into its capture list.
	pub(crate) fn unlock(&self) {
		let replay = {
			let mut inner = self.body.inner.borrow_mut();
			let was_locked = inner.locked;
			inner.locked = false;
			inner.lock_origin = None;
			if was_locked {
				inner.pending.pop_front()
			} else {
				None
			}
		};
		if let Some(pending) = replay {
			write(self, &pending.key, pending.value);
			if let Some(recorder) = pending.recorder {
				self.lock(pending.origin);
				recorder.record(self, &pending.key, pending.prev);
			}
		}
	}
}

impl Debug for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Node")
			.field("id", &self.body.id)
			.field("name", &self.body.name)
			.field("value", &self.body.cached.borrow())
			.finish()
	}
}

/// Wrap a plain value or an existing handle. Idempotent on handles.
#[track_caller]
pub fn construct(value: impl Into<Value>) -> Node {
	Node::new(value)
}

/// A parameterized reactive unit. Calling it outside any recompute
/// instantiates a fresh function cell; calling it during a recompute of the
/// enclosing creation reuses, by call order, the cell built on the first pass
/// and re-invokes it with the new arguments. Identity is positional, not
/// keyed: a pass that invokes a different number of children shifts every
/// index after the divergence point.
pub struct Template {
	func: RecomputeFn,
	name: &'static str,
}

impl Clone for Template {
	fn clone(&self) -> Self {
		Template {
			func: self.func.clone(),
			name: self.name,
		}
	}
}

impl Template {
	pub fn new(func: impl Fn(&[Value]) -> Value + 'static) -> Template {
		Template::named("<unnamed>", func)
	}

	pub fn named(name: &'static str, func: impl Fn(&[Value]) -> Value + 'static) -> Template {
		Template {
			func: Rc::new(func),
			name,
		}
	}

	#[track_caller]
	pub fn call(&self, args: Vec<Value>) -> Node {
		construct_function(
			self.func.clone(),
			args,
			Options {
				name: self.name,
				..Options::default()
			},
			Location::caller(),
		)
	}
}

fn construct_function(
	func: RecomputeFn,
	args: Vec<Value>,
	options: Options,
	location: &'static Location<'static>,
) -> Node {
	if let Some(slot) = context::next_memoized() {
		if let Some(child) = slot {
			child.body.replace_args(args);
			refresh(&child.body);
			return child;
		}
		// Cursor ran past the first pass's creations: this child is fresh
		// every pass and never acquires a stable identity.
	}
	build(
		Kind::Function,
		Value::Null,
		Value::map(),
		Some(func),
		args,
		options,
		location,
	)
}

fn build(
	kind: Kind,
	cached: Value,
	state: Value,
	recompute: Option<RecomputeFn>,
	args: Vec<Value>,
	options: Options,
	location: &'static Location<'static>,
) -> Node {
	let mode = if let Some(quantum) = options.debounce {
		Mode::Debounce(quantum)
	} else if let Some(quantum) = options.delay {
		Mode::Delay(quantum)
	} else {
		Mode::Eager
	};

	let body = Rc::new_cyclic(|this| NodeBody {
		id: context::next_id(),
		name: options.name,
		location,
		kind,
		mode,
		cached: RefCell::new(cached),
		state: RefCell::new(state),
		inner: RefCell::new(NodeInner {
			dependents: SmallVec::new(),
			registered: FxHashSet::default(),
			should_update: Rc::new(|prev, next| prev != next),
			locked: false,
			lock_origin: None,
			pending: VecDeque::new(),
			creations: Vec::new(),
			recompute,
			args,
			this: this.clone(),
		}),
	});

	// First evaluation of a function cell runs inside its own creation
	// frame, so every cell the closure reads records it as a dependent.
	if matches!(body.kind, Kind::Function) {
		context::push_creation(Rc::downgrade(&body));
		let first = body.run_recompute();
		context::pop_creation();
		*body.cached.borrow_mut() = first;
	}

	let node = Node { body };

	// A construction nested under another cell's first evaluation is
	// recorded there, in call order, for identity replay on later passes.
	if let Some(parent) = context::creation_top() {
		parent.inner.borrow_mut().creations.push(node.clone());
	}

	node
}

/// The write path. Computes the change predicate, routes through the
/// constraint recorder and the lock gate, then applies and propagates.
#[track_caller]
pub(crate) fn write(node: &Node, key: &str, value: Value) {
	let body = &node.body;

	if matches!(body.kind, Kind::Remote(_)) {
		panic!(
			"cannot assign through remote handle `{}` ({})",
			body.name, body.location
		);
	}

	let current = body.current(key);
	let update_needed = {
		let should = body.inner.borrow().should_update.clone();
		should(&current, &value)
	};

	let recorder = context::recorder();
	let locked = body.inner.borrow().locked;

	if let Some(recorder) = recorder.as_ref() {
		if !locked {
			recorder.record(node, key, current.clone());
		}
	}

	if locked {
		if update_needed {
			let origin = recorder.as_ref().map(|r| r.origin()).unwrap_or(Origin {
				name: "write",
				location: Location::caller(),
			});
			body.inner.borrow_mut().pending.push_back(PendingWrite {
				key: key.to_string(),
				value,
				prev: current,
				recorder,
				origin,
			});
			batch::watch(body);
		}
		return;
	}

	if update_needed {
		body.apply(key, value);
		propagate(body);
	}
}

/// Re-run a cell's recompute inside a fresh recompute frame (call cursor
/// reset to zero), then compare old and new through its own predicate and
/// propagate on change.
pub(crate) fn refresh(body: &Rc<NodeBody>) -> bool {
	context::push_recompute(body.clone());
	let next = body.run_recompute();
	context::pop_recompute();

	let prev = body.cached.borrow().clone();
	let changed = {
		let should = body.inner.borrow().should_update.clone();
		should(&prev, &next)
	};
	*body.cached.borrow_mut() = next;
	if changed {
		propagate(body);
	}
	changed
}

/// Notify dependents through the scheduler. The dependent list is snapshotted
/// first: a recompute may register new dependents on this very cell while the
/// batch runs. Pruning a dead dependent also releases its id from the
/// duplicate-registration set.
pub(crate) fn propagate(body: &Rc<NodeBody>) {
	let dependents = {
		let mut inner = body.inner.borrow_mut();
		let NodeInner {
			dependents,
			registered,
			..
		} = &mut *inner;
		dependents.retain(|(id, weak)| {
			if weak.upgrade().is_some() {
				true
			} else {
				registered.remove(id);
				false
			}
		});
		dependents.to_vec()
	};
	for (_, dependent) in dependents {
		if let Some(dependent) = dependent.upgrade() {
			batch::schedule(&dependent);
		}
	}
}

impl NodeBody {
	pub(crate) fn origin(&self) -> Origin {
		Origin {
			name: self.name,
			location: self.location,
		}
	}

	fn unbox(&self) -> Value {
		match &self.kind {
			Kind::Remote(external) => {
				if external.resolved() {
					external.invoke(&[])
				} else {
					Value::Handle(Node { body: self.this() })
				}
			}
			Kind::Reference(external) => {
				if external.resolved() {
					external.invoke(&[])
				} else {
					Value::Absent
				}
			}
			_ => self.cached.borrow().clone(),
		}
	}

	fn current(&self, key: &str) -> Value {
		match &self.kind {
			Kind::Primitive => self.cached.borrow().clone(),
			Kind::Object | Kind::Function => {
				let state = self.state.borrow();
				match &*state {
					Value::List(list) => key
						.parse::<usize>()
						.ok()
						.and_then(|i| list.borrow().get(i).cloned())
						.unwrap_or(Value::Null),
					other => other.key(key),
				}
			}
			Kind::Reference(external) => {
				if external.resolved() {
					external.get(key)
				} else {
					Value::Null
				}
			}
			Kind::Remote(_) => Value::Null,
		}
	}

	fn apply(&self, key: &str, value: Value) {
		match &self.kind {
			Kind::Primitive => {
				*self.state.borrow_mut() = value.clone();
				*self.cached.borrow_mut() = value;
			}
			Kind::Object | Kind::Function => {
				{
					let state = self.state.borrow();
					match &*state {
						Value::Map(map) => {
							map.borrow_mut().insert(key.to_string(), value);
						}
						Value::List(list) => {
							if let Ok(index) = key.parse::<usize>() {
								let mut list = list.borrow_mut();
								if index >= list.len() {
									list.resize(index + 1, Value::Null);
								}
								list[index] = value;
							}
						}
						_ => {}
					}
				}
				let state = self.state.borrow().clone();
				*self.cached.borrow_mut() = state;
			}
			Kind::Reference(external) => {
				if !external.assign(key, value) {
					panic!(
						"reference handle `{}` does not accept writes to `{}`",
						self.name, key
					);
				}
			}
			Kind::Remote(_) => unreachable!("remote handles reject writes"),
		}
	}

	fn run_recompute(&self) -> Value {
		let (func, args) = {
			let inner = self.inner.borrow();
			(inner.recompute.clone(), inner.args.clone())
		};
		match func {
			Some(func) => func(&args),
			None => self.state.borrow().clone(),
		}
	}

	pub(crate) fn register_dependent(&self, dependent: &Rc<NodeBody>) {
		let mut inner = self.inner.borrow_mut();
		if !inner.registered.insert(dependent.id) {
			return;
		}
		inner.dependents.push((dependent.id, Rc::downgrade(dependent)));
	}

	pub(crate) fn memoized_child(&self, index: usize) -> Option<Node> {
		self.inner.borrow().creations.get(index).cloned()
	}

	fn replace_args(&self, args: Vec<Value>) {
		self.inner.borrow_mut().args = args;
	}

	/// Report material for the pending-write watchdog: `None` when every
	/// deferred write has been resolved by the end of the tick.
	pub(crate) fn conflict_report(&self) -> Option<(Option<Origin>, Vec<Origin>)> {
		let inner = self.inner.borrow();
		if inner.pending.is_empty() {
			return None;
		}
		let pending = inner.pending.iter().map(|p| p.origin).collect();
		Some((inner.lock_origin, pending))
	}

	fn this(&self) -> Rc<NodeBody> {
		self.inner.borrow().this.upgrade().unwrap()
	}
}
