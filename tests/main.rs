use std::cell::{Cell, RefCell};
use std::rc::Rc;

use filament::macros::enclose;
use filament::{
	batch, constraint, construct, drain, take_diagnostics, tick, Diagnostic, External, Node,
	Options, Template, Value,
};

mod mock;

use mock::{SharedWatcher, Watcher};

#[test]
fn write_then_read() {
	let p = construct(1);
	assert_eq!(p.get_once(), Value::Int(1));

	p.set(5);
	assert_eq!(p.get_once(), Value::Int(5));
}

#[test]
fn computed_tracks_object_key() {
	let obj = construct(Value::map_from([("value", 0)]));
	let doubled = filament::compute!((obj) => {
		Value::Int(obj.get_key("value").as_int().unwrap_or(0) * 2)
	});

	assert_eq!(doubled.get_once(), Value::Int(0));

	obj.set_key("value", 3);
	drain();

	assert_eq!(doubled.get_once(), Value::Int(6));
}

#[test]
fn diamond_recomputes_sink_once() {
	let a = construct(1);
	let b = filament::compute!((a) => {
		Value::Int(a.get().as_int().unwrap_or(0) + 1)
	});
	let c = filament::compute!((a) => {
		Value::Int(a.get().as_int().unwrap_or(0) + 2)
	});

	let runs = Rc::new(Cell::new(0));
	let d = Node::compute(enclose!((b, c, runs) move || {
		runs.set(runs.get() + 1);
		Value::Int(b.get().as_int().unwrap_or(0) + c.get().as_int().unwrap_or(0))
	}));

	assert_eq!(runs.get(), 1);
	assert_eq!(d.get_once(), Value::Int(5));

	a.set(10);
	drain();

	assert_eq!(runs.get(), 2);
	assert_eq!(d.get_once(), Value::Int(23));
}

#[test]
fn idempotent_write_is_a_noop() {
	let a = construct(10);

	let mock = SharedWatcher::new();
	mock.get().expect_changed().times(1).return_const(());

	let watcher = Node::compute(enclose!((a, mock) move || {
		let value = a.get().as_int().unwrap_or(0);
		mock.get().changed(value);
		Value::Int(value)
	}));

	mock.get().checkpoint();

	mock.get().expect_changed().times(0).return_const(());
	batch(enclose!((a) move || {
		a.set(10);
		a.set(10);
	}));
	mock.get().checkpoint();

	mock.get().expect_changed().times(1).return_const(());
	batch(enclose!((a) move || {
		a.set(20);
		a.set(20);
	}));
	mock.get().checkpoint();

	assert_eq!(watcher.get_once(), Value::Int(20));
}

#[test]
fn loop_guard_terminates_with_diagnostic() {
	let _ = take_diagnostics();

	let a = construct(0);
	let runs = Rc::new(Cell::new(0));
	let _looper = Node::compute(enclose!((a, runs) move || {
		runs.set(runs.get() + 1);
		let value = a.get().as_int().unwrap_or(0);
		a.set(value + 1);
		Value::Int(value)
	}));

	drain();

	let diags = take_diagnostics();
	assert!(diags
		.iter()
		.any(|d| matches!(d, Diagnostic::PropagationLoop { .. })));
	// Creation plus a single aborted batch, not unbounded recursion.
	assert_eq!(runs.get(), 2);
}

#[test]
fn debounced_loop_terminates_with_diagnostic() {
	let _ = take_diagnostics();

	let a = construct(0);
	let runs = Rc::new(Cell::new(0));
	let _looper = Node::compute_with(
		enclose!((a, runs) move || {
			runs.set(runs.get() + 1);
			let value = a.get().as_int().unwrap_or(0);
			a.set(value + 1);
			Value::Int(value)
		}),
		Options {
			debounce: Some(1),
			..Options::default()
		},
	);

	drain();

	let diags = take_diagnostics();
	assert!(diags
		.iter()
		.any(|d| matches!(d, Diagnostic::PropagationLoop { .. })));
	// The timer never re-arms from the cell's own recompute, so the drain
	// settles after the one deferred run.
	assert_eq!(runs.get(), 2);
}

#[test]
fn constraint_forces_and_restores() {
	let _ = take_diagnostics();

	let x = construct(1);
	let flag = construct(false);

	let _rule = constraint(
		enclose!((flag) move || flag.get().is_truthy()),
		enclose!((x) move || x.set(5)),
		None,
	);

	assert_eq!(x.get_once(), Value::Int(1));

	flag.set(true);
	drain();

	assert_eq!(x.get_once(), Value::Int(5));
	assert!(x.is_locked());

	// An external write against the locked cell is deferred, not applied.
	x.set(9);
	assert_eq!(x.get_once(), Value::Int(5));

	flag.set(false);
	drain();

	// Unlock replays the deferred write, then restoration wins.
	assert_eq!(x.get_once(), Value::Int(1));
	assert!(!x.is_locked());
	assert!(take_diagnostics()
		.iter()
		.all(|d| !matches!(d, Diagnostic::ConflictingConstraints { .. })));
}

#[test]
fn conflicting_constraints_are_reported() {
	let _ = take_diagnostics();

	let x = construct(0);
	let first = construct(false);
	let second = construct(false);

	let _rule_one = constraint(
		enclose!((first) move || first.get().is_truthy()),
		enclose!((x) move || x.set(1)),
		None,
	);
	let _rule_two = constraint(
		enclose!((second) move || second.get().is_truthy()),
		enclose!((x) move || x.set(2)),
		None,
	);

	first.set(true);
	drain();
	assert_eq!(x.get_once(), Value::Int(1));

	second.set(true);
	drain();

	// The first constraint still holds the cell; the second's write is stuck
	// pending past the tick, which is the conflict.
	assert_eq!(x.get_once(), Value::Int(1));
	assert!(take_diagnostics()
		.iter()
		.any(|d| matches!(d, Diagnostic::ConflictingConstraints { .. })));

	// Releasing the first constraint hands the cell to the second.
	first.set(false);
	drain();
	assert_eq!(x.get_once(), Value::Int(2));
	assert!(x.is_locked());

	second.set(false);
	drain();
	assert!(!x.is_locked());
	assert_eq!(x.get_once(), Value::Int(1));
}

#[test]
fn memoized_child_keeps_identity_across_passes() {
	let seen = Rc::new(RefCell::new(Vec::new()));
	let source = construct(1);
	let item = Template::new(|args| args.first().cloned().unwrap_or(Value::Null));

	let parent = Node::compute(enclose!((source, item, seen) move || {
		let value = source.get();
		let child = item.call(vec![value]);
		seen.borrow_mut().push(child.id());
		child.get_once()
	}));

	source.set(2);
	drain();

	let seen = seen.borrow();
	assert_eq!(seen.len(), 2);
	assert_eq!(seen[0], seen[1]);
	assert_eq!(parent.get_once(), Value::Int(2));
}

#[test]
fn template_outside_recompute_is_fresh_each_call() {
	let item = Template::new(|args| args.first().cloned().unwrap_or(Value::Null));
	let a = item.call(vec![Value::Int(1)]);
	let b = item.call(vec![Value::Int(1)]);
	assert_ne!(a, b);
	assert_eq!(a.get_once(), b.get_once());
}

#[test]
fn construct_is_idempotent_on_handles() {
	let a = construct(3);
	let b = construct(a.clone());
	assert_eq!(a, b);
}

#[test]
fn custom_should_update_gates_writes() {
	let a = construct(1);
	a.set_should_update(|_, _| false);

	let runs = Rc::new(Cell::new(0));
	let _watcher = Node::compute(enclose!((a, runs) move || {
		runs.set(runs.get() + 1);
		a.get()
	}));

	a.set(5);
	drain();

	assert_eq!(a.get_once(), Value::Int(1));
	assert_eq!(runs.get(), 1);
}

#[test]
fn debounce_coalesces_rapid_writes() {
	let a = construct(0);
	let runs = Rc::new(Cell::new(0));
	let d = Node::compute_with(
		enclose!((a, runs) move || {
			runs.set(runs.get() + 1);
			a.get()
		}),
		Options {
			debounce: Some(2),
			..Options::default()
		},
	);

	a.set(1);
	tick();
	a.set(2);
	tick();
	tick();
	assert_eq!(runs.get(), 1);

	tick();
	assert_eq!(runs.get(), 2);
	assert_eq!(d.get_once(), Value::Int(2));
}

#[test]
fn delay_fires_once_after_fixed_quantum() {
	let a = construct(0);
	let runs = Rc::new(Cell::new(0));
	let d = Node::compute_with(
		enclose!((a, runs) move || {
			runs.set(runs.get() + 1);
			a.get()
		}),
		Options {
			delay: Some(2),
			..Options::default()
		},
	);

	a.set(1);
	a.set(2);
	tick();
	tick();
	assert_eq!(runs.get(), 1);

	tick();
	assert_eq!(runs.get(), 2);
	assert_eq!(d.get_once(), Value::Int(2));
}

#[test]
fn dropped_dependents_are_not_recomputed() {
	let a = construct(0);
	let runs = Rc::new(Cell::new(0));
	{
		let _watcher = Node::compute(enclose!((a, runs) move || {
			runs.set(runs.get() + 1);
			a.get()
		}));
	}

	a.set(1);
	drain();

	assert_eq!(runs.get(), 1);
}

#[test]
fn object_cells_share_storage_by_reference() {
	let shared = Value::map_from([("count", 1)]);
	let node = construct(shared.clone());

	node.set_key("count", 2);
	drain();

	assert_eq!(shared.key("count"), Value::Int(2));
}

#[test]
fn absent_reads_chain_and_render_empty() {
	let absent = Value::Absent.key("missing").index(3).invoke(&[]);
	assert!(absent.is_absent());
	assert_eq!(format!("{}", absent), "");
}

#[test]
fn values_render_as_display_text() {
	assert_eq!(Value::from(true).to_string(), "true");
	assert_eq!(Value::from(7).to_string(), "7");
	assert_eq!(Value::from(1.5).to_string(), "1.5");
	assert_eq!(Value::from("hi").to_string(), "hi");
	assert_eq!(Value::Null.to_string(), "");
	assert_eq!(
		Value::list(vec![Value::Int(1), Value::Int(2)]).to_string(),
		"1,2"
	);
	assert_eq!(Value::Handle(construct(3)).to_string(), "3");
}

struct FakeRemote {
	resolved: Cell<bool>,
	value: RefCell<Value>,
}

impl External for FakeRemote {
	fn resolved(&self) -> bool {
		self.resolved.get()
	}

	fn get(&self, key: &str) -> Value {
		self.value.borrow().key(key)
	}

	fn invoke(&self, _args: &[Value]) -> Value {
		self.value.borrow().clone()
	}
}

#[test]
fn remote_leaf_resolves_and_notifies() {
	let ext = Rc::new(FakeRemote {
		resolved: Cell::new(false),
		value: RefCell::new(Value::Null),
	});
	let leaf = Node::remote(ext.clone());

	assert!(leaf.is_remote());
	assert!(!leaf.is_resolved());

	// Unresolved reads keep chaining through the handle itself.
	let unresolved = leaf.get_once();
	assert_eq!(unresolved.as_node().map(|n| n.id()), Some(leaf.id()));

	let view = filament::compute!((leaf) => { leaf.get() });

	ext.resolved.set(true);
	*ext.value.borrow_mut() = Value::Int(7);
	leaf.touch();
	drain();

	assert!(leaf.is_resolved());
	assert_eq!(view.get_once(), Value::Int(7));
}

#[test]
#[should_panic(expected = "remote handle")]
fn remote_leaf_rejects_assignment() {
	let ext = Rc::new(FakeRemote {
		resolved: Cell::new(false),
		value: RefCell::new(Value::Null),
	});
	let leaf = Node::remote(ext);
	leaf.set_key("anything", 1);
}

struct FakeInput {
	resolved: Cell<bool>,
	value: RefCell<Value>,
}

impl External for FakeInput {
	fn resolved(&self) -> bool {
		self.resolved.get()
	}

	fn get(&self, key: &str) -> Value {
		if key == "value" {
			self.value.borrow().clone()
		} else {
			Value::Null
		}
	}

	fn invoke(&self, _args: &[Value]) -> Value {
		self.value.borrow().clone()
	}

	fn assign(&self, key: &str, value: Value) -> bool {
		if key == "value" {
			*self.value.borrow_mut() = value;
			true
		} else {
			false
		}
	}
}

#[test]
fn reference_leaf_delegates_reads_and_writes() {
	let ext = Rc::new(FakeInput {
		resolved: Cell::new(false),
		value: RefCell::new(Value::from("a")),
	});
	let input = Node::reference(ext.clone());

	assert!(input.is_reference());
	assert!(input.get_once().is_absent());

	ext.resolved.set(true);
	assert_eq!(input.get_key("value"), Value::from("a"));

	input.set_key("value", "b");
	drain();
	assert_eq!(input.get_key("value"), Value::from("b"));
}

#[test]
#[should_panic(expected = "does not accept writes")]
fn reference_leaf_rejects_unknown_assignment() {
	let ext = Rc::new(FakeInput {
		resolved: Cell::new(true),
		value: RefCell::new(Value::from("a")),
	});
	let input = Node::reference(ext);
	input.set_key("disabled", true);
}
