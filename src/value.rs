use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::node::Node;

/// The dynamic value every cell traffics in.
///
/// Structured values (`List`, `Map`) are wrapped by reference and compare by
/// pointer identity; scalars compare by value. `Absent` is the null
/// placeholder: chained reads and invocations on it are safe no-ops, and it
/// renders as the empty string.
#[derive(Clone)]
pub enum Value {
	Absent,
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Rc<str>),
	List(Rc<RefCell<Vec<Value>>>),
	Map(Rc<RefCell<FxHashMap<String, Value>>>),
	Handle(Node),
}

impl Value {
	pub fn list(items: Vec<Value>) -> Value {
		Value::List(Rc::new(RefCell::new(items)))
	}

	pub fn map() -> Value {
		Value::Map(Rc::new(RefCell::new(FxHashMap::default())))
	}

	pub fn map_from<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
	where
		K: Into<String>,
		V: Into<Value>,
	{
		let map = entries
			.into_iter()
			.map(|(k, v)| (k.into(), v.into()))
			.collect::<FxHashMap<String, Value>>();
		Value::Map(Rc::new(RefCell::new(map)))
	}

	/// Property read. On a `Map` this is a key lookup, on a handle it
	/// delegates (and registers the read), on `Absent` it chains.
	pub fn key(&self, key: &str) -> Value {
		match self {
			Value::Absent => Value::Absent,
			Value::Map(map) => map.borrow().get(key).cloned().unwrap_or(Value::Null),
			Value::Handle(node) => node.get_key(key),
			_ => Value::Null,
		}
	}

	pub fn index(&self, index: usize) -> Value {
		match self {
			Value::Absent => Value::Absent,
			Value::List(list) => list.borrow().get(index).cloned().unwrap_or(Value::Null),
			Value::Handle(node) => node.index(index),
			_ => Value::Null,
		}
	}

	/// Invocation. Only handles and the null placeholder are callable;
	/// calling anything else is a programmer error.
	pub fn invoke(&self, args: &[Value]) -> Value {
		match self {
			Value::Absent => Value::Absent,
			Value::Handle(node) => node.invoke(args),
			other => panic!("value {:?} is not callable", other),
		}
	}

	pub fn is_absent(&self) -> bool {
		matches!(self, Value::Absent)
	}

	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Absent | Value::Null => false,
			Value::Bool(b) => *b,
			Value::Int(i) => *i != 0,
			Value::Float(f) => *f != 0.0,
			Value::Str(s) => !s.is_empty(),
			Value::List(_) | Value::Map(_) | Value::Handle(_) => true,
		}
	}

	pub fn as_node(&self) -> Option<&Node> {
		match self {
			Value::Handle(node) => Some(node),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Value::Int(i) => Some(*i as f64),
			Value::Float(f) => Some(*f),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(s) => Some(s),
			_ => None,
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Absent, Value::Absent) => true,
			(Value::Null, Value::Null) => true,
			(Value::Bool(a), Value::Bool(b)) => a == b,
			(Value::Int(a), Value::Int(b)) => a == b,
			(Value::Float(a), Value::Float(b)) => a == b,
			(Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
				*a as f64 == *b
			}
			(Value::Str(a), Value::Str(b)) => a == b,
			(Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
			(Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
			(Value::Handle(a), Value::Handle(b)) => a == b,
			_ => false,
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Int(v as i64)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Float(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Str(Rc::from(v))
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Str(Rc::from(v.as_str()))
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::list(v)
	}
}

impl From<Node> for Value {
	fn from(node: Node) -> Self {
		Value::Handle(node)
	}
}

impl std::fmt::Display for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Absent | Value::Null => Ok(()),
			Value::Bool(b) => write!(f, "{}", b),
			Value::Int(i) => write!(f, "{}", i),
			Value::Float(v) => write!(f, "{}", v),
			Value::Str(s) => write!(f, "{}", s),
			Value::List(list) => {
				let list = list.borrow();
				for (i, item) in list.iter().enumerate() {
					if i > 0 {
						write!(f, ",")?;
					}
					write!(f, "{}", item)?;
				}
				Ok(())
			}
			Value::Map(_) => write!(f, "[object]"),
			Value::Handle(node) => write!(f, "{}", node.get_once()),
		}
	}
}

impl Debug for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Value::Absent => write!(f, "Absent"),
			Value::Null => write!(f, "Null"),
			Value::Bool(b) => write!(f, "Bool({:?})", b),
			Value::Int(i) => write!(f, "Int({:?})", i),
			Value::Float(v) => write!(f, "Float({:?})", v),
			Value::Str(s) => write!(f, "Str({:?})", s),
			Value::List(list) => write!(f, "List({:?})", list.borrow()),
			Value::Map(map) => write!(f, "Map({:?})", map.borrow()),
			Value::Handle(node) => write!(f, "Handle(#{})", node.id()),
		}
	}
}
