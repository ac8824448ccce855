use crate::value::Value;

/// A collaborator backing a remote or reference leaf.
///
/// The engine never looks inside these: a remote leaf stands for an
/// asynchronously resolved value (a query result), a reference leaf wraps a
/// host-owned mutable object (an attached UI element). Until `resolved`
/// returns true, unboxing a remote leaf yields the handle itself so reads can
/// keep chaining, and unboxing a reference leaf yields [`Value::Absent`].
///
/// When the backing value becomes available, the owner calls
/// [`Node::touch`](crate::Node::touch) to notify dependents.
pub trait External {
	fn resolved(&self) -> bool;

	/// Property read, delegated from [`Node::get_key`](crate::Node::get_key).
	fn get(&self, key: &str) -> Value;

	/// Invocation, delegated from unboxing and from
	/// [`Node::invoke`](crate::Node::invoke).
	fn invoke(&self, args: &[Value]) -> Value;

	/// Property write. Return `false` to refuse; a refused write through a
	/// reference leaf is a programmer error and panics at the write site.
	/// Remote leaves never receive this call, assignment through them is
	/// rejected outright.
	fn assign(&self, key: &str, value: Value) -> bool {
		let _ = (key, value);
		false
	}
}
