use std::cell::RefCell;
use std::fmt;
use std::panic::Location;

/// Where a node or a constraint was declared. Stored at construction and
/// echoed in diagnostics, so a report can point back at source.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Origin {
	pub name: &'static str,
	pub location: &'static Location<'static>,
}

impl fmt::Display for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} at {}", self.name, self.location)
	}
}

impl fmt::Debug for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// Developer diagnostics. These are reported, never raised: a violating edge
/// or write is dropped locally and the scheduler keeps going.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
	/// A dependent was re-triggered after it already finished its recompute
	/// within the same batch.
	PropagationLoop { origin: Origin },
	/// A node still holds unapplied pending writes past the end of a tick,
	/// which means two or more constraints disagree about its value.
	ConflictingConstraints {
		locker: Option<Origin>,
		pending: Vec<Origin>,
	},
}

thread_local! {
	static SINK: RefCell<Vec<Diagnostic>> = RefCell::new(Vec::new());
}

pub(crate) fn emit(diag: Diagnostic) {
	match &diag {
		Diagnostic::PropagationLoop { origin } => {
			tracing::error!(%origin, "propagation loop");
		}
		Diagnostic::ConflictingConstraints { locker, pending } => {
			tracing::error!(?locker, ?pending, "two or more constraints are conflicting");
		}
	}
	SINK.with(|sink| sink.borrow_mut().push(diag));
}

/// Drain every diagnostic reported on this thread so far.
pub fn take_diagnostics() -> Vec<Diagnostic> {
	SINK.with(|sink| std::mem::take(&mut *sink.borrow_mut()))
}
