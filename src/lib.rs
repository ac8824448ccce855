pub mod macros;

mod batch;
mod constraint;
mod context;
mod diag;
mod external;
mod node;
mod value;

pub use batch::{batch, drain, in_batch, tick};
pub use constraint::{constraint, constraint_named};
pub use diag::{take_diagnostics, Diagnostic, Origin};
pub use external::External;
pub use node::{construct, Node, Options, Template};
pub use value::Value;
