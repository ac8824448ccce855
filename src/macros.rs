pub use enclose::*;

/// Build a function cell, cloning the listed handles into the closure.
///
/// ```ignore
/// let doubled = compute!((source) => {
///     Value::Int(source.get().as_int().unwrap_or(0) * 2)
/// });
/// ```
#[macro_export]
macro_rules! compute {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::Node::compute($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::Node::compute(move || { $($b)* })
    };
}

/// Run a block, cloning the listed handles into it, then drain propagation.
#[macro_export]
macro_rules! batch {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::batch($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::batch(move || { $($b)* })
    };
}
