//! Flag-driven `apply()` dispatch.
//!
//! A call resolves the union of its operands' flags (plus TRACE while
//! tracing), masks out whatever is disabled, and hands the call to the first
//! matching [`CapabilityHandler`]. Handlers re-enter through
//! [`Runtime::apply_suppressed`]; once no augmentation bit is left, the plain
//! path runs the operator on the channel or the graph builder.

mod context;
mod handler;
mod hooks;
mod runtime;
pub mod state;

use std::borrow::Borrow;

pub use context::{resolve_flags, ApplyContext, ApplyResult, HostType};
pub use handler::CapabilityHandler;
pub use hooks::{ApplyHook, HookKind, Hooks};
pub use runtime::{Runtime, RuntimeBuilder};
pub use state::{
    global_disable, is_compiled, is_tracing, set_compiled, set_tracing, CompiledScope,
    ScopedDisable, TracingScope,
};

use crate::tensor::Tensor;

#[doc(hidden)]
pub fn tensor_ref<T: Borrow<Tensor> + ?Sized>(tensor: &T) -> &Tensor {
    tensor.borrow()
}

/// Applies an operator to a fixed pack of tensors (owned or borrowed).
///
/// ```ignore
/// let out = apply!(rt, Elemwise::add(), a, b)?;
/// ```
#[macro_export]
macro_rules! apply {
    ($rt:expr, $op:expr $(, $arg:expr)* $(,)?) => {
        $rt.apply($op, &[$($crate::dispatch::tensor_ref(&$arg)),*])
    };
}
