use std::fmt;

use smallvec::SmallVec;

use crate::channel::OpRef;
use crate::tensor::{Flags, Tensor};

use super::state;

/// Result tensors of one `apply()` call, in operator output order.
pub type ApplyResult = SmallVec<[Tensor; 8]>;

/// Tag naming the host-side type results should be wrapped as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostType(pub &'static str);

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One operator invocation in flight.
///
/// Borrows its inputs for the duration of a single `apply()` call and cannot
/// outlive it.
pub struct ApplyContext<'a> {
    pub flags: Flags,
    pub op: OpRef,
    pub args: &'a [&'a Tensor],
    pub output_type: Option<HostType>,
    /// Set for calls issued by a backward pass.
    pub backward: bool,
}

impl<'a> ApplyContext<'a> {
    /// Builds a forward context with flags resolved from `args` and the
    /// current tracing indicator. The disabled mask is applied at dispatch.
    pub fn new(op: OpRef, args: &'a [&'a Tensor]) -> Self {
        Self {
            flags: resolve_flags(args.iter().copied(), state::is_tracing()),
            op,
            args,
            output_type: None,
            backward: false,
        }
    }

    pub fn with_output_type(mut self, output_type: HostType) -> Self {
        self.output_type = Some(output_type);
        self
    }

    pub fn with_backward(mut self, backward: bool) -> Self {
        self.backward = backward;
        self
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Debug for ApplyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyContext")
            .field("op", &self.op.name())
            .field("flags", &self.flags)
            .field("nargs", &self.args.len())
            .field("output_type", &self.output_type)
            .field("backward", &self.backward)
            .finish()
    }
}

/// Bitwise OR of the operands' flags, plus TRACE while tracing.
pub fn resolve_flags<'t>(args: impl IntoIterator<Item = &'t Tensor>, tracing: bool) -> Flags {
    let mut flags = if tracing { Flags::TRACE } else { Flags::empty() };
    for arg in args {
        flags |= arg.flags();
    }
    flags
}
