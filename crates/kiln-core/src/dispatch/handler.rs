use crate::tensor::Flags;
use crate::Result;

use super::context::{ApplyContext, ApplyResult};
use super::runtime::Runtime;

/// An augmented execution strategy layered over plain dispatch.
///
/// The runtime hands a call to the first handler, in ascending
/// [`priority`](CapabilityHandler::priority), whose capability survives the
/// disabled mask. A handler reaches the underlying computation by calling
/// [`Runtime::apply_suppressed`] with [`suppresses`](CapabilityHandler::suppresses),
/// which keeps it from being selected again for the same call.
pub trait CapabilityHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bits that route a call to this handler.
    fn capability(&self) -> Flags;

    /// Bits masked while this handler re-enters dispatch.
    fn suppresses(&self) -> Flags {
        self.capability()
    }

    /// Lower runs first, and therefore wraps the handlers after it.
    fn priority(&self) -> i32;

    fn apply(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult>;
}
