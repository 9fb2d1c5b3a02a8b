//! Execution channel and operator descriptor interfaces.
//!
//! The channel owns device values and runs operators on them. Everything in
//! this crate talks to it through [`Handle`]s only.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::comp_node::CompNode;
use crate::dtype::DType;
use crate::handle::Handle;
use crate::shape::TensorShape;
use crate::Result;

/// Operator descriptor handed to `apply()`.
///
/// The dispatch layer only needs a name for logging and tracing; backends
/// recover the concrete type through [`OpDef::as_any`].
pub trait OpDef: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

pub type OpRef = Arc<dyn OpDef>;

/// Backend that owns device-resident values and executes operators.
///
/// `del` is called at most once per handle, from whichever thread drops the
/// last owning [`SharedHandle`](crate::SharedHandle).
pub trait Channel: Send + Sync {
    fn name(&self) -> &str {
        "channel"
    }

    /// Releases a handle previously produced by this channel.
    fn del(&self, handle: Handle);

    fn get_dtype(&self, handle: Handle) -> Result<DType>;

    fn get_device(&self, handle: Handle) -> Result<CompNode>;

    fn get_shape(&self, handle: Handle) -> Result<TensorShape>;

    /// Executes `op`. Output arity is decided by the backend, and every
    /// returned handle is owned by the caller.
    fn apply_op(&self, op: &dyn OpDef, inputs: &[Handle]) -> Result<SmallVec<[Handle; 8]>>;

    /// Brings a swapped-out value back to device memory.
    fn swap_in(&self, _handle: Handle) -> Result<()> {
        Ok(())
    }

    /// Moves a value out of device memory while keeping the handle valid.
    fn swap_out(&self, _handle: Handle) -> Result<()> {
        Ok(())
    }

    /// Discards the value behind a handle but keeps its metadata queryable.
    fn drop_value(&self, _handle: Handle) -> Result<()> {
        Ok(())
    }
}
