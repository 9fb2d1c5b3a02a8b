//! Host-facing tensor object used by language bindings.
//!
//! A binding keeps one `TensorWrapper` per host object. Clones of the wrapper
//! share the same underlying [`Tensor`], so flag changes made through one are
//! seen by all of them, while [`TensorWrapper::detach`] and `apply` results
//! get fresh tensors.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::channel::{Channel, OpRef};
use crate::comp_node::CompNode;
use crate::dispatch::{ApplyContext, HostType, Runtime};
use crate::dtype::DType;
use crate::error::KilnError;
use crate::graph::VarRef;
use crate::handle::{Handle, SharedHandle};
use crate::shape::TensorShape;
use crate::tensor::{Backing, BindingInfo, Tensor};
use crate::Result;

#[derive(Clone)]
pub struct TensorWrapper {
    tensor: Arc<RwLock<Tensor>>,
    host_type: Option<HostType>,
}

impl TensorWrapper {
    pub fn new(tensor: Tensor) -> Self {
        Self {
            tensor: Arc::new(RwLock::new(tensor)),
            host_type: None,
        }
    }

    pub fn with_host_type(tensor: Tensor, host_type: Option<HostType>) -> Self {
        Self {
            tensor: Arc::new(RwLock::new(tensor)),
            host_type,
        }
    }

    pub fn host_type(&self) -> Option<HostType> {
        self.host_type
    }

    pub fn tensor(&self) -> RwLockReadGuard<'_, Tensor> {
        self.tensor.read_recursive()
    }

    pub fn tensor_mut(&self) -> RwLockWriteGuard<'_, Tensor> {
        self.tensor.write()
    }

    /// Shallow copy of the current tensor state.
    pub fn snapshot(&self) -> Tensor {
        self.tensor().copy()
    }

    /// Number of wrappers sharing this tensor.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.tensor)
    }

    pub fn shape(&self) -> Result<TensorShape> {
        self.tensor().shape()
    }

    pub fn dtype(&self) -> Result<DType> {
        self.tensor().dtype()
    }

    pub fn device(&self) -> Result<CompNode> {
        self.tensor().comp_node()
    }

    pub fn is_scalar(&self) -> bool {
        self.tensor().is_scalar()
    }

    pub fn set_scalar(&self, scalar: bool) {
        self.tensor_mut().set_scalar(scalar);
    }

    /// New wrapper over a gradient-free copy of this tensor.
    pub fn detach(&self) -> TensorWrapper {
        Self::with_host_type(self.tensor().detach(), self.host_type)
    }

    /// Makes this wrapper share `other`'s tensor.
    pub fn reset(&mut self, other: &TensorWrapper) {
        self.tensor = Arc::clone(&other.tensor);
    }

    // =========================================================================
    // Backing
    // =========================================================================

    pub fn handle(&self) -> Option<Handle> {
        self.tensor().handle()
    }

    pub fn shared_handle(&self) -> Option<SharedHandle> {
        self.tensor().shared_handle().cloned()
    }

    /// Rebinds the tensor to an eager value, keeping flags and metadata.
    pub fn set_handle(&self, handle: SharedHandle) {
        let backing = if handle.is_null() {
            Backing::Empty
        } else {
            Backing::Eager(handle)
        };
        self.tensor_mut().set_backing(backing);
    }

    pub fn var_node(&self) -> Option<VarRef> {
        self.tensor().var().cloned()
    }

    /// Forgets the graph variable, leaving a symbolic tensor empty.
    pub fn reset_var_node(&self) {
        let mut tensor = self.tensor_mut();
        if tensor.is_symbolic() {
            tensor.set_backing(Backing::Empty);
        }
    }

    // =========================================================================
    // Trace metadata
    // =========================================================================

    pub fn mixin_handle(&self) -> Option<u64> {
        self.tensor().trace_info().mixin_handle
    }

    pub fn set_mixin_handle(&self, mixin_handle: Option<u64>) {
        self.tensor_mut().trace_info_mut().mixin_handle = mixin_handle;
    }

    pub fn recording(&self) -> bool {
        self.tensor().trace_info().recording
    }

    pub fn set_recording(&self, recording: bool) {
        self.tensor_mut().trace_info_mut().recording = recording;
    }

    pub fn copied(&self) -> bool {
        self.tensor().trace_info().copied
    }

    pub fn set_copied(&self, copied: bool) {
        self.tensor_mut().trace_info_mut().copied = copied;
    }

    /// Replay state a host trace layer attached to this value.
    pub fn compiled_info(&self) -> Option<BindingInfo> {
        self.tensor().trace_info().compiled_info.clone()
    }

    pub fn set_compiled_info(&self, info: Option<BindingInfo>) {
        self.tensor_mut().trace_info_mut().compiled_info = info;
    }

    pub fn trace_mixin_info(&self) -> Option<BindingInfo> {
        self.tensor().trace_info().trace_mixin_info.clone()
    }

    pub fn set_trace_mixin_info(&self, info: Option<BindingInfo>) {
        self.tensor_mut().trace_info_mut().trace_mixin_info = info;
    }

    // =========================================================================
    // Value residency
    // =========================================================================

    pub fn swap_in(&self) -> Result<()> {
        self.with_channel(|c, h| c.swap_in(h))
    }

    pub fn swap_out(&self) -> Result<()> {
        self.with_channel(|c, h| c.swap_out(h))
    }

    pub fn drop_value(&self) -> Result<()> {
        self.with_channel(|c, h| c.drop_value(h))
    }

    fn with_channel(&self, f: impl FnOnce(&dyn Channel, Handle) -> Result<()>) -> Result<()> {
        let shared = self.shared_handle().ok_or(KilnError::NotMaterialized)?;
        match (shared.channel(), shared.get()) {
            (Some(channel), Some(handle)) => f(channel.as_ref(), handle),
            _ => Err(KilnError::NotMaterialized),
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Applies `op` to the wrapped tensors. Results are wrapped with the host
    /// type of the first argument that has one.
    ///
    /// Arguments are snapshotted first, so no wrapper lock is held while
    /// handlers and hooks run; they may freely update any argument wrapper.
    pub fn apply(rt: &Runtime, op: OpRef, args: &[&TensorWrapper]) -> Result<Vec<TensorWrapper>> {
        let snapshots: SmallVec<[Tensor; 8]> = args.iter().map(|w| w.snapshot()).collect();
        let tensors: SmallVec<[&Tensor; 8]> = snapshots.iter().collect();

        let mut ctx = ApplyContext::new(op, &tensors);
        ctx.output_type = args.iter().find_map(|w| w.host_type);
        let outputs = rt.apply_ctx(&mut ctx)?;
        let output_type = ctx.output_type;

        Ok(outputs
            .into_iter()
            .map(|t| Self::with_host_type(t, output_type))
            .collect())
    }
}

impl From<Tensor> for TensorWrapper {
    fn from(tensor: Tensor) -> Self {
        Self::new(tensor)
    }
}

impl fmt::Debug for TensorWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorWrapper")
            .field("tensor", &*self.tensor())
            .field("host_type", &self.host_type)
            .field("use_count", &self.use_count())
            .finish()
    }
}
