//! Metadata-only channel for unit tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_core::{Channel, CompNode, DType, Handle, OpDef, Result, Tensor, TensorShape};
use smallvec::{smallvec, SmallVec};

#[derive(Default)]
pub struct CountingChannel {
    next: AtomicU64,
    ops: AtomicUsize,
}

impl CountingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fresh(&self) -> Handle {
        Handle::from_raw(self.next.fetch_add(1, Ordering::Relaxed) + 1).unwrap()
    }

    pub fn tensor(self: &Arc<Self>) -> Tensor {
        Tensor::from_handle(self.fresh(), self.clone())
    }

    pub fn ops(&self) -> usize {
        self.ops.load(Ordering::Relaxed)
    }
}

impl Channel for CountingChannel {
    fn del(&self, _handle: Handle) {}

    fn get_dtype(&self, _handle: Handle) -> Result<DType> {
        Ok(DType::Float32)
    }

    fn get_device(&self, _handle: Handle) -> Result<CompNode> {
        Ok(CompNode::cpu(0))
    }

    fn get_shape(&self, _handle: Handle) -> Result<TensorShape> {
        Ok(TensorShape::scalar())
    }

    fn apply_op(&self, _op: &dyn OpDef, _inputs: &[Handle]) -> Result<SmallVec<[Handle; 8]>> {
        self.ops.fetch_add(1, Ordering::Relaxed);
        Ok(smallvec![self.fresh()])
    }
}
