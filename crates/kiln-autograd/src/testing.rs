//! Scalar execution channel for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kiln_core::{
    Channel, CompNode, DType, ElemMode, Elemwise, Handle, KilnError, OpDef, Result, Runtime,
    Tensor, TensorShape,
};
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};

use crate::GradHandler;

#[derive(Default)]
pub struct ScalarChannel {
    next: AtomicU64,
    values: Mutex<HashMap<Handle, f32>>,
}

impl ScalarChannel {
    /// A channel plus a runtime with the default gradient handler.
    pub fn runtime() -> (Arc<Self>, Runtime) {
        let channel = Arc::new(Self::default());
        let rt = Runtime::builder(channel.clone())
            .handler(Arc::new(GradHandler::with_defaults()))
            .build();
        (channel, rt)
    }

    fn put(&self, value: f32) -> Handle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Handle::from_raw(raw).unwrap();
        self.values.lock().insert(handle, value);
        handle
    }

    pub fn tensor(self: &Arc<Self>, value: f32) -> Tensor {
        Tensor::from_handle(self.put(value), self.clone())
    }

    pub fn leaf(self: &Arc<Self>, value: f32) -> Tensor {
        let mut t = self.tensor(value);
        t.set_requires_grad(true);
        t
    }

    pub fn value(&self, tensor: &Tensor) -> f32 {
        self.values.lock()[&tensor.handle().unwrap()]
    }

    pub fn live(&self) -> usize {
        self.values.lock().len()
    }

    fn get(&self, handle: Handle) -> Result<f32> {
        self.values
            .lock()
            .get(&handle)
            .copied()
            .ok_or(KilnError::InvalidHandle(handle))
    }
}

impl Channel for ScalarChannel {
    fn del(&self, handle: Handle) {
        self.values.lock().remove(&handle);
    }

    fn get_dtype(&self, handle: Handle) -> Result<DType> {
        self.get(handle).map(|_| DType::Float32)
    }

    fn get_device(&self, handle: Handle) -> Result<CompNode> {
        self.get(handle).map(|_| CompNode::cpu(0))
    }

    fn get_shape(&self, handle: Handle) -> Result<TensorShape> {
        self.get(handle).map(|_| TensorShape::scalar())
    }

    fn apply_op(&self, op: &dyn OpDef, inputs: &[Handle]) -> Result<SmallVec<[Handle; 8]>> {
        let elem = Elemwise::downcast(op).ok_or_else(|| KilnError::UnsupportedOp {
            op: op.name().to_string(),
            backend: "scalar".into(),
        })?;
        let x = inputs
            .iter()
            .map(|&h| self.get(h))
            .collect::<Result<Vec<f32>>>()?;
        let y = match elem.mode {
            ElemMode::Add => x[0] + x[1],
            ElemMode::Sub => x[0] - x[1],
            ElemMode::Mul => x[0] * x[1],
            ElemMode::Neg => -x[0],
            ElemMode::Relu => x[0].max(0.0),
            ElemMode::SwitchGt0 => {
                if x[0] > 0.0 {
                    x[1]
                } else {
                    0.0
                }
            }
        };
        Ok(smallvec![self.put(y)])
    }
}
