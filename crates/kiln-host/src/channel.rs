//! In-process execution channel over f32 host buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_core::{
    Channel, CompNode, DType, Elemwise, Handle, KilnError, OpDef, Result, SumTo, Tensor,
    TensorShape,
};
use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use crate::kernels::{self, Operand};
use crate::storage::{HostValue, Residency};

/// Reference channel: values live in a handle-keyed map and `Elemwise`
/// operators run on the calling thread.
pub struct HostChannel {
    next: AtomicU64,
    values: RwLock<HashMap<Handle, HostValue>>,
    released: AtomicUsize,
    device: CompNode,
}

impl HostChannel {
    pub fn new() -> Arc<Self> {
        Self::on(CompNode::cpu(0))
    }

    /// Channel whose `put` values report `device`.
    pub fn on(device: CompNode) -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(1),
            values: RwLock::new(HashMap::new()),
            released: AtomicUsize::new(0),
            device,
        })
    }

    pub fn device(&self) -> CompNode {
        self.device
    }

    /// Stores a float32 value on this channel's device.
    pub fn put(&self, data: Vec<f32>, dims: &[usize]) -> Result<Handle> {
        self.put_with(data, TensorShape::new(dims), DType::Float32, self.device)
    }

    pub fn put_with(
        &self,
        data: Vec<f32>,
        shape: TensorShape,
        dtype: DType,
        device: CompNode,
    ) -> Result<Handle> {
        let value = HostValue::new(data, shape, dtype, device)?;
        self.insert(value)
    }

    fn insert(&self, value: HostValue) -> Result<Handle> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        let handle = Handle::from_raw(raw)
            .ok_or_else(|| KilnError::Backend("host handle space exhausted".into()))?;
        tracing::trace!(%handle, shape = %value.shape(), "host value stored");
        self.values.write().insert(handle, value);
        Ok(handle)
    }

    /// Stores a value and wraps it as a solely owned tensor.
    pub fn tensor(self: &Arc<Self>, data: Vec<f32>, dims: &[usize]) -> Result<Tensor> {
        let handle = self.put(data, dims)?;
        Ok(Tensor::from_handle(handle, self.clone()))
    }

    pub fn scalar(self: &Arc<Self>, value: f32) -> Result<Tensor> {
        let mut t = self.tensor(vec![value], &[])?;
        t.set_scalar(true);
        Ok(t)
    }

    /// Copy of the data behind `handle`.
    pub fn get_value(&self, handle: Handle) -> Result<Vec<f32>> {
        self.with_value(handle, |v| v.data().map(<[f32]>::to_vec))
    }

    /// Copy of the data behind an eager tensor.
    pub fn value_of(&self, tensor: &Tensor) -> Result<Vec<f32>> {
        let handle = tensor.handle().ok_or(KilnError::NotMaterialized)?;
        self.get_value(handle)
    }

    pub fn residency(&self, handle: Handle) -> Result<Residency> {
        self.with_value(handle, |v| Ok(v.residency()))
    }

    /// Number of values currently stored.
    pub fn live_handles(&self) -> usize {
        self.values.read().len()
    }

    /// Number of `del` calls received so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    fn with_value<T>(&self, handle: Handle, f: impl FnOnce(&HostValue) -> Result<T>) -> Result<T> {
        let values = self.values.read();
        let value = values.get(&handle).ok_or(KilnError::InvalidHandle(handle))?;
        f(value)
    }

    fn with_value_mut<T>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut HostValue) -> Result<T>,
    ) -> Result<T> {
        let mut values = self.values.write();
        let value = values
            .get_mut(&handle)
            .ok_or(KilnError::InvalidHandle(handle))?;
        f(value)
    }

    /// Metadata and shared buffers of `inputs`, read under one lock.
    fn gather(
        &self,
        inputs: &[Handle],
    ) -> Result<(SmallVec<[HostValue; 4]>, SmallVec<[Arc<Vec<f32>>; 4]>)> {
        let values = self.values.read();
        let mut metas = SmallVec::new();
        let mut datas = SmallVec::new();
        for &h in inputs {
            let value = values.get(&h).ok_or(KilnError::InvalidHandle(h))?;
            datas.push(value.shared_data()?);
            metas.push(value.clone());
        }
        Ok((metas, datas))
    }

    fn run_elemwise(&self, elem: &Elemwise, inputs: &[Handle]) -> Result<Handle> {
        let (metas, datas) = self.gather(inputs)?;
        let (dtype, device, shape) = kernels::infer(elem.mode, &operands(&metas))?;

        let slices: SmallVec<[&[f32]; 4]> = datas.iter().map(|d| d.as_slice()).collect();
        let out = kernels::elemwise(elem.mode, &slices, shape.total_nr_elems());
        self.put_with(out, shape, dtype, device)
    }

    fn run_sum_to(&self, op: &SumTo, inputs: &[Handle]) -> Result<Handle> {
        let (metas, datas) = self.gather(inputs)?;
        let (dtype, device, shape) = kernels::infer_sum_to(&operands(&metas), &op.shape)?;
        let out = kernels::sum_to(&datas[0], shape.total_nr_elems());
        self.put_with(out, shape, dtype, device)
    }
}

fn operands(metas: &[HostValue]) -> SmallVec<[Operand<'_>; 4]> {
    metas
        .iter()
        .map(|v| Operand {
            dtype: v.dtype(),
            device: v.device(),
            shape: v.shape(),
        })
        .collect()
}

impl Channel for HostChannel {
    fn name(&self) -> &str {
        "host"
    }

    fn del(&self, handle: Handle) {
        if self.values.write().remove(&handle).is_some() {
            self.released.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%handle, "host value released");
        } else {
            tracing::warn!(%handle, "release of unknown handle");
        }
    }

    fn get_dtype(&self, handle: Handle) -> Result<DType> {
        self.with_value(handle, |v| Ok(v.dtype()))
    }

    fn get_device(&self, handle: Handle) -> Result<CompNode> {
        self.with_value(handle, |v| Ok(v.device()))
    }

    fn get_shape(&self, handle: Handle) -> Result<TensorShape> {
        self.with_value(handle, |v| Ok(v.shape().clone()))
    }

    fn apply_op(&self, op: &dyn OpDef, inputs: &[Handle]) -> Result<SmallVec<[Handle; 8]>> {
        let out = if let Some(elem) = Elemwise::downcast(op) {
            self.run_elemwise(elem, inputs)?
        } else if let Some(sum) = SumTo::downcast(op) {
            self.run_sum_to(sum, inputs)?
        } else {
            return Err(KilnError::UnsupportedOp {
                op: op.name().to_string(),
                backend: self.name().to_string(),
            });
        };
        Ok(smallvec![out])
    }

    fn swap_in(&self, handle: Handle) -> Result<()> {
        self.with_value_mut(handle, HostValue::swap_in)
    }

    fn swap_out(&self, handle: Handle) -> Result<()> {
        self.with_value_mut(handle, |v| {
            v.swap_out();
            Ok(())
        })
    }

    fn drop_value(&self, handle: Handle) -> Result<()> {
        self.with_value_mut(handle, |v| {
            v.drop_data();
            Ok(())
        })
    }
}
