//! Shared fixtures: a bookkeeping channel, a symbolic graph and recording handlers.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_core::dispatch::{ApplyContext, ApplyResult, CapabilityHandler, Runtime};
use kiln_core::{
    Channel, CompNode, DType, Flags, GraphBuilder, Handle, KilnError, OpDef, OpRef, Result,
    Tensor, TensorShape, VarNode, VarRef,
};
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};

/// Operator known only by name. `FAIL` makes the channel return an error.
#[derive(Debug)]
pub struct NamedOp(pub &'static str);

impl OpDef for NamedOp {
    fn name(&self) -> &str {
        self.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn op(name: &'static str) -> OpRef {
    Arc::new(NamedOp(name))
}

#[derive(Clone)]
struct Meta {
    dtype: DType,
    device: CompNode,
    shape: TensorShape,
}

/// Channel that keeps only metadata and records every call.
#[derive(Default)]
pub struct MockChannel {
    next: AtomicU64,
    values: Mutex<HashMap<Handle, Meta>>,
    released: Mutex<Vec<Handle>>,
    calls: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, shape: &[usize]) -> Handle {
        self.put_meta(DType::Float32, CompNode::cpu(0), shape)
    }

    pub fn put_meta(&self, dtype: DType, device: CompNode, shape: &[usize]) -> Handle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Handle::from_raw(raw).unwrap();
        self.values.lock().insert(
            handle,
            Meta {
                dtype,
                device,
                shape: TensorShape::new(shape),
            },
        );
        handle
    }

    pub fn released(&self) -> Vec<Handle> {
        self.released.lock().clone()
    }

    pub fn release_count(&self, handle: Handle) -> usize {
        self.released.lock().iter().filter(|&&h| h == handle).count()
    }

    pub fn live(&self) -> usize {
        self.values.lock().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn meta(&self, handle: Handle) -> Result<Meta> {
        self.values
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(KilnError::InvalidHandle(handle))
    }
}

impl Channel for MockChannel {
    fn name(&self) -> &str {
        "mock"
    }

    fn del(&self, handle: Handle) {
        self.values.lock().remove(&handle);
        self.released.lock().push(handle);
    }

    fn get_dtype(&self, handle: Handle) -> Result<DType> {
        Ok(self.meta(handle)?.dtype)
    }

    fn get_device(&self, handle: Handle) -> Result<CompNode> {
        Ok(self.meta(handle)?.device)
    }

    fn get_shape(&self, handle: Handle) -> Result<TensorShape> {
        Ok(self.meta(handle)?.shape)
    }

    fn apply_op(&self, op: &dyn OpDef, inputs: &[Handle]) -> Result<SmallVec<[Handle; 8]>> {
        self.calls.lock().push(format!("apply:{}", op.name()));
        if op.name() == "FAIL" {
            return Err(KilnError::ShapeMismatch {
                expected: TensorShape::from([2]),
                got: TensorShape::from([3]),
            });
        }
        let meta = match inputs.first() {
            Some(&h) => self.meta(h)?,
            None => Meta {
                dtype: DType::Float32,
                device: CompNode::cpu(0),
                shape: TensorShape::scalar(),
            },
        };
        let out = self.put_meta(meta.dtype, meta.device, meta.shape.dims());
        Ok(smallvec![out])
    }

    fn swap_in(&self, handle: Handle) -> Result<()> {
        self.calls.lock().push(format!("swap_in:{}", handle.raw()));
        Ok(())
    }

    fn swap_out(&self, handle: Handle) -> Result<()> {
        self.calls.lock().push(format!("swap_out:{}", handle.raw()));
        Ok(())
    }

    fn drop_value(&self, handle: Handle) -> Result<()> {
        self.calls.lock().push(format!("drop:{}", handle.raw()));
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockVar {
    pub id: usize,
    pub dtype: DType,
    pub device: CompNode,
    pub shape: TensorShape,
}

impl VarNode for MockVar {
    fn id(&self) -> usize {
        self.id
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn comp_node(&self) -> CompNode {
        self.device
    }

    fn shape(&self) -> TensorShape {
        self.shape.clone()
    }
}

/// Graph that yields one output shaped like its first input.
#[derive(Default)]
pub struct MockGraph {
    next: AtomicUsize,
    pub allow_import: bool,
    pub imported: AtomicUsize,
    pub ops: Mutex<Vec<String>>,
}

impl MockGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn importing() -> Arc<Self> {
        Arc::new(Self {
            allow_import: true,
            ..Self::default()
        })
    }

    pub fn var(&self, dtype: DType, device: CompNode, shape: &[usize]) -> VarRef {
        Arc::new(MockVar {
            id: self.next.fetch_add(1, Ordering::Relaxed),
            dtype,
            device,
            shape: TensorShape::new(shape),
        })
    }
}

impl GraphBuilder for MockGraph {
    fn apply_op(&self, op: &dyn OpDef, inputs: &[VarRef]) -> Result<SmallVec<[VarRef; 8]>> {
        self.ops.lock().push(op.name().to_string());
        let first = inputs.first().ok_or_else(|| KilnError::ArityMismatch {
            op: op.name().to_string(),
            expected: 1,
            got: 0,
        })?;
        Ok(smallvec![self.var(first.dtype(), first.comp_node(), first.shape().dims())])
    }

    fn import_eager(&self, tensor: &Tensor) -> Result<VarRef> {
        if !self.allow_import {
            return Err(KilnError::MixedBacking("import".into()));
        }
        self.imported.fetch_add(1, Ordering::Relaxed);
        Ok(self.var(tensor.dtype()?, tensor.comp_node()?, tensor.shape()?.dims()))
    }
}

pub type DispatchLog = Arc<Mutex<Vec<(&'static str, Flags)>>>;

/// Handler that logs the resolved flags it saw, then re-enters dispatch with
/// its capability suppressed. Optionally fails after re-entry.
pub struct Recorder {
    pub name: &'static str,
    pub capability: Flags,
    pub priority: i32,
    pub log: DispatchLog,
    pub fail: bool,
}

impl Recorder {
    pub fn new(name: &'static str, capability: Flags, priority: i32, log: &DispatchLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            capability,
            priority,
            log: Arc::clone(log),
            fail: false,
        })
    }

    pub fn failing(name: &'static str, capability: Flags, priority: i32, log: &DispatchLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            capability,
            priority,
            log: Arc::clone(log),
            fail: true,
        })
    }
}

impl CapabilityHandler for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capability(&self) -> Flags {
        self.capability
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        self.log.lock().push((self.name, ctx.flags));
        let mut out = rt.apply_suppressed(self.suppresses(), ctx)?;
        if self.fail {
            return Err(KilnError::Backend(format!("{} failed", self.name)));
        }
        for t in out.iter_mut() {
            t.insert_flags(self.capability);
        }
        Ok(out)
    }
}

pub fn new_log() -> DispatchLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn flagged(channel: &Arc<MockChannel>, flags: Flags) -> Tensor {
    let mut t = Tensor::from_handle(channel.put(&[2]), channel.clone());
    t.set_flags(flags);
    t
}
