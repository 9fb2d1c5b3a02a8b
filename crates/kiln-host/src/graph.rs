//! Symbolic graph builder for the host backend.

use std::fmt;
use std::sync::Arc;

use kiln_core::{
    CompNode, DType, Elemwise, GraphBuilder, KilnError, OpDef, Result, SumTo, Tensor,
    TensorShape, VarNode, VarRef,
};
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};

use crate::kernels::{self, Operand};

/// Variable produced by a [`HostGraph`].
#[derive(Debug)]
pub struct HostVar {
    id: usize,
    dtype: DType,
    device: CompNode,
    shape: TensorShape,
    /// Producing operator; `None` for placeholders and imports.
    op: Option<String>,
    inputs: Vec<usize>,
}

impl HostVar {
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }
}

impl VarNode for HostVar {
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

/// Records `Elemwise` calls on symbolic tensors, inferring output metadata
/// without computing anything.
#[derive(Default)]
pub struct HostGraph {
    vars: Mutex<Vec<Arc<HostVar>>>,
}

impl HostGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Graph input with the given metadata.
    pub fn placeholder(&self, dtype: DType, device: CompNode, dims: &[usize]) -> VarRef {
        self.push(dtype, device, TensorShape::new(dims), None, Vec::new())
    }

    /// Symbolic tensor over a fresh placeholder.
    pub fn input(&self, dtype: DType, device: CompNode, dims: &[usize]) -> Tensor {
        Tensor::from_var(self.placeholder(dtype, device, dims))
    }

    /// Number of variables created so far.
    pub fn len(&self) -> usize {
        self.vars.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn var(&self, id: usize) -> Option<Arc<HostVar>> {
        self.vars.lock().get(id).cloned()
    }

    fn push(
        &self,
        dtype: DType,
        device: CompNode,
        shape: TensorShape,
        op: Option<String>,
        inputs: Vec<usize>,
    ) -> VarRef {
        let mut vars = self.vars.lock();
        let var = Arc::new(HostVar {
            id: vars.len(),
            dtype,
            device,
            shape,
            op,
            inputs,
        });
        vars.push(Arc::clone(&var));
        var
    }
}

impl GraphBuilder for HostGraph {
    fn apply_op(&self, op: &dyn OpDef, inputs: &[VarRef]) -> Result<SmallVec<[VarRef; 8]>> {
        let shapes: SmallVec<[TensorShape; 4]> = inputs.iter().map(|v| v.shape()).collect();
        let operands: SmallVec<[Operand<'_>; 4]> = inputs
            .iter()
            .zip(&shapes)
            .map(|(v, shape)| Operand {
                dtype: v.dtype(),
                device: v.comp_node(),
                shape,
            })
            .collect();
        let (dtype, device, shape) = if let Some(elem) = Elemwise::downcast(op) {
            kernels::infer(elem.mode, &operands)?
        } else if let Some(sum) = SumTo::downcast(op) {
            kernels::infer_sum_to(&operands, &sum.shape)?
        } else {
            return Err(KilnError::UnsupportedOp {
                op: op.name().to_string(),
                backend: "host graph".into(),
            });
        };
        let ids = inputs.iter().map(|v| v.id()).collect();
        Ok(smallvec![self.push(
            dtype,
            device,
            shape,
            Some(op.name().to_string()),
            ids
        )])
    }

    /// Imports an eager value as a graph input carrying its metadata.
    fn import_eager(&self, tensor: &Tensor) -> Result<VarRef> {
        Ok(self.push(
            tensor.dtype()?,
            tensor.comp_node()?,
            tensor.shape()?,
            None,
            Vec::new(),
        ))
    }
}

impl fmt::Debug for HostGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostGraph").field("vars", &self.len()).finish()
    }
}
