//! Symbolic graph node interface.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::channel::OpDef;
use crate::comp_node::CompNode;
use crate::dtype::DType;
use crate::error::KilnError;
use crate::shape::TensorShape;
use crate::tensor::Tensor;
use crate::Result;

/// One variable in a computation graph owned by a [`GraphBuilder`].
pub trait VarNode: Send + Sync + fmt::Debug {
    fn id(&self) -> usize;

    fn dtype(&self) -> DType;

    fn comp_node(&self) -> CompNode;

    fn shape(&self) -> TensorShape;
}

/// Reference to a graph variable. Holding one never frees graph state; the
/// graph decides the variable's lifetime.
pub type VarRef = Arc<dyn VarNode>;

/// Builds symbolic operations for tensors backed by graph variables.
pub trait GraphBuilder: Send + Sync {
    fn apply_op(&self, op: &dyn OpDef, inputs: &[VarRef]) -> Result<SmallVec<[VarRef; 8]>>;

    /// Brings an eager value into the graph, used when a call mixes eager and
    /// symbolic inputs. Builders that cannot do this refuse.
    fn import_eager(&self, _tensor: &Tensor) -> Result<VarRef> {
        Err(KilnError::UnsupportedOp {
            op: "import_eager".to_string(),
            backend: "graph builder".to_string(),
        })
    }
}
