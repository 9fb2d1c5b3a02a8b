//! Core autograd types.
//!
//! `GradNode` and the `GradFn` trait live here so that `Tensor` can carry its
//! gradient bookkeeping without depending on the gradient backend crate.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use crate::dispatch::Runtime;
use crate::error::KilnError;
use crate::ops::Elemwise;
use crate::tensor::Tensor;
use crate::Result;

/// Backward function recorded for one `apply()` call.
pub trait GradFn: Send + Sync {
    /// Computes one optional gradient per forward input from the gradients of
    /// the forward outputs. Implementations run their math through `rt`.
    fn backward(
        &self,
        rt: &Runtime,
        grad_outputs: &[Option<Tensor>],
    ) -> Result<SmallVec<[Option<Tensor>; 4]>>;

    fn name(&self) -> &str;
}

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Edge from a node to the producer of one of its inputs.
#[derive(Clone)]
pub struct GradEdge {
    pub node: Arc<GradNode>,
    pub slot: usize,
}

/// A node in the gradient graph.
///
/// Interior nodes hold strong edges to their inputs, so any tensor that is
/// still alive keeps its whole upstream chain alive.
pub struct GradNode {
    pub id: usize,
    pub grad_fn: Option<Box<dyn GradFn>>,
    pub inputs: Vec<Option<GradEdge>>,
    grads: RwLock<SmallVec<[Option<Tensor>; 1]>>,
}

impl GradNode {
    /// Leaf node with a single output slot.
    pub fn leaf() -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            grad_fn: None,
            inputs: Vec::new(),
            grads: RwLock::new(smallvec![None]),
        })
    }

    pub fn with_grad_fn(
        grad_fn: Box<dyn GradFn>,
        inputs: Vec<Option<GradEdge>>,
        num_outputs: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            grad_fn: Some(grad_fn),
            inputs,
            grads: RwLock::new(SmallVec::from_elem(None, num_outputs)),
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.grad_fn.is_none()
    }

    pub fn num_outputs(&self) -> usize {
        self.grads.read().len()
    }

    pub fn grad(&self, slot: usize) -> Option<Tensor> {
        self.grads.read().get(slot).cloned().flatten()
    }

    pub fn set_grad(&self, slot: usize, grad: Option<Tensor>) {
        if let Some(entry) = self.grads.write().get_mut(slot) {
            *entry = grad;
        }
    }

    /// Removes and returns the gradients of every output slot.
    pub fn take_grads(&self) -> SmallVec<[Option<Tensor>; 1]> {
        let mut grads = self.grads.write();
        grads.iter_mut().map(Option::take).collect()
    }

    pub fn zero_grad(&self) {
        for entry in self.grads.write().iter_mut() {
            *entry = None;
        }
    }

    /// Adds `grad` into `slot`, summing with any gradient already there.
    pub fn accumulate_grad(&self, rt: &Runtime, slot: usize, grad: Tensor) -> Result<()> {
        let existing = self.grad(slot);
        let total = match existing {
            None => grad,
            Some(existing) => rt
                .apply_backward(Elemwise::add(), &[&existing, &grad])?
                .into_iter()
                .next()
                .ok_or_else(|| KilnError::Backend("gradient accumulation produced no output".into()))?,
        };
        self.set_grad(slot, Some(total));
        Ok(())
    }
}

impl Drop for GradNode {
    /// Unlinks the upstream chain iteratively. A long chain would otherwise be
    /// freed by one nested drop per node.
    fn drop(&mut self) {
        let mut pending: Vec<Arc<GradNode>> =
            self.inputs.drain(..).flatten().map(|edge| edge.node).collect();
        while let Some(node) = pending.pop() {
            if let Some(mut node) = Arc::into_inner(node) {
                pending.extend(node.inputs.drain(..).flatten().map(|edge| edge.node));
            }
        }
    }
}

impl fmt::Debug for GradNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradNode")
            .field("id", &self.id)
            .field("grad_fn", &self.grad_fn.as_ref().map(|g| g.name()))
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_node() {
        let node = GradNode::leaf();
        assert!(node.is_leaf());
        assert_eq!(node.num_outputs(), 1);
        assert!(node.grad(0).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = GradNode::leaf();
        let b = GradNode::leaf();
        assert_ne!(a.id, b.id);
    }

    struct Passthrough;

    impl GradFn for Passthrough {
        fn backward(
            &self,
            _rt: &Runtime,
            grad_outputs: &[Option<Tensor>],
        ) -> Result<SmallVec<[Option<Tensor>; 4]>> {
            Ok(grad_outputs.iter().cloned().collect())
        }

        fn name(&self) -> &str {
            "Passthrough"
        }
    }

    fn chain(leaf: &Arc<GradNode>, depth: usize) -> Arc<GradNode> {
        let mut cur = Arc::clone(leaf);
        for _ in 0..depth {
            let edge = GradEdge { node: cur, slot: 0 };
            cur = GradNode::with_grad_fn(Box::new(Passthrough), vec![Some(edge)], 1);
        }
        cur
    }

    #[test]
    fn test_deep_chain_drops_without_recursion() {
        let leaf = GradNode::leaf();
        let head = chain(&leaf, 200_000);
        assert_eq!(Arc::strong_count(&leaf), 2);
        drop(head);
        assert_eq!(Arc::strong_count(&leaf), 1);
    }

    #[test]
    fn test_shared_upstream_survives_drop() {
        let leaf = GradNode::leaf();
        let mid = chain(&leaf, 3);
        let head = chain(&mid, 3);
        drop(head);
        // `mid` is still owned here, so its chain stays intact
        assert_eq!(mid.inputs.len(), 1);
        assert_eq!(Arc::strong_count(&leaf), 2);
        drop(mid);
        assert_eq!(Arc::strong_count(&leaf), 1);
    }

    #[test]
    fn test_set_take_zero() {
        let node = GradNode::leaf();
        node.set_grad(0, Some(Tensor::empty()));
        assert!(node.grad(0).is_some());
        node.set_grad(5, Some(Tensor::empty()));

        let taken = node.take_grads();
        assert_eq!(taken.len(), 1);
        assert!(taken[0].is_some());
        assert!(node.grad(0).is_none());

        node.set_grad(0, Some(Tensor::empty()));
        node.zero_grad();
        assert!(node.grad(0).is_none());
    }
}
