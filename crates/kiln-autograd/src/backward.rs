//! Backward pass execution.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use kiln_core::dispatch::ScopedDisable;
use kiln_core::{Flags, GradNode, KilnError, Result, Runtime, Tensor};

/// Execute the backward pass from `root`.
///
/// Seeds `root`'s slot with `seed` (typically ones shaped like `root`), then
/// visits the nodes reachable from it in dependency order: a node runs its
/// backward function only once every node consuming it has contributed.
/// Gradient math is dispatched through `rt` with GRAD suppressed, so the pass
/// records nothing new.
///
/// Leaf gradients accumulate across calls; interior gradients are released as
/// soon as they are consumed.
pub fn backward(rt: &Runtime, root: &Tensor, seed: Tensor) -> Result<()> {
    if !root.requires_grad() {
        return Err(KilnError::NoGradTracking);
    }
    let info = root.grad_info();
    let root_node = info.node.as_ref().ok_or(KilnError::NoGradTracking)?;

    let _no_grad = ScopedDisable::new(Flags::GRAD);

    let (nodes, mut pending) = dependency_counts(root_node);
    root_node.accumulate_grad(rt, info.slot, seed)?;

    let mut ready = VecDeque::from([Arc::clone(root_node)]);
    let mut visited = 0usize;
    while let Some(node) = ready.pop_front() {
        visited += 1;
        let Some(grad_fn) = node.grad_fn.as_ref() else {
            continue;
        };

        let grad_outputs = node.take_grads();
        if grad_outputs.iter().any(Option::is_some) {
            let input_grads = grad_fn.backward(rt, &grad_outputs)?;
            for (edge, grad) in node.inputs.iter().zip(input_grads) {
                if let (Some(edge), Some(grad)) = (edge, grad) {
                    edge.node.accumulate_grad(rt, edge.slot, grad)?;
                }
            }
        }

        for edge in node.inputs.iter().flatten() {
            if let Some(count) = pending.get_mut(&edge.node.id) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(Arc::clone(&edge.node));
                }
            }
        }
    }

    tracing::debug!(nodes = nodes, visited, "backward pass complete");
    Ok(())
}

/// Number of reachable nodes, and for each the count of edges into it.
fn dependency_counts(root: &Arc<GradNode>) -> (usize, HashMap<usize, usize>) {
    let mut pending: HashMap<usize, usize> = HashMap::from([(root.id, 0)]);
    let mut stack = vec![Arc::clone(root)];
    let mut seen = 1usize;

    while let Some(node) = stack.pop() {
        for edge in node.inputs.iter().flatten() {
            let count = pending.entry(edge.node.id).or_insert_with(|| {
                seen += 1;
                stack.push(Arc::clone(&edge.node));
                0
            });
            *count += 1;
        }
    }
    (seen, pending)
}

/// Accumulated gradient of a tracked tensor.
pub fn grad(tensor: &Tensor) -> Option<Tensor> {
    let info = tensor.grad_info();
    info.node.as_ref().and_then(|node| node.grad(info.slot))
}

/// Clears the accumulated gradient of a tracked tensor.
pub fn zero_grad(tensor: &Tensor) {
    let info = tensor.grad_info();
    if let Some(node) = &info.node {
        node.set_grad(info.slot, None);
    }
}
