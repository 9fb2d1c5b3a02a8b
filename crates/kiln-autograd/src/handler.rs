use std::sync::Arc;

use kiln_core::autograd::GradEdge;
use kiln_core::dispatch::{ApplyContext, ApplyResult, CapabilityHandler};
use kiln_core::{Flags, GradInfo, GradNode, Result, Runtime};

use crate::registry::GradRegistry;

/// Records the gradient graph for calls that touch a tracked input.
///
/// Runs first in the handler chain, so anything it calls (the forward op
/// and, later, the backward math) goes through the remaining handlers.
#[derive(Debug)]
pub struct GradHandler {
    registry: GradRegistry,
}

impl GradHandler {
    pub const PRIORITY: i32 = 0;

    pub fn new(registry: GradRegistry) -> Self {
        Self { registry }
    }

    pub fn with_defaults() -> Self {
        Self::new(GradRegistry::with_defaults())
    }

    pub fn registry(&self) -> &GradRegistry {
        &self.registry
    }
}

impl Default for GradHandler {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CapabilityHandler for GradHandler {
    fn name(&self) -> &'static str {
        "grad"
    }

    fn capability(&self) -> Flags {
        Flags::GRAD
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn apply(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        let mut outputs = rt.apply_suppressed(self.suppresses(), ctx)?;

        let edges: Vec<Option<GradEdge>> = ctx
            .args
            .iter()
            .map(|arg| {
                if !arg.requires_grad() {
                    return None;
                }
                let info = arg.grad_info();
                info.node.as_ref().map(|node| GradEdge {
                    node: Arc::clone(node),
                    slot: info.slot,
                })
            })
            .collect();
        if edges.iter().all(Option::is_none) {
            return Ok(outputs);
        }

        let op = ctx.op.as_ref();
        let Some(rule) = self.registry.get(op) else {
            tracing::trace!(op = op.name(), "no gradient rule, outputs untracked");
            return Ok(outputs);
        };
        let Some(grad_fn) = rule.make_grad_fn(op, ctx.args, &outputs) else {
            return Ok(outputs);
        };

        let node = GradNode::with_grad_fn(grad_fn, edges, outputs.len());
        for (slot, out) in outputs.iter_mut().enumerate() {
            out.insert_flags(Flags::GRAD);
            *out.grad_info_mut() = GradInfo::new(Arc::clone(&node), slot);
        }
        tracing::trace!(op = op.name(), node = node.id, "recorded grad node");
        Ok(outputs)
    }
}
