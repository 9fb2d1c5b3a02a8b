//! Operator-type to backward-rule lookup.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kiln_core::{ElemMode, Elemwise, GradFn, OpDef, Tensor};

use crate::grad_fn::{AddBackward, MulBackward, NegBackward, ReluBackward, SubBackward};

/// Builds the backward function for one forward call.
pub trait GradRule: Send + Sync {
    /// Returns `None` when the call is not differentiable.
    fn make_grad_fn(
        &self,
        op: &dyn OpDef,
        inputs: &[&Tensor],
        outputs: &[Tensor],
    ) -> Option<Box<dyn GradFn>>;
}

/// Rules for [`Elemwise`]. `SwitchGt0` has no gradient.
pub struct ElemwiseRule;

impl GradRule for ElemwiseRule {
    fn make_grad_fn(
        &self,
        op: &dyn OpDef,
        inputs: &[&Tensor],
        _outputs: &[Tensor],
    ) -> Option<Box<dyn GradFn>> {
        let elem = Elemwise::downcast(op)?;
        if inputs.len() != elem.arity() {
            return None;
        }
        let grad_fn: Box<dyn GradFn> = match elem.mode {
            ElemMode::Add => Box::new(AddBackward {
                lhs: inputs[0].shape().ok()?,
                rhs: inputs[1].shape().ok()?,
            }),
            ElemMode::Sub => Box::new(SubBackward {
                lhs: inputs[0].shape().ok()?,
                rhs: inputs[1].shape().ok()?,
            }),
            ElemMode::Mul => Box::new(MulBackward {
                lhs: inputs[0].detach(),
                rhs: inputs[1].detach(),
            }),
            ElemMode::Neg => Box::new(NegBackward),
            ElemMode::Relu => Box::new(ReluBackward {
                input: inputs[0].detach(),
            }),
            ElemMode::SwitchGt0 => return None,
        };
        Some(grad_fn)
    }
}

/// Backward rules keyed by the concrete operator type.
#[derive(Default)]
pub struct GradRegistry {
    rules: HashMap<TypeId, Arc<dyn GradRule>>,
}

impl GradRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the rules for the built-in operators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<Elemwise>(Arc::new(ElemwiseRule));
        registry
    }

    /// Installs `rule` for operator type `T`, replacing any previous rule.
    pub fn register<T: OpDef + 'static>(&mut self, rule: Arc<dyn GradRule>) {
        self.rules.insert(TypeId::of::<T>(), rule);
    }

    pub fn get(&self, op: &dyn OpDef) -> Option<&Arc<dyn GradRule>> {
        self.rules.get(&op.as_any().type_id())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for GradRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradRegistry")
            .field("rules", &self.rules.len())
            .finish()
    }
}
