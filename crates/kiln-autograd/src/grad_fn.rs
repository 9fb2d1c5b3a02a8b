//! Built-in backward functions for the elementwise operators.
//!
//! Every rule runs its math through the runtime's backward entry point, so
//! the gradient computation itself is dispatched (and traced when a trace is
//! active) like any other call.

use kiln_core::{Elemwise, GradFn, KilnError, OpRef, Result, Runtime, SumTo, Tensor, TensorShape};
use smallvec::{smallvec, SmallVec};

type InputGrads = SmallVec<[Option<Tensor>; 4]>;

/// Runs a single-output operator for a backward pass.
fn backward_op(rt: &Runtime, op: OpRef, args: &[&Tensor]) -> Result<Tensor> {
    let name = op.name().to_string();
    rt.apply_backward(op, args)?
        .into_iter()
        .next()
        .ok_or_else(|| KilnError::Backend(format!("{name} produced no output in backward")))
}

/// Sums `grad` down to `shape` when the forward call broadcast that input.
///
/// A gradient with fewer elements than the input (a single-element seed) is
/// left as is; it broadcasts again wherever it is used.
fn reduce_to(rt: &Runtime, grad: Tensor, shape: &TensorShape) -> Result<Tensor> {
    let got = grad.shape()?;
    if got == *shape || got.total_nr_elems() < shape.total_nr_elems() {
        return Ok(grad);
    }
    backward_op(rt, SumTo::make(shape.clone()), &[&grad])
}

/// Gradient of the single forward output, if any reached this node.
fn output_grad(grad_outputs: &[Option<Tensor>]) -> Option<&Tensor> {
    grad_outputs.first().and_then(Option::as_ref)
}

/// Backward for element-wise addition: grad flows through unchanged.
/// Holds the forward input shapes.
pub struct AddBackward {
    pub lhs: TensorShape,
    pub rhs: TensorShape,
}

impl GradFn for AddBackward {
    fn backward(&self, rt: &Runtime, grad_outputs: &[Option<Tensor>]) -> Result<InputGrads> {
        let Some(dy) = output_grad(grad_outputs) else {
            return Ok(smallvec![None, None]);
        };
        let grad_a = reduce_to(rt, dy.copy(), &self.lhs)?;
        let grad_b = reduce_to(rt, dy.copy(), &self.rhs)?;
        Ok(smallvec![Some(grad_a), Some(grad_b)])
    }

    fn name(&self) -> &str {
        "AddBackward"
    }
}

/// Backward for element-wise subtraction.
/// Holds the forward input shapes.
pub struct SubBackward {
    pub lhs: TensorShape,
    pub rhs: TensorShape,
}

impl GradFn for SubBackward {
    fn backward(&self, rt: &Runtime, grad_outputs: &[Option<Tensor>]) -> Result<InputGrads> {
        let Some(dy) = output_grad(grad_outputs) else {
            return Ok(smallvec![None, None]);
        };
        let grad_a = reduce_to(rt, dy.copy(), &self.lhs)?;
        let neg = backward_op(rt, Elemwise::neg(), &[dy])?;
        let grad_b = reduce_to(rt, neg, &self.rhs)?;
        Ok(smallvec![Some(grad_a), Some(grad_b)])
    }

    fn name(&self) -> &str {
        "SubBackward"
    }
}

/// Backward for element-wise multiplication.
/// Holds detached copies of the forward inputs.
pub struct MulBackward {
    pub lhs: Tensor,
    pub rhs: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, rt: &Runtime, grad_outputs: &[Option<Tensor>]) -> Result<InputGrads> {
        let Some(dy) = output_grad(grad_outputs) else {
            return Ok(smallvec![None, None]);
        };
        // d/da (a*b) = b, d/db (a*b) = a
        let grad_a = backward_op(rt, Elemwise::mul(), &[dy, &self.rhs])?;
        let grad_b = backward_op(rt, Elemwise::mul(), &[dy, &self.lhs])?;
        Ok(smallvec![
            Some(reduce_to(rt, grad_a, &self.lhs.shape()?)?),
            Some(reduce_to(rt, grad_b, &self.rhs.shape()?)?),
        ])
    }

    fn name(&self) -> &str {
        "MulBackward"
    }
}

pub struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, rt: &Runtime, grad_outputs: &[Option<Tensor>]) -> Result<InputGrads> {
        let Some(dy) = output_grad(grad_outputs) else {
            return Ok(smallvec![None]);
        };
        Ok(smallvec![Some(backward_op(rt, Elemwise::neg(), &[dy])?)])
    }

    fn name(&self) -> &str {
        "NegBackward"
    }
}

/// Backward for ReLU: `dy` where the forward input was positive, else 0.
pub struct ReluBackward {
    pub input: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, rt: &Runtime, grad_outputs: &[Option<Tensor>]) -> Result<InputGrads> {
        let Some(dy) = output_grad(grad_outputs) else {
            return Ok(smallvec![None]);
        };
        let grad = backward_op(rt, Elemwise::switch_gt0(), &[&self.input, dy])?;
        Ok(smallvec![Some(grad)])
    }

    fn name(&self) -> &str {
        "ReluBackward"
    }
}
