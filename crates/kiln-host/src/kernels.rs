//! Element-wise f32 kernels and the shape rules shared by the channel and
//! the graph builder.

use kiln_core::{CompNode, DType, ElemMode, KilnError, Result, TensorShape};

/// Metadata of one operand as seen by [`infer`].
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    pub dtype: DType,
    pub device: CompNode,
    pub shape: &'a TensorShape,
}

/// Output metadata of an element-wise call.
///
/// Operands must agree on dtype and device. Shapes must be equal, except
/// that a single-element operand broadcasts against the rest.
pub fn infer(mode: ElemMode, operands: &[Operand<'_>]) -> Result<(DType, CompNode, TensorShape)> {
    if operands.len() != mode.arity() {
        return Err(KilnError::ArityMismatch {
            op: mode.name().to_string(),
            expected: mode.arity(),
            got: operands.len(),
        });
    }
    let first = operands[0];
    let mut shape = first.shape.clone();
    for other in &operands[1..] {
        if other.dtype != first.dtype {
            return Err(KilnError::DTypeMismatch {
                lhs: first.dtype,
                rhs: other.dtype,
            });
        }
        if other.device != first.device {
            return Err(KilnError::DeviceMismatch {
                lhs: first.device,
                rhs: other.device,
            });
        }
        shape = broadcast(&shape, other.shape)?;
    }
    Ok((first.dtype, first.device, shape))
}

fn broadcast(lhs: &TensorShape, rhs: &TensorShape) -> Result<TensorShape> {
    if lhs == rhs || rhs.total_nr_elems() == 1 {
        Ok(lhs.clone())
    } else if lhs.total_nr_elems() == 1 {
        Ok(rhs.clone())
    } else {
        Err(KilnError::ShapeMismatch {
            expected: lhs.clone(),
            got: rhs.clone(),
        })
    }
}

/// Output metadata of a [`SumTo`](kiln_core::SumTo) call.
///
/// The target must hold one element or exactly as many as the operand.
pub fn infer_sum_to(
    operands: &[Operand<'_>],
    target: &TensorShape,
) -> Result<(DType, CompNode, TensorShape)> {
    let [operand] = operands else {
        return Err(KilnError::ArityMismatch {
            op: "SUM_TO".to_string(),
            expected: 1,
            got: operands.len(),
        });
    };
    let numel = target.total_nr_elems();
    if numel != 1 && numel != operand.shape.total_nr_elems() {
        return Err(KilnError::ShapeMismatch {
            expected: target.clone(),
            got: operand.shape.clone(),
        });
    }
    Ok((operand.dtype, operand.device, target.clone()))
}

/// Sums `data` into `numel` elements: one total, or an unchanged copy.
pub fn sum_to(data: &[f32], numel: usize) -> Vec<f32> {
    if numel == data.len() {
        data.to_vec()
    } else {
        vec![data.iter().sum()]
    }
}

/// Element `i` of `data`, repeating single-element operands.
#[inline]
fn at(data: &[f32], i: usize) -> f32 {
    if data.len() == 1 {
        data[0]
    } else {
        data[i]
    }
}

/// Computes `mode` over `inputs`, producing `numel` elements.
/// Operands have already been checked by [`infer`].
pub fn elemwise(mode: ElemMode, inputs: &[&[f32]], numel: usize) -> Vec<f32> {
    match mode {
        ElemMode::Add => binary(inputs, numel, |a, b| a + b),
        ElemMode::Sub => binary(inputs, numel, |a, b| a - b),
        ElemMode::Mul => binary(inputs, numel, |a, b| a * b),
        ElemMode::SwitchGt0 => binary(inputs, numel, |x, dy| if x > 0.0 { dy } else { 0.0 }),
        ElemMode::Neg => unary(inputs, numel, |x| -x),
        ElemMode::Relu => unary(inputs, numel, |x| x.max(0.0)),
    }
}

fn unary(inputs: &[&[f32]], numel: usize, f: impl Fn(f32) -> f32) -> Vec<f32> {
    (0..numel).map(|i| f(at(inputs[0], i))).collect()
}

fn binary(inputs: &[&[f32]], numel: usize, f: impl Fn(f32, f32) -> f32) -> Vec<f32> {
    (0..numel)
        .map(|i| f(at(inputs[0], i), at(inputs[1], i)))
        .collect()
}
