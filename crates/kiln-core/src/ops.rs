//! Built-in operator descriptors understood by the bundled backends.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::channel::{OpDef, OpRef};
use crate::shape::TensorShape;

/// Element-wise operation mode.
///
/// Binary modes accept operands of equal element count, or one side holding a
/// single element that is broadcast against the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemMode {
    /// `a + b`.
    Add,
    /// `a - b`.
    Sub,
    /// `a * b`.
    Mul,
    /// `-x`.
    Neg,
    /// `max(x, 0)`.
    Relu,
    /// `SwitchGt0(x, dy)` yields `dy` where `x > 0` and 0 elsewhere.
    SwitchGt0,
}

impl ElemMode {
    /// Number of operands the mode consumes.
    pub fn arity(&self) -> usize {
        match self {
            ElemMode::Neg | ElemMode::Relu => 1,
            ElemMode::Add | ElemMode::Sub | ElemMode::Mul | ElemMode::SwitchGt0 => 2,
        }
    }

    /// Upper-case operator name reported through [`OpDef::name`] and shown in
    /// trace tapes.
    pub fn name(&self) -> &'static str {
        match self {
            ElemMode::Add => "ADD",
            ElemMode::Sub => "SUB",
            ElemMode::Mul => "MUL",
            ElemMode::Neg => "NEGATE",
            ElemMode::Relu => "RELU",
            ElemMode::SwitchGt0 => "SWITCH_GT0",
        }
    }
}

impl fmt::Display for ElemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element-wise operator over same-shaped operands, one output.
///
/// The shorthand constructors (`add`, `neg`, ...) return a ready [`OpRef`]
/// for passing straight to `Runtime::apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Elemwise {
    pub mode: ElemMode,
}

impl Elemwise {
    pub fn new(mode: ElemMode) -> Self {
        Self { mode }
    }

    /// Shared descriptor for `mode`.
    pub fn make(mode: ElemMode) -> OpRef {
        Arc::new(Self::new(mode))
    }

    pub fn add() -> OpRef {
        Self::make(ElemMode::Add)
    }

    pub fn sub() -> OpRef {
        Self::make(ElemMode::Sub)
    }

    pub fn mul() -> OpRef {
        Self::make(ElemMode::Mul)
    }

    pub fn neg() -> OpRef {
        Self::make(ElemMode::Neg)
    }

    pub fn relu() -> OpRef {
        Self::make(ElemMode::Relu)
    }

    /// Relu's backward mask; operands are `(x, dy)`.
    pub fn switch_gt0() -> OpRef {
        Self::make(ElemMode::SwitchGt0)
    }

    /// The `Elemwise` behind `op`, if it is one.
    pub fn downcast(op: &dyn OpDef) -> Option<&Elemwise> {
        op.as_any().downcast_ref::<Elemwise>()
    }

    pub fn arity(&self) -> usize {
        self.mode.arity()
    }
}

impl OpDef for Elemwise {
    fn name(&self) -> &str {
        self.mode.name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sums one operand down to `shape`.
///
/// The target either holds a single element (sum of everything) or as many
/// elements as the operand (a reshape). Backward rules use it to undo the
/// broadcast of single-element operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SumTo {
    pub shape: TensorShape,
}

impl SumTo {
    pub fn new(shape: TensorShape) -> Self {
        Self { shape }
    }

    pub fn make(shape: TensorShape) -> OpRef {
        Arc::new(Self::new(shape))
    }

    /// The `SumTo` behind `op`, if it is one.
    pub fn downcast(op: &dyn OpDef) -> Option<&SumTo> {
        op.as_any().downcast_ref::<SumTo>()
    }
}

impl OpDef for SumTo {
    fn name(&self) -> &str {
        "SUM_TO"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
