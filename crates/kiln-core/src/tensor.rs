use std::any::Any;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};
use std::sync::Arc;

use crate::autograd::GradNode;
use crate::channel::Channel;
use crate::comp_node::CompNode;
use crate::dtype::DType;
use crate::error::KilnError;
use crate::graph::VarRef;
use crate::handle::{Handle, SharedHandle};
use crate::shape::TensorShape;
use crate::Result;

/// Capability markers carried by a tensor and resolved per `apply()` call.
///
/// Bits are orthogonal; nothing here rejects combinations such as
/// `SCALAR | TRACE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u64);

impl Flags {
    pub const SCALAR: Flags = Flags(1);
    pub const GRAD: Flags = Flags(1 << 1);
    pub const TRACE: Flags = Flags(1 << 2);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn all() -> Self {
        Flags(Self::SCALAR.0 | Self::GRAD.0 | Self::TRACE.0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    pub const fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;
    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl Sub for Flags {
    type Output = Flags;
    fn sub(self, rhs: Flags) -> Flags {
        Flags(self.0 & !rhs.0)
    }
}

impl Not for Flags {
    type Output = Flags;
    fn not(self) -> Flags {
        Flags(!self.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({self})")
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let names = [
            (Flags::SCALAR, "SCALAR"),
            (Flags::GRAD, "GRAD"),
            (Flags::TRACE, "TRACE"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = *self - Flags::all();
        if !unknown.is_empty() {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{:#x}", unknown.0)?;
        }
        Ok(())
    }
}

/// Gradient bookkeeping consumed by the gradient backend.
///
/// Copied by value with the tensor; the node itself is shared, so copies of a
/// tensor stay attached to the same gradient chain.
#[derive(Clone, Default)]
pub struct GradInfo {
    pub node: Option<Arc<GradNode>>,
    /// Output slot of `node` this tensor corresponds to.
    pub slot: usize,
}

impl GradInfo {
    pub fn new(node: Arc<GradNode>, slot: usize) -> Self {
        Self {
            node: Some(node),
            slot,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.node.is_some()
    }
}

impl fmt::Debug for GradInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "GradInfo(node={}, slot={})", node.id, self.slot),
            None => f.write_str("GradInfo(none)"),
        }
    }
}

/// State a host trace layer attaches to a tensor. Opaque to the runtime;
/// copies of a tensor share it.
pub type BindingInfo = Arc<dyn Any + Send + Sync>;

/// Trace bookkeeping consumed by the trace backend.
#[derive(Clone, Default)]
pub struct TraceInfo {
    /// Identity of this value on the active trace tape.
    pub mixin_handle: Option<u64>,
    /// Whether the value was produced while a trace was recording.
    pub recording: bool,
    /// Whether the value was copied out of a compiled trace.
    pub copied: bool,
    /// Replay state of the compiled trace this value belongs to.
    pub compiled_info: Option<BindingInfo>,
    /// Per-value state of the host trace layer.
    pub trace_mixin_info: Option<BindingInfo>,
}

impl fmt::Debug for TraceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceInfo")
            .field("mixin_handle", &self.mixin_handle)
            .field("recording", &self.recording)
            .field("copied", &self.copied)
            .field("compiled_info", &self.compiled_info.is_some())
            .field("trace_mixin_info", &self.trace_mixin_info.is_some())
            .finish()
    }
}

/// What a tensor's value lives in.
#[derive(Clone, Default)]
pub enum Backing {
    /// No value; queries fail with [`KilnError::NotMaterialized`].
    #[default]
    Empty,
    /// Value owned by the execution channel.
    Eager(SharedHandle),
    /// Variable of a symbolic graph; never released through the tensor.
    Symbolic(VarRef),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Empty => f.write_str("Empty"),
            Backing::Eager(h) => write!(f, "Eager({h:?})"),
            Backing::Symbolic(var) => write!(f, "Symbolic(var#{})", var.id()),
        }
    }
}

/// The value object operators consume and produce.
#[derive(Clone, Default)]
pub struct Tensor {
    flags: Flags,
    grad_info: GradInfo,
    trace_info: TraceInfo,
    backing: Backing,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// A tensor with no backing value.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a raw handle, becoming its sole owner.
    pub fn from_handle(handle: Handle, channel: Arc<dyn Channel>) -> Self {
        Self::from_shared(SharedHandle::new(Some(handle), channel))
    }

    /// Shares an existing handle. A null handle gives an empty tensor.
    pub fn from_shared(handle: SharedHandle) -> Self {
        let backing = if handle.is_null() {
            Backing::Empty
        } else {
            Backing::Eager(handle)
        };
        Self::from_backing(backing)
    }

    /// Symbolic tensor referring to a graph variable.
    pub fn from_var(var: VarRef) -> Self {
        Self::from_backing(Backing::Symbolic(var))
    }

    pub fn from_backing(backing: Backing) -> Self {
        Self {
            backing,
            ..Self::default()
        }
    }

    /// Shallow copy: same handle or graph node, duplicated flags and metadata.
    ///
    /// Flag and metadata changes on either side are not seen by the other,
    /// though both stay attached to the same shared gradient node.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Copy that drops gradient tracking.
    pub fn detach(&self) -> Self {
        let mut out = self.copy();
        out.flags.remove(Flags::GRAD);
        out.grad_info = GradInfo::default();
        out
    }

    // =========================================================================
    // Backing
    // =========================================================================

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Replaces the backing, returning the previous one.
    pub fn set_backing(&mut self, backing: Backing) -> Backing {
        std::mem::replace(&mut self.backing, backing)
    }

    pub fn is_materialized(&self) -> bool {
        !matches!(self.backing, Backing::Empty)
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.backing, Backing::Symbolic(_))
    }

    pub fn shared_handle(&self) -> Option<&SharedHandle> {
        match &self.backing {
            Backing::Eager(h) => Some(h),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        self.shared_handle().and_then(SharedHandle::get)
    }

    pub fn var(&self) -> Option<&VarRef> {
        match &self.backing {
            Backing::Symbolic(var) => Some(var),
            _ => None,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn dtype(&self) -> Result<DType> {
        match &self.backing {
            Backing::Symbolic(var) => Ok(var.dtype()),
            Backing::Eager(h) => eager_query(h, |c, h| c.get_dtype(h)),
            Backing::Empty => Err(KilnError::NotMaterialized),
        }
    }

    pub fn comp_node(&self) -> Result<CompNode> {
        match &self.backing {
            Backing::Symbolic(var) => Ok(var.comp_node()),
            Backing::Eager(h) => eager_query(h, |c, h| c.get_device(h)),
            Backing::Empty => Err(KilnError::NotMaterialized),
        }
    }

    pub fn shape(&self) -> Result<TensorShape> {
        match &self.backing {
            Backing::Symbolic(var) => Ok(var.shape()),
            Backing::Eager(h) => eager_query(h, |c, h| c.get_shape(h)),
            Backing::Empty => Err(KilnError::NotMaterialized),
        }
    }

    // =========================================================================
    // Flags and metadata
    // =========================================================================

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    pub fn insert_flags(&mut self, flags: Flags) {
        self.flags.insert(flags);
    }

    pub fn remove_flags(&mut self, flags: Flags) {
        self.flags.remove(flags);
    }

    pub fn is_scalar(&self) -> bool {
        self.flags.contains(Flags::SCALAR)
    }

    pub fn set_scalar(&mut self, scalar: bool) {
        if scalar {
            self.flags.insert(Flags::SCALAR);
        } else {
            self.flags.remove(Flags::SCALAR);
        }
    }

    pub fn grad_info(&self) -> &GradInfo {
        &self.grad_info
    }

    pub fn grad_info_mut(&mut self) -> &mut GradInfo {
        &mut self.grad_info
    }

    pub fn trace_info(&self) -> &TraceInfo {
        &self.trace_info
    }

    pub fn trace_info_mut(&mut self) -> &mut TraceInfo {
        &mut self.trace_info
    }

    // =========================================================================
    // Autograd
    // =========================================================================

    /// Whether this tensor participates in gradient recording.
    pub fn requires_grad(&self) -> bool {
        self.flags.contains(Flags::GRAD) && self.grad_info.is_tracked()
    }

    /// Marks this tensor as a gradient leaf, or stops tracking it.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        if requires_grad {
            self.flags.insert(Flags::GRAD);
            if !self.grad_info.is_tracked() {
                self.grad_info = GradInfo::new(GradNode::leaf(), 0);
            }
        } else {
            self.flags.remove(Flags::GRAD);
            self.grad_info = GradInfo::default();
        }
    }
}

fn eager_query<T>(
    handle: &SharedHandle,
    query: impl FnOnce(&dyn Channel, Handle) -> Result<T>,
) -> Result<T> {
    match (handle.channel(), handle.get()) {
        (Some(channel), Some(h)) => query(channel.as_ref(), h),
        _ => Err(KilnError::NotMaterialized),
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("flags", &self.flags)
            .field("backing", &self.backing)
            .field("grad_info", &self.grad_info)
            .field("trace_info", &self.trace_info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_algebra() {
        let f = Flags::SCALAR | Flags::TRACE;
        assert!(f.contains(Flags::TRACE));
        assert!(!f.contains(Flags::GRAD));
        assert!(f.intersects(Flags::TRACE | Flags::GRAD));
        assert_eq!(f - Flags::TRACE, Flags::SCALAR);
        assert_eq!(f & Flags::SCALAR, Flags::SCALAR);
        assert_eq!((Flags::empty() | Flags::GRAD).bits(), 2);
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(Flags::empty().to_string(), "-");
        assert_eq!((Flags::GRAD | Flags::SCALAR).to_string(), "SCALAR|GRAD");
        assert_eq!(Flags::from_bits(8 | 4).to_string(), "TRACE|0x8");
    }

    #[test]
    fn test_empty_tensor_queries_fail() {
        let t = Tensor::empty();
        assert!(!t.is_materialized());
        assert!(matches!(t.dtype(), Err(KilnError::NotMaterialized)));
        assert!(matches!(t.shape(), Err(KilnError::NotMaterialized)));
        assert!(matches!(t.comp_node(), Err(KilnError::NotMaterialized)));
    }

    #[test]
    fn test_null_shared_handle_is_empty() {
        let t = Tensor::from_shared(SharedHandle::null());
        assert!(matches!(t.backing(), Backing::Empty));
    }

    #[test]
    fn test_copy_is_independent() {
        let mut a = Tensor::empty();
        a.set_flags(Flags::TRACE);
        a.trace_info_mut().mixin_handle = Some(4);

        let mut b = a.copy();
        assert_eq!(b.flags(), Flags::TRACE);
        assert_eq!(b.trace_info().mixin_handle, Some(4));

        b.insert_flags(Flags::SCALAR);
        b.trace_info_mut().recording = true;
        assert_eq!(a.flags(), Flags::TRACE);
        assert!(!a.trace_info().recording);
    }

    #[test]
    fn test_copy_shares_binding_info() {
        let mut a = Tensor::empty();
        let info: BindingInfo = Arc::new(7u32);
        a.trace_info_mut().compiled_info = Some(info);

        let mut b = a.copy();
        let (sa, sb) = (
            a.trace_info().compiled_info.as_ref().unwrap(),
            b.trace_info().compiled_info.as_ref().unwrap(),
        );
        assert!(Arc::ptr_eq(sa, sb));
        assert_eq!(sb.downcast_ref::<u32>(), Some(&7));

        b.trace_info_mut().compiled_info = None;
        assert!(a.trace_info().compiled_info.is_some());
        assert!(a.trace_info().trace_mixin_info.is_none());
    }

    #[test]
    fn test_copy_shares_grad_node() {
        let mut a = Tensor::empty();
        a.set_requires_grad(true);
        let b = a.copy();
        let na = a.grad_info().node.as_ref().unwrap();
        let nb = b.grad_info().node.as_ref().unwrap();
        assert!(Arc::ptr_eq(na, nb));
    }

    #[test]
    fn test_requires_grad_and_detach() {
        let mut a = Tensor::empty();
        a.set_requires_grad(true);
        assert!(a.requires_grad());

        let d = a.detach();
        assert!(!d.requires_grad());
        assert!(d.flags().is_empty());

        a.set_requires_grad(false);
        assert!(!a.grad_info().is_tracked());
    }

    #[test]
    fn test_scalar_coexists_with_trace() {
        let mut t = Tensor::empty();
        t.insert_flags(Flags::TRACE);
        t.set_scalar(true);
        assert!(t.is_scalar());
        assert!(t.flags().contains(Flags::TRACE));
        t.set_scalar(false);
        assert_eq!(t.flags(), Flags::TRACE);
    }
}
