//! # kiln-core
//!
//! Tensor handle ownership and flag-driven operator dispatch.
//!
//! Provides:
//! - `Handle` / `SharedHandle`: counted ownership of values living in an
//!   external execution [`Channel`], released exactly once
//! - `Tensor`: eager (handle-backed) or symbolic (graph-node-backed) value
//!   carrying capability [`Flags`] plus gradient and trace bookkeeping
//! - `Runtime::apply`: resolves the flag union of the operands and routes the
//!   call through the registered capability handlers (gradient, trace) before
//!   reaching the channel or graph builder
//! - `ScopedDisable`: thread-local, strictly nested suppression of capabilities
//!   used by handlers to re-enter dispatch without re-triggering themselves

pub mod autograd;
pub mod channel;
pub mod comp_node;
pub mod config;
pub mod dispatch;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod handle;
pub mod ops;
pub mod prelude;
pub mod shape;
pub mod tensor;
pub mod wrapper;

pub use autograd::{GradFn, GradNode};
pub use channel::{Channel, OpDef, OpRef};
pub use comp_node::{CompNode, DeviceKind};
pub use config::{Capability, MixedBackingPolicy, RuntimeConfig};
pub use dispatch::{
    ApplyContext, ApplyHook, ApplyResult, CapabilityHandler, HookKind, Hooks, HostType, Runtime,
    RuntimeBuilder, ScopedDisable,
};
pub use dtype::DType;
pub use error::KilnError;
pub use graph::{GraphBuilder, VarNode, VarRef};
pub use handle::{Handle, SharedHandle};
pub use ops::{ElemMode, Elemwise, SumTo};
pub use shape::TensorShape;
pub use tensor::{Backing, BindingInfo, Flags, GradInfo, Tensor, TraceInfo};
pub use wrapper::TensorWrapper;

pub type Result<T> = std::result::Result<T, KilnError>;
