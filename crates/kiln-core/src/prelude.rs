//! Convenience re-exports for common kiln-core types.
//!
//! ```rust
//! use kiln_core::prelude::*;
//! ```

pub use crate::apply;
pub use crate::dispatch::{ApplyContext, ApplyResult, Runtime, ScopedDisable};
pub use crate::Channel;
pub use crate::CompNode;
pub use crate::DType;
pub use crate::Elemwise;
pub use crate::Flags;
pub use crate::KilnError;
pub use crate::Result;
pub use crate::Tensor;
pub use crate::TensorShape;
