//! # kiln-autograd
//!
//! Gradient backend for the kiln dispatch runtime.
//!
//! Provides:
//! - `GradHandler`, the capability handler that records a `GradNode` for every
//!   `apply()` call touching a tracked input
//! - `GradRule` / `GradRegistry` mapping operator types to backward functions
//! - Built-in backward functions for the elementwise operators
//! - A dependency-counted backward pass (Kahn's algorithm)
//! - `NoGradGuard` for inference scopes

pub mod backward;
pub mod grad_fn;
pub mod handler;
pub mod registry;
pub mod scope;

#[cfg(test)]
mod testing;

pub use backward::{backward, grad, zero_grad};
pub use handler::GradHandler;
pub use registry::{ElemwiseRule, GradRegistry, GradRule};
pub use scope::{is_grad_enabled, NoGradGuard};
