//! # kiln-host
//!
//! In-process backends for the kiln dispatch runtime: an execution channel
//! that keeps f32 values in host memory and a symbolic graph builder that
//! only tracks metadata. Both understand the built-in `Elemwise` operators.

pub mod channel;
pub mod graph;
pub mod kernels;
pub mod storage;

pub use channel::HostChannel;
pub use graph::{HostGraph, HostVar};
pub use storage::{HostValue, Residency};
