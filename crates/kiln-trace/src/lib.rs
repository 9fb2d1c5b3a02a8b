//! # kiln-trace
//!
//! Trace backend for the kiln dispatch runtime.
//!
//! `TraceHandler` takes every call carrying the TRACE capability (or made
//! inside a tracing scope). It first offers the call to the apply hook
//! matching the call's situation; without a hook it records the call on a
//! [`TraceTape`] or, once the tape is switched to replay, checks that the
//! same sequence of calls is being made again.

pub mod handler;
pub mod tape;

#[cfg(test)]
mod testing;

pub use handler::TraceHandler;
pub use tape::{TapeSnapshot, TraceEntry, TraceIds, TraceMode, TraceTape};
