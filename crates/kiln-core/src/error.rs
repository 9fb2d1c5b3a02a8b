use crate::comp_node::CompNode;
use crate::dtype::DType;
use crate::handle::Handle;
use crate::shape::TensorShape;

/// Errors surfaced by the dispatch runtime and its backends.
///
/// Backend failures travel through `apply()` untouched; nothing in the
/// dispatch layer retries or rewrites them.
#[derive(Debug, thiserror::Error)]
pub enum KilnError {
    #[error("tensor not materialized: it holds neither a handle nor a graph node")]
    NotMaterialized,

    #[error("handle {0} is unknown to the execution channel")]
    InvalidHandle(Handle),

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        expected: TensorShape,
        got: TensorShape,
    },

    #[error("dtype mismatch: {lhs} vs {rhs}")]
    DTypeMismatch { lhs: DType, rhs: DType },

    #[error("device mismatch: {lhs} vs {rhs}")]
    DeviceMismatch { lhs: CompNode, rhs: CompNode },

    #[error("operator {op} expects {expected} inputs, got {got}")]
    ArityMismatch {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("operator {op} is not supported by {backend}")]
    UnsupportedOp { op: String, backend: String },

    #[error("operator {0} received both eager and symbolic inputs")]
    MixedBacking(String),

    #[error("operator {0} has symbolic inputs but no graph builder is installed")]
    NoGraphBuilder(String),

    #[error("backward called on a tensor without gradient tracking")]
    NoGradTracking,

    #[error("trace mismatch at step {step}: expected {expected}, got {got}")]
    TraceMismatch {
        step: usize,
        expected: String,
        got: String,
    },

    #[error("hook {hook} failed: {msg}")]
    Hook { hook: &'static str, msg: String },

    #[error("invalid comp node locator `{0}`")]
    InvalidCompNode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Config(err.to_string())
    }
}
