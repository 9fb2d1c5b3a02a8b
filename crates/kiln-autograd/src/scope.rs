//! Gradient computation scopes.

use kiln_core::dispatch::{global_disable, ScopedDisable};
use kiln_core::Flags;

/// Check if gradient recording is currently enabled on this thread.
pub fn is_grad_enabled() -> bool {
    !global_disable().contains(Flags::GRAD)
}

/// RAII guard that disables gradient recording in its scope.
///
/// # Example
/// ```
/// use kiln_autograd::{is_grad_enabled, NoGradGuard};
///
/// {
///     let _guard = NoGradGuard::new();
///     assert!(!is_grad_enabled());
/// }
/// assert!(is_grad_enabled());
/// ```
pub struct NoGradGuard {
    _inner: ScopedDisable,
}

impl NoGradGuard {
    pub fn new() -> Self {
        Self {
            _inner: ScopedDisable::new(Flags::GRAD),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}
