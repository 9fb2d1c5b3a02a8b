//! Thread-local dispatch state.
//!
//! The disabled-capability mask and the tracing/compiled indicators belong to
//! the thread that drives dispatch. Guards restore the exact previous value on
//! drop, including during unwinding, and must nest strictly.

use std::cell::Cell;
use std::marker::PhantomData;

use crate::tensor::Flags;

thread_local! {
    static GLOBAL_DISABLE: Cell<Flags> = const { Cell::new(Flags::empty()) };
    static IS_TRACING: Cell<bool> = const { Cell::new(false) };
    static IS_COMPILED: Cell<bool> = const { Cell::new(false) };
}

/// Capabilities currently suppressed on this thread.
pub fn global_disable() -> Flags {
    GLOBAL_DISABLE.with(|d| d.get())
}

fn replace_global_disable(flags: Flags) -> Flags {
    GLOBAL_DISABLE.with(|d| d.replace(flags))
}

/// Whether a trace region is active on this thread.
pub fn is_tracing() -> bool {
    IS_TRACING.with(|t| t.get())
}

/// Sets the tracing indicator, returning the previous value.
pub fn set_tracing(tracing: bool) -> bool {
    IS_TRACING.with(|t| t.replace(tracing))
}

/// Whether traced calls should run against a compiled trace.
pub fn is_compiled() -> bool {
    IS_COMPILED.with(|c| c.get())
}

/// Sets the compiled indicator, returning the previous value.
pub fn set_compiled(compiled: bool) -> bool {
    IS_COMPILED.with(|c| c.replace(compiled))
}

/// RAII guard that suppresses capabilities for the current thread.
///
/// # Example
/// ```
/// use kiln_core::dispatch::{global_disable, ScopedDisable};
/// use kiln_core::Flags;
///
/// {
///     let _guard = ScopedDisable::new(Flags::TRACE);
///     assert!(global_disable().contains(Flags::TRACE));
/// }
/// assert!(global_disable().is_empty());
/// ```
pub struct ScopedDisable {
    saved: Flags,
    _not_send: PhantomData<*const ()>,
}

impl ScopedDisable {
    pub fn new(flags: Flags) -> Self {
        let saved = global_disable();
        replace_global_disable(saved | flags);
        Self {
            saved,
            _not_send: PhantomData,
        }
    }

    /// Mask that will be restored when this guard drops.
    pub fn saved(&self) -> Flags {
        self.saved
    }
}

impl Drop for ScopedDisable {
    fn drop(&mut self) {
        replace_global_disable(self.saved);
    }
}

/// RAII guard that sets the tracing indicator for the current thread.
pub struct TracingScope {
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

impl TracingScope {
    pub fn new(tracing: bool) -> Self {
        Self {
            prev: set_tracing(tracing),
            _not_send: PhantomData,
        }
    }
}

impl Drop for TracingScope {
    fn drop(&mut self) {
        set_tracing(self.prev);
    }
}

/// RAII guard that sets the compiled indicator for the current thread.
pub struct CompiledScope {
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

impl CompiledScope {
    pub fn new(compiled: bool) -> Self {
        Self {
            prev: set_compiled(compiled),
            _not_send: PhantomData,
        }
    }
}

impl Drop for CompiledScope {
    fn drop(&mut self) {
        set_compiled(self.prev);
    }
}
