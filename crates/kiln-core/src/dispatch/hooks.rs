//! Substitutable apply strategies installed by the binding layer.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Result;

use super::context::{ApplyContext, ApplyResult};
use super::runtime::Runtime;

/// Which alternate strategy a hook replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Traced call during the first, recording run.
    ApplyWithTracing,
    /// Traced call while replaying a compiled trace.
    ApplyCompiledMode,
    /// Backward-pass call on symbolic graph nodes.
    ApplyBackwardVarNode,
}

impl HookKind {
    pub const ALL: [HookKind; 3] = [
        HookKind::ApplyWithTracing,
        HookKind::ApplyCompiledMode,
        HookKind::ApplyBackwardVarNode,
    ];

    fn index(self) -> usize {
        match self {
            HookKind::ApplyWithTracing => 0,
            HookKind::ApplyCompiledMode => 1,
            HookKind::ApplyBackwardVarNode => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HookKind::ApplyWithTracing => "apply_with_tracing",
            HookKind::ApplyCompiledMode => "apply_compiled_mode",
            HookKind::ApplyBackwardVarNode => "apply_backward_varnode",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Callable that takes over an `apply()` call.
pub trait ApplyHook: Send + Sync {
    fn call(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult>;
}

impl<F> ApplyHook for F
where
    F: Fn(&Runtime, &mut ApplyContext<'_>) -> Result<ApplyResult> + Send + Sync,
{
    fn call(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        self(rt, ctx)
    }
}

/// Hook slots shared by every thread using a [`Runtime`].
#[derive(Default)]
pub struct Hooks {
    slots: RwLock<[Option<Arc<dyn ApplyHook>>; 3]>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `hook`, returning the one it replaced.
    pub fn set(&self, kind: HookKind, hook: Arc<dyn ApplyHook>) -> Option<Arc<dyn ApplyHook>> {
        let prev = self.slots.write()[kind.index()].replace(hook);
        if prev.is_some() {
            tracing::warn!(hook = %kind, "replacing installed apply hook");
        }
        prev
    }

    /// Installs a closure hook.
    pub fn set_fn<F>(&self, kind: HookKind, hook: F) -> Option<Arc<dyn ApplyHook>>
    where
        F: Fn(&Runtime, &mut ApplyContext<'_>) -> Result<ApplyResult> + Send + Sync + 'static,
    {
        self.set(kind, Arc::new(hook))
    }

    pub fn clear(&self, kind: HookKind) -> Option<Arc<dyn ApplyHook>> {
        self.slots.write()[kind.index()].take()
    }

    pub fn get(&self, kind: HookKind) -> Option<Arc<dyn ApplyHook>> {
        self.slots.read()[kind.index()].clone()
    }

    pub fn is_set(&self, kind: HookKind) -> bool {
        self.slots.read()[kind.index()].is_some()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for kind in HookKind::ALL {
            list.entry(&kind.name(), &self.is_set(kind));
        }
        list.finish()
    }
}
