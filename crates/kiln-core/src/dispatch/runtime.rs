use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::channel::{Channel, OpRef};
use crate::config::{MixedBackingPolicy, RuntimeConfig};
use crate::error::KilnError;
use crate::graph::{GraphBuilder, VarRef};
use crate::handle::Handle;
use crate::tensor::{Backing, Flags, Tensor};
use crate::Result;

use super::context::{ApplyContext, ApplyResult};
use super::handler::CapabilityHandler;
use super::hooks::Hooks;
use super::state::{self, ScopedDisable};

/// Dispatch engine tying an execution channel, an optional graph builder and
/// the capability handler chain together.
///
/// The runtime is the explicit context passed down the call chain; only the
/// disabled mask and the tracing/compiled indicators are thread-local.
pub struct Runtime {
    channel: Arc<dyn Channel>,
    graph: Option<Arc<dyn GraphBuilder>>,
    handlers: Vec<Arc<dyn CapabilityHandler>>,
    hooks: Hooks,
    config: RuntimeConfig,
    disabled: Flags,
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    channel: Arc<dyn Channel>,
    graph: Option<Arc<dyn GraphBuilder>>,
    handlers: Vec<Arc<dyn CapabilityHandler>>,
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            graph: None,
            handlers: Vec::new(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn graph(mut self, graph: Arc<dyn GraphBuilder>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(mut self) -> Runtime {
        // Stable: equal priorities keep registration order.
        self.handlers.sort_by_key(|h| h.priority());
        tracing::debug!(
            channel = self.channel.name(),
            handlers = ?self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            graph = self.graph.is_some(),
            "built dispatch runtime"
        );
        let disabled = self.config.disabled_flags();
        Runtime {
            channel: self.channel,
            graph: self.graph,
            handlers: self.handlers,
            hooks: Hooks::new(),
            config: self.config,
            disabled,
        }
    }
}

impl Runtime {
    pub fn builder(channel: Arc<dyn Channel>) -> RuntimeBuilder {
        RuntimeBuilder::new(channel)
    }

    /// Runtime with no handlers: every call takes the plain path.
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        RuntimeBuilder::new(channel).build()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn graph(&self) -> Option<&Arc<dyn GraphBuilder>> {
        self.graph.as_ref()
    }

    pub fn handlers(&self) -> &[Arc<dyn CapabilityHandler>] {
        &self.handlers
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Mask applied to every call right now: the thread's scoped mask plus the
    /// capabilities disabled in this runtime's config.
    pub fn masked_flags(&self) -> Flags {
        state::global_disable() | self.disabled
    }

    /// Wraps a raw handle from this runtime's channel as a solely owned tensor.
    pub fn tensor_from_handle(&self, handle: Handle) -> Tensor {
        Tensor::from_handle(handle, Arc::clone(&self.channel))
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Applies `op` to a slice of operands.
    pub fn apply(&self, op: OpRef, args: &[&Tensor]) -> Result<ApplyResult> {
        let mut ctx = ApplyContext::new(op, args);
        self.apply_ctx(&mut ctx)
    }

    /// Applies `op` to any sequence of operands.
    pub fn apply_iter<'t, I>(&self, op: OpRef, args: I) -> Result<ApplyResult>
    where
        I: IntoIterator<Item = &'t Tensor>,
    {
        let args: SmallVec<[&Tensor; 8]> = args.into_iter().collect();
        self.apply(op, &args)
    }

    /// Applies `op` on behalf of a backward pass.
    pub fn apply_backward(&self, op: OpRef, args: &[&Tensor]) -> Result<ApplyResult> {
        let mut ctx = ApplyContext::new(op, args).with_backward(true);
        self.apply_ctx(&mut ctx)
    }

    /// Single dispatch entry point every other form funnels into.
    pub fn apply_ctx(&self, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        ctx.flags = ctx.flags - self.masked_flags();

        for handler in &self.handlers {
            if ctx.flags.intersects(handler.capability()) {
                if self.config.log_dispatch {
                    tracing::debug!(
                        op = ctx.op.name(),
                        flags = %ctx.flags,
                        backward = ctx.backward,
                        handler = handler.name(),
                        "dispatch to handler"
                    );
                }
                return handler.apply(self, ctx);
            }
        }
        self.apply_plain(ctx)
    }

    /// Re-enters dispatch with `flags` additionally masked for the duration of
    /// the call. The previous mask is restored on every exit path.
    pub fn apply_suppressed(&self, flags: Flags, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        let _guard = ScopedDisable::new(flags);
        self.apply_ctx(ctx)
    }

    /// Executes directly against the channel or graph builder.
    pub fn apply_plain(&self, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        let mut eager = 0usize;
        let mut symbolic = 0usize;
        for arg in ctx.args {
            match arg.backing() {
                Backing::Empty => return Err(KilnError::NotMaterialized),
                Backing::Eager(_) => eager += 1,
                Backing::Symbolic(_) => symbolic += 1,
            }
        }

        if self.config.log_dispatch {
            tracing::debug!(
                op = ctx.op.name(),
                flags = %ctx.flags,
                eager,
                symbolic,
                "plain dispatch"
            );
        }

        match (eager, symbolic) {
            (_, 0) => self.run_on_channel(ctx),
            (0, _) => self.run_on_graph(ctx),
            _ => match self.config.mixed_backing {
                MixedBackingPolicy::Reject => {
                    Err(KilnError::MixedBacking(ctx.op.name().to_string()))
                }
                MixedBackingPolicy::Graph => self.run_on_graph(ctx),
            },
        }
    }

    fn run_on_channel(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let handles = ctx
            .args
            .iter()
            .map(|arg| arg.handle().ok_or(KilnError::NotMaterialized))
            .collect::<Result<SmallVec<[Handle; 8]>>>()?;
        let outputs = self.channel.apply_op(ctx.op.as_ref(), &handles)?;
        Ok(outputs
            .into_iter()
            .map(|h| self.tensor_from_handle(h))
            .collect())
    }

    fn run_on_graph(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| KilnError::NoGraphBuilder(ctx.op.name().to_string()))?;
        let vars = ctx
            .args
            .iter()
            .map(|arg| match arg.backing() {
                Backing::Symbolic(var) => Ok(Arc::clone(var)),
                Backing::Eager(_) => graph.import_eager(arg),
                Backing::Empty => Err(KilnError::NotMaterialized),
            })
            .collect::<Result<SmallVec<[VarRef; 8]>>>()?;
        let outputs = graph.apply_op(ctx.op.as_ref(), &vars)?;
        Ok(outputs.into_iter().map(Tensor::from_var).collect())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("channel", &self.channel.name())
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("graph", &self.graph.is_some())
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish()
    }
}
