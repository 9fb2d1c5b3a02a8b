use std::sync::Arc;

use kiln_core::dispatch::{is_compiled, ApplyContext, ApplyResult, CapabilityHandler};
use kiln_core::{Flags, HookKind, Result, Runtime};
use smallvec::SmallVec;

use crate::tape::{TraceMode, TraceTape};

/// Routes traced calls to the installed apply hooks, falling back to
/// recording on (or replaying against) a [`TraceTape`].
#[derive(Debug)]
pub struct TraceHandler {
    tape: Arc<TraceTape>,
}

impl TraceHandler {
    pub const PRIORITY: i32 = 10;

    pub fn new(tape: Arc<TraceTape>) -> Self {
        Self { tape }
    }

    pub fn tape(&self) -> &Arc<TraceTape> {
        &self.tape
    }

    /// Hook slot that takes over `ctx`: backward calls first, then calls
    /// made while a compiled trace is active, then ordinary traced calls.
    pub fn route(ctx: &ApplyContext<'_>) -> HookKind {
        if ctx.backward {
            HookKind::ApplyBackwardVarNode
        } else if is_compiled() {
            HookKind::ApplyCompiledMode
        } else {
            HookKind::ApplyWithTracing
        }
    }

    /// Runs the call with TRACE suppressed and steps the tape. The tape's
    /// mode decides between recording and replay.
    pub fn apply_on_tape(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        let inputs: SmallVec<[Option<u64>; 8]> = ctx
            .args
            .iter()
            .map(|arg| arg.trace_info().mixin_handle)
            .collect();
        let mut outputs = rt.apply_suppressed(self.suppresses(), ctx)?;

        let (mode, ids) = self
            .tape
            .step(ctx.op.name(), &inputs, outputs.len(), ctx.backward)?;
        let replaying = mode == TraceMode::Replay;
        for (out, id) in outputs.iter_mut().zip(ids) {
            out.insert_flags(Flags::TRACE);
            let info = out.trace_info_mut();
            info.mixin_handle = Some(id);
            info.recording = !replaying;
            info.copied = replaying;
        }
        Ok(outputs)
    }
}

impl CapabilityHandler for TraceHandler {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn capability(&self) -> Flags {
        Flags::TRACE
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn apply(&self, rt: &Runtime, ctx: &mut ApplyContext<'_>) -> Result<ApplyResult> {
        let kind = Self::route(ctx);
        match rt.hooks().get(kind) {
            Some(hook) => {
                tracing::trace!(op = ctx.op.name(), hook = %kind, "traced call handed to hook");
                hook.call(rt, ctx)
            }
            None => self.apply_on_tape(rt, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingChannel;
    use kiln_core::dispatch::{CompiledScope, TracingScope};
    use kiln_core::{Elemwise, KilnError, Tensor};
    use parking_lot::Mutex;

    fn setup() -> (Arc<CountingChannel>, Arc<TraceTape>, Runtime) {
        let channel = CountingChannel::new();
        let tape = Arc::new(TraceTape::default());
        let rt = Runtime::builder(channel.clone())
            .handler(Arc::new(TraceHandler::new(tape.clone())))
            .build();
        (channel, tape, rt)
    }

    #[test]
    fn test_tracing_scope_records() {
        let (channel, tape, rt) = setup();
        let a = channel.tensor();

        let _tracing = TracingScope::new(true);
        let b = rt.apply(Elemwise::neg(), &[&a]).unwrap().remove(0);
        let c = rt.apply(Elemwise::mul(), &[&a, &b]).unwrap().remove(0);

        assert!(c.flags().contains(Flags::TRACE));
        assert_eq!(b.trace_info().mixin_handle, Some(1));
        assert_eq!(c.trace_info().mixin_handle, Some(2));
        assert!(c.trace_info().recording);
        assert!(!c.trace_info().copied);

        let entries = tape.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].inputs, vec![None, Some(1)]);
        assert_eq!(channel.ops(), 2);
    }

    #[test]
    fn test_trace_flag_alone_records() {
        let (channel, tape, rt) = setup();
        let mut a = channel.tensor();
        a.insert_flags(Flags::TRACE);
        a.trace_info_mut().mixin_handle = Some(40);

        rt.apply(Elemwise::relu(), &[&a]).unwrap();
        assert_eq!(tape.entries()[0].inputs, vec![Some(40)]);
    }

    #[test]
    fn test_replay_marks_outputs_copied() {
        let (channel, tape, rt) = setup();
        let a = channel.tensor();
        let _tracing = TracingScope::new(true);
        rt.apply(Elemwise::neg(), &[&a]).unwrap();

        tape.start_replay();
        let out = rt.apply(Elemwise::neg(), &[&a]).unwrap();
        assert_eq!(out[0].trace_info().mixin_handle, Some(1));
        assert!(out[0].trace_info().copied);
        tape.finish_replay().unwrap();

        tape.start_replay();
        let err = rt.apply(Elemwise::relu(), &[&a]).unwrap_err();
        assert!(matches!(err, KilnError::TraceMismatch { step: 0, .. }));
    }

    #[test]
    fn test_hooks_take_priority_by_route() {
        let (channel, tape, rt) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in HookKind::ALL {
            let seen = seen.clone();
            rt.hooks().set_fn(kind, move |rt: &Runtime, ctx: &mut ApplyContext<'_>| {
                seen.lock().push(kind);
                rt.apply_suppressed(Flags::TRACE, ctx)
            });
        }
        let a = channel.tensor();
        let _tracing = TracingScope::new(true);

        rt.apply(Elemwise::neg(), &[&a]).unwrap();
        rt.apply_backward(Elemwise::neg(), &[&a]).unwrap();
        {
            let _compiled = CompiledScope::new(true);
            rt.apply(Elemwise::neg(), &[&a]).unwrap();
            // backward wins over compiled
            rt.apply_backward(Elemwise::neg(), &[&a]).unwrap();
        }

        assert_eq!(
            *seen.lock(),
            vec![
                HookKind::ApplyWithTracing,
                HookKind::ApplyBackwardVarNode,
                HookKind::ApplyCompiledMode,
                HookKind::ApplyBackwardVarNode,
            ]
        );
        assert!(tape.is_empty());
    }

    #[test]
    fn test_untraced_call_skips_handler() {
        let (channel, tape, rt) = setup();
        let a = channel.tensor();
        let out = rt.apply(Elemwise::neg(), &[&a]).unwrap();
        assert!(out[0].flags().is_empty());
        assert!(tape.is_empty());
        assert_eq!(channel.ops(), 1);
    }

    #[test]
    fn test_empty_input_fails_before_recording() {
        let (_channel, tape, rt) = setup();
        let _tracing = TracingScope::new(true);
        let err = rt.apply(Elemwise::neg(), &[&Tensor::empty()]).unwrap_err();
        assert!(matches!(err, KilnError::NotMaterialized));
        assert!(tape.is_empty());
    }
}
