//! Step worker: drives one step copy through its lifecycle on a dedicated
//! thread.
//!
//! `Idle -> Initializing -> Running -> {Paused <-> Running} -> Finished | Stopped | Failed`

use std::sync::Arc;

use rowflow_types::{LogLevel, StepError, StepStatus};
use tokio::sync::oneshot;

use crate::context::{StepContext, StepIo, POLL_INTERVAL};
use crate::errors::PipelineError;
use crate::result::StepFailure;
use crate::run_state::{RunState, StepHandle};
use crate::step::{Progress, Step, StepEnv};
use crate::steps::StepKind;
use crate::variables::{VariableScope, PIPELINE_NAME, STEP_COPY_NR, STEP_NAME};

/// Everything a worker needs, assembled by the scheduler at prepare time.
pub(crate) struct WorkerPlan {
    pub(crate) handle: Arc<StepHandle>,
    /// Step settings before per-copy substitution.
    pub(crate) settings: serde_json::Value,
    pub(crate) scope: Arc<VariableScope>,
    pub(crate) io: StepIo,
    pub(crate) preview_limit: Option<usize>,
}

/// Run one copy to a terminal status. Never returns an error: failures are
/// recorded on the run and turn into pipeline-wide cancellation.
pub(crate) fn run(state: &Arc<RunState>, plan: WorkerPlan) -> StepStatus {
    let span = tracing::info_span!("step", step = %plan.handle.id.name, copy = plan.handle.id.copy);
    let _guard = span.enter();
    let handle = Arc::clone(&plan.handle);
    handle.counters.mark_started();
    state.publish_status(&handle, StepStatus::Initializing);

    let status = match drive(state, plan) {
        Ok(status) => status,
        Err(error) => {
            handle.counters.add_errors(1);
            state.log(&handle.id, LogLevel::Error, format!("Step failed: {error}"));
            state.record_failure(StepFailure {
                step: handle.id.clone(),
                error,
            });
            state.kill_all();
            StepStatus::Failed
        }
    };

    handle.mark_outputs_done();
    handle.counters.mark_finished();
    state.publish_status(&handle, status);
    state.publish_metrics(&handle);

    let c = &handle.counters;
    if status == StepStatus::Stopped {
        tracing::info!(lines_read = c.lines_read(), lines_written = c.lines_written(), "Step stopped");
    } else {
        tracing::info!(
            status = status.as_str(),
            lines_read = c.lines_read(),
            lines_written = c.lines_written(),
            lines_input = c.lines_input(),
            lines_output = c.lines_output(),
            lines_rejected = c.lines_rejected(),
            errors = c.errors(),
            duration_secs = c.duration().as_secs_f64(),
            "Step finished"
        );
    }
    status
}

/// Run a copy on its own named thread, inside the caller's span.
///
/// Every copy may be blocked on a channel at the same time, so copies never
/// share a bounded pool.
pub(crate) async fn spawn(state: Arc<RunState>, plan: WorkerPlan) -> Result<StepStatus, PipelineError> {
    let id = plan.handle.id.clone();
    let parent = tracing::Span::current();
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(format!("rowflow-{id}"))
        .spawn(move || {
            let status = parent.in_scope(|| run(&state, plan));
            // The scheduler may have stopped waiting.
            let _ = tx.send(status);
        })
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("Failed to start worker thread for step '{id}': {e}"))
        })?;
    rx.await.map_err(|_| {
        PipelineError::Infrastructure(anyhow::anyhow!("Worker thread for step '{id}' panicked"))
    })
}

/// Per-copy scope carrying the internal step variables.
fn copy_scope(state: &RunState, plan: &WorkerPlan) -> VariableScope {
    let mut scope = VariableScope::child(&plan.scope);
    scope.set(STEP_NAME, plan.handle.id.name.clone());
    scope.set(STEP_COPY_NR, plan.handle.id.copy.to_string());
    scope.set(PIPELINE_NAME, state.pipeline.clone());
    scope
}

/// Initialize the step, then run it until it is done or stopped.
fn drive(state: &Arc<RunState>, plan: WorkerPlan) -> Result<StepStatus, StepError> {
    let scope = Arc::new(copy_scope(state, &plan));
    let settings = scope.substitute_json(&plan.settings);
    let kind = StepKind::from_settings(settings)
        .map_err(|e| StepError::config("INVALID_SETTINGS", e.to_string()))?;
    let problems = kind.meta().check();
    if !problems.is_empty() {
        return Err(StepError::config("INVALID_SETTINGS", problems.join("; ")));
    }

    let handle = Arc::clone(&plan.handle);
    let env = StepEnv {
        id: &handle.id,
        variables: &scope,
        previews: &state.previews,
        preview_limit: plan.preview_limit,
    };
    let mut step = kind.meta().create(&env)?;
    let mut ctx = StepContext::new(Arc::clone(state), Arc::clone(&handle), Arc::clone(&scope), plan.io);

    let outcome = step
        .init(&mut ctx)
        .and_then(|()| run_loop(state, &handle, step.as_mut(), &mut ctx, kind.is_source()));
    step.dispose(&mut ctx);
    outcome
}

fn run_loop(
    state: &RunState,
    handle: &StepHandle,
    step: &mut dyn Step,
    ctx: &mut StepContext,
    is_source: bool,
) -> Result<StepStatus, StepError> {
    state.publish_status(handle, StepStatus::Running);
    loop {
        if handle.control.is_stopped() {
            return Ok(StepStatus::Stopped);
        }
        if handle.control.is_paused() {
            state.publish_status(handle, StepStatus::Paused);
            handle.control.wait_while_paused(POLL_INTERVAL);
            if handle.control.is_stopped() {
                return Ok(StepStatus::Stopped);
            }
            state.publish_status(handle, StepStatus::Running);
        }
        if is_source && handle.control.is_safe_stop() {
            return Ok(StepStatus::Stopped);
        }
        match step.process(ctx)? {
            Progress::Continue => ctx.maybe_publish_metrics(),
            Progress::Done if handle.control.is_stopped() => return Ok(StepStatus::Stopped),
            Progress::Done => return Ok(StepStatus::Finished),
        }
    }
}
