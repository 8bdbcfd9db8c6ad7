//! State shared by the scheduler and every worker of one pipeline run.
//!
//! Only flags, counters and the first-failure slot cross worker boundaries;
//! everything else a worker touches is owned by its [`StepContext`].
//!
//! [`StepContext`]: crate::context::StepContext

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rowflow_types::{EventKind, LogLevel, PipelineStatus, StepId, StepMetrics, StepStatus};

use crate::channel::RowChannel;
use crate::config::types::ResourceConfig;
use crate::control::{StepControl, StepCounters};
use crate::events::EventBus;
use crate::listener::{RowListener, RowListeners};
use crate::result::StepFailure;
use crate::steps::preview::PreviewStore;

/// Scheduler-side view of one step copy.
#[derive(Debug)]
pub struct StepHandle {
    pub id: StepId,
    pub control: StepControl,
    pub counters: StepCounters,
    pub(crate) listeners: RowListeners,
    pub(crate) inputs: Vec<Arc<RowChannel>>,
    /// Normal and error outputs.
    pub(crate) outputs: Vec<Arc<RowChannel>>,
}

impl StepHandle {
    pub(crate) fn new(id: StepId, inputs: Vec<Arc<RowChannel>>, outputs: Vec<Arc<RowChannel>>) -> Self {
        Self {
            id,
            control: StepControl::new(),
            counters: StepCounters::new(),
            listeners: RowListeners::default(),
            inputs,
            outputs,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> StepMetrics {
        let input_rows = self.inputs.iter().map(|c| c.len()).sum();
        let output_rows = self.outputs.iter().map(|c| c.len()).sum();
        self.counters.snapshot(&self.id, input_rows, output_rows)
    }

    pub(crate) fn mark_outputs_done(&self) {
        for channel in &self.outputs {
            channel.mark_done();
        }
    }
}

#[derive(Debug)]
pub(crate) struct RunState {
    pub(crate) pipeline: String,
    pub(crate) handles: Vec<Arc<StepHandle>>,
    pub(crate) channels: Vec<Arc<RowChannel>>,
    pub(crate) events: EventBus,
    pub(crate) resources: ResourceConfig,
    pub(crate) previews: PreviewStore,
    killed: AtomicBool,
    safe_stopping: AtomicBool,
    first_failure: Mutex<Option<StepFailure>>,
}

impl RunState {
    pub(crate) fn new(
        pipeline: String,
        handles: Vec<Arc<StepHandle>>,
        channels: Vec<Arc<RowChannel>>,
        resources: ResourceConfig,
    ) -> Self {
        Self {
            events: EventBus::new(pipeline.clone()),
            pipeline,
            handles,
            channels,
            resources,
            previews: PreviewStore::new(),
            killed: AtomicBool::new(false),
            safe_stopping: AtomicBool::new(false),
            first_failure: Mutex::new(None),
        }
    }

    /// Hard stop: raise every stop flag, then discard buffered rows.
    ///
    /// Flags go first so a worker woken by the abort sees them.
    pub(crate) fn kill_all(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in &self.handles {
            handle.control.stop();
        }
        let discarded: usize = self.channels.iter().map(|c| c.abort()).sum();
        tracing::info!(pipeline = %self.pipeline, discarded, "Pipeline killed");
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub(crate) fn safe_stop(&self) {
        if self.safe_stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in &self.handles {
            handle.control.request_safe_stop();
        }
        tracing::info!(pipeline = %self.pipeline, "Safe stop requested");
    }

    fn all_settled(&self) -> bool {
        self.handles.iter().all(|h| h.counters.status().is_terminal())
    }

    /// Pause a running pipeline. No-op once it reached a terminal status or
    /// every copy has settled.
    pub(crate) fn pause(&self) -> bool {
        if self.all_settled()
            || !self
                .events
                .transition(&[PipelineStatus::Running], PipelineStatus::Paused)
        {
            return false;
        }
        for handle in &self.handles {
            handle.control.pause();
        }
        true
    }

    /// Resume a paused pipeline. No-op unless it is currently paused.
    pub(crate) fn resume(&self) -> bool {
        if self.all_settled()
            || !self
                .events
                .transition(&[PipelineStatus::Paused], PipelineStatus::Running)
        {
            return false;
        }
        for handle in &self.handles {
            handle.control.resume();
        }
        true
    }

    /// Keep `failure` if it is the first one. Returns whether it was kept.
    pub(crate) fn record_failure(&self, failure: StepFailure) -> bool {
        let mut slot = self
            .first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(failure);
        true
    }

    pub(crate) fn first_failure(&self) -> Option<StepFailure> {
        self.first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attach `listener` to every copy of `step`. Returns the number of
    /// copies it was attached to.
    pub(crate) fn add_row_listener(&self, step: &str, listener: &Arc<dyn RowListener>) -> usize {
        let mut attached = 0;
        for handle in self.handles.iter().filter(|h| h.id.name == step) {
            handle.listeners.add(Arc::clone(listener));
            attached += 1;
        }
        attached
    }

    pub(crate) fn remove_row_listener(&self, step: &str, listener: &Arc<dyn RowListener>) -> usize {
        self.handles
            .iter()
            .filter(|h| h.id.name == step && h.listeners.remove(listener))
            .count()
    }

    pub(crate) fn step_metrics(&self) -> Vec<StepMetrics> {
        self.handles.iter().map(|h| h.metrics()).collect()
    }

    pub(crate) fn publish_status(&self, handle: &StepHandle, status: StepStatus) {
        let previous = handle.counters.set_status(status);
        if previous != status {
            tracing::debug!(step = %handle.id, from = previous.as_str(), to = status.as_str(), "Step status");
            self.events.publish(EventKind::StepStatus {
                step: handle.id.clone(),
                status,
            });
        }
    }

    pub(crate) fn publish_metrics(&self, handle: &StepHandle) {
        self.events.publish(EventKind::StepMetrics {
            metrics: handle.metrics(),
        });
    }

    /// Log through `tracing` and mirror the line onto the event bus.
    pub(crate) fn log(&self, step: &StepId, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(step = %step, "{message}"),
            LogLevel::Info => tracing::info!(step = %step, "{message}"),
            LogLevel::Warn => tracing::warn!(step = %step, "{message}"),
            LogLevel::Error => tracing::error!(step = %step, "{message}"),
        }
        self.events.publish(EventKind::StepLog {
            step: step.clone(),
            level,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::{Row, StepError, Value};

    fn state() -> RunState {
        let channel = Arc::new(RowChannel::new("a.0 - b.0", 4));
        let a = Arc::new(StepHandle::new(StepId::new("a", 0), Vec::new(), vec![Arc::clone(&channel)]));
        let b = Arc::new(StepHandle::new(StepId::new("b", 0), vec![Arc::clone(&channel)], Vec::new()));
        RunState::new("p".into(), vec![a, b], vec![channel], ResourceConfig::default())
    }

    #[test]
    fn kill_all_stops_everyone_and_drops_buffers() {
        let state = state();
        state.channels[0].push(Row::new(vec![Value::Integer(1)])).unwrap();
        state.kill_all();
        assert!(state.is_killed());
        assert!(state.handles.iter().all(|h| h.control.is_stopped()));
        assert!(state.channels[0].is_empty());
        assert!(state.channels[0].is_aborted());
    }

    #[test]
    fn first_failure_wins() {
        let state = state();
        let fail = |name: &str| StepFailure {
            step: StepId::new(name, 0),
            error: StepError::internal("BOOM", name),
        };
        assert!(state.record_failure(fail("a")));
        assert!(!state.record_failure(fail("b")));
        assert_eq!(state.first_failure().unwrap().step.name, "a");
    }

    #[test]
    fn pause_and_resume_follow_pipeline_status() {
        let state = state();
        // still preparing
        assert!(!state.pause());
        state.events.publish(EventKind::PipelineStatus {
            status: PipelineStatus::Running,
        });
        assert!(!state.resume());
        assert!(state.pause());
        assert!(state.handles.iter().all(|h| h.control.is_paused()));
        assert!(!state.pause());
        assert!(state.resume());
        assert!(state.handles.iter().all(|h| !h.control.is_paused()));
    }

    #[test]
    fn pause_is_ignored_once_every_copy_settled() {
        let state = state();
        state.events.publish(EventKind::PipelineStatus {
            status: PipelineStatus::Running,
        });
        for handle in &state.handles {
            handle.counters.set_status(StepStatus::Finished);
        }
        assert!(!state.pause());
        assert_eq!(state.events.status(), PipelineStatus::Running);
        assert!(state.handles.iter().all(|h| !h.control.is_paused()));
    }

    #[test]
    fn metrics_include_buffer_sizes() {
        let state = state();
        state.channels[0].push(Row::new(vec![Value::Integer(1)])).unwrap();
        let metrics = state.step_metrics();
        assert_eq!(metrics[0].output_buffer_rows, 1);
        assert_eq!(metrics[1].input_buffer_rows, 1);
    }
}
