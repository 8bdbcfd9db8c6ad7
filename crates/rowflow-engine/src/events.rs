//! Status/event bridge: per-pipeline publish/subscribe side channel.
//!
//! Publishing never blocks: every subscriber owns an unbounded queue and a
//! dropped subscriber is pruned on the next publish. Sequence numbers are
//! assigned under the bus lock, so each subscriber sees strictly increasing
//! `seq` values.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use rowflow_types::{EventKind, PipelineEvent, PipelineStatus};
use tokio::sync::mpsc;

#[derive(Debug)]
struct BusState {
    next_seq: u64,
    status: PipelineStatus,
    subscribers: Vec<mpsc::UnboundedSender<PipelineEvent>>,
}

#[derive(Debug)]
pub struct EventBus {
    pipeline: String,
    state: Mutex<BusState>,
}

impl EventBus {
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            state: Mutex::new(BusState {
                next_seq: 0,
                status: PipelineStatus::Preparing,
                subscribers: Vec::new(),
            }),
        }
    }

    fn event(&self, state: &mut BusState, kind: EventKind) -> PipelineEvent {
        state.next_seq += 1;
        PipelineEvent {
            seq: state.next_seq,
            at: Utc::now(),
            pipeline: self.pipeline.clone(),
            kind,
        }
    }

    /// Register a subscriber. It first receives the current pipeline status.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let status = state.status;
        let current = self.event(&mut state, EventKind::PipelineStatus { status });
        let _ = tx.send(current);
        state.subscribers.push(tx);
        EventStream { rx }
    }

    fn broadcast(&self, state: &mut BusState, kind: EventKind) {
        if state.subscribers.is_empty() {
            return;
        }
        let event = self.event(state, kind);
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Fire-and-forget publish to every live subscriber.
    pub fn publish(&self, kind: EventKind) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let EventKind::PipelineStatus { status } = kind {
            state.status = status;
        }
        self.broadcast(&mut state, kind);
    }

    /// Move the pipeline status to `to` only if it currently is one of
    /// `from`. Returns whether the status changed.
    pub fn transition(&self, from: &[PipelineStatus], to: PipelineStatus) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !from.contains(&state.status) {
            return false;
        }
        state.status = to;
        self.broadcast(&mut state, EventKind::PipelineStatus { status: to });
        true
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl EventStream {
    /// Next event; `None` once the pipeline and its bus are gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::{LogLevel, StepId, StepStatus};

    #[test]
    fn subscriber_gets_current_status_first() {
        let bus = EventBus::new("p");
        let mut stream = bus.subscribe();
        let first = stream.try_recv().unwrap();
        assert_eq!(
            first.kind,
            EventKind::PipelineStatus {
                status: PipelineStatus::Preparing
            }
        );
        assert_eq!(first.pipeline, "p");
    }

    #[test]
    fn sequence_numbers_increase_per_subscriber() {
        let bus = EventBus::new("p");
        let mut a = bus.subscribe();
        bus.publish(EventKind::StepStatus {
            step: StepId::new("s", 0),
            status: StepStatus::Running,
        });
        let mut b = bus.subscribe();
        bus.publish(EventKind::StepLog {
            step: StepId::new("s", 0),
            level: LogLevel::Info,
            message: "hello".into(),
        });
        for stream in [&mut a, &mut b] {
            let seqs: Vec<u64> = stream.drain().iter().map(|e| e.seq).collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
        }
    }

    #[test]
    fn transition_only_from_allowed_states() {
        let bus = EventBus::new("p");
        let mut stream = bus.subscribe();
        assert!(!bus.transition(&[PipelineStatus::Running], PipelineStatus::Paused));
        bus.publish(EventKind::PipelineStatus {
            status: PipelineStatus::Finished,
        });
        assert!(!bus.transition(&[PipelineStatus::Paused], PipelineStatus::Running));
        assert_eq!(bus.status(), PipelineStatus::Finished);

        let statuses: Vec<EventKind> = stream.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            statuses.last(),
            Some(&EventKind::PipelineStatus {
                status: PipelineStatus::Finished
            })
        );
        assert_eq!(statuses.len(), 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new("p");
        let stream = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(stream);
        bus.publish(EventKind::PipelineStatus {
            status: PipelineStatus::Running,
        });
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.status(), PipelineStatus::Running);
    }
}
