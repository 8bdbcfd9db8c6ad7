//! Bounded single-producer/single-consumer row conduit between two step copies.
//!
//! `push` blocks while the buffer is full, `pop` blocks while it is empty.
//! Once the producer calls [`RowChannel::mark_done`], the consumer drains the
//! remaining rows and then observes exhaustion on every further call.
//! [`RowChannel::abort`] discards buffered rows and wakes both ends.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use rowflow_types::{Row, RowSchema};

/// Channel protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("push on channel '{channel}' after it was marked done")]
    PushAfterDone { channel: String },

    #[error("channel '{channel}' was aborted")]
    Aborted { channel: String },

    #[error("row with {actual} values pushed to channel '{channel}' with {expected} fields")]
    SchemaMismatch {
        channel: String,
        expected: usize,
        actual: usize,
    },
}

/// Result of a non-blocking or time-bounded pop.
#[derive(Debug, PartialEq)]
pub enum Pop {
    Row(Row),
    /// Producer finished and the buffer is drained.
    Done,
    /// Nothing available yet.
    Pending,
}

/// Point-in-time channel counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    pub rows_in: u64,
    pub rows_out: u64,
    pub buffered: usize,
    pub done: bool,
}

#[derive(Debug, Default)]
struct ChannelState {
    buffer: VecDeque<Row>,
    done: bool,
    aborted: bool,
    rows_in: u64,
    rows_out: u64,
}

#[derive(Debug)]
pub struct RowChannel {
    name: String,
    capacity: usize,
    state: Mutex<ChannelState>,
    not_empty: Condvar,
    not_full: Condvar,
    schema: OnceLock<Arc<RowSchema>>,
}

impl RowChannel {
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(ChannelState {
                buffer: VecDeque::with_capacity(capacity),
                ..ChannelState::default()
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            schema: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panicking peer must not wedge the other end, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the schema shared by every row on this channel.
    ///
    /// The first call wins; later calls must carry the same field count.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SchemaMismatch`] if a different layout was
    /// already attached.
    pub fn set_schema(&self, schema: Arc<RowSchema>) -> Result<(), ChannelError> {
        let current = self.schema.get_or_init(|| Arc::clone(&schema));
        if current.len() == schema.len() {
            Ok(())
        } else {
            Err(ChannelError::SchemaMismatch {
                channel: self.name.clone(),
                expected: current.len(),
                actual: schema.len(),
            })
        }
    }

    #[must_use]
    pub fn schema(&self) -> Option<Arc<RowSchema>> {
        self.schema.get().cloned()
    }

    fn check_row(&self, row: &Row) -> Result<(), ChannelError> {
        match self.schema.get() {
            Some(schema) if schema.len() != row.len() => Err(ChannelError::SchemaMismatch {
                channel: self.name.clone(),
                expected: schema.len(),
                actual: row.len(),
            }),
            _ => Ok(()),
        }
    }

    fn closed_error(&self, state: &ChannelState) -> Option<ChannelError> {
        if state.aborted {
            Some(ChannelError::Aborted {
                channel: self.name.clone(),
            })
        } else if state.done {
            Some(ChannelError::PushAfterDone {
                channel: self.name.clone(),
            })
        } else {
            None
        }
    }

    fn enqueue(&self, mut state: MutexGuard<'_, ChannelState>, row: Row) {
        state.buffer.push_back(row);
        state.rows_in += 1;
        drop(state);
        self.not_empty.notify_one();
    }

    /// Push a row, blocking while the buffer is at capacity.
    ///
    /// # Errors
    ///
    /// Fails if the channel was marked done or aborted, or if the row does
    /// not fit the attached schema.
    pub fn push(&self, row: Row) -> Result<(), ChannelError> {
        self.check_row(&row)?;
        let mut state = self.lock();
        loop {
            if let Some(err) = self.closed_error(&state) {
                return Err(err);
            }
            if state.buffer.len() < self.capacity {
                self.enqueue(state, row);
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`push`](Self::push) but gives up after `timeout`, handing the
    /// row back so the caller can check its stop flags and retry.
    ///
    /// # Errors
    ///
    /// Same as [`push`](Self::push).
    pub fn push_timeout(&self, row: Row, timeout: Duration) -> Result<Option<Row>, ChannelError> {
        self.check_row(&row)?;
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(err) = self.closed_error(&state) {
                return Err(err);
            }
            if state.buffer.len() < self.capacity {
                self.enqueue(state, row);
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Some(row));
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn take_front(&self, state: &mut ChannelState) -> Option<Row> {
        let row = state.buffer.pop_front()?;
        state.rows_out += 1;
        self.not_full.notify_one();
        Some(row)
    }

    /// Pop the next row, blocking while the buffer is empty.
    ///
    /// Returns `None` once the producer is done and the buffer is drained,
    /// and on every call after that.
    pub fn pop(&self) -> Option<Row> {
        let mut state = self.lock();
        loop {
            if let Some(row) = self.take_front(&mut state) {
                return Some(row);
            }
            if state.done {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Pop with an upper bound on the wait.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(row) = self.take_front(&mut state) {
                return Pop::Row(row);
            }
            if state.done {
                return Pop::Done;
            }
            let now = Instant::now();
            if now >= deadline {
                return Pop::Pending;
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn try_pop(&self) -> Pop {
        let mut state = self.lock();
        if let Some(row) = self.take_front(&mut state) {
            Pop::Row(row)
        } else if state.done {
            Pop::Done
        } else {
            Pop::Pending
        }
    }

    /// Producer signals no more rows. Idempotent.
    pub fn mark_done(&self) {
        let mut state = self.lock();
        state.done = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Hard stop: discard buffered rows and wake both ends.
    ///
    /// Returns the number of rows discarded.
    pub fn abort(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.buffer.len();
        state.buffer.clear();
        state.done = true;
        state.aborted = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        discarded
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        let state = self.lock();
        ChannelStats {
            rows_in: state.rows_in,
            rows_out: state.rows_out,
            buffered: state.buffer.len(),
            done: state.done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::{FieldMeta, FieldType, Value};

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Integer(v)])
    }

    #[test]
    fn fifo_order_and_counters() {
        let ch = RowChannel::new("a.0 - b.0", 8);
        for i in 0..5 {
            ch.push(row(i)).unwrap();
        }
        ch.mark_done();
        let got: Vec<i64> = std::iter::from_fn(|| ch.pop())
            .map(|r| r.get(0).and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        let stats = ch.stats();
        assert_eq!(stats.rows_in, 5);
        assert_eq!(stats.rows_out, 5);
        assert!(stats.done);
    }

    #[test]
    fn exhaustion_is_idempotent() {
        let ch = RowChannel::new("c", 2);
        ch.push(row(1)).unwrap();
        ch.mark_done();
        assert_eq!(ch.pop(), Some(row(1)));
        assert_eq!(ch.pop(), None);
        assert_eq!(ch.pop(), None);
        assert_eq!(ch.try_pop(), Pop::Done);
    }

    #[test]
    fn push_after_done_is_rejected() {
        let ch = RowChannel::new("c", 2);
        ch.mark_done();
        assert!(matches!(
            ch.push(row(1)),
            Err(ChannelError::PushAfterDone { .. })
        ));
    }

    #[test]
    fn push_timeout_hands_row_back_when_full() {
        let ch = RowChannel::new("c", 1);
        ch.push(row(1)).unwrap();
        let back = ch.push_timeout(row(2), Duration::from_millis(5)).unwrap();
        assert_eq!(back, Some(row(2)));
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn pop_timeout_reports_pending() {
        let ch = RowChannel::new("c", 1);
        assert_eq!(ch.pop_timeout(Duration::from_millis(5)), Pop::Pending);
    }

    #[test]
    fn abort_discards_and_unblocks() {
        let ch = RowChannel::new("c", 4);
        ch.push(row(1)).unwrap();
        ch.push(row(2)).unwrap();
        assert_eq!(ch.abort(), 2);
        assert_eq!(ch.pop(), None);
        assert!(matches!(ch.push(row(3)), Err(ChannelError::Aborted { .. })));
    }

    #[test]
    fn schema_length_is_enforced() {
        let ch = RowChannel::new("c", 4);
        let schema = RowSchema::new(vec![
            FieldMeta::new("a", FieldType::Integer),
            FieldMeta::new("b", FieldType::Integer),
        ])
        .unwrap();
        ch.set_schema(Arc::new(schema)).unwrap();
        assert!(matches!(
            ch.push(row(1)),
            Err(ChannelError::SchemaMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn first_schema_wins() {
        let ch = RowChannel::new("c", 4);
        let one = Arc::new(RowSchema::new(vec![FieldMeta::new("a", FieldType::Integer)]).unwrap());
        ch.set_schema(Arc::clone(&one)).unwrap();
        assert!(ch.set_schema(Arc::new(RowSchema::empty())).is_err());
        assert!(Arc::ptr_eq(&ch.schema().unwrap(), &one));
    }
}
