//! Per-copy runtime handed to a [`Step`](crate::step::Step).
//!
//! Owns the copy's input channels and output routing, captures the output
//! layout on the first emitted row, redirects rejected rows to the error
//! hop and enforces the rejection thresholds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rowflow_types::{ErrorScope, LogLevel, Row, RowSchema, StepError, StepId, Value};

use crate::channel::{ChannelError, Pop, RowChannel};
use crate::config::types::ErrorHandlingConfig;
use crate::routing::OutputRouter;
use crate::run_state::{RunState, StepHandle};
use crate::variables::VariableScope;

/// Longest a worker blocks on a channel before re-checking its stop flag.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Error hop of a step copy.
#[derive(Debug)]
pub(crate) struct ErrorRoute {
    pub(crate) router: OutputRouter,
    pub(crate) schema: Arc<RowSchema>,
    pub(crate) policy: ErrorHandlingConfig,
}

/// Channels and layouts of one copy, as wired by the scheduler.
#[derive(Debug)]
pub(crate) struct StepIo {
    pub(crate) inputs: Vec<Arc<RowChannel>>,
    /// Layout expected on each input, derived before the run.
    pub(crate) input_schemas: Vec<Arc<RowSchema>>,
    pub(crate) output_schema: Arc<RowSchema>,
    pub(crate) router: OutputRouter,
    pub(crate) error: Option<ErrorRoute>,
}

pub struct StepContext {
    run: Arc<RunState>,
    handle: Arc<StepHandle>,
    variables: Arc<VariableScope>,
    io: StepIo,
    exhausted: Vec<bool>,
    next_input: usize,
    first_row: bool,
    rows_since_feedback: u64,
    last_feedback: Instant,
}

impl StepContext {
    pub(crate) fn new(
        run: Arc<RunState>,
        handle: Arc<StepHandle>,
        variables: Arc<VariableScope>,
        io: StepIo,
    ) -> Self {
        let exhausted = vec![false; io.inputs.len()];
        Self {
            run,
            handle,
            variables,
            io,
            exhausted,
            next_input: 0,
            first_row: true,
            rows_since_feedback: 0,
            last_feedback: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &StepId {
        &self.handle.id
    }

    #[must_use]
    pub fn variables(&self) -> &VariableScope {
        &self.variables
    }

    /// Number of input channels (ports) of this copy.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.io.inputs.len()
    }

    /// Layout of the rows arriving on `port`.
    ///
    /// The layout attached by the producer wins over the derived one.
    #[must_use]
    pub fn input_schema(&self, port: usize) -> Option<Arc<RowSchema>> {
        self.io
            .inputs
            .get(port)
            .and_then(|c| c.schema())
            .or_else(|| self.io.input_schemas.get(port).cloned())
    }

    #[must_use]
    pub fn output_schema(&self) -> &Arc<RowSchema> {
        &self.io.output_schema
    }

    #[must_use]
    pub fn has_error_route(&self) -> bool {
        self.io.error.is_some()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.handle.control.is_stopped()
    }

    #[must_use]
    pub fn is_safe_stop(&self) -> bool {
        self.handle.control.is_safe_stop()
    }

    fn accept(&mut self, port: usize, row: Row) -> Row {
        self.next_input = port + 1;
        self.handle.counters.add_read(1);
        self.rows_since_feedback += 1;
        if self.handle.listeners.is_active() {
            let schema = self
                .input_schema(port)
                .unwrap_or_else(|| Arc::new(RowSchema::empty()));
            let id = &self.handle.id;
            self.handle.listeners.each(|l| l.row_read(id, &schema, &row));
        }
        row
    }

    /// Next row from any input, rotating over the ports.
    ///
    /// Returns `Ok(None)` once every input is exhausted or the copy was
    /// stopped.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for input checks.
    pub fn read_row(&mut self) -> Result<Option<Row>, StepError> {
        let count = self.io.inputs.len();
        loop {
            if count == 0 || self.is_stopped() {
                return Ok(None);
            }
            let mut waiting_on = None;
            for offset in 0..count {
                let port = (self.next_input + offset) % count;
                if self.exhausted[port] {
                    continue;
                }
                match self.io.inputs[port].try_pop() {
                    Pop::Row(row) => return Ok(Some(self.accept(port, row))),
                    Pop::Done => self.exhausted[port] = true,
                    Pop::Pending => {
                        waiting_on.get_or_insert(port);
                    }
                }
            }
            let Some(port) = waiting_on else {
                return Ok(None);
            };
            match self.io.inputs[port].pop_timeout(POLL_INTERVAL) {
                Pop::Row(row) => return Ok(Some(self.accept(port, row))),
                Pop::Done => self.exhausted[port] = true,
                Pop::Pending => {}
            }
        }
    }

    /// Next row from one specific input.
    ///
    /// # Errors
    ///
    /// Fails if `port` does not exist.
    pub fn read_row_from(&mut self, port: usize) -> Result<Option<Row>, StepError> {
        let channel = self.io.inputs.get(port).cloned().ok_or_else(|| {
            StepError::internal("NO_SUCH_INPUT", format!("input port {port} does not exist"))
        })?;
        loop {
            if self.is_stopped() {
                return Ok(None);
            }
            match channel.pop_timeout(POLL_INTERVAL) {
                Pop::Row(row) => return Ok(Some(self.accept(port, row))),
                Pop::Done => {
                    self.exhausted[port] = true;
                    return Ok(None);
                }
                Pop::Pending => {}
            }
        }
    }

    /// First-row metadata capture: attach the output layouts to every
    /// outgoing channel and resolve partition fields.
    fn capture_output_schema(&mut self) -> Result<(), StepError> {
        if !self.first_row {
            return Ok(());
        }
        self.first_row = false;
        let attach = |channel: &Arc<RowChannel>, schema: &Arc<RowSchema>| {
            channel
                .set_schema(Arc::clone(schema))
                .map_err(|e| StepError::channel("SCHEMA_MISMATCH", e.to_string()))
        };
        for channel in self.io.router.channels() {
            attach(channel, &self.io.output_schema)?;
        }
        self.io.router.bind(&self.io.output_schema)?;
        if let Some(route) = self.io.error.as_mut() {
            for channel in route.router.channels() {
                attach(channel, &route.schema)?;
            }
            route.router.bind(&route.schema)?;
        }
        Ok(())
    }

    /// Push to one channel, waiting out backpressure in short slices so a
    /// stop request is noticed. Returns whether the row was delivered: rows
    /// put after a stop or into an aborted channel are dropped.
    fn push_to(&self, channel: &RowChannel, row: Row) -> Result<bool, StepError> {
        let mut row = row;
        loop {
            if self.is_stopped() {
                return Ok(false);
            }
            match channel.push_timeout(row, POLL_INTERVAL) {
                Ok(None) => return Ok(true),
                Ok(Some(back)) => row = back,
                Err(ChannelError::Aborted { .. }) => return Ok(false),
                Err(e) => return Err(StepError::channel("CHANNEL_PUSH", e.to_string())),
            }
        }
    }

    /// Push to every target. Returns whether at least one accepted the row.
    fn send(&self, targets: Vec<Arc<RowChannel>>, row: Row) -> Result<bool, StepError> {
        let Some((last, rest)) = targets.split_last() else {
            return Ok(false);
        };
        let mut delivered = false;
        for channel in rest {
            delivered |= self.push_to(channel, row.clone())?;
        }
        Ok(self.push_to(last, row)? || delivered)
    }

    /// Emit a row on the normal output.
    ///
    /// # Errors
    ///
    /// Fails when the row does not fit the output layout.
    pub fn put_row(&mut self, row: Row) -> Result<(), StepError> {
        self.capture_output_schema()?;
        let targets = self.io.router.route(&row)?;
        if targets.is_empty() {
            return Ok(());
        }
        let observed = self.handle.listeners.is_active().then(|| row.clone());
        if !self.send(targets, row)? {
            return Ok(());
        }
        self.handle.counters.add_written(1);
        self.rows_since_feedback += 1;
        if let Some(row) = observed {
            let (id, schema) = (&self.handle.id, &self.io.output_schema);
            self.handle.listeners.each(|l| l.row_written(id, schema, &row));
        }
        Ok(())
    }

    /// Reject a row with one error per failed check.
    ///
    /// With an error hop the row plus its diagnostics goes there and
    /// processing continues; without one the first error fails the copy.
    ///
    /// # Errors
    ///
    /// Returns a step-scope error when there is no error hop or a rejection
    /// threshold is exceeded.
    pub fn reject(&mut self, row: Row, errors: Vec<StepError>) -> Result<(), StepError> {
        if self.io.error.is_none() {
            let first = errors.into_iter().next().unwrap_or_else(|| {
                StepError::internal("EMPTY_REJECTION", "row rejected without a cause")
            });
            return Err(first.with_scope(ErrorScope::Step));
        }
        self.capture_output_schema()?;

        let counters = &self.handle.counters;
        counters.add_rejected(1);
        let Some(route) = self.io.error.as_mut() else {
            return Ok(());
        };
        if route.policy.count_as_errors {
            counters.add_errors(1);
        }
        tracing::debug!(
            step = %self.handle.id,
            errors = errors.len(),
            "Row redirected to error hop"
        );

        let mut row = row;
        row.extend(diagnostics(&errors));
        let targets = route.router.route(&row)?;
        let schema = Arc::clone(&route.schema);
        let observed = self.handle.listeners.is_active().then(|| row.clone());
        if self.send(targets, row)? {
            self.rows_since_feedback += 1;
            if let Some(row) = observed {
                let id = &self.handle.id;
                self.handle.listeners.each(|l| l.error_row_written(id, &schema, &row));
            }
        }
        self.check_thresholds()
    }

    fn check_thresholds(&self) -> Result<(), StepError> {
        let Some(policy) = self.io.error.as_ref().map(|r| &r.policy) else {
            return Ok(());
        };
        let counters = &self.handle.counters;
        let rejected = counters.lines_rejected();
        if let Some(max) = policy.max_errors {
            if rejected > max {
                return Err(StepError::data(
                    "MAX_ERRORS_EXCEEDED",
                    format!("{rejected} rows rejected, more than the allowed {max}"),
                )
                .with_scope(ErrorScope::Step));
            }
        }
        if let Some(max) = policy.max_percent_errors {
            let read = counters.lines_read() + counters.lines_input();
            if read > 0 && read >= policy.min_rows_for_percent {
                let percent = (rejected * 100).div_ceil(read);
                if percent > u64::from(max) {
                    return Err(StepError::data(
                        "MAX_PERCENT_ERRORS_EXCEEDED",
                        format!("{percent}% of {read} rows rejected, more than the allowed {max}%"),
                    )
                    .with_scope(ErrorScope::Step));
                }
            }
        }
        Ok(())
    }

    /// Sleep for `duration` in short slices. Returns `false` if the copy was
    /// stopped meanwhile.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Count rows a source produced from outside the pipeline.
    pub fn add_lines_input(&self, n: u64) {
        self.handle.counters.add_input(n);
    }

    /// Count rows a sink delivered outside the pipeline.
    pub fn add_lines_output(&self, n: u64) {
        self.handle.counters.add_output(n);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.run.log(&self.handle.id, level, message);
    }

    /// Publish a metrics snapshot every `feedback_rows` rows or
    /// `feedback_interval_ms`, whichever comes first.
    pub(crate) fn maybe_publish_metrics(&mut self) {
        let resources = &self.run.resources;
        let due_rows = self.rows_since_feedback >= resources.feedback_rows;
        let due_time =
            self.last_feedback.elapsed() >= Duration::from_millis(resources.feedback_interval_ms);
        if due_rows || due_time {
            self.run.publish_metrics(&self.handle);
            self.rows_since_feedback = 0;
            self.last_feedback = Instant::now();
        }
    }
}

/// Values appended to a rejected row: error count, descriptions, fields
/// and codes.
fn diagnostics(errors: &[StepError]) -> [Value; 4] {
    let description = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let fields = errors
        .iter()
        .filter_map(|e| e.field.as_deref())
        .collect::<Vec<_>>();
    let codes = errors
        .iter()
        .map(|e| e.code.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    [
        Value::Integer(i64::try_from(errors.len()).unwrap_or(i64::MAX)),
        Value::String(description),
        if fields.is_empty() {
            Value::Null
        } else {
            Value::String(fields.join(", "))
        },
        Value::String(codes),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::config::types::{Distribution, ErrorFieldNames, ResourceConfig};
    use crate::listener::RowListener;
    use crate::routing::{error_row_schema, Lane};
    use rowflow_types::{FieldMeta, FieldType};

    struct Fixture {
        ctx: StepContext,
        input: Arc<RowChannel>,
        output: Arc<RowChannel>,
        errors: Arc<RowChannel>,
    }

    fn schema() -> Arc<RowSchema> {
        Arc::new(RowSchema::new(vec![FieldMeta::new("id", FieldType::Integer)]).unwrap())
    }

    fn policy(max_errors: Option<u64>, max_percent: Option<u32>) -> ErrorHandlingConfig {
        ErrorHandlingConfig {
            target: "bad".into(),
            max_errors,
            max_percent_errors: max_percent,
            min_rows_for_percent: 0,
            count_as_errors: false,
            fields: ErrorFieldNames::default(),
        }
    }

    fn fixture(policy: Option<ErrorHandlingConfig>) -> Fixture {
        let input = Arc::new(RowChannel::new("in", 16));
        let output = Arc::new(RowChannel::new("out", 16));
        let errors = Arc::new(RowChannel::new("err", 16));
        let handle = Arc::new(StepHandle::new(
            StepId::new("check", 0),
            vec![Arc::clone(&input)],
            vec![Arc::clone(&output), Arc::clone(&errors)],
        ));
        let run = Arc::new(RunState::new(
            "p".into(),
            vec![Arc::clone(&handle)],
            vec![Arc::clone(&input), Arc::clone(&output), Arc::clone(&errors)],
            ResourceConfig::default(),
        ));
        let error = policy.map(|policy| ErrorRoute {
            router: OutputRouter::new(vec![Lane::Channel(Arc::clone(&errors))], Distribution::RoundRobin),
            schema: Arc::new(error_row_schema(&schema(), &policy.fields).unwrap()),
            policy,
        });
        let io = StepIo {
            inputs: vec![Arc::clone(&input)],
            input_schemas: vec![schema()],
            output_schema: schema(),
            router: OutputRouter::new(vec![Lane::Channel(Arc::clone(&output))], Distribution::RoundRobin),
            error,
        };
        Fixture {
            ctx: StepContext::new(run, handle, Arc::new(VariableScope::new()), io),
            input,
            output,
            errors,
        }
    }

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Integer(v)])
    }

    #[test]
    fn first_put_attaches_output_schema() {
        let mut f = fixture(None);
        assert!(f.output.schema().is_none());
        f.ctx.put_row(row(1)).unwrap();
        assert_eq!(f.output.schema().unwrap().len(), 1);
        assert_eq!(f.ctx.handle.counters.lines_written(), 1);
    }

    #[test]
    fn reads_until_inputs_are_done() {
        let mut f = fixture(None);
        f.input.push(row(1)).unwrap();
        f.input.mark_done();
        assert_eq!(f.ctx.read_row().unwrap(), Some(row(1)));
        assert_eq!(f.ctx.read_row().unwrap(), None);
        assert_eq!(f.ctx.handle.counters.lines_read(), 1);
    }

    #[test]
    fn reject_without_route_escalates_first_error() {
        let mut f = fixture(None);
        let err = f
            .ctx
            .reject(row(1), vec![StepError::data("NOT_NULL", "x is null")])
            .unwrap_err();
        assert_eq!(err.code, "NOT_NULL");
        assert!(!err.is_row_level());
    }

    #[test]
    fn reject_with_route_appends_diagnostics() {
        let mut f = fixture(Some(policy(None, None)));
        f.ctx
            .reject(
                row(7),
                vec![
                    StepError::data("NOT_NULL", "a is null").with_field("a"),
                    StepError::data("RANGE", "b out of range").with_field("b"),
                ],
            )
            .unwrap();
        let redirected = f.errors.pop().unwrap();
        assert_eq!(
            redirected.values(),
            &[
                Value::Integer(7),
                Value::Integer(2),
                Value::from("a is null; b out of range"),
                Value::from("a, b"),
                Value::from("NOT_NULL, RANGE"),
            ]
        );
        assert_eq!(f.ctx.handle.counters.lines_rejected(), 1);
        assert_eq!(f.ctx.handle.counters.errors(), 0);
        assert!(f.output.is_empty());
    }

    #[test]
    fn max_errors_threshold_fails_the_copy() {
        let mut f = fixture(Some(policy(Some(1), None)));
        let fail = || vec![StepError::data("X", "bad")];
        f.ctx.reject(row(1), fail()).unwrap();
        let err = f.ctx.reject(row(2), fail()).unwrap_err();
        assert_eq!(err.code, "MAX_ERRORS_EXCEEDED");
    }

    #[test]
    fn percent_threshold_uses_rows_read() {
        let mut f = fixture(Some(policy(None, Some(50))));
        for i in 0..4 {
            f.input.push(row(i)).unwrap();
        }
        for _ in 0..4 {
            f.ctx.read_row().unwrap();
        }
        let fail = || vec![StepError::data("X", "bad")];
        f.ctx.reject(row(0), fail()).unwrap();
        f.ctx.reject(row(1), fail()).unwrap();
        // 3 of 4 rejected = 75%
        assert_eq!(
            f.ctx.reject(row(2), fail()).unwrap_err().code,
            "MAX_PERCENT_ERRORS_EXCEEDED"
        );
    }

    #[test]
    fn dropped_rows_are_not_counted_as_written() {
        let mut f = fixture(None);
        f.ctx.put_row(row(1)).unwrap();
        f.output.abort();
        f.ctx.put_row(row(2)).unwrap();
        f.ctx.handle.control.stop();
        f.ctx.put_row(row(3)).unwrap();
        assert_eq!(f.ctx.handle.counters.lines_written(), 1);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(&'static str, usize, Row)>>);

    impl Recorder {
        fn record(&self, what: &'static str, schema: &RowSchema, row: &Row) {
            self.0.lock().unwrap().push((what, schema.len(), row.clone()));
        }
    }

    impl RowListener for Recorder {
        fn row_read(&self, _step: &StepId, schema: &RowSchema, row: &Row) {
            self.record("read", schema, row);
        }

        fn row_written(&self, _step: &StepId, schema: &RowSchema, row: &Row) {
            self.record("written", schema, row);
        }

        fn error_row_written(&self, _step: &StepId, schema: &RowSchema, row: &Row) {
            self.record("error", schema, row);
        }
    }

    #[test]
    fn listeners_observe_read_written_and_error_rows() {
        let mut f = fixture(Some(policy(None, None)));
        let recorder = Arc::new(Recorder::default());
        f.ctx.handle.listeners.add(recorder.clone());

        f.input.push(row(4)).unwrap();
        let read = f.ctx.read_row().unwrap().unwrap();
        f.ctx.put_row(read.clone()).unwrap();
        f.ctx
            .reject(read, vec![StepError::data("X", "bad")])
            .unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        let kinds: Vec<(&str, usize)> = seen.iter().map(|(k, n, _)| (*k, *n)).collect();
        assert_eq!(kinds, vec![("read", 1), ("written", 1), ("error", 5)]);
        assert_eq!(seen[2].2.values()[0], Value::Integer(4));
        assert_eq!(seen[2].2.values()[4], Value::from("X"));
    }

    #[test]
    fn sleep_is_cut_short_by_stop() {
        let f = fixture(None);
        f.ctx.handle.control.stop();
        assert!(!f.ctx.sleep(Duration::from_secs(10)));
    }
}
