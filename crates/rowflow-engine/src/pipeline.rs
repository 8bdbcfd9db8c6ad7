//! Pipeline scheduler: turns a validated definition into wired workers,
//! starts them and aggregates their outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rowflow_types::{EventKind, PipelineStatus, RowSchema, StepId, StepMetrics, StepStatus};
use tokio::task::JoinSet;

use crate::channel::RowChannel;
use crate::config::types::{Copies, Distribution, PipelineConfig, StepConfig};
use crate::config::validator;
use crate::context::{ErrorRoute, StepIo};
use crate::errors::PipelineError;
use crate::events::EventStream;
use crate::execution::ExecutionOptions;
use crate::graph;
use crate::listener::RowListener;
use crate::result::{PipelineResult, StepSchema};
use crate::routing::{error_row_schema, Lane, OutputRouter};
use crate::run_state::{RunState, StepHandle};
use crate::steps::StepKind;
use crate::variables::{VariableScope, PIPELINE_NAME};
use crate::wiring::{channel_name, copy_pairs};
use crate::worker::{self, WorkerPlan};

/// A step whose settings have been bound and whose copies are resolved.
struct BoundStep<'a> {
    config: &'a StepConfig,
    kind: StepKind,
    copies: u32,
}

/// Wiring of one step copy, filled hop by hop.
#[derive(Default)]
struct CopyWiring {
    inputs: Vec<Arc<RowChannel>>,
    input_schemas: Vec<Arc<RowSchema>>,
    lanes: Vec<Lane>,
    error_lanes: Vec<Lane>,
}

impl CopyWiring {
    fn output_channels(&self) -> Vec<Arc<RowChannel>> {
        self.lanes
            .iter()
            .chain(&self.error_lanes)
            .flat_map(|lane| match lane {
                Lane::Channel(channel) => vec![Arc::clone(channel)],
                Lane::Partitioned { channels, .. } => channels.clone(),
            })
            .collect()
    }
}

/// Cloneable remote control of a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineController {
    state: Arc<RunState>,
}

impl PipelineController {
    /// Hard stop: every worker stops at its next check and buffered rows
    /// are discarded.
    pub fn kill_all(&self) {
        self.state.kill_all();
    }

    /// Cooperative stop: sources stop producing, rows already in flight
    /// drain through the graph.
    pub fn safe_stop(&self) {
        self.state.safe_stop();
    }

    /// Pause every copy of a running pipeline. Returns `false` when the
    /// pipeline is not running (not started, already paused, or done).
    pub fn pause(&self) -> bool {
        self.state.pause()
    }

    /// Resume a paused pipeline. Returns `false` when it was not paused.
    pub fn resume(&self) -> bool {
        self.state.resume()
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.state.events.status()
    }

    /// Observe every row read, written or rejected by each copy of `step`.
    /// Returns the number of copies the listener was attached to.
    pub fn add_row_listener(&self, step: &str, listener: &Arc<dyn RowListener>) -> usize {
        self.state.add_row_listener(step, listener)
    }

    /// Detach a listener added with [`add_row_listener`](Self::add_row_listener).
    pub fn remove_row_listener(&self, step: &str, listener: &Arc<dyn RowListener>) -> usize {
        self.state.remove_row_listener(step, listener)
    }

    /// Live snapshot of every copy's counters.
    #[must_use]
    pub fn step_metrics(&self) -> Vec<StepMetrics> {
        self.state.step_metrics()
    }

    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.state.events.subscribe()
    }
}

/// One prepared pipeline run.
pub struct Pipeline {
    state: Arc<RunState>,
    plans: Vec<WorkerPlan>,
    tasks: Option<JoinSet<Result<StepStatus, PipelineError>>>,
    schemas: Vec<StepSchema>,
    started: Option<Instant>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipeline", &self.state.pipeline)
            .field("copies", &self.state.handles.len())
            .field("channels", &self.state.channels.len())
            .field("started", &self.started.is_some())
            .finish_non_exhaustive()
    }
}

fn config_error(problems: Vec<String>) -> Result<(), PipelineError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Config(problems))
    }
}

/// Pipeline scope: environment, then pipeline variables, then overrides.
fn pipeline_scope(config: &PipelineConfig, options: &ExecutionOptions) -> VariableScope {
    let root = Arc::new(VariableScope::from_env());
    let mut scope = VariableScope::child(&root);
    for (name, value) in config.variable_values() {
        scope.set(name, value);
    }
    for (name, value) in &options.variables {
        scope.set(name.clone(), value.clone());
    }
    scope.set(PIPELINE_NAME, config.pipeline.clone());
    scope
}

fn resolve_copies(step: &StepConfig, scope: &VariableScope) -> Result<u32, String> {
    match &step.copies {
        Copies::Count(n) => Ok(*n),
        Copies::Expr(expr) => {
            let resolved = scope.substitute(expr);
            match resolved.trim().parse::<u32>() {
                Ok(n) if n >= 1 => Ok(n),
                _ => Err(format!(
                    "Step '{}': copies '{expr}' resolved to '{resolved}', expected an integer >= 1",
                    step.name
                )),
            }
        }
    }
}

fn bind_steps<'a>(
    config: &'a PipelineConfig,
    scope: &VariableScope,
) -> Result<Vec<BoundStep<'a>>, PipelineError> {
    let incoming = graph::incoming_counts(config);
    let mut problems = Vec::new();
    let mut bound = Vec::with_capacity(config.steps.len());
    for (i, step) in config.steps.iter().enumerate() {
        let kind = match StepKind::from_settings(scope.substitute_json(&step.settings())) {
            Ok(kind) => kind,
            Err(e) => {
                problems.push(format!("Step '{}': {e}", step.name));
                continue;
            }
        };
        let copies = resolve_copies(step, scope).unwrap_or_else(|e| {
            problems.push(e);
            1
        });
        let meta = kind.meta();
        problems.extend(
            meta.check()
                .into_iter()
                .map(|p| format!("Step '{}': {p}", step.name)),
        );
        let arity = meta.input_arity();
        if !arity.accepts(incoming[i]) {
            problems.push(format!(
                "Step '{}' ({}) expects {}, found {}",
                step.name,
                step.kind,
                arity.describe(),
                incoming[i]
            ));
        }
        bound.push(BoundStep {
            config: step,
            kind,
            copies,
        });
    }
    config_error(problems)?;
    Ok(bound)
}

/// Output and error layouts of every step, derived in topological order.
fn derive_schemas(
    config: &PipelineConfig,
    steps: &[BoundStep<'_>],
) -> Result<(Vec<Arc<RowSchema>>, Vec<Option<Arc<RowSchema>>>), PipelineError> {
    let order = graph::topological_order(config).map_err(|cycle| {
        PipelineError::Config(vec![format!("Pipeline graph has a cycle through: {}", cycle.join(", "))])
    })?;
    let n = steps.len();
    let mut outputs: Vec<Option<Arc<RowSchema>>> = vec![None; n];
    let mut errors: Vec<Option<Arc<RowSchema>>> = vec![None; n];
    let mut problems = Vec::new();

    for i in order {
        let step = &steps[i];
        let name = &step.config.name;
        let mut inputs = Vec::new();
        let mut upstream_missing = false;
        for hop in config.hops.iter().filter(|h| h.enabled && &h.to == name) {
            let Some(from) = config.step_index(&hop.from) else {
                continue;
            };
            let source = if config.is_error_hop(hop) {
                &errors[from]
            } else {
                &outputs[from]
            };
            match source {
                Some(schema) => inputs.push(Arc::clone(schema)),
                None => upstream_missing = true,
            }
        }
        if upstream_missing {
            continue;
        }

        let output = match step.kind.meta().output_schema(&inputs) {
            Ok(schema) => Arc::new(schema),
            Err(e) => {
                problems.push(format!("Step '{name}': {e}"));
                continue;
            }
        };
        if let Some(policy) = &step.config.error_handling {
            let base = inputs.first().unwrap_or(&output);
            match error_row_schema(base, &policy.fields) {
                Ok(schema) => errors[i] = Some(Arc::new(schema)),
                Err(e) => problems.push(format!("Step '{name}': error row layout: {e}")),
            }
        }
        outputs[i] = Some(output);
    }

    for hop in config.hops.iter().filter(|h| h.enabled) {
        let (Some(partition), Some(from)) = (&hop.partition, config.step_index(&hop.from)) else {
            continue;
        };
        let source = if config.is_error_hop(hop) {
            &errors[from]
        } else {
            &outputs[from]
        };
        if let Some(schema) = source {
            if schema.index_of(&partition.field).is_none() {
                problems.push(format!(
                    "Hop '{}' -> '{}': partition field '{}' not found in {schema}",
                    hop.from, hop.to, partition.field
                ));
            }
        }
    }

    config_error(problems)?;
    // Every step has an output once no problem was reported.
    let outputs = outputs
        .into_iter()
        .map(|o| o.unwrap_or_else(|| Arc::new(RowSchema::empty())))
        .collect();
    Ok((outputs, errors))
}

impl Pipeline {
    /// Validate `config`, bind every step, derive schemas and wire channels.
    /// No worker runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] listing every problem found.
    pub fn prepare(config: &PipelineConfig, options: &ExecutionOptions) -> Result<Self, PipelineError> {
        config_error(validator::collect_errors(config))?;
        let scope = Arc::new(pipeline_scope(config, options));
        let steps = bind_steps(config, &scope)?;
        let (outputs, error_outputs) = derive_schemas(config, &steps)?;

        let mut resources = config.resources.clone();
        if let Some(capacity) = options.channel_capacity {
            resources.channel_capacity = capacity.max(1);
        }

        let mut wiring: Vec<Vec<CopyWiring>> = steps
            .iter()
            .map(|s| (0..s.copies).map(|_| CopyWiring::default()).collect())
            .collect();
        let mut channels = Vec::new();

        for hop in config.hops.iter().filter(|h| h.enabled) {
            let (Some(from), Some(to)) = (config.step_index(&hop.from), config.step_index(&hop.to)) else {
                continue;
            };
            let is_error = config.is_error_hop(hop);
            let schema = match (&error_outputs[from], is_error) {
                (Some(errors), true) => Arc::clone(errors),
                (None, true) => Arc::new(RowSchema::empty()),
                (_, false) => Arc::clone(&outputs[from]),
            };
            let (sources, targets) = (steps[from].copies, steps[to].copies);
            let partition = hop.partition.as_ref().filter(|_| targets > 1);

            let mut by_source: BTreeMap<u32, Vec<Arc<RowChannel>>> = BTreeMap::new();
            for (sc, tc) in copy_pairs(sources, targets, partition.is_some()) {
                let channel = Arc::new(RowChannel::new(
                    channel_name(&hop.from, sc, &hop.to, tc),
                    resources.channel_capacity,
                ));
                let target = &mut wiring[to][tc as usize];
                target.inputs.push(Arc::clone(&channel));
                target.input_schemas.push(Arc::clone(&schema));
                by_source.entry(sc).or_default().push(Arc::clone(&channel));
                channels.push(channel);
            }

            for (sc, hop_channels) in by_source {
                let source = &mut wiring[from][sc as usize];
                let lanes = if is_error {
                    &mut source.error_lanes
                } else {
                    &mut source.lanes
                };
                match partition {
                    Some(p) => lanes.push(Lane::Partitioned {
                        field: p.field.clone(),
                        index: None,
                        channels: hop_channels,
                    }),
                    None => lanes.extend(hop_channels.into_iter().map(Lane::Channel)),
                }
            }
        }

        let mut handles = Vec::new();
        let mut pending = Vec::new();
        for (i, copies) in wiring.into_iter().enumerate() {
            for (copy, w) in copies.into_iter().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let id = StepId::new(steps[i].config.name.clone(), copy as u32);
                let handle = Arc::new(StepHandle::new(id, w.inputs.clone(), w.output_channels()));
                handles.push(Arc::clone(&handle));
                pending.push((i, handle, w));
            }
        }

        let state = Arc::new(RunState::new(
            config.pipeline.clone(),
            handles,
            channels,
            resources,
        ));

        let plans = pending
            .into_iter()
            .map(|(i, handle, w)| {
                let step = steps[i].config;
                let error = step.error_handling.as_ref().map(|policy| ErrorRoute {
                    router: OutputRouter::new(w.error_lanes, Distribution::RoundRobin),
                    schema: error_outputs[i]
                        .clone()
                        .unwrap_or_else(|| Arc::clone(&outputs[i])),
                    policy: policy.clone(),
                });
                WorkerPlan {
                    handle,
                    settings: step.settings(),
                    scope: Arc::clone(&scope),
                    io: StepIo {
                        inputs: w.inputs,
                        input_schemas: w.input_schemas,
                        output_schema: Arc::clone(&outputs[i]),
                        router: OutputRouter::new(w.lanes, step.distribution),
                        error,
                    },
                    preview_limit: options.preview_limit,
                }
            })
            .collect();

        let order = graph::topological_order(config).unwrap_or_default();
        let schemas = order
            .into_iter()
            .map(|i| StepSchema {
                step: steps[i].config.name.clone(),
                kind: steps[i].config.kind.clone(),
                copies: steps[i].copies,
                output: outputs[i].as_ref().clone(),
                error_output: error_outputs[i].as_ref().map(|s| s.as_ref().clone()),
            })
            .collect();

        tracing::info!(
            pipeline = %config.pipeline,
            steps = steps.len(),
            copies = state.handles.len(),
            channels = state.channels.len(),
            "Pipeline prepared"
        );

        Ok(Self {
            state,
            plans,
            tasks: None,
            schemas,
            started: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.pipeline
    }

    /// Derived layouts, in topological order.
    #[must_use]
    pub fn schemas(&self) -> &[StepSchema] {
        &self.schemas
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.state.channels.len()
    }

    #[must_use]
    pub fn controller(&self) -> PipelineController {
        PipelineController {
            state: Arc::clone(&self.state),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.state.events.subscribe()
    }

    pub fn kill_all(&self) {
        self.state.kill_all();
    }

    pub fn safe_stop(&self) {
        self.state.safe_stop();
    }

    #[must_use]
    pub fn step_metrics(&self) -> Vec<StepMetrics> {
        self.state.step_metrics()
    }

    /// Start one worker thread per step copy.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or when the pipeline was already started.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.tasks.is_some() {
            return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "Pipeline '{}' was already started",
                self.state.pipeline
            )));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("Pipeline needs a tokio runtime: {e}"))
        })?;

        self.state.events.publish(EventKind::PipelineStatus {
            status: PipelineStatus::Running,
        });
        tracing::info!(pipeline = %self.state.pipeline, workers = self.plans.len(), "Starting pipeline");
        self.started = Some(Instant::now());

        let mut tasks = JoinSet::new();
        for plan in self.plans.drain(..) {
            tasks.spawn_on(worker::spawn(Arc::clone(&self.state), plan), &runtime);
        }
        self.tasks = Some(tasks);
        Ok(())
    }

    /// Wait for every worker to reach a terminal status and aggregate the
    /// run. Starts the pipeline first if needed.
    ///
    /// A failed run is still `Ok`; see [`PipelineResult::ensure_success`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] when a worker task panicked.
    pub async fn wait_until_finished(mut self) -> Result<PipelineResult, PipelineError> {
        if self.tasks.is_none() {
            self.start()?;
        }
        let mut infrastructure: Option<PipelineError> = None;
        if let Some(tasks) = self.tasks.as_mut() {
            while let Some(joined) = tasks.join_next().await {
                let failure = match joined {
                    Ok(Ok(_)) => continue,
                    Ok(Err(error)) => error,
                    Err(join_err) => PipelineError::Infrastructure(anyhow::anyhow!(
                        "Worker task failed: {join_err}"
                    )),
                };
                tracing::error!(pipeline = %self.state.pipeline, "{failure}");
                self.state.kill_all();
                infrastructure.get_or_insert(failure);
            }
        }

        for handle in &self.state.handles {
            if !handle.counters.status().is_terminal() {
                handle.mark_outputs_done();
                self.state.publish_status(handle, StepStatus::Failed);
            }
        }

        let statuses: Vec<StepStatus> = self.state.handles.iter().map(|h| h.counters.status()).collect();
        let status = if statuses.contains(&StepStatus::Failed) {
            PipelineStatus::Failed
        } else if self.state.is_killed() || statuses.contains(&StepStatus::Stopped) {
            PipelineStatus::Stopped
        } else {
            PipelineStatus::Finished
        };
        self.state.events.publish(EventKind::PipelineStatus { status });

        if let Some(error) = infrastructure {
            return Err(error);
        }

        let steps = self.state.step_metrics();
        let errors: u64 = steps.iter().map(|m| m.errors).sum();
        let duration_secs = self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or_default();
        tracing::info!(
            pipeline = %self.state.pipeline,
            status = status.as_str(),
            errors,
            duration_secs,
            "Pipeline finished"
        );

        Ok(PipelineResult {
            pipeline: self.state.pipeline.clone(),
            status,
            errors,
            first_error: self.state.first_failure(),
            steps,
            previews: self.state.previews.snapshot(),
            duration_secs,
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.tasks.as_ref().is_some_and(|t| !t.is_empty()) {
            self.state.kill_all();
        }
    }
}
