//! Step contract shared by every step kind.
//!
//! A kind's typed configuration implements [`StepMeta`] (arity, settings
//! checks, output-layout derivation, instantiation). The instance it creates
//! implements [`Step`] and is driven by one worker per copy.

use std::sync::Arc;

use rowflow_types::{RowSchema, StepError, StepId};

use crate::context::StepContext;
use crate::steps::preview::PreviewStore;
use crate::variables::VariableScope;

/// Number of incoming hops a step kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Source: no incoming hops.
    None,
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    #[must_use]
    pub fn accepts(self, hops: usize) -> bool {
        match self {
            Self::None => hops == 0,
            Self::Exactly(n) => hops == n,
            Self::AtLeast(n) => hops >= n,
        }
    }

    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::None => "no incoming hops".to_string(),
            Self::Exactly(1) => "exactly 1 incoming hop".to_string(),
            Self::Exactly(n) => format!("exactly {n} incoming hops"),
            Self::AtLeast(1) => "at least 1 incoming hop".to_string(),
            Self::AtLeast(n) => format!("at least {n} incoming hops"),
        }
    }
}

/// Outcome of one [`Step::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    /// No more rows will be produced.
    Done,
}

/// What a step instance may see while it is being created.
pub struct StepEnv<'a> {
    pub id: &'a StepId,
    pub variables: &'a VariableScope,
    pub previews: &'a PreviewStore,
    pub preview_limit: Option<usize>,
}

/// Static side of a step kind.
pub trait StepMeta {
    fn input_arity(&self) -> Arity;

    /// Settings problems, reported before any worker starts.
    fn check(&self) -> Vec<String> {
        Vec::new()
    }

    /// Output layout given the layouts of the incoming hops, in hop order.
    ///
    /// # Errors
    ///
    /// Returns a schema error when the inputs cannot be combined.
    fn output_schema(&self, inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError>;

    /// Build a runtime instance for one copy.
    ///
    /// # Errors
    ///
    /// Returns a config error when the instance cannot be built.
    fn create(&self, env: &StepEnv<'_>) -> Result<Box<dyn Step>, StepError>;
}

/// Runtime side of a step: one instance per copy, owned by its worker.
pub trait Step: Send {
    /// Called once, after the step's channels are wired and before the first
    /// `process` call.
    ///
    /// # Errors
    ///
    /// Any error fails the copy.
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Read, transform and write some rows.
    ///
    /// # Errors
    ///
    /// Any returned error is worker-fatal; row-level problems go through
    /// [`StepContext::reject`].
    fn process(&mut self, ctx: &mut StepContext) -> Result<Progress, StepError>;

    fn dispose(&mut self, _ctx: &mut StepContext) {}
}

/// Layout shared by every input, for steps that pass rows through.
///
/// # Errors
///
/// Fails when there is no input or the inputs disagree on names or types.
pub fn common_layout(inputs: &[Arc<RowSchema>]) -> Result<RowSchema, StepError> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| StepError::schema("NO_INPUT", "step has no incoming rows"))?;
    if let Some(other) = rest.iter().find(|s| !s.same_layout(first)) {
        return Err(StepError::schema(
            "MIXED_LAYOUTS",
            format!("incoming layouts differ: {first} vs {other}"),
        ));
    }
    Ok(first.as_ref().clone())
}
