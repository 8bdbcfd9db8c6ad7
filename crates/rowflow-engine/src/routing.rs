//! Output routing: which channel(s) receive a row a step copy puts.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;

use rowflow_types::{FieldMeta, FieldType, Row, RowError, RowSchema, StepError};

use crate::channel::RowChannel;
use crate::config::types::{Distribution, ErrorFieldNames};

/// One destination of a step copy's output.
#[derive(Debug)]
pub(crate) enum Lane {
    /// A single downstream copy.
    Channel(Arc<RowChannel>),
    /// Every copy of a partitioned target, indexed by target copy number.
    Partitioned {
        field: String,
        index: Option<usize>,
        channels: Vec<Arc<RowChannel>>,
    },
}

impl Lane {
    fn channels(&self) -> &[Arc<RowChannel>] {
        match self {
            Self::Channel(channel) => std::slice::from_ref(channel),
            Self::Partitioned { channels, .. } => channels,
        }
    }

    fn pick(&self, row: &Row) -> Result<Arc<RowChannel>, StepError> {
        match self {
            Self::Channel(channel) => Ok(Arc::clone(channel)),
            Self::Partitioned {
                field,
                index,
                channels,
            } => {
                let idx = index.ok_or_else(|| {
                    StepError::internal("PARTITION_UNBOUND", format!("partition field '{field}' is not bound"))
                })?;
                let value = row.get(idx).ok_or_else(|| {
                    StepError::schema("PARTITION_FIELD", format!("row has no value for partition field '{field}'"))
                        .with_field(field.clone())
                })?;
                let mut hasher = DefaultHasher::new();
                value.hash_into(&mut hasher);
                #[allow(clippy::cast_possible_truncation)]
                let slot = (hasher.finish() % channels.len() as u64) as usize;
                Ok(Arc::clone(&channels[slot]))
            }
        }
    }
}

/// Routes rows over a step copy's output lanes according to its
/// distribution mode.
#[derive(Debug)]
pub(crate) struct OutputRouter {
    lanes: Vec<Lane>,
    distribution: Distribution,
    next: usize,
}

impl OutputRouter {
    pub(crate) fn new(lanes: Vec<Lane>, distribution: Distribution) -> Self {
        let lanes = lanes
            .into_iter()
            .filter(|lane| !lane.channels().is_empty())
            .collect();
        Self {
            lanes,
            distribution,
            next: 0,
        }
    }

    /// Resolve partition field positions against the layout this copy emits.
    pub(crate) fn bind(&mut self, schema: &RowSchema) -> Result<(), StepError> {
        for lane in &mut self.lanes {
            if let Lane::Partitioned { field, index, .. } = lane {
                *index = Some(schema.require(field).map_err(|e| {
                    StepError::schema("PARTITION_FIELD", e.to_string()).with_field(field.clone())
                })?);
            }
        }
        Ok(())
    }

    /// Channels that must receive `row`. Empty for a sink.
    pub(crate) fn route(&mut self, row: &Row) -> Result<Vec<Arc<RowChannel>>, StepError> {
        if self.lanes.is_empty() {
            return Ok(Vec::new());
        }
        match self.distribution {
            Distribution::Copy => self.lanes.iter().map(|lane| lane.pick(row)).collect(),
            Distribution::RoundRobin => {
                let lane = &self.lanes[self.next % self.lanes.len()];
                self.next = self.next.wrapping_add(1);
                Ok(vec![lane.pick(row)?])
            }
        }
    }

    pub(crate) fn channels(&self) -> impl Iterator<Item = &Arc<RowChannel>> {
        self.lanes.iter().flat_map(Lane::channels)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

/// Layout of a step's error rows: the rejected row followed by the
/// diagnostic fields.
pub(crate) fn error_row_schema(base: &RowSchema, names: &ErrorFieldNames) -> Result<RowSchema, RowError> {
    base.extended([
        FieldMeta::new(names.count.clone(), FieldType::Integer),
        FieldMeta::new(names.description.clone(), FieldType::String),
        FieldMeta::new(names.field.clone(), FieldType::String),
        FieldMeta::new(names.code.clone(), FieldType::String),
    ])
}
