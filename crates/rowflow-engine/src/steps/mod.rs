//! Built-in step kinds.

pub mod add_constants;
pub mod delay;
pub mod dummy;
pub mod filter;
pub mod preview;
pub mod rows;
pub mod sequence;
pub mod sorted_merge;
pub mod validate;

use serde::Deserialize;

use crate::step::StepMeta;

pub use add_constants::AddConstantsConfig;
pub use delay::DelayConfig;
pub use dummy::DummyConfig;
pub use filter::FilterConfig;
pub use preview::{PreviewConfig, PreviewStore};
pub use rows::RowsConfig;
pub use sequence::SequenceConfig;
pub use sorted_merge::SortedMergeConfig;
pub use validate::ValidateConfig;

/// Typed settings of a step, selected by its `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Rows(RowsConfig),
    Sequence(SequenceConfig),
    AddConstants(AddConstantsConfig),
    Filter(FilterConfig),
    Validate(ValidateConfig),
    SortedMerge(SortedMergeConfig),
    Delay(DelayConfig),
    Dummy(DummyConfig),
    Preview(PreviewConfig),
}

impl StepKind {
    /// Bind a step's settings (including `kind`) to its typed configuration.
    ///
    /// # Errors
    ///
    /// Fails on an unknown kind or settings that do not fit the kind.
    pub fn from_settings(settings: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(settings)
    }

    #[must_use]
    pub fn meta(&self) -> &dyn StepMeta {
        match self {
            Self::Rows(c) => c,
            Self::Sequence(c) => c,
            Self::AddConstants(c) => c,
            Self::Filter(c) => c,
            Self::Validate(c) => c,
            Self::SortedMerge(c) => c,
            Self::Delay(c) => c,
            Self::Dummy(c) => c,
            Self::Preview(c) => c,
        }
    }

    /// True for kinds that produce rows without reading any.
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Rows(_) | Self::Sequence(_))
    }
}
