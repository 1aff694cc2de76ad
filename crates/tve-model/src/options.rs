//! Configuration for the exposure-history engine.
//!
//! Each engine call receives an explicit, immutable options value; there is
//! no ambient or session-wide state. Mode-specific behavior is modeled as
//! closed enums (`OverlapStrategy`, `EncodingMode`) so exactly one strategy
//! and one encoding apply per invocation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TveError};

/// Unit for elapsed-time outputs and threshold lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    Days,
    /// Average month length: 30.4375 days.
    Months,
    /// Average year length: 365.25 days.
    Years,
}

impl TimeUnit {
    /// Days per one unit.
    pub fn days(self) -> f64 {
        match self {
            Self::Days => 1.0,
            Self::Months => 30.4375,
            Self::Years => 365.25,
        }
    }

    /// Express a day count in this unit.
    pub fn convert_days(self, days: i64) -> f64 {
        days as f64 / self.days()
    }
}

/// How simultaneously active period records are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverlapStrategy {
    /// An explicit ranking of categorical values; at any instant the
    /// highest-ranked active record wins. Values absent from the list rank
    /// below all listed values.
    Priority { order: Vec<String> },
    /// The most recently started record wins for categorical values;
    /// quantities of all active records are summed.
    Layer,
    /// No winner: every distinct combination of simultaneously active
    /// records becomes its own sub-interval, labeled with the sorted,
    /// `+`-joined set of values.
    Split,
}

impl Default for OverlapStrategy {
    fn default() -> Self {
        Self::Layer
    }
}

/// Exposure encoding applied to the resolved partition.
///
/// Exactly one encoding applies per build; combining encodings requires
/// separate builds merged afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodingMode {
    /// Attribute follows the resolved categorical value; unexposed time
    /// takes the reference value.
    Switching,
    /// Binary ratchet: 0 before first exposure, 1 from then on.
    EverTreated,
    /// Trichotomous: 0 never, 1 current, 2 former. Transitions 0->1->2 only.
    CurrentFormer,
    /// Cumulative exposed time bucketed against ascending thresholds
    /// (expressed in `unit`). Bucket 0 = never exposed, k = k-th bucket,
    /// `cuts.len() + 1` = beyond the last threshold.
    DurationBuckets { cuts: Vec<f64>, unit: TimeUnit },
    /// Running sum of the period quantity; continuous output, or bucketed
    /// like `DurationBuckets` when `cuts` is given.
    CumulativeQuantity { cuts: Option<Vec<f64>> },
    /// Bucket of elapsed time since the most recent exposure end
    /// (thresholds in `unit`). 0 never exposed, 1 currently exposed,
    /// 2.. by threshold.
    Recency { cuts: Vec<f64>, unit: TimeUnit },
}

impl Default for EncodingMode {
    fn default() -> Self {
        Self::Switching
    }
}

impl EncodingMode {
    /// Human-readable name, used in diagnostics and error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Switching => "switching",
            Self::EverTreated => "ever-treated",
            Self::CurrentFormer => "current/former",
            Self::DurationBuckets { .. } => "duration-buckets",
            Self::CumulativeQuantity { .. } => "cumulative-quantity",
            Self::Recency { .. } => "recency",
        }
    }
}

fn validate_cuts(cuts: &[f64], what: &str) -> Result<()> {
    if cuts.is_empty() {
        return Err(TveError::validation(format!("{what}: threshold list is empty")));
    }
    for pair in cuts.windows(2) {
        if pair[0] >= pair[1] {
            return Err(TveError::validation(format!(
                "{what}: thresholds must be strictly ascending, got {} then {}",
                pair[0], pair[1]
            )));
        }
    }
    if cuts[0] <= 0.0 {
        return Err(TveError::validation(format!(
            "{what}: thresholds must be positive, got {}",
            cuts[0]
        )));
    }
    Ok(())
}

/// Options for the exposure episode builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub mode: EncodingMode,
    pub strategy: OverlapStrategy,
    /// Value assigned to unexposed time (and the "never" category).
    pub reference: String,
    /// Output attribute name.
    pub generate: String,
    /// Gap (days) between same-value periods bridged as continuous exposure.
    pub grace: i64,
    /// Days before a period becomes active.
    pub lag: i64,
    /// Days a period persists after its nominal end.
    pub washout: i64,
    /// Fill unexposed gaps with the previous value instead of the reference.
    pub carry_forward: bool,
    /// Emit a per-subject 0/1 `has_switched` column.
    pub switching_indicator: bool,
    /// Emit a per-subject switching pattern column (`A->B->A`).
    pub switching_pattern: bool,
    /// Emit cumulative time in the current state, in days.
    pub state_time: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: EncodingMode::default(),
            strategy: OverlapStrategy::default(),
            reference: "0".to_string(),
            generate: "exposure".to_string(),
            grace: 0,
            lag: 0,
            washout: 0,
            carry_forward: false,
            switching_indicator: false,
            switching_pattern: false,
            state_time: false,
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: EncodingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: OverlapStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_generate(mut self, name: impl Into<String>) -> Self {
        self.generate = name.into();
        self
    }

    pub fn with_grace(mut self, days: i64) -> Self {
        self.grace = days;
        self
    }

    pub fn with_lag(mut self, days: i64) -> Self {
        self.lag = days;
        self
    }

    pub fn with_washout(mut self, days: i64) -> Self {
        self.washout = days;
        self
    }

    pub fn with_carry_forward(mut self, enable: bool) -> Self {
        self.carry_forward = enable;
        self
    }

    pub fn with_switching_indicator(mut self, enable: bool) -> Self {
        self.switching_indicator = enable;
        self
    }

    pub fn with_switching_pattern(mut self, enable: bool) -> Self {
        self.switching_pattern = enable;
        self
    }

    pub fn with_state_time(mut self, enable: bool) -> Self {
        self.state_time = enable;
        self
    }

    /// Check the configuration before any partitioning is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.generate.trim().is_empty() {
            return Err(TveError::validation("generate: output name is empty"));
        }
        for (name, value) in [("grace", self.grace), ("lag", self.lag), ("washout", self.washout)] {
            if value < 0 {
                return Err(TveError::validation(format!("{name}: must be >= 0, got {value}")));
            }
        }
        match &self.mode {
            EncodingMode::DurationBuckets { cuts, .. } => validate_cuts(cuts, "duration buckets")?,
            EncodingMode::Recency { cuts, .. } => validate_cuts(cuts, "recency buckets")?,
            EncodingMode::CumulativeQuantity { cuts: Some(cuts) } => {
                validate_cuts(cuts, "quantity buckets")?;
            }
            _ => {}
        }
        if let OverlapStrategy::Priority { order } = &self.strategy
            && order.is_empty()
        {
            return Err(TveError::validation("priority: order list is empty"));
        }
        Ok(())
    }
}

/// Options for the multi-source interval merger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Attribute names carrying continuous quantities, prorated when a
    /// source episode is subdivided.
    pub continuous: Vec<String>,
    /// Proceed with the intersection of subject ids instead of failing on a
    /// subject-id mismatch.
    pub allow_partial_subjects: bool,
    /// Keep sub-intervals not covered by every source (missing attributes
    /// stay absent) instead of dropping them.
    pub allow_partial_coverage: bool,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_continuous(mut self, names: Vec<String>) -> Self {
        self.continuous = names;
        self
    }

    pub fn with_partial_subjects(mut self, allow: bool) -> Self {
        self.allow_partial_subjects = allow;
        self
    }

    pub fn with_partial_coverage(mut self, allow: bool) -> Self {
        self.allow_partial_coverage = allow;
        self
    }
}

/// Whether an event terminates follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventType {
    /// Terminal: all person-time after the first event is discarded.
    #[default]
    Single,
    /// Later episodes continue to be processed after an event.
    Recurring,
}

/// Options for the event integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOptions {
    /// Name of the outcome-code attribute written onto each episode.
    pub generate: String,
    pub event_type: EventType,
    /// Continuous attributes to prorate when an episode is split.
    pub continuous: Vec<String>,
    /// Optional elapsed-time attribute (`stop - start` in `time_unit`).
    pub time_var: Option<String>,
    pub time_unit: TimeUnit,
    /// Allow overwriting an attribute that already exists on the episodes.
    pub overwrite: bool,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            generate: "event".to_string(),
            event_type: EventType::default(),
            continuous: Vec::new(),
            time_var: None,
            time_unit: TimeUnit::default(),
            overwrite: false,
        }
    }
}

impl EventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generate(mut self, name: impl Into<String>) -> Self {
        self.generate = name.into();
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_time_var(mut self, name: impl Into<String>, unit: TimeUnit) -> Self {
        self.time_var = Some(name.into());
        self.time_unit = unit;
        self
    }

    pub fn with_continuous(mut self, names: Vec<String>) -> Self {
        self.continuous = names;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.generate.trim().is_empty() {
            return Err(TveError::validation("generate: output name is empty"));
        }
        if let Some(name) = &self.time_var
            && name.trim().is_empty()
        {
            return Err(TveError::validation("time_var: output name is empty"));
        }
        Ok(())
    }
}

/// Column names mapping a cohort table to observation windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowColumns {
    pub subject: String,
    pub entry: String,
    pub exit: String,
}

/// Column names mapping an exposure table to period records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodColumns {
    pub subject: String,
    pub start: String,
    /// Absent for point-in-time tables; `start` is reused as the stop.
    pub stop: Option<String>,
    pub value: String,
    pub quantity: Option<String>,
}

/// Column names mapping an events table to event records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventColumns {
    pub subject: String,
    pub date: String,
    /// Competing-risk date columns; the column name doubles as the label.
    pub competing: Vec<String>,
}
