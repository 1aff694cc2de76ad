//! Data model for time-varying exposure histories.
//!
//! The model crate is shared by every engine component: episodes, observation
//! windows, raw period and event records, configuration options, the error
//! taxonomy, and diagnostics types.

pub mod diagnostics;
pub mod episode;
pub mod error;
pub mod options;

pub use diagnostics::{BuildDiagnostics, EventDiagnostics, MergeDiagnostics};
pub use episode::{
    AttrValue, Episode, EventRecord, ObservationWindow, PeriodRecord, date_to_day, day_to_date,
    sort_episodes,
};
pub use error::{Result, TveError};
pub use options::{
    BuildOptions, EncodingMode, EventColumns, EventOptions, EventType, MergeOptions,
    OverlapStrategy, PeriodColumns, TimeUnit, WindowColumns,
};
