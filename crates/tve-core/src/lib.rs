//! Engine for time-varying exposure histories in longitudinal cohorts.
//!
//! The engine turns raw exposure period records into a covering,
//! non-overlapping episode partition of each subject's observation window
//! ([`build_episodes`]), aligns several partitions onto shared boundaries
//! ([`merge_sources`]), and stamps outcome codes with competing-risk
//! resolution ([`integrate_events`]). The tabular boundary (polars frames in
//! and out) lives in [`frame`].

pub mod build;
pub mod data_utils;
pub mod events;
pub mod frame;
pub mod invariants;
pub mod merge;
pub mod resolve;
pub mod switching;

pub use build::{BuildOutput, build_episodes};
pub use events::{EventOutput, integrate_events};
pub use frame::{
    Coverage, PeriodReadResult, coverage_by_subject, episodes_to_frame, read_events, read_periods,
    read_windows,
};
pub use merge::{MergeOutput, merge_sources};
pub use resolve::resolve_overlaps;
