//! Summary counts returned by each engine component.
//!
//! Diagnostics never abort a call: data-quality conditions (empty events
//! table, uncovered person-time) are reported here while the component falls
//! back to a safe default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Diagnostics from the exposure episode builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    /// Raw period records read.
    pub rows_in: usize,
    /// Episodes produced.
    pub rows_out: usize,
    pub n_subjects: usize,
    /// Total person-days across output episodes.
    pub person_days: i64,
    /// Subjects whose windows had zero length.
    pub zero_length_windows: usize,
    pub warnings: Vec<String>,
}

/// Diagnostics from the multi-source merger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeDiagnostics {
    pub n_sources: usize,
    pub rows_out: usize,
    pub n_subjects: usize,
    /// Subjects present in some but not all sources.
    pub mismatched_subjects: usize,
    pub warnings: Vec<String>,
}

/// Diagnostics from the event integrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDiagnostics {
    pub rows_in: usize,
    pub rows_out: usize,
    pub n_subjects: usize,
    /// Subjects by final outcome code (0 = censored).
    pub events_by_code: BTreeMap<i64, usize>,
    /// Event records whose subject id matched no episode.
    pub unmatched_subjects: usize,
    pub warnings: Vec<String>,
}

impl EventDiagnostics {
    /// Number of subjects with a non-censored outcome.
    pub fn event_count(&self) -> usize {
        self.events_by_code
            .iter()
            .filter(|(code, _)| **code != 0)
            .map(|(_, count)| count)
            .sum()
    }
}
