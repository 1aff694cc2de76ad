//! Post-stage structural checks.
//!
//! Each producer runs the checks relevant to its output contract and maps a
//! failure to `TveError::Invariant`. Zero-length point episodes ride on top
//! of the covering partition and are exempt from the overlap and coverage
//! rules; they only have to fall inside the subject's window.

use std::collections::BTreeMap;

use tve_model::{Episode, ObservationWindow, Result, TveError};

/// Within each subject, positive-length episodes must not overlap.
///
/// Expects canonical `(subject, start, stop)` order.
pub fn check_non_overlap(episodes: &[Episode]) -> Result<()> {
    let mut last: Option<&Episode> = None;
    for episode in episodes.iter().filter(|e| !e.is_point()) {
        if let Some(prev) = last
            && prev.subject_id == episode.subject_id
            && episode.start < prev.stop
        {
            return Err(TveError::invariant(format!(
                "subject {}: episodes [{}, {}) and [{}, {}) overlap",
                episode.subject_id, prev.start, prev.stop, episode.start, episode.stop
            )));
        }
        last = Some(episode);
    }
    Ok(())
}

/// Each subject's positive-length episodes must exactly tile the subject's
/// observation window, and every point episode must fall inside it.
///
/// Expects canonical order.
pub fn check_coverage(episodes: &[Episode], windows: &[ObservationWindow]) -> Result<()> {
    let by_subject: BTreeMap<&str, &ObservationWindow> =
        windows.iter().map(|w| (w.subject_id.as_str(), w)).collect();

    let mut cursor: BTreeMap<&str, i64> = BTreeMap::new();
    for episode in episodes {
        let subject = episode.subject_id.as_str();
        let Some(window) = by_subject.get(subject) else {
            return Err(TveError::invariant(format!(
                "subject {subject}: episodes exist but no observation window does"
            )));
        };
        if episode.is_point() {
            if episode.start < window.entry || episode.start > window.exit {
                return Err(TveError::invariant(format!(
                    "subject {subject}: point episode at {} lies outside [{}, {})",
                    episode.start, window.entry, window.exit
                )));
            }
            continue;
        }
        let expected = *cursor.get(subject).unwrap_or(&window.entry);
        if episode.start != expected {
            return Err(TveError::invariant(format!(
                "subject {subject}: expected episode starting at {expected}, found {}",
                episode.start
            )));
        }
        cursor.insert(subject, episode.stop);
    }

    for window in windows {
        if window.duration() == 0 {
            continue;
        }
        match cursor.get(window.subject_id.as_str()) {
            Some(end) if *end == window.exit => {}
            Some(end) => {
                return Err(TveError::invariant(format!(
                    "subject {}: coverage ends at {end}, window exits at {}",
                    window.subject_id, window.exit
                )));
            }
            None => {
                return Err(TveError::invariant(format!(
                    "subject {}: no episodes cover the observation window",
                    window.subject_id
                )));
            }
        }
    }
    Ok(())
}

/// An integer attribute must be non-decreasing over each subject's timeline
/// (ratcheting encodings such as ever-treated).
pub fn check_monotone(episodes: &[Episode], attr: &str) -> Result<()> {
    let mut last: BTreeMap<&str, i64> = BTreeMap::new();
    for episode in episodes {
        let Some(value) = episode.attr(attr).and_then(|v| v.as_i64()) else {
            continue;
        };
        let subject = episode.subject_id.as_str();
        if let Some(prev) = last.get(subject)
            && value < *prev
        {
            return Err(TveError::invariant(format!(
                "subject {subject}: attribute {attr} decreases from {prev} to {value}"
            )));
        }
        last.insert(subject, value);
    }
    Ok(())
}

/// Sum of a numeric attribute per subject, used for conservation checks.
pub fn attr_total_by_subject(episodes: &[Episode], attr: &str) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for episode in episodes {
        if let Some(value) = episode.attr(attr).and_then(|v| v.as_f64()) {
            *totals.entry(episode.subject_id.clone()).or_default() += value;
        }
    }
    totals
}
