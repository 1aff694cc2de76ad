//! Event integrator: stamps outcome codes onto an episode partition,
//! splitting at in-episode event dates and truncating follow-up after a
//! terminal event.
//!
//! An event at day `e` belongs to the episode `[start, stop)` with
//! `start < e <= stop`: the state during the episode that ends at (or
//! spans) the event is the state at the event. An event on the window
//! entry day is not attributable and leaves the subject censored.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;
use tve_model::{
    AttrValue, Episode, EventDiagnostics, EventOptions, EventRecord, EventType, Result, TveError,
    sort_episodes,
};

use crate::invariants;

/// A finished integration: the stamped partition plus its diagnostics.
#[derive(Debug, Clone)]
pub struct EventOutput {
    pub episodes: Vec<Episode>,
    pub diagnostics: EventDiagnostics,
}

/// Stamp outcome codes onto `episodes`.
///
/// Each subject's effective event is the earliest of the primary and
/// competing dates (code 1 for primary, 2.. for competing by label
/// position). Episodes before the event, and subjects without a qualifying
/// event, are censored with code 0. With `EventType::Single` all
/// person-time from the event onward is discarded.
pub fn integrate_events(
    episodes: &[Episode],
    events: &[EventRecord],
    options: &EventOptions,
) -> Result<EventOutput> {
    options.validate()?;
    check_overwrite(episodes, options)?;

    let mut diagnostics = EventDiagnostics {
        rows_in: episodes.len(),
        ..EventDiagnostics::default()
    };

    let episode_subjects: BTreeSet<&str> =
        episodes.iter().map(|e| e.subject_id.as_str()).collect();
    let mut effective: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for record in events {
        if !episode_subjects.contains(record.subject_id.as_str()) {
            diagnostics.unmatched_subjects += 1;
            continue;
        }
        if let Some(resolved) = record.effective() {
            effective.insert(record.subject_id.as_str(), resolved);
        }
    }
    if events.is_empty() {
        let message = "no event records; all episodes are censored".to_string();
        warn!("{message}");
        diagnostics.warnings.push(message);
    } else if diagnostics.unmatched_subjects > 0 {
        let message = format!(
            "{} event record(s) have no matching episodes",
            diagnostics.unmatched_subjects
        );
        warn!("{message}");
        diagnostics.warnings.push(message);
    }

    let mut out: Vec<Episode> = Vec::with_capacity(episodes.len());
    let mut idx = 0;
    while idx < episodes.len() {
        let subject = episodes[idx].subject_id.as_str();
        let end = idx
            + episodes[idx..]
                .iter()
                .position(|e| e.subject_id != subject)
                .unwrap_or(episodes.len() - idx);
        let status = stamp_subject(
            &episodes[idx..end],
            effective.get(subject).copied(),
            options,
            &mut out,
        );
        *diagnostics.events_by_code.entry(status).or_default() += 1;
        idx = end;
    }

    sort_episodes(&mut out);
    invariants::check_non_overlap(&out)?;

    diagnostics.rows_out = out.len();
    diagnostics.n_subjects = episode_subjects.len();
    Ok(EventOutput {
        episodes: out,
        diagnostics,
    })
}

fn check_overwrite(episodes: &[Episode], options: &EventOptions) -> Result<()> {
    if options.overwrite {
        return Ok(());
    }
    let mut reserved = vec![options.generate.as_str()];
    if let Some(name) = &options.time_var {
        reserved.push(name.as_str());
    }
    for name in reserved {
        if episodes.iter().any(|e| e.attr(name).is_some()) {
            return Err(TveError::validation(format!(
                "attribute {name} already exists; pass overwrite to replace it"
            )));
        }
    }
    Ok(())
}

/// Stamp one subject's episodes; returns the subject's final status code.
fn stamp_subject(
    episodes: &[Episode],
    event: Option<(i64, i64)>,
    options: &EventOptions,
    out: &mut Vec<Episode>,
) -> i64 {
    // An event date no episode can claim (at or before window entry, or
    // past the end of follow-up) leaves the subject censored with the full
    // follow-up intact.
    let event = event.filter(|(date, _)| {
        episodes
            .iter()
            .any(|e| e.start < *date && *date <= e.stop)
    });

    let mut status = 0;
    for episode in episodes {
        match event {
            // Entirely before the event (or no event at all).
            None => out.push(finish(episode.clone(), 0, options)),
            Some((date, _)) if date > episode.stop => {
                out.push(finish(episode.clone(), 0, options));
            }
            // The event falls inside or on the end of this episode.
            Some((date, code)) if episode.start < date => {
                status = code;
                if date < episode.stop {
                    let (before, after) = split_episode(episode, date, options);
                    out.push(finish(before, code, options));
                    if options.event_type == EventType::Recurring {
                        out.push(finish(after, 0, options));
                    }
                } else {
                    out.push(finish(episode.clone(), code, options));
                }
            }
            // At or after the event date: not attributable here.
            Some(_) => {
                if options.event_type == EventType::Recurring {
                    out.push(finish(episode.clone(), 0, options));
                }
            }
        }
    }
    status
}

/// Split at the event date, prorating the configured continuous attributes.
fn split_episode(episode: &Episode, date: i64, options: &EventOptions) -> (Episode, Episode) {
    let mut before = episode.clone();
    before.stop = date;
    let mut after = episode.clone();
    after.start = date;
    let total = episode.duration() as f64;
    for name in &options.continuous {
        if let Some(value) = episode.attr(name).and_then(|v| v.as_f64()) {
            before.set_attr(name.clone(), AttrValue::Float(value * before.duration() as f64 / total));
            after.set_attr(name.clone(), AttrValue::Float(value * after.duration() as f64 / total));
        }
    }
    (before, after)
}

fn finish(mut episode: Episode, code: i64, options: &EventOptions) -> Episode {
    episode.set_attr(options.generate.clone(), AttrValue::Int(code));
    if let Some(name) = &options.time_var {
        let elapsed = options.time_unit.convert_days(episode.duration());
        episode.set_attr(name.clone(), AttrValue::Float(elapsed));
    }
    episode
}
