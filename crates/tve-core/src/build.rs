//! Exposure episode builder: observation windows plus raw period records
//! become a covering, non-overlapping episode partition under one of six
//! exposure encodings.
//!
//! Per subject the pipeline is: clip records to the window, apply lag and
//! washout, bridge same-value gaps within the grace period, resolve
//! overlaps, fill unexposed time (baseline, interior gaps, tail), apply the
//! encoding mode, collapse equal adjacent episodes, and check invariants.

use std::collections::BTreeMap;

use tracing::warn;
use tve_model::{
    BuildDiagnostics, BuildOptions, EncodingMode, Episode, ObservationWindow, PeriodRecord,
    Result, TveError, sort_episodes,
};

use crate::invariants;
use crate::resolve::{apply_lag, apply_washout, bridge_gaps, clip_to_window, resolve_overlaps};
use crate::switching::apply_switching_columns;

/// A finished build: the episode partition plus its diagnostics.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub episodes: Vec<Episode>,
    pub diagnostics: BuildDiagnostics,
}

/// One covering segment of a subject's window before encoding.
#[derive(Debug, Clone)]
struct Segment {
    start: i64,
    stop: i64,
    value: String,
    quantity: Option<f64>,
    /// Whether this segment represents exposure (value != reference).
    exposed: bool,
}

impl Segment {
    fn len(&self) -> i64 {
        self.stop - self.start
    }

    fn is_point(&self) -> bool {
        self.start == self.stop
    }
}

/// Build a time-varying exposure partition for a cohort.
///
/// `windows` carries one observation window per subject; `records` the raw
/// exposure periods. Records for subjects outside the cohort are ignored.
/// Configuration problems are rejected before any episode is produced.
pub fn build_episodes(
    windows: &[ObservationWindow],
    records: &[PeriodRecord],
    options: &BuildOptions,
) -> Result<BuildOutput> {
    options.validate()?;
    for window in windows {
        window.validate()?;
    }

    let mut diagnostics = BuildDiagnostics {
        rows_in: records.len(),
        ..BuildDiagnostics::default()
    };

    let mut by_subject: BTreeMap<&str, Vec<PeriodRecord>> = BTreeMap::new();
    for record in records {
        by_subject
            .entry(record.subject_id.as_str())
            .or_default()
            .push(record.clone());
    }

    if !records.is_empty() {
        let any_match = windows
            .iter()
            .any(|w| by_subject.contains_key(w.subject_id.as_str()));
        if !any_match {
            return Err(TveError::validation(
                "no subject id in the exposure records matches the cohort",
            ));
        }
    }

    let mut episodes: Vec<Episode> = Vec::new();
    for window in windows {
        if window.duration() == 0 {
            diagnostics.zero_length_windows += 1;
        }
        let subject_records = by_subject
            .get(window.subject_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let segments = assemble_segments(window, subject_records, options);
        let encoded = encode_segments(window, &segments, options);
        episodes.extend(encoded);
    }

    if options.switching_indicator || options.switching_pattern || options.state_time {
        apply_switching_columns(&mut episodes, options);
    }

    sort_episodes(&mut episodes);
    invariants::check_non_overlap(&episodes)?;
    invariants::check_coverage(&episodes, windows)?;

    if diagnostics.zero_length_windows > 0 {
        let message = format!(
            "{} subject(s) have zero-length observation windows",
            diagnostics.zero_length_windows
        );
        warn!("{message}");
        diagnostics.warnings.push(message);
    }

    diagnostics.rows_out = episodes.len();
    diagnostics.n_subjects = windows.len();
    diagnostics.person_days = episodes.iter().map(Episode::duration).sum();
    Ok(BuildOutput {
        episodes,
        diagnostics,
    })
}

/// Resolve one subject's records and fill the window into a covering
/// segment sequence (plus preserved zero-length points).
fn assemble_segments(
    window: &ObservationWindow,
    records: &[PeriodRecord],
    options: &BuildOptions,
) -> Vec<Segment> {
    let mut active = clip_to_window(records, window.entry, window.exit);
    apply_lag(&mut active, options.lag);
    apply_washout(&mut active, options.washout, window.exit);
    let active = bridge_gaps(&active, options.grace);
    let resolved = resolve_overlaps(&active, &options.strategy);

    let reference = options.reference.as_str();
    let to_segment = |r: &PeriodRecord| Segment {
        start: r.start,
        stop: r.stop,
        value: r.value.clone(),
        quantity: r.quantity,
        exposed: r.value != reference,
    };
    let filler = |start: i64, stop: i64, value: &str| Segment {
        start,
        stop,
        value: value.to_string(),
        quantity: None,
        exposed: value != reference,
    };

    let (points, spans): (Vec<&PeriodRecord>, Vec<&PeriodRecord>) =
        resolved.iter().partition(|r| r.is_point());

    // Filler time is split at exposed point days, so ratcheting encodings
    // (ever-treated, current/former, duration, recency) can step at a
    // point-in-time exposure even though it has zero length.
    let point_days: Vec<i64> = points
        .iter()
        .filter(|p| p.value != reference)
        .map(|p| p.start)
        .collect();
    let fill = |segments: &mut Vec<Segment>, start: i64, stop: i64, value: &str| {
        let mut lo = start;
        for day in &point_days {
            if *day > lo && *day < stop {
                segments.push(filler(lo, *day, value));
                lo = *day;
            }
        }
        segments.push(filler(lo, stop, value));
    };

    let mut segments: Vec<Segment> = Vec::with_capacity(spans.len() * 2 + points.len() + 1);
    let mut cursor = window.entry;
    let mut previous_value: Option<&str> = None;
    for span in &spans {
        if span.start > cursor {
            let fill_value = match (options.carry_forward, previous_value) {
                (true, Some(value)) => value,
                _ => reference,
            };
            fill(&mut segments, cursor, span.start, fill_value);
        }
        segments.push(to_segment(span));
        cursor = span.stop;
        previous_value = Some(span.value.as_str());
    }
    if cursor < window.exit || (segments.is_empty() && points.is_empty()) {
        // Tail after the last exposure (or the whole window when there is
        // none) always reverts to the reference value.
        fill(&mut segments, cursor, window.exit, reference);
    }

    for point in points {
        segments.push(to_segment(point));
    }
    segments.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));
    segments
}

/// Threshold lists are expressed in the mode's time unit; crossings happen
/// at the first whole day on or after the exact crossing instant.
fn crossing_offset(threshold: f64) -> i64 {
    threshold.ceil() as i64
}

fn encode_segments(
    window: &ObservationWindow,
    segments: &[Segment],
    options: &BuildOptions,
) -> Vec<Episode> {
    let first_exposure = segments.iter().filter(|s| s.exposed).map(|s| s.start).min();

    let mut episodes: Vec<Episode> = Vec::with_capacity(segments.len());
    let mut emit = |start: i64, stop: i64, value: tve_model::AttrValue| {
        episodes.push(
            Episode::new(window.subject_id.clone(), start, stop).with_attr(&options.generate, value),
        );
    };

    match &options.mode {
        EncodingMode::Switching => {
            for segment in segments {
                emit(segment.start, segment.stop, segment.value.as_str().into());
            }
        }
        EncodingMode::EverTreated => {
            for segment in segments {
                let treated = match first_exposure {
                    Some(first) => i64::from(segment.start >= first),
                    None => 0,
                };
                emit(segment.start, segment.stop, treated.into());
            }
        }
        EncodingMode::CurrentFormer => {
            for segment in segments {
                let state = if segment.exposed {
                    1
                } else {
                    match first_exposure {
                        Some(first) if segment.start >= first => 2,
                        _ => 0,
                    }
                };
                emit(segment.start, segment.stop, state.into());
            }
        }
        EncodingMode::DurationBuckets { cuts, unit } => {
            let cuts_days: Vec<f64> = cuts.iter().map(|c| c * unit.days()).collect();
            let mut cumulative: i64 = 0;
            for segment in segments {
                if !segment.exposed || segment.is_point() {
                    let bucket = duration_bucket(cumulative, first_exposure, segment, &cuts_days);
                    emit(segment.start, segment.stop, bucket.into());
                    continue;
                }
                // Split the exposed segment at the exact days where the
                // running total crosses a threshold.
                let mut piece_start = segment.start;
                for cut in &cuts_days {
                    let offset = *cut - cumulative as f64;
                    if offset <= 0.0 {
                        continue;
                    }
                    let split = segment.start + crossing_offset(offset);
                    if split <= piece_start || split >= segment.stop {
                        continue;
                    }
                    let elapsed = cumulative + (piece_start - segment.start);
                    emit(piece_start, split, bucket_index(elapsed as f64, &cuts_days).into());
                    piece_start = split;
                }
                let elapsed = cumulative + (piece_start - segment.start);
                emit(piece_start, segment.stop, bucket_index(elapsed as f64, &cuts_days).into());
                cumulative += segment.len();
            }
        }
        EncodingMode::CumulativeQuantity { cuts } => {
            let mut cumulative = 0.0f64;
            for segment in segments {
                if segment.exposed
                    && let Some(quantity) = segment.quantity
                {
                    cumulative += quantity;
                }
                match cuts {
                    Some(cuts) => {
                        let bucket = if cumulative > 0.0 {
                            bucket_index(cumulative, cuts)
                        } else {
                            0
                        };
                        emit(segment.start, segment.stop, bucket.into());
                    }
                    None => emit(segment.start, segment.stop, cumulative.into()),
                }
            }
        }
        EncodingMode::Recency { cuts, unit } => {
            let cuts_days: Vec<f64> = cuts.iter().map(|c| c * unit.days()).collect();
            let mut last_end: Option<i64> = None;
            for segment in segments {
                if segment.exposed {
                    emit(segment.start, segment.stop, 1i64.into());
                    last_end = Some(last_end.map_or(segment.stop, |e: i64| e.max(segment.stop)));
                    continue;
                }
                let Some(end) = last_end else {
                    emit(segment.start, segment.stop, 0i64.into());
                    continue;
                };
                // Split the unexposed segment where elapsed time since the
                // last exposure end crosses a threshold.
                let mut piece_start = segment.start;
                for cut in &cuts_days {
                    let split = end + crossing_offset(*cut);
                    if split <= piece_start || split >= segment.stop {
                        continue;
                    }
                    emit(piece_start, split, recency_bucket(piece_start - end, &cuts_days).into());
                    piece_start = split;
                }
                emit(piece_start, segment.stop, recency_bucket(piece_start - end, &cuts_days).into());
            }
        }
    }

    collapse_equal_adjacent(episodes)
}

/// Bucket index for a cumulative total that has begun accruing:
/// 1 below the first threshold, `k + 1` at or past the k-th.
fn bucket_index(total: f64, cuts: &[f64]) -> i64 {
    1 + cuts.iter().filter(|c| **c <= total).count() as i64
}

fn duration_bucket(
    cumulative: i64,
    first_exposure: Option<i64>,
    segment: &Segment,
    cuts_days: &[f64],
) -> i64 {
    let begun = segment.exposed
        || matches!(first_exposure, Some(first) if segment.start >= first);
    if begun {
        bucket_index(cumulative as f64, cuts_days)
    } else {
        0
    }
}

/// Recency bucket: 2 immediately after exposure ends, stepping up at each
/// threshold. (0 = never exposed and 1 = currently exposed are assigned by
/// the caller.)
fn recency_bucket(elapsed: i64, cuts_days: &[f64]) -> i64 {
    2 + cuts_days
        .iter()
        .filter(|c| crossing_offset(**c) <= elapsed)
        .count() as i64
}

/// Merge adjacent, contiguous episodes whose attributes are identical.
/// Zero-length point episodes are never merged away.
fn collapse_equal_adjacent(episodes: Vec<Episode>) -> Vec<Episode> {
    let mut collapsed: Vec<Episode> = Vec::with_capacity(episodes.len());
    for episode in episodes {
        if let Some(prev) = collapsed.last_mut()
            && !prev.is_point()
            && !episode.is_point()
            && prev.stop == episode.start
            && prev.attrs == episode.attrs
        {
            prev.stop = episode.stop;
            continue;
        }
        collapsed.push(episode);
    }
    collapsed
}
