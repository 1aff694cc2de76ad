//! Multi-source interval merger: aligns two or more episode partitions of
//! the same cohort onto the union of their boundaries, so every output
//! sub-interval carries the attributes of all sources at once.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;
use tve_model::{
    AttrValue, Episode, MergeDiagnostics, MergeOptions, Result, TveError, sort_episodes,
};

use crate::invariants;

/// A finished merge: the combined partition plus its diagnostics.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub episodes: Vec<Episode>,
    pub diagnostics: MergeDiagnostics,
}

/// Merge `sources` (each a canonical episode partition) into one partition.
///
/// Output boundaries are the union of all source boundaries; an output
/// interval exists where every source covers it (or wherever any source
/// does, with `allow_partial_coverage`). Continuous attributes are prorated
/// by sub-interval length; all other attributes are copied. Zero-length
/// point episodes pass through unchanged.
pub fn merge_sources(sources: &[&[Episode]], options: &MergeOptions) -> Result<MergeOutput> {
    if sources.len() < 2 {
        return Err(TveError::validation(format!(
            "merge needs at least two sources, got {}",
            sources.len()
        )));
    }
    for (idx, source) in sources.iter().enumerate() {
        // The overlap check expects canonical order; callers are not
        // required to provide it.
        let mut ordered = source.to_vec();
        sort_episodes(&mut ordered);
        invariants::check_non_overlap(&ordered).map_err(|e| {
            TveError::validation(format!("source {idx} is not a valid partition: {e}"))
        })?;
    }
    check_attr_collisions(sources)?;

    let mut diagnostics = MergeDiagnostics {
        n_sources: sources.len(),
        ..MergeDiagnostics::default()
    };

    let subject_sets: Vec<BTreeSet<&str>> = sources
        .iter()
        .map(|s| s.iter().map(|e| e.subject_id.as_str()).collect())
        .collect();
    let union: BTreeSet<&str> = subject_sets.iter().flatten().copied().collect();
    let shared: BTreeSet<&str> = union
        .iter()
        .filter(|s| subject_sets.iter().all(|set| set.contains(**s)))
        .copied()
        .collect();
    diagnostics.mismatched_subjects = union.len() - shared.len();
    if diagnostics.mismatched_subjects > 0 {
        if !options.allow_partial_subjects {
            return Err(TveError::validation(format!(
                "{} subject(s) are missing from at least one source",
                diagnostics.mismatched_subjects
            )));
        }
        let message = format!(
            "{} subject(s) missing from at least one source were dropped",
            diagnostics.mismatched_subjects
        );
        warn!("{message}");
        diagnostics.warnings.push(message);
    }

    let mut episodes: Vec<Episode> = Vec::new();
    let mut uncovered_days: i64 = 0;
    for subject in &shared {
        let per_source: Vec<Vec<&Episode>> = sources
            .iter()
            .map(|s| s.iter().filter(|e| e.subject_id == *subject).collect())
            .collect();
        uncovered_days += merge_subject(subject, &per_source, options, &mut episodes);
    }
    if uncovered_days > 0 && !options.allow_partial_coverage {
        let message =
            format!("{uncovered_days} person-day(s) not covered by every source were dropped");
        warn!("{message}");
        diagnostics.warnings.push(message);
    }

    sort_episodes(&mut episodes);
    invariants::check_non_overlap(&episodes)?;

    diagnostics.rows_out = episodes.len();
    diagnostics.n_subjects = shared.len();
    Ok(MergeOutput {
        episodes,
        diagnostics,
    })
}

/// Attribute names may not be shared between sources; a collision would
/// make the merged row ambiguous.
fn check_attr_collisions(sources: &[&[Episode]]) -> Result<()> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, source) in sources.iter().enumerate() {
        let names: BTreeSet<&str> = source
            .iter()
            .flat_map(|e| e.attrs.keys().map(String::as_str))
            .collect();
        for name in names {
            if let Some(other) = seen.get(name)
                && *other != idx
            {
                return Err(TveError::validation(format!(
                    "attribute {name} appears in sources {other} and {idx}"
                )));
            }
            seen.insert(name, idx);
        }
    }
    Ok(())
}

/// Merge one subject; returns the number of person-days dropped because not
/// every source covered them.
fn merge_subject(
    subject: &str,
    per_source: &[Vec<&Episode>],
    options: &MergeOptions,
    out: &mut Vec<Episode>,
) -> i64 {
    let mut boundaries: BTreeSet<i64> = BTreeSet::new();
    for episodes in per_source {
        for episode in episodes.iter().filter(|e| !e.is_point()) {
            boundaries.insert(episode.start);
            boundaries.insert(episode.stop);
        }
    }

    let mut uncovered = 0;
    let bounds: Vec<i64> = boundaries.iter().copied().collect();
    for pair in bounds.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let covering: Vec<Option<&Episode>> = per_source
            .iter()
            .map(|episodes| {
                episodes
                    .iter()
                    .copied()
                    .find(|e| !e.is_point() && e.start <= lo && e.stop >= hi)
            })
            .collect();
        let n_covering = covering.iter().flatten().count();
        if n_covering == 0 {
            // A hole in every source (between two disjoint regions).
            continue;
        }
        if n_covering < per_source.len() && !options.allow_partial_coverage {
            uncovered += hi - lo;
            continue;
        }
        let mut merged = Episode::new(subject, lo, hi);
        for episode in covering.into_iter().flatten() {
            copy_attrs(episode, &mut merged, options);
        }
        out.push(merged);
    }

    for episodes in per_source {
        for episode in episodes.iter().filter(|e| e.is_point()) {
            out.push((*episode).clone());
        }
    }
    uncovered
}

fn copy_attrs(source: &Episode, target: &mut Episode, options: &MergeOptions) {
    let share = if source.duration() > 0 {
        target.duration() as f64 / source.duration() as f64
    } else {
        1.0
    };
    for (name, value) in &source.attrs {
        let copied = if options.continuous.iter().any(|c| c == name)
            && let Some(v) = value.as_f64()
        {
            AttrValue::Float(v * share)
        } else {
            value.clone()
        };
        target.set_attr(name.clone(), copied);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(subject: &str, start: i64, stop: i64, name: &str, value: AttrValue) -> Episode {
        Episode::new(subject, start, stop).with_attr(name, value)
    }

    #[test]
    fn boundaries_union_and_attrs_combine() {
        let exposure = vec![
            episode("P1", 0, 50, "exposure", AttrValue::Text("A".into())),
            episode("P1", 50, 100, "exposure", AttrValue::Text("0".into())),
        ];
        let comed = vec![
            episode("P1", 0, 30, "statin", AttrValue::Int(0)),
            episode("P1", 30, 100, "statin", AttrValue::Int(1)),
        ];
        let output = merge_sources(&[&exposure, &comed], &MergeOptions::new()).unwrap();
        let spans: Vec<(i64, i64)> = output.episodes.iter().map(|e| (e.start, e.stop)).collect();
        assert_eq!(spans, vec![(0, 30), (30, 50), (50, 100)]);
        assert_eq!(
            output.episodes[1].attr("exposure"),
            Some(&AttrValue::Text("A".into()))
        );
        assert_eq!(output.episodes[1].attr("statin"), Some(&AttrValue::Int(1)));
    }

    #[test]
    fn identical_boundaries_do_not_split() {
        let a = vec![episode("P1", 0, 50, "x", AttrValue::Int(1))];
        let b = vec![episode("P1", 0, 50, "y", AttrValue::Int(2))];
        let output = merge_sources(&[&a, &b], &MergeOptions::new()).unwrap();
        assert_eq!(output.episodes.len(), 1);
        assert_eq!(output.episodes[0].attr("x"), Some(&AttrValue::Int(1)));
        assert_eq!(output.episodes[0].attr("y"), Some(&AttrValue::Int(2)));
    }

    #[test]
    fn continuous_attrs_are_prorated() {
        let dose = vec![episode("P1", 0, 20, "dose", AttrValue::Float(100.0))];
        let flag = vec![
            episode("P1", 0, 5, "flag", AttrValue::Int(0)),
            episode("P1", 5, 20, "flag", AttrValue::Int(1)),
        ];
        let options = MergeOptions::new().with_continuous(vec!["dose".to_string()]);
        let output = merge_sources(&[&dose, &flag], &options).unwrap();
        assert_eq!(output.episodes[0].attr("dose"), Some(&AttrValue::Float(25.0)));
        assert_eq!(output.episodes[1].attr("dose"), Some(&AttrValue::Float(75.0)));
        let total = invariants::attr_total_by_subject(&output.episodes, "dose");
        assert_eq!(total.get("P1"), Some(&100.0));
    }

    #[test]
    fn attr_collision_rejected() {
        let a = vec![episode("P1", 0, 10, "x", AttrValue::Int(1))];
        let b = vec![episode("P1", 0, 10, "x", AttrValue::Int(2))];
        let err = merge_sources(&[&a, &b], &MergeOptions::new()).unwrap_err();
        assert!(matches!(err, TveError::Validation(_)));
    }

    #[test]
    fn subject_mismatch_rejected_by_default() {
        let a = vec![episode("P1", 0, 10, "x", AttrValue::Int(1))];
        let b = vec![episode("P2", 0, 10, "y", AttrValue::Int(2))];
        let err = merge_sources(&[&a, &b], &MergeOptions::new()).unwrap_err();
        assert!(matches!(err, TveError::Validation(_)));

        let output =
            merge_sources(&[&a, &b], &MergeOptions::new().with_partial_subjects(true)).unwrap();
        assert!(output.episodes.is_empty());
        assert_eq!(output.diagnostics.mismatched_subjects, 2);
    }

    #[test]
    fn partial_coverage_dropped_unless_allowed() {
        let a = vec![episode("P1", 0, 100, "x", AttrValue::Int(1))];
        let b = vec![episode("P1", 20, 60, "y", AttrValue::Int(2))];

        let strict = merge_sources(&[&a, &b], &MergeOptions::new()).unwrap();
        let spans: Vec<(i64, i64)> = strict.episodes.iter().map(|e| (e.start, e.stop)).collect();
        assert_eq!(spans, vec![(20, 60)]);
        assert_eq!(strict.diagnostics.warnings.len(), 1);

        let lenient =
            merge_sources(&[&a, &b], &MergeOptions::new().with_partial_coverage(true)).unwrap();
        let spans: Vec<(i64, i64)> = lenient.episodes.iter().map(|e| (e.start, e.stop)).collect();
        assert_eq!(spans, vec![(0, 20), (20, 60), (60, 100)]);
        assert_eq!(lenient.episodes[0].attr("y"), None);
    }

    #[test]
    fn three_sources_merge() {
        let a = vec![episode("P1", 0, 30, "a", AttrValue::Int(1))];
        let b = vec![episode("P1", 0, 30, "b", AttrValue::Int(2))];
        let c = vec![
            episode("P1", 0, 15, "c", AttrValue::Int(3)),
            episode("P1", 15, 30, "c", AttrValue::Int(4)),
        ];
        let output = merge_sources(&[&a, &b, &c], &MergeOptions::new()).unwrap();
        assert_eq!(output.episodes.len(), 2);
        assert_eq!(output.diagnostics.n_sources, 3);
        assert_eq!(output.episodes[0].attrs.len(), 3);
    }

    #[test]
    fn point_episodes_pass_through() {
        let a = vec![
            episode("P1", 0, 50, "x", AttrValue::Int(1)),
            episode("P1", 25, 25, "x", AttrValue::Int(9)),
        ];
        let b = vec![episode("P1", 0, 50, "y", AttrValue::Int(2))];
        let output = merge_sources(&[&a, &b], &MergeOptions::new()).unwrap();
        let point = output.episodes.iter().find(|e| e.is_point()).unwrap();
        assert_eq!(point.start, 25);
        assert_eq!(point.attr("x"), Some(&AttrValue::Int(9)));
    }

    #[test]
    fn single_source_rejected() {
        let a = vec![episode("P1", 0, 10, "x", AttrValue::Int(1))];
        assert!(merge_sources(&[&a], &MergeOptions::new()).is_err());
    }

    #[test]
    fn unsorted_source_accepted() {
        let a = vec![
            episode("P1", 10, 20, "x", AttrValue::Int(2)),
            episode("P1", 0, 10, "x", AttrValue::Int(1)),
        ];
        let b = vec![episode("P1", 0, 20, "y", AttrValue::Int(3))];
        let output = merge_sources(&[&a, &b], &MergeOptions::new()).unwrap();
        let spans: Vec<(i64, i64)> = output.episodes.iter().map(|e| (e.start, e.stop)).collect();
        assert_eq!(spans, vec![(0, 10), (10, 20)]);
        assert_eq!(output.episodes[1].attr("x"), Some(&AttrValue::Int(2)));
    }

    #[test]
    fn overlapping_source_rejected() {
        let a = vec![
            episode("P1", 0, 10, "x", AttrValue::Int(1)),
            episode("P1", 5, 15, "x", AttrValue::Int(2)),
        ];
        let b = vec![episode("P1", 0, 15, "y", AttrValue::Int(3))];
        assert!(merge_sources(&[&a, &b], &MergeOptions::new()).is_err());
    }
}
