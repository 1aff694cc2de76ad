//! Optional per-subject switching columns layered onto a built partition:
//! a 0/1 switch indicator, the ordered value pattern (`A->B->A`), and the
//! cumulative time spent in the current state.

use tve_model::{AttrValue, BuildOptions, Episode};

/// Attach the requested switching columns in place.
///
/// Episodes are expected in per-subject time order, as produced by the
/// builder before global sorting.
pub fn apply_switching_columns(episodes: &mut [Episode], options: &BuildOptions) {
    let mut idx = 0;
    while idx < episodes.len() {
        let subject_end = subject_run_end(episodes, idx);
        annotate_subject(&mut episodes[idx..subject_end], options);
        idx = subject_end;
    }
}

fn subject_run_end(episodes: &[Episode], start: usize) -> usize {
    let subject = episodes[start].subject_id.as_str();
    episodes[start..]
        .iter()
        .position(|e| e.subject_id != subject)
        .map(|offset| start + offset)
        .unwrap_or(episodes.len())
}

fn annotate_subject(episodes: &mut [Episode], options: &BuildOptions) {
    let values: Vec<String> = episodes
        .iter()
        .map(|e| {
            e.attr(&options.generate)
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .collect();

    // Consecutive duplicates collapsed; the remainder is the switch path.
    let mut path: Vec<&str> = Vec::new();
    for value in &values {
        if path.last() != Some(&value.as_str()) {
            path.push(value);
        }
    }
    let has_switched = i64::from(path.len() > 1);
    let pattern = path.join("->");

    let mut state_value: Option<&str> = None;
    let mut state_days: i64 = 0;
    for (episode, value) in episodes.iter_mut().zip(&values) {
        if options.state_time {
            if state_value == Some(value.as_str()) {
                state_days += episode.duration();
            } else {
                state_value = Some(value);
                state_days = episode.duration();
            }
            episode.set_attr("state_time", AttrValue::Int(state_days));
        }
        if options.switching_indicator {
            episode.set_attr("has_switched", AttrValue::Int(has_switched));
        }
        if options.switching_pattern {
            episode.set_attr("switch_pattern", AttrValue::Text(pattern.clone()));
        }
    }
}
