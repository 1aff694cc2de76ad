//! The tabular boundary: typed records in, episode tables out.
//!
//! Callers hand the engine polars DataFrames plus column-name configuration
//! ([`WindowColumns`], [`PeriodColumns`], [`EventColumns`]); the readers here
//! produce the typed records the engine works on, and [`episodes_to_frame`]
//! writes a finished partition back as one row per episode, sorted by
//! `(subject_id, start)`.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::{Column, DataFrame, NamedFrom, Series};
use tve_model::episode::AttrValue;
use tve_model::{
    Episode, EventColumns, EventRecord, ObservationWindow, PeriodColumns, PeriodRecord, Result,
    TveError, WindowColumns, sort_episodes,
};

use crate::data_utils::{any_to_day, any_to_f64, any_to_string, cell};

/// Period records read from a table, plus the number of rows that were
/// skipped for missing dates (a data-quality condition, not an error).
#[derive(Debug, Clone, Default)]
pub struct PeriodReadResult {
    pub records: Vec<PeriodRecord>,
    pub skipped_rows: usize,
}

fn require_column(df: &DataFrame, name: &str, what: &str) -> Result<()> {
    if df.get_column_names().iter().any(|c| c.as_str() == name) {
        return Ok(());
    }
    Err(TveError::validation(format!(
        "{what}: column '{name}' not found"
    )))
}

/// Read one observation window per subject from a cohort table.
///
/// Every row must carry a subject id and parseable entry/exit dates, and a
/// subject may appear only once.
pub fn read_windows(df: &DataFrame, columns: &WindowColumns) -> Result<Vec<ObservationWindow>> {
    for name in [&columns.subject, &columns.entry, &columns.exit] {
        require_column(df, name, "cohort table")?;
    }

    let mut seen = BTreeSet::new();
    let mut windows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let subject = any_to_string(cell(df, &columns.subject, idx));
        if subject.is_empty() {
            return Err(TveError::validation(format!(
                "cohort table: row {idx}: missing subject id"
            )));
        }
        if !seen.insert(subject.clone()) {
            return Err(TveError::validation(format!(
                "cohort table: subject {subject} appears more than once"
            )));
        }
        let entry = any_to_day(cell(df, &columns.entry, idx)).ok_or_else(|| {
            TveError::validation(format!("cohort table: row {idx}: unparseable entry date"))
        })?;
        let exit = any_to_day(cell(df, &columns.exit, idx)).ok_or_else(|| {
            TveError::validation(format!("cohort table: row {idx}: unparseable exit date"))
        })?;
        let window = ObservationWindow::new(subject, entry, exit);
        window.validate()?;
        windows.push(window);
    }
    windows.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
    Ok(windows)
}

/// Read raw exposure periods from a table.
///
/// Rows missing the start date (or the stop date, when a stop column is
/// configured) are skipped and counted rather than failing the batch. With
/// no stop column the table is treated as point-in-time: `stop = start`.
pub fn read_periods(df: &DataFrame, columns: &PeriodColumns) -> Result<PeriodReadResult> {
    require_column(df, &columns.subject, "exposure table")?;
    require_column(df, &columns.start, "exposure table")?;
    require_column(df, &columns.value, "exposure table")?;
    if let Some(stop) = &columns.stop {
        require_column(df, stop, "exposure table")?;
    }
    if let Some(quantity) = &columns.quantity {
        require_column(df, quantity, "exposure table")?;
    }

    let mut result = PeriodReadResult::default();
    for idx in 0..df.height() {
        let subject = any_to_string(cell(df, &columns.subject, idx));
        let start = any_to_day(cell(df, &columns.start, idx));
        let stop = match &columns.stop {
            Some(name) => any_to_day(cell(df, name, idx)),
            None => start,
        };
        let (Some(start), Some(stop)) = (start, stop) else {
            result.skipped_rows += 1;
            continue;
        };
        if subject.is_empty() || stop < start {
            result.skipped_rows += 1;
            continue;
        }
        let mut record =
            PeriodRecord::new(subject, start, stop, any_to_string(cell(df, &columns.value, idx)));
        if let Some(name) = &columns.quantity {
            record.quantity = any_to_f64(cell(df, name, idx));
        }
        result.records.push(record);
    }
    result.records.sort_by(|a, b| {
        a.subject_id
            .cmp(&b.subject_id)
            .then(a.start.cmp(&b.start))
            .then(a.stop.cmp(&b.stop))
    });
    Ok(result)
}

/// Read per-subject event records from an events table.
///
/// The primary date and every competing date may be null (no event of that
/// kind). Competing column names double as the risk labels.
pub fn read_events(df: &DataFrame, columns: &EventColumns) -> Result<Vec<EventRecord>> {
    require_column(df, &columns.subject, "events table")?;
    require_column(df, &columns.date, "events table")?;
    for name in &columns.competing {
        require_column(df, name, "events table")?;
    }

    let mut records = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let subject = any_to_string(cell(df, &columns.subject, idx));
        if subject.is_empty() {
            return Err(TveError::validation(format!(
                "events table: row {idx}: missing subject id"
            )));
        }
        let mut record = EventRecord::new(subject);
        record.primary = any_to_day(cell(df, &columns.date, idx));
        for name in &columns.competing {
            record
                .competing
                .push((name.clone(), any_to_day(cell(df, name, idx))));
        }
        records.push(record);
    }
    records.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
    Ok(records)
}

/// Column type chosen for an attribute when writing episodes to a table.
enum AttrColumnKind {
    Int,
    Float,
    Text,
}

fn attr_column_kind(episodes: &[Episode], name: &str) -> AttrColumnKind {
    let mut kind = AttrColumnKind::Int;
    for episode in episodes {
        match episode.attr(name) {
            None | Some(AttrValue::Int(_)) => {}
            Some(AttrValue::Float(_)) => {
                if matches!(kind, AttrColumnKind::Int) {
                    kind = AttrColumnKind::Float;
                }
            }
            Some(AttrValue::Text(_)) => return AttrColumnKind::Text,
        }
    }
    kind
}

/// Write an episode partition as a table: `subject_id`, `start`, `stop`
/// (day numbers), plus one column per attribute name.
///
/// Attribute columns are typed from their values: all-integer attributes
/// become `Int64`, numeric mixes become `Float64`, anything containing text
/// becomes a string column. Episodes missing an attribute yield nulls.
pub fn episodes_to_frame(episodes: &[Episode]) -> Result<DataFrame> {
    let mut sorted: Vec<Episode> = episodes.to_vec();
    sort_episodes(&mut sorted);

    let mut attr_names: BTreeSet<&str> = BTreeSet::new();
    for episode in &sorted {
        for name in episode.attrs.keys() {
            attr_names.insert(name.as_str());
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(3 + attr_names.len());
    let subjects: Vec<&str> = sorted.iter().map(|e| e.subject_id.as_str()).collect();
    let starts: Vec<i64> = sorted.iter().map(|e| e.start).collect();
    let stops: Vec<i64> = sorted.iter().map(|e| e.stop).collect();
    columns.push(Series::new("subject_id".into(), subjects).into());
    columns.push(Series::new("start".into(), starts).into());
    columns.push(Series::new("stop".into(), stops).into());

    for name in attr_names {
        match attr_column_kind(&sorted, name) {
            AttrColumnKind::Int => {
                let values: Vec<Option<i64>> = sorted
                    .iter()
                    .map(|e| e.attr(name).and_then(AttrValue::as_i64))
                    .collect();
                columns.push(Series::new(name.into(), values).into());
            }
            AttrColumnKind::Float => {
                let values: Vec<Option<f64>> = sorted
                    .iter()
                    .map(|e| e.attr(name).and_then(AttrValue::as_f64))
                    .collect();
                columns.push(Series::new(name.into(), values).into());
            }
            AttrColumnKind::Text => {
                let values: Vec<Option<String>> = sorted
                    .iter()
                    .map(|e| e.attr(name).map(|v| v.to_string()))
                    .collect();
                columns.push(Series::new(name.into(), values).into());
            }
        }
    }

    DataFrame::new(columns).map_err(|err| TveError::table(err.to_string()))
}

/// Per-subject summary counts exposed in build diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coverage {
    pub covered_days: i64,
    pub window_days: i64,
}

impl Coverage {
    pub fn gap_days(&self) -> i64 {
        self.window_days - self.covered_days
    }
}

/// Covered person-time per subject against the expected window length.
pub fn coverage_by_subject(
    episodes: &[Episode],
    windows: &[ObservationWindow],
) -> BTreeMap<String, Coverage> {
    let mut map: BTreeMap<String, Coverage> = BTreeMap::new();
    for window in windows {
        map.insert(
            window.subject_id.clone(),
            Coverage {
                covered_days: 0,
                window_days: window.duration(),
            },
        );
    }
    for episode in episodes {
        if let Some(entry) = map.get_mut(&episode.subject_id) {
            entry.covered_days += episode.duration();
        }
    }
    map
}
