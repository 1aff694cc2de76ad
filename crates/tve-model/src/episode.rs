//! Canonical types for time-varying exposure histories.
//!
//! Time is represented as an `i64` day number (days since 1970-01-01).
//! All intervals are half-open `[start, stop)`: the duration of an interval
//! is `stop - start`, consecutive episodes share a boundary day, and a
//! point-in-time observation is a zero-length interval with `start == stop`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TveError};

/// Convert a calendar date to its day number (days since 1970-01-01).
pub fn date_to_day(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (date - epoch).num_days()
}

/// Convert a day number back to a calendar date.
///
/// Returns `None` if the day number is outside chrono's representable range.
pub fn day_to_date(day: i64) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    epoch.checked_add_signed(chrono::Duration::days(day))
}

/// An attribute value attached to an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// The time range during which a subject is under study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub subject_id: String,
    pub entry: i64,
    pub exit: i64,
}

impl ObservationWindow {
    pub fn new(subject_id: impl Into<String>, entry: i64, exit: i64) -> Self {
        Self {
            subject_id: subject_id.into(),
            entry,
            exit,
        }
    }

    /// Total observable person-time in days.
    pub fn duration(&self) -> i64 {
        self.exit - self.entry
    }

    pub fn validate(&self) -> Result<()> {
        if self.entry > self.exit {
            return Err(TveError::validation(format!(
                "window for subject {}: entry {} is after exit {}",
                self.subject_id, self.entry, self.exit
            )));
        }
        Ok(())
    }
}

/// One raw, immutable exposure period (e.g. a dispensing record).
///
/// Multiple records per subject may overlap in time; the overlap resolver
/// turns them into a non-overlapping sequence before partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub subject_id: String,
    pub start: i64,
    pub stop: i64,
    /// Categorical exposure value (drug class, dose level, ...).
    pub value: String,
    /// Continuous quantity carried by this period (e.g. dispensed dose).
    pub quantity: Option<f64>,
}

impl PeriodRecord {
    pub fn new(subject_id: impl Into<String>, start: i64, stop: i64, value: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            start,
            stop,
            value: value.into(),
            quantity: None,
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn duration(&self) -> i64 {
        self.stop - self.start
    }

    /// A point-in-time observation rather than a true period.
    pub fn is_point(&self) -> bool {
        self.start == self.stop
    }
}

/// The unit produced and consumed by every engine component: a maximal
/// interval over which all tracked attributes of one subject are constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub subject_id: String,
    pub start: i64,
    pub stop: i64,
    /// Attribute values, keyed by output column name.
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Episode {
    pub fn new(subject_id: impl Into<String>, start: i64, stop: i64) -> Self {
        Self {
            subject_id: subject_id.into(),
            start,
            stop,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn duration(&self) -> i64 {
        self.stop - self.start
    }

    pub fn is_point(&self) -> bool {
        self.start == self.stop
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }
}

/// Per-subject outcome record: at most one primary event date plus any
/// number of labeled competing-risk dates. Absent dates mean "no event".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub subject_id: String,
    pub primary: Option<i64>,
    pub competing: Vec<(String, Option<i64>)>,
}

impl EventRecord {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            primary: None,
            competing: Vec::new(),
        }
    }

    pub fn with_primary(mut self, date: i64) -> Self {
        self.primary = Some(date);
        self
    }

    pub fn with_competing(mut self, label: impl Into<String>, date: Option<i64>) -> Self {
        self.competing.push((label.into(), date));
        self
    }

    /// Resolve the effective event for this subject: the earliest qualifying
    /// date together with its outcome code (1 = primary, 2.. = competing by
    /// label position). Ties go to the primary date, then to the
    /// earliest-listed competing label.
    pub fn effective(&self) -> Option<(i64, i64)> {
        let mut best: Option<(i64, i64)> = self.primary.map(|d| (d, 1));
        for (idx, (_, date)) in self.competing.iter().enumerate() {
            if let Some(d) = *date {
                let code = 2 + idx as i64;
                match best {
                    Some((bd, _)) if bd <= d => {}
                    _ => best = Some((d, code)),
                }
            }
        }
        best
    }
}

/// Sort episodes into canonical `(subject_id, start, stop)` order.
pub fn sort_episodes(episodes: &mut [Episode]) {
    episodes.sort_by(|a, b| {
        a.subject_id
            .cmp(&b.subject_id)
            .then(a.start.cmp(&b.start))
            .then(a.stop.cmp(&b.stop))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_conversions_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day = date_to_day(date);
        assert_eq!(day_to_date(day), Some(date));
        assert_eq!(date_to_day(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), 0);
    }

    #[test]
    fn window_validation_rejects_inverted_range() {
        let window = ObservationWindow::new("P1", 100, 50);
        assert!(window.validate().is_err());
        assert!(ObservationWindow::new("P1", 50, 50).validate().is_ok());
    }

    #[test]
    fn point_record_detected() {
        let record = PeriodRecord::new("P1", 10, 10, "A");
        assert!(record.is_point());
        assert_eq!(record.duration(), 0);
    }

    #[test]
    fn effective_event_prefers_earliest() {
        let record = EventRecord::new("P1")
            .with_primary(200)
            .with_competing("death", Some(150))
            .with_competing("emigration", Some(300));
        assert_eq!(record.effective(), Some((150, 2)));
    }

    #[test]
    fn effective_event_tie_goes_to_primary() {
        let record = EventRecord::new("P1")
            .with_primary(150)
            .with_competing("death", Some(150));
        assert_eq!(record.effective(), Some((150, 1)));
    }

    #[test]
    fn effective_event_absent_dates() {
        let record = EventRecord::new("P1").with_competing("death", None);
        assert_eq!(record.effective(), None);
    }

    #[test]
    fn sort_orders_by_subject_then_start() {
        let mut episodes = vec![
            Episode::new("P2", 0, 10),
            Episode::new("P1", 5, 10),
            Episode::new("P1", 0, 5),
        ];
        sort_episodes(&mut episodes);
        assert_eq!(episodes[0].subject_id, "P1");
        assert_eq!(episodes[0].start, 0);
        assert_eq!(episodes[2].subject_id, "P2");
    }
}
