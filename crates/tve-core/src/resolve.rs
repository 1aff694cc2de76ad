//! Overlap resolution: raw, possibly-overlapping period records for one
//! subject become a deterministic, non-overlapping sequence.
//!
//! All strategies run through the same boundary sweep: collect the distinct
//! start/stop days of the subject's records, walk the elementary intervals
//! between consecutive boundaries, pick the winning record(s) for each
//! interval, then coalesce adjacent intervals that resolved identically.
//! Zero-length (point-in-time) records bypass the sweep and are re-inserted
//! in order, preserved as zero-length periods.
//!
//! Quantities are prorated onto the elementary intervals a record occupies,
//! so the quantity attributed to any surviving instant is exact. Under
//! winner-take-all strategies (priority, layer) the losing record's share of
//! an overlapped instant is forfeited; under split and layer the shares of
//! all active records are summed.

use std::collections::BTreeSet;

use tve_model::{OverlapStrategy, PeriodRecord};

/// Clip records to the window `[entry, exit)`, dropping records that fall
/// entirely outside. Point records on the window boundary survive.
pub fn clip_to_window(records: &[PeriodRecord], entry: i64, exit: i64) -> Vec<PeriodRecord> {
    let mut clipped = Vec::with_capacity(records.len());
    for record in records {
        let start = record.start.max(entry);
        let stop = record.stop.min(exit);
        if stop < start {
            continue;
        }
        let mut record = record.clone();
        record.start = start;
        record.stop = stop;
        clipped.push(record);
    }
    clipped
}

/// Shift effective starts forward by `lag` days (latency before exposure is
/// considered active). Records whose lagged start passes their stop are
/// dropped; point records survive only a zero lag.
pub fn apply_lag(records: &mut Vec<PeriodRecord>, lag: i64) {
    if lag == 0 {
        return;
    }
    records.retain_mut(|record| {
        record.start += lag;
        record.start <= record.stop
    });
}

/// Extend effective stops by `washout` days, capped at the window exit.
pub fn apply_washout(records: &mut [PeriodRecord], washout: i64, exit: i64) {
    if washout == 0 {
        return;
    }
    for record in records.iter_mut() {
        record.stop = (record.stop + washout).min(exit);
    }
}

/// Bridge gaps between same-value records.
///
/// Two records of the same value whose gap `next.start - prev.stop` is at
/// most `grace` days are merged into one continuous record; quantities of
/// merged records are summed. Overlapping same-value records are always
/// merged (a gap of zero or less).
pub fn bridge_gaps(records: &[PeriodRecord], grace: i64) -> Vec<PeriodRecord> {
    let mut sorted: Vec<PeriodRecord> = records.to_vec();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));

    let mut merged: Vec<PeriodRecord> = Vec::with_capacity(sorted.len());
    'next: for record in sorted {
        for prev in merged.iter_mut().rev() {
            if prev.value != record.value {
                continue;
            }
            if record.start - prev.stop <= grace {
                prev.stop = prev.stop.max(record.stop);
                prev.quantity = sum_quantities(prev.quantity, record.quantity);
                continue 'next;
            }
            break;
        }
        merged.push(record);
    }
    merged.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));
    merged
}

fn sum_quantities(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

/// A record's prorated quantity share over a sub-interval of itself.
fn prorated_share(record: &PeriodRecord, len: i64) -> Option<f64> {
    let quantity = record.quantity?;
    let duration = record.duration();
    if duration == 0 {
        // Zero-length records carry their quantity unprorated.
        return Some(quantity);
    }
    Some(quantity * len as f64 / duration as f64)
}

fn priority_rank(order: &[String], value: &str) -> usize {
    order
        .iter()
        .position(|v| v == value)
        .unwrap_or(order.len())
}

/// Resolve overlapping records into a non-overlapping, sorted sequence.
///
/// The input must belong to a single subject. Point records (zero length)
/// are passed through untouched and sorted into place.
pub fn resolve_overlaps(records: &[PeriodRecord], strategy: &OverlapStrategy) -> Vec<PeriodRecord> {
    let (points, spans): (Vec<&PeriodRecord>, Vec<&PeriodRecord>) =
        records.iter().partition(|r| r.is_point());

    let mut boundaries: BTreeSet<i64> = BTreeSet::new();
    for span in &spans {
        boundaries.insert(span.start);
        boundaries.insert(span.stop);
    }
    let boundaries: Vec<i64> = boundaries.into_iter().collect();

    let mut resolved: Vec<PeriodRecord> = Vec::new();
    for pair in boundaries.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let active: Vec<&PeriodRecord> = spans
            .iter()
            .copied()
            .filter(|r| r.start <= lo && r.stop >= hi)
            .collect();
        if active.is_empty() {
            continue;
        }
        let len = hi - lo;
        let (value, quantity) = match strategy {
            OverlapStrategy::Priority { order } => {
                let winner = active
                    .iter()
                    .min_by_key(|r| (priority_rank(order, &r.value), r.start))
                    .copied()
                    .unwrap();
                (winner.value.clone(), prorated_share(winner, len))
            }
            OverlapStrategy::Layer => {
                // Most recently started record wins the label; quantities of
                // all active records are summed.
                let winner = active.iter().max_by_key(|r| r.start).copied().unwrap();
                let quantity = active
                    .iter()
                    .map(|r| prorated_share(r, len))
                    .fold(None, sum_quantities);
                (winner.value.clone(), quantity)
            }
            OverlapStrategy::Split => {
                let mut values: Vec<&str> =
                    active.iter().map(|r| r.value.as_str()).collect();
                values.sort_unstable();
                values.dedup();
                let quantity = active
                    .iter()
                    .map(|r| prorated_share(r, len))
                    .fold(None, sum_quantities);
                (values.join("+"), quantity)
            }
        };

        // Coalesce with the previous segment when contiguous and identical.
        if let Some(prev) = resolved.last_mut()
            && prev.stop == lo
            && prev.value == value
        {
            prev.stop = hi;
            prev.quantity = sum_quantities(prev.quantity, quantity);
            continue;
        }
        let subject_id = active[0].subject_id.clone();
        resolved.push(PeriodRecord {
            subject_id,
            start: lo,
            stop: hi,
            value,
            quantity,
        });
    }

    for point in points {
        resolved.push(point.clone());
    }
    resolved.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));
    resolved
}
