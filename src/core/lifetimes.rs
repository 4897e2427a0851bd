//! Activity intervals of currency pairs and the dates that need prices in them.
//!
//! Intervals are half-open: a pair is held from `start` up to, but not
//! including, `end`. An open interval has no end yet.

use crate::core::job::CurrencyPair;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityInterval {
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl ActivityInterval {
    pub fn open(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    pub fn closed(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Whether the position was held once all activity before `date` is
    /// applied. With no date, whether it is still held.
    pub fn is_held_at(&self, date: Option<NaiveDate>) -> bool {
        match date {
            Some(date) => self.start < date && self.end.is_none_or(|end| end > date),
            None => self.end.is_none(),
        }
    }
}

pub type LifetimeMap = BTreeMap<CurrencyPair, Vec<ActivityInterval>>;

/// How often prices are required within an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekdays,
    /// One price per week, on the given day.
    Weekly(Weekday),
}

/// Merges neighbouring intervals separated by fewer than `min_gap_days` days.
pub fn compress(intervals: &[ActivityInterval], min_gap_days: u32) -> Vec<ActivityInterval> {
    let mut compressed: Vec<ActivityInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = compressed.last_mut()
            && let Some(last_end) = last.end
            && (interval.start - last_end).num_days() < i64::from(min_gap_days)
        {
            last.end = interval.end;
            continue;
        }
        compressed.push(*interval);
    }
    compressed
}

/// Clips intervals to `[first, last)`, closing open ones at `last`. Intervals
/// left empty are dropped.
pub fn trim(
    intervals: &[ActivityInterval],
    first: Option<NaiveDate>,
    last: NaiveDate,
) -> Vec<ActivityInterval> {
    intervals
        .iter()
        .filter_map(|interval| {
            let start = first.map_or(interval.start, |first| interval.start.max(first));
            let end = interval.end.map_or(last, |end| end.min(last));
            (start < end).then(|| ActivityInterval::closed(start, end))
        })
        .collect()
}

/// Enumerates the dates needing a price inside closed intervals, sorted and
/// without repeats.
///
/// Weekly anchors are taken on or before an interval's start so a short
/// holding still gets a price, but never before `floor`.
pub fn required_dates(
    intervals: &[ActivityInterval],
    cadence: Cadence,
    floor: Option<NaiveDate>,
) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    for interval in intervals {
        let Some(end) = interval.end else {
            continue;
        };
        match cadence {
            Cadence::Daily => dates.extend(days_between(interval.start, end)),
            Cadence::Weekdays => dates.extend(
                days_between(interval.start, end)
                    .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)),
            ),
            Cadence::Weekly(anchor) => {
                let behind = (interval.start.weekday().num_days_from_monday() + 7
                    - anchor.num_days_from_monday())
                    % 7;
                let mut date = interval.start - Days::new(u64::from(behind));
                if floor.is_some_and(|floor| date < floor) {
                    date = date + Days::new(7);
                }
                while date < end {
                    dates.push(date);
                    date = date + Days::new(7);
                }
            }
        }
    }
    dates.sort_unstable();
    dates.dedup();
    dates
}

fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |date| *date < end)
}
