//! Tiered retention scheduling.
//!
//! A schedule is an ordered list of periods. Starting at the anchor, each
//! period cuts time into buckets walking backwards, and each bucket keeps up to
//! `slots_per_bucket` snapshots: the ones closest to evenly spaced ideal
//! instants inside the bucket. Everything that is not kept is returned for
//! destruction.
//!
//! Rules:
//! - Snapshots newer than the anchor, or named in the do-not-delete set, are
//!   never returned.
//! - Buckets are `(lower, upper]`; a snapshot exactly at the anchor belongs to
//!   the first bucket.
//! - An open-ended period repeats until the cursor reaches the oldest snapshot
//!   of the dataset.
//! - Equidistant candidates: the later snapshot wins, then the smaller name.

use crate::error::{Result, ToolsError};
use crate::naming::{Snapshot, Timestamp};
use chrono::{Days, Months, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Upper bound on slots per bucket; keeps the ideal-interval division in range.
pub const MAX_SLOTS_PER_BUCKET: u32 = 100_000;

/// Calendar unit a period steps by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    /// Calendar years (12 months).
    Years,
    /// Calendar months; length varies.
    Months,
    /// Seven days.
    Weeks,
    /// Calendar days.
    Days,
    /// Hours.
    Hours,
}

impl fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeriodUnit::Years => "years",
            PeriodUnit::Months => "months",
            PeriodUnit::Weeks => "weeks",
            PeriodUnit::Days => "days",
            PeriodUnit::Hours => "hours",
        };
        f.write_str(s)
    }
}

/// One tier of a retention schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPeriod {
    /// How many buckets this tier produces; `None` repeats back to the oldest snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_count: Option<u32>,
    /// Bucket width, in `unit`s.
    pub unit_multiple: u32,
    /// Calendar unit of the bucket width.
    pub unit: PeriodUnit,
    /// Snapshots kept per bucket.
    pub slots_per_bucket: u32,
}

impl RetentionPeriod {
    /// A tier producing `repeat_count` buckets of `unit_multiple` `unit`s, keeping `slots` each.
    pub fn repeated(slots: u32, unit_multiple: u32, unit: PeriodUnit, repeat_count: u32) -> Self {
        Self {
            repeat_count: Some(repeat_count),
            unit_multiple,
            unit,
            slots_per_bucket: slots,
        }
    }

    /// An open-ended tier.
    pub fn indefinite(slots: u32, unit_multiple: u32, unit: PeriodUnit) -> Self {
        Self {
            repeat_count: None,
            unit_multiple,
            unit,
            slots_per_bucket: slots,
        }
    }

    /// Reject zero counts and out-of-range slot numbers.
    pub fn validate(&self) -> Result<()> {
        if self.unit_multiple == 0 {
            return Err(ToolsError::invalid_schedule(format!(
                "period {self} has a zero unit multiple"
            )));
        }
        if self.slots_per_bucket == 0 || self.slots_per_bucket > MAX_SLOTS_PER_BUCKET {
            return Err(ToolsError::invalid_schedule(format!(
                "period {self} keeps {} snapshots per bucket (allowed 1..={MAX_SLOTS_PER_BUCKET})",
                self.slots_per_bucket
            )));
        }
        if self.repeat_count == Some(0) {
            return Err(ToolsError::invalid_schedule(format!(
                "period {self} repeats zero times"
            )));
        }
        Ok(())
    }

    /// Calendar-aware `cursor - unit_multiple * unit`.
    pub fn step_back(&self, cursor: Timestamp) -> Result<Timestamp> {
        let n = self.unit_multiple;
        let stepped = match self.unit {
            PeriodUnit::Years => n
                .checked_mul(12)
                .and_then(|months| cursor.checked_sub_months(Months::new(months))),
            PeriodUnit::Months => cursor.checked_sub_months(Months::new(n)),
            PeriodUnit::Weeks => cursor.checked_sub_days(Days::new(u64::from(n) * 7)),
            PeriodUnit::Days => cursor.checked_sub_days(Days::new(u64::from(n))),
            PeriodUnit::Hours => {
                TimeDelta::try_hours(i64::from(n)).and_then(|d| cursor.checked_sub_signed(d))
            }
        };
        stepped.ok_or_else(|| ToolsError::CalendarUnderflow {
            at: cursor,
            period: format!("{} {}", self.unit_multiple, self.unit),
        })
    }
}

impl fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keep {} every {} {}",
            self.slots_per_bucket, self.unit_multiple, self.unit
        )?;
        match self.repeat_count {
            Some(n) => write!(f, " x{n}"),
            None => write!(f, " indefinitely"),
        }
    }
}

/// A time interval `(lower, upper]` with a fixed number of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Exclusive lower bound.
    pub lower: Timestamp,
    /// Inclusive upper bound.
    pub upper: Timestamp,
    /// Snapshots this bucket keeps at most.
    pub slots: u32,
}

impl Bucket {
    /// Whether `ts` falls in `(lower, upper]`.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts > self.lower && ts <= self.upper
    }

    /// `slots` instants evenly spaced inside the bucket, latest first:
    /// `upper - k * (upper - lower) / (slots + 1)` for `k = 1..=slots`.
    pub fn ideal_targets(&self) -> Vec<Timestamp> {
        // slots is bounded by MAX_SLOTS_PER_BUCKET, so the conversions cannot fail
        let divisor = i32::try_from(self.slots).unwrap_or(i32::MAX - 1) + 1;
        let interval = (self.upper - self.lower) / divisor;
        (1..divisor).map(|k| self.upper - interval * k).collect()
    }
}

/// Ordered retention periods plus an optional fixed anchor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionSchedule {
    /// Periods, most recent first.
    pub periods: Vec<RetentionPeriod>,
    /// Fixed "now"; wall-clock time is used when absent.
    pub anchor: Option<Timestamp>,
}

impl RetentionSchedule {
    /// Schedule from periods with no fixed anchor.
    pub fn new(periods: Vec<RetentionPeriod>) -> Self {
        Self {
            periods,
            anchor: None,
        }
    }

    /// Start building a schedule tier by tier.
    pub fn builder() -> ScheduleBuilder {
        ScheduleBuilder::default()
    }

    /// 7 daily, 3 weekly, 11 monthly, then yearly indefinitely.
    pub fn standard() -> Self {
        Self::builder()
            .keep(1, 1, PeriodUnit::Days, 7)
            .keep(1, 1, PeriodUnit::Weeks, 3)
            .keep(1, 1, PeriodUnit::Months, 11)
            .keep_indefinitely(1, 1, PeriodUnit::Years)
    }

    /// Pin the anchor.
    pub fn with_anchor(mut self, anchor: Timestamp) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// The configured anchor, or `now`.
    pub fn anchor_or(&self, now: Timestamp) -> Timestamp {
        self.anchor.unwrap_or(now)
    }

    /// Validate every period.
    pub fn validate(&self) -> Result<()> {
        if self.periods.is_empty() {
            return Err(ToolsError::invalid_schedule("schedule has no periods"));
        }
        self.periods.iter().try_for_each(RetentionPeriod::validate)
    }

    /// Generate buckets walking back from `anchor`; open-ended periods stop once
    /// the cursor is at or before `oldest`.
    pub fn buckets(&self, anchor: Timestamp, oldest: Timestamp) -> Result<Vec<Bucket>> {
        self.validate()?;
        let mut buckets = Vec::new();
        let mut cursor = anchor;
        for period in &self.periods {
            let mut emit = |cursor: &mut Timestamp| -> Result<()> {
                let lower = period.step_back(*cursor)?;
                buckets.push(Bucket {
                    lower,
                    upper: *cursor,
                    slots: period.slots_per_bucket,
                });
                *cursor = lower;
                Ok(())
            };
            match period.repeat_count {
                Some(n) => {
                    for _ in 0..n {
                        emit(&mut cursor)?;
                    }
                }
                None => {
                    while cursor > oldest {
                        emit(&mut cursor)?;
                    }
                }
            }
        }
        Ok(buckets)
    }
}

/// Accumulates periods in order; see [`RetentionSchedule::standard`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleBuilder {
    periods: Vec<RetentionPeriod>,
    anchor: Option<Timestamp>,
}

impl ScheduleBuilder {
    /// Fix the anchor of the schedule being built.
    pub fn anchor(mut self, anchor: Timestamp) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Append a repeated tier.
    pub fn keep(mut self, slots: u32, every: u32, unit: PeriodUnit, repeat_count: u32) -> Self {
        self.periods
            .push(RetentionPeriod::repeated(slots, every, unit, repeat_count));
        self
    }

    /// Append an open-ended tier and finish.
    pub fn keep_indefinitely(mut self, slots: u32, every: u32, unit: PeriodUnit) -> RetentionSchedule {
        self.periods
            .push(RetentionPeriod::indefinite(slots, every, unit));
        self.build()
    }

    /// Finish.
    pub fn build(self) -> RetentionSchedule {
        RetentionSchedule {
            periods: self.periods,
            anchor: self.anchor,
        }
    }
}

/// Snapshots to destroy, using wall-clock time when the schedule has no anchor.
pub fn compute_deletions(
    schedule: &RetentionSchedule,
    do_not_delete: &HashSet<String>,
    snapshots: &[Snapshot],
) -> Result<Vec<Snapshot>> {
    let now = chrono::Local::now().naive_local();
    compute_deletions_at(schedule, do_not_delete, snapshots, now)
}

/// Snapshots to destroy with `now` standing in for a missing anchor.
///
/// Snapshots of different datasets are evaluated independently. The result is
/// ordered by dataset, then most recent first.
pub fn compute_deletions_at(
    schedule: &RetentionSchedule,
    do_not_delete: &HashSet<String>,
    snapshots: &[Snapshot],
    now: Timestamp,
) -> Result<Vec<Snapshot>> {
    schedule.validate()?;
    let anchor = schedule.anchor_or(now);

    let mut by_dataset: BTreeMap<&str, Vec<&Snapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        by_dataset
            .entry(snapshot.dataset.as_str())
            .or_default()
            .push(snapshot);
    }

    let mut deletions = Vec::new();
    for (dataset, mut owned) in by_dataset {
        owned.sort_by(|a, b| Snapshot::cmp_newest_first(a, b));
        owned.dedup_by(|a, b| a.name == b.name);
        let destroy = dataset_deletions(schedule, anchor, do_not_delete, &owned)?;
        tracing::debug!(
            dataset = %dataset,
            total = owned.len(),
            destroy = destroy.len(),
            "retention evaluated"
        );
        deletions.extend(destroy.into_iter().cloned());
    }
    Ok(deletions)
}

fn dataset_deletions<'a>(
    schedule: &RetentionSchedule,
    anchor: Timestamp,
    do_not_delete: &HashSet<String>,
    newest_first: &[&'a Snapshot],
) -> Result<Vec<&'a Snapshot>> {
    let Some(oldest) = newest_first.last() else {
        return Ok(Vec::new());
    };

    let mut retained: HashSet<&str> = newest_first
        .iter()
        .filter(|s| s.timestamp > anchor || do_not_delete.contains(&s.name))
        .map(|s| s.name.as_str())
        .collect();

    for bucket in schedule.buckets(anchor, oldest.timestamp)? {
        let mut candidates: Vec<&Snapshot> = newest_first
            .iter()
            .copied()
            .filter(|s| bucket.contains(s.timestamp))
            .collect();
        for ideal in bucket.ideal_targets() {
            let Some(idx) = closest_to(&candidates, ideal) else {
                break;
            };
            let chosen = candidates.remove(idx);
            retained.insert(chosen.name.as_str());
        }
    }

    Ok(newest_first
        .iter()
        .copied()
        .filter(|s| !retained.contains(s.name.as_str()))
        .collect())
}

fn distance_ms(snapshot: &Snapshot, ideal: Timestamp) -> i64 {
    (snapshot.timestamp - ideal).num_milliseconds().abs()
}

fn closest_to(candidates: &[&Snapshot], ideal: Timestamp) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            distance_ms(a, ideal)
                .cmp(&distance_ms(b, ideal))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.name.cmp(&b.name))
        })
        .map(|(idx, _)| idx)
}
