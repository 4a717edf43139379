//! Property-based tests for retention and replication planning.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use zfstools_core::{
    compute_deletions_at, compute_plan, PeriodUnit, RetentionPeriod, RetentionSchedule, Snapshot,
    SnapshotNaming, Timestamp,
};

fn anchor() -> Timestamp {
    NaiveDate::from_ymd_opt(2022, 8, 6)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

/// Snapshots of `dataset` taken `offset` hours before the anchor (negative = after).
fn snapshots_at(dataset: &str, offsets: &BTreeSet<i64>) -> Vec<Snapshot> {
    let naming = SnapshotNaming::default();
    offsets
        .iter()
        .map(|h| {
            let ts = anchor() - TimeDelta::hours(*h);
            naming.parse(&naming.format_name(dataset, &ts)).unwrap()
        })
        .collect()
}

fn any_period() -> impl Strategy<Value = RetentionPeriod> {
    (
        prop::option::of(1u32..5),
        1u32..4,
        prop_oneof![
            Just(PeriodUnit::Hours),
            Just(PeriodUnit::Days),
            Just(PeriodUnit::Weeks),
            Just(PeriodUnit::Months),
        ],
        1u32..4,
    )
        .prop_map(|(repeat_count, unit_multiple, unit, slots_per_bucket)| RetentionPeriod {
            repeat_count,
            unit_multiple,
            unit,
            slots_per_bucket,
        })
}

fn any_schedule() -> impl Strategy<Value = RetentionSchedule> {
    prop::collection::vec(any_period(), 1..4)
        .prop_map(|periods| RetentionSchedule::new(periods).with_anchor(anchor()))
}

fn names(list: &[Snapshot]) -> Vec<String> {
    list.iter().map(|s| s.name.clone()).collect()
}

proptest! {
    /// The same inputs always produce the same deletions.
    #[test]
    fn test_retention_is_idempotent(
        schedule in any_schedule(),
        offsets in prop::collection::btree_set(0i64..3000, 0..40),
    ) {
        let snaps = snapshots_at("tank/data", &offsets);
        let keep = HashSet::new();
        let first = compute_deletions_at(&schedule, &keep, &snaps, anchor()).unwrap();
        let second = compute_deletions_at(&schedule, &keep, &snaps, anchor()).unwrap();
        prop_assert_eq!(names(&first), names(&second));

        let mut reversed = snaps.clone();
        reversed.reverse();
        let shuffled = compute_deletions_at(&schedule, &keep, &reversed, anchor()).unwrap();
        prop_assert_eq!(names(&first), names(&shuffled));
    }

    /// Future snapshots and pinned names are never deleted.
    #[test]
    fn test_never_delete_invariant(
        schedule in any_schedule(),
        offsets in prop::collection::btree_set(-200i64..3000, 1..40),
        pin_every in 1usize..5,
    ) {
        let snaps = snapshots_at("tank/data", &offsets);
        let pinned: HashSet<String> = snaps
            .iter()
            .step_by(pin_every)
            .map(|s| s.name.clone())
            .collect();
        let destroy = compute_deletions_at(&schedule, &pinned, &snaps, anchor()).unwrap();
        for snapshot in &destroy {
            prop_assert!(snapshot.timestamp <= anchor());
            prop_assert!(!pinned.contains(&snapshot.name));
        }
    }

    /// N evenly spaced snapshots per day over D days, one slot per day: N*D - D deletions.
    #[test]
    fn test_one_survivor_per_day(per_day in 1i64..=6, days in 1u32..10) {
        let naming = SnapshotNaming::default();
        let step = 1440 / per_day;
        let snaps: Vec<Snapshot> = (0..i64::from(days))
            .flat_map(|d| (0..per_day).map(move |k| (d, k)))
            .map(|(d, k)| {
                let ts = anchor() - TimeDelta::days(d) - TimeDelta::minutes(k * step);
                naming.parse(&naming.format_name("tank/data", &ts)).unwrap()
            })
            .collect();
        let schedule = RetentionSchedule::new(vec![RetentionPeriod::repeated(
            1,
            1,
            PeriodUnit::Days,
            days,
        )])
        .with_anchor(anchor());
        let destroy = compute_deletions_at(&schedule, &HashSet::new(), &snaps, anchor()).unwrap();
        prop_assert_eq!(destroy.len() as i64, per_day * i64::from(days) - i64::from(days));
    }

    /// Every plan replays cleanly against the remote it was built from.
    #[test]
    fn test_replication_chain_is_valid(
        timeline in prop::collection::btree_set(0i64..500, 0..30),
        local_mask in prop::collection::vec(any::<bool>(), 30),
        remote_mask in prop::collection::vec(any::<bool>(), 30),
    ) {
        let all = snapshots_at("tank/data", &timeline);
        let local: Vec<Snapshot> = all
            .iter()
            .zip(&local_mask)
            .filter(|(_, keep)| **keep)
            .map(|(s, _)| s.clone())
            .collect();
        let remote: Vec<Snapshot> = all
            .iter()
            .zip(&remote_mask)
            .filter(|(_, keep)| **keep)
            .map(|(s, _)| s.clone())
            .collect();

        let plan = compute_plan(&local, &remote);
        let after = plan.verify_chain(&remote).unwrap();

        let local_names: HashSet<String> = local.iter().map(|s| s.name.clone()).collect();
        prop_assert!(after.is_subset(&local_names));
        for orphan in &plan.destroy_remote {
            prop_assert!(!local_names.contains(&orphan.name));
        }
        if let Some(newest) = local.iter().max_by_key(|s| s.timestamp) {
            prop_assert!(after.contains(&newest.name));
        }
        for window in plan.send_queue.windows(2) {
            prop_assert!(window[0].target.timestamp < window[1].target.timestamp);
        }
        if plan.send_queue.is_empty() && plan.destroy_remote.is_empty() {
            prop_assert!(plan.is_empty());
        }
    }

    /// Formatting then parsing a name recovers dataset and timestamp.
    #[test]
    fn test_naming_round_trip(
        dataset in "[a-z][a-z0-9_]{0,8}(/[a-z0-9_-]{1,8}){0,3}",
        separator in prop_oneof![Just("@"), Just("#"), Just("@auto-")],
        secs in 0i64..4_000_000_000,
    ) {
        let naming = SnapshotNaming::new(separator, "%Y%m%d-%H%M%S");
        let ts: NaiveDateTime = chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc();
        let parsed = naming.parse(&naming.format_name(&dataset, &ts)).unwrap();
        prop_assert_eq!(parsed.dataset, dataset);
        prop_assert_eq!(parsed.timestamp, ts);
    }
}
