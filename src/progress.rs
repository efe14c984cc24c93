use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::model::{Goal, Milestone, ProgressEntry};

pub const COMPLETE: f64 = 100.0;

pub fn compute_completion_percentage(milestones: &[Milestone]) -> f64 {
    if milestones.is_empty() {
        return 0.0;
    }
    let done = milestones
        .iter()
        .filter(|milestone| milestone.is_completed)
        .count();
    done as f64 / milestones.len() as f64 * COMPLETE
}

pub fn force_complete(goal: &mut Goal) {
    goal.completion_percentage = COMPLETE;
    goal.completion_forced = true;
}

// Every milestone mutation lands here, which clears a forced completion.
pub fn recompute_completion(goal: &mut Goal) {
    goal.completion_percentage = compute_completion_percentage(&goal.milestones);
    goal.completion_forced = false;
}

pub fn effective_percentage(goal: &Goal) -> f64 {
    if goal.completion_forced {
        COMPLETE
    } else {
        compute_completion_percentage(&goal.milestones)
    }
}

// Days are calendar days in as_of's time zone.
pub fn compute_streak<Tz: TimeZone>(entries: &[ProgressEntry], as_of: &DateTime<Tz>) -> u32 {
    let zone = as_of.timezone();
    let days: HashSet<NaiveDate> = entries
        .iter()
        .map(|entry| entry.created_at.with_timezone(&zone).date_naive())
        .collect();

    let mut day = as_of.date_naive();
    let mut streak = 0;
    while days.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}

pub fn days_left(target_date: NaiveDate, today: NaiveDate) -> i64 {
    (target_date - today).num_days().max(0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct GoalProgress {
    pub percentage: f64,
    pub forced: bool,
    pub milestones_done: usize,
    pub milestones_total: usize,
    pub streak: u32,
    pub days_left: i64,
}

impl GoalProgress {
    pub fn derive<Tz: TimeZone>(
        goal: &Goal,
        entries: &[ProgressEntry],
        as_of: &DateTime<Tz>,
    ) -> Self {
        Self {
            percentage: effective_percentage(goal),
            forced: goal.completion_forced,
            milestones_done: goal.milestones_done(),
            milestones_total: goal.milestones.len(),
            streak: compute_streak(entries, as_of),
            days_left: days_left(goal.target_date, as_of.date_naive()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percentage >= COMPLETE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, Utc};

    fn milestones(flags: &[bool]) -> Vec<Milestone> {
        flags
            .iter()
            .enumerate()
            .map(|(idx, done)| Milestone {
                is_completed: *done,
                ..Milestone::new(format!("Milestone {}", idx + 1))
            })
            .collect()
    }

    fn entry_at(id: i64, at: DateTime<Utc>) -> ProgressEntry {
        ProgressEntry {
            id,
            goal_id: 1,
            milestone_id: None,
            owner_id: "owner".to_string(),
            description: format!("entry {id}"),
            created_at: at,
        }
    }

    fn utc(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn goal_with(flags: &[bool]) -> Goal {
        let now = utc("2024-03-10T12:00:00Z");
        Goal {
            id: Some(1),
            owner_id: "owner".to_string(),
            title: "Run a marathon".to_string(),
            description: String::new(),
            icon_name: "figure.run".to_string(),
            completion_percentage: 0.0,
            completion_forced: false,
            target_date: NaiveDate::from_ymd_opt(2024, 3, 20).expect("date"),
            milestones: milestones(flags),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_milestones_are_zero_percent() {
        assert_eq!(compute_completion_percentage(&[]), 0.0);
    }

    #[test]
    fn percentage_is_share_of_completed_milestones() {
        assert_eq!(
            compute_completion_percentage(&milestones(&[true, false, true, false])),
            50.0
        );
        assert_eq!(
            compute_completion_percentage(&milestones(&[true, true])),
            100.0
        );
        assert_eq!(compute_completion_percentage(&milestones(&[false])), 0.0);
    }

    #[test]
    fn toggling_last_open_milestone_reaches_full_completion() {
        let mut items = milestones(&[false, true, true]);
        let before = compute_completion_percentage(&items);
        assert!((before - 66.666_666).abs() < 0.001, "before: {before}");
        assert_eq!(before.trunc(), 66.0);

        items[0].is_completed = true;
        assert_eq!(compute_completion_percentage(&items), 100.0);
    }

    #[test]
    fn force_complete_ignores_milestones() {
        let mut goal = goal_with(&[false, false, false]);
        force_complete(&mut goal);
        assert_eq!(goal.completion_percentage, 100.0);
        assert!(goal.completion_forced);
        assert_eq!(effective_percentage(&goal), 100.0);
    }

    #[test]
    fn recompute_clears_forced_completion() {
        let mut goal = goal_with(&[true, false]);
        force_complete(&mut goal);
        recompute_completion(&mut goal);
        assert_eq!(goal.completion_percentage, 50.0);
        assert!(!goal.completion_forced);
    }

    #[test]
    fn empty_entries_have_no_streak() {
        assert_eq!(compute_streak(&[], &utc("2024-03-10T08:00:00Z")), 0);
        assert_eq!(compute_streak(&[], &utc("1999-12-31T23:59:59Z")), 0);
    }

    #[test]
    fn consecutive_days_count_back_from_reference() {
        let entries = vec![
            entry_at(1, utc("2024-03-10T07:30:00Z")),
            entry_at(2, utc("2024-03-09T18:00:00Z")),
            entry_at(3, utc("2024-03-08T12:00:00Z")),
        ];
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T22:00:00Z")), 3);
    }

    #[test]
    fn gap_stops_the_streak() {
        let entries = vec![
            entry_at(1, utc("2024-03-10T07:30:00Z")),
            entry_at(2, utc("2024-03-08T12:00:00Z")),
        ];
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T22:00:00Z")), 1);
    }

    #[test]
    fn same_day_entries_count_once() {
        let entries = vec![
            entry_at(1, utc("2024-03-10T09:00:00Z")),
            entry_at(2, utc("2024-03-10T21:00:00Z")),
            entry_at(3, utc("2024-03-09T10:00:00Z")),
        ];
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T23:00:00Z")), 2);

        let only_today = vec![
            entry_at(1, utc("2024-03-10T09:00:00Z")),
            entry_at(2, utc("2024-03-10T21:00:00Z")),
        ];
        assert_eq!(compute_streak(&only_today, &utc("2024-03-10T23:00:00Z")), 1);
    }

    #[test]
    fn no_entry_on_reference_day_means_zero() {
        let entries = vec![
            entry_at(1, utc("2024-03-09T09:00:00Z")),
            entry_at(2, utc("2024-03-08T09:00:00Z")),
        ];
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T09:00:00Z")), 0);
    }

    #[test]
    fn streak_uses_calendar_days_not_24_hour_windows() {
        // Less than 24h apart, but on two different calendar days.
        let entries = vec![
            entry_at(1, utc("2024-03-10T00:30:00Z")),
            entry_at(2, utc("2024-03-09T23:30:00Z")),
        ];
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T01:00:00Z")), 2);
    }

    #[test]
    fn streak_reads_entries_in_reference_time_zone() {
        let entries = vec![
            entry_at(1, utc("2024-03-10T02:00:00Z")),
            entry_at(2, utc("2024-03-09T12:00:00Z")),
        ];
        // At UTC-5 the first entry is on the evening of March 9th.
        let offset = FixedOffset::west_opt(5 * 3600).expect("offset");
        let as_of = utc("2024-03-10T03:00:00Z").with_timezone(&offset);
        assert_eq!(compute_streak(&entries, &as_of), 1);
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T03:00:00Z")), 2);
    }

    #[test]
    fn entries_after_reference_day_are_ignored() {
        let entries = vec![
            entry_at(1, utc("2024-03-11T09:00:00Z")),
            entry_at(2, utc("2024-03-10T09:00:00Z")),
        ];
        assert_eq!(compute_streak(&entries, &utc("2024-03-10T12:00:00Z")), 1);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let items = milestones(&[true, false, true]);
        assert_eq!(
            compute_completion_percentage(&items),
            compute_completion_percentage(&items)
        );

        let start = utc("2024-03-10T12:00:00Z");
        let entries: Vec<_> = (0..5)
            .map(|day| entry_at(day, start - Duration::days(day)))
            .collect();
        let first = compute_streak(&entries, &start);
        assert_eq!(first, 5);
        assert_eq!(compute_streak(&entries, &start), first);
    }

    #[test]
    fn days_left_is_clamped_at_zero() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let target = NaiveDate::from_ymd_opt(2024, 3, 20).expect("date");
        assert_eq!(days_left(target, today), 10);
        assert_eq!(days_left(today, today), 0);
        assert_eq!(days_left(today, target), 0);
    }

    #[test]
    fn derive_bundles_all_fields_from_one_snapshot() {
        let goal = goal_with(&[true, false, false, true]);
        let entries = vec![
            entry_at(1, utc("2024-03-10T09:00:00Z")),
            entry_at(2, utc("2024-03-09T09:00:00Z")),
        ];
        let progress = GoalProgress::derive(&goal, &entries, &utc("2024-03-10T12:00:00Z"));
        assert_eq!(
            progress,
            GoalProgress {
                percentage: 50.0,
                forced: false,
                milestones_done: 2,
                milestones_total: 4,
                streak: 2,
                days_left: 10,
            }
        );
        assert!(!progress.is_complete());
    }

    #[test]
    fn derive_reports_forced_goals_as_complete() {
        let mut goal = goal_with(&[false, false]);
        force_complete(&mut goal);
        let progress = GoalProgress::derive(&goal, &[], &utc("2024-03-10T12:00:00Z"));
        assert!(progress.is_complete());
        assert!(progress.forced);
        assert_eq!(progress.milestones_done, 0);
    }
}
