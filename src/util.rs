use chrono::{DateTime, Local, Utc};

use crate::model::{Goal, ProgressEntry};
use crate::progress::GoalProgress;

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_percentage(value: f64) -> String {
    format!("{}%", value.clamp(0.0, 100.0).trunc() as i64)
}

pub fn format_days(count: i64) -> String {
    if count == 1 {
        "1 day".to_string()
    } else {
        format!("{count} days")
    }
}

fn milestone_label(goal: &Goal, entry: &ProgressEntry) -> Option<String> {
    let id = entry.milestone_id?;
    let label = match goal.milestones.iter().position(|milestone| milestone.id == id) {
        Some(idx) => format!("#{} {}", idx + 1, goal.milestones[idx].title),
        None => "removed milestone".to_string(),
    };
    Some(label)
}

pub fn format_goal_list(goals: &[Goal]) -> String {
    let mut output = format!(
        "{:<4} {:<5} {:<10} {:<10} {}\n",
        "ID", "DONE", "TARGET", "MILESTONES", "TITLE"
    );
    for goal in goals {
        let milestones = format!("{}/{}", goal.milestones_done(), goal.milestones.len());
        output.push_str(&format!(
            "{:<4} {:<5} {:<10} {:<10} {}\n",
            goal.id.unwrap_or_default(),
            format_percentage(goal.completion_percentage),
            goal.target_date,
            milestones,
            goal.title
        ));
    }
    output.trim_end().to_string()
}

pub fn format_goal_detail(
    goal: &Goal,
    entries: &[ProgressEntry],
    progress: &GoalProgress,
) -> String {
    let mut output = String::new();
    output.push_str(&format!("Goal ID: {}\n", goal.id.unwrap_or_default()));
    output.push_str(&format!("Title: {}\n", goal.title));
    if !goal.description.trim().is_empty() {
        output.push_str(&format!("Description: {}\n", goal.description));
    }
    output.push_str(&format!("Icon: {}\n", goal.icon_name));
    output.push_str(&format!(
        "Target: {} ({} left)\n",
        goal.target_date,
        format_days(progress.days_left)
    ));
    let mut completion = format!(
        "Completion: {} ({}/{} milestones)",
        format_percentage(progress.percentage),
        progress.milestones_done,
        progress.milestones_total
    );
    if progress.forced {
        completion.push_str(", marked complete");
    } else if progress.is_complete() {
        completion.push_str(", complete");
    }
    output.push_str(&completion);
    output.push('\n');
    output.push_str(&format!("Streak: {}\n", format_days(progress.streak.into())));
    output.push_str(&format!("Created: {}\n", format_datetime(goal.created_at)));
    output.push_str(&format!("Updated: {}\n", format_datetime(goal.updated_at)));
    output.push('\n');

    if goal.milestones.is_empty() {
        output.push_str("Milestones: (none)\n");
    } else {
        output.push_str("Milestones:\n");
        for (idx, milestone) in goal.milestones.iter().enumerate() {
            let mark = if milestone.is_completed { "x" } else { " " };
            output.push_str(&format!(
                "{}. [{}] {} (id {})\n",
                idx + 1,
                mark,
                milestone.title,
                milestone.id
            ));
        }
    }
    output.push('\n');
    output.push_str(&format_activity(goal, entries));
    output.trim_end().to_string()
}

pub fn format_progress_list(goal: &Goal, entries: &[ProgressEntry], streak: u32) -> String {
    let mut output = format_activity(goal, entries);
    output.push_str(&format!("\nStreak: {}", format_days(streak.into())));
    output
}

fn format_activity(goal: &Goal, entries: &[ProgressEntry]) -> String {
    if entries.is_empty() {
        return "Activity: (none)".to_string();
    }
    let mut output = String::from("Activity:\n");
    for entry in entries {
        output.push_str(&format!(
            "- {} {}",
            format_datetime(entry.created_at),
            entry.description
        ));
        if let Some(label) = milestone_label(goal, entry) {
            output.push_str(&format!(" [{label}]"));
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}
