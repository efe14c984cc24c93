use std::sync::Arc;

use chrono::{DateTime, TimeZone};

use crate::error::AppError;
use crate::model::{
    Goal, GoalChanges, GoalInput, Milestone, MilestoneRef, NewGoal, NewProgressEntry,
    ProgressEntry, ProgressInput, DEFAULT_ICON,
};
use crate::progress::{self, GoalProgress};
use crate::session::GoalSession;
use crate::store::GoalStore;

pub struct App {
    store: Arc<dyn GoalStore>,
    owner: Option<String>,
}

pub struct GoalDetail {
    pub goal: Goal,
    pub entries: Vec<ProgressEntry>,
    pub progress: GoalProgress,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionChange {
    pub goal_id: i64,
    pub from: f64,
    pub to: f64,
    pub reason: String,
}

impl App {
    pub fn new(store: Arc<dyn GoalStore>, owner: Option<String>) -> Self {
        Self { store, owner }
    }

    fn owner(&self) -> Result<&str, AppError> {
        self.owner
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .ok_or(AppError::NotAuthenticated)
    }

    pub async fn create_goal(&self, input: GoalInput) -> Result<Goal, AppError> {
        let owner = self.owner()?;
        ensure_non_empty("goal title", &input.title)?;
        for title in &input.milestones {
            ensure_non_empty("milestone title", title)?;
        }
        let milestones: Vec<Milestone> = input.milestones.into_iter().map(Milestone::new).collect();
        let icon_name = match input.icon_name {
            Some(icon) => {
                ensure_non_empty("goal icon", &icon)?;
                icon
            }
            None => DEFAULT_ICON.to_string(),
        };

        self.store
            .create_goal(NewGoal {
                owner_id: owner.to_string(),
                title: input.title,
                description: input.description,
                icon_name,
                completion_percentage: progress::compute_completion_percentage(&milestones),
                target_date: input.target_date,
                milestones,
            })
            .await
    }

    pub async fn list_goals(&self) -> Result<Vec<Goal>, AppError> {
        let owner = self.owner()?;
        self.store.fetch_goals(owner).await
    }

    pub async fn get_goal(&self, id: i64) -> Result<Goal, AppError> {
        let owner = self.owner()?;
        match self.store.fetch_goal(id).await? {
            Some(goal) if goal.owner_id == owner => Ok(goal),
            _ => Err(AppError::NotFound(format!("goal id {id}"))),
        }
    }

    pub async fn get_goal_detail<Tz: TimeZone>(
        &self,
        id: i64,
        as_of: &DateTime<Tz>,
    ) -> Result<GoalDetail, AppError> {
        let goal = self.get_goal(id).await?;
        let entries = self.store.fetch_progress(self.owner()?, id).await?;
        let progress = GoalProgress::derive(&goal, &entries, as_of);
        Ok(GoalDetail {
            goal,
            entries,
            progress,
        })
    }

    pub async fn update_goal(&self, id: i64, changes: GoalChanges) -> Result<Goal, AppError> {
        if let Some(title) = changes.title.as_deref() {
            ensure_non_empty("goal title", title)?;
        }
        if let Some(icon) = changes.icon_name.as_deref() {
            ensure_non_empty("goal icon", icon)?;
        }
        let mut goal = self.get_goal(id).await?;
        if changes.is_empty() {
            return Ok(goal);
        }
        if let Some(title) = changes.title {
            goal.title = title;
        }
        if let Some(description) = changes.description {
            goal.description = description;
        }
        if let Some(icon) = changes.icon_name {
            goal.icon_name = icon;
        }
        if let Some(target_date) = changes.target_date {
            goal.target_date = target_date;
        }
        self.store.update_goal(&goal).await
    }

    pub async fn delete_goal(&self, id: i64) -> Result<(), AppError> {
        let goal = self.get_goal(id).await?;
        self.store.delete_goal(&goal).await
    }

    pub async fn add_milestones(
        &self,
        goal_id: i64,
        titles: Vec<String>,
    ) -> Result<(Goal, Vec<CompletionChange>), AppError> {
        if titles.is_empty() {
            return Ok((self.get_goal(goal_id).await?, Vec::new()));
        }
        for title in &titles {
            ensure_non_empty("milestone title", title)?;
        }
        self.mutate_milestones(goal_id, |milestones| {
            milestones.extend(titles.into_iter().map(Milestone::new));
            Ok(())
        })
        .await
    }

    // Leaves the percentage and any forced completion alone.
    pub async fn rename_milestone(
        &self,
        goal_id: i64,
        milestone: MilestoneRef,
        title: String,
    ) -> Result<Goal, AppError> {
        ensure_non_empty("milestone title", &title)?;
        let mut goal = self.get_goal(goal_id).await?;
        let idx = resolve_milestone(&goal, milestone)?;
        goal.milestones[idx].title = title;
        self.store.update_goal(&goal).await
    }

    pub async fn set_milestone_status(
        &self,
        goal_id: i64,
        milestone: MilestoneRef,
        completed: bool,
    ) -> Result<(Goal, Vec<CompletionChange>), AppError> {
        self.mutate_milestones(goal_id, |milestones| {
            let idx = position_of(milestones, goal_id, milestone)?;
            milestones[idx].is_completed = completed;
            Ok(())
        })
        .await
    }

    pub async fn toggle_milestone(
        &self,
        goal_id: i64,
        milestone: MilestoneRef,
    ) -> Result<(Goal, Vec<CompletionChange>), AppError> {
        self.mutate_milestones(goal_id, |milestones| {
            let idx = position_of(milestones, goal_id, milestone)?;
            milestones[idx].is_completed = !milestones[idx].is_completed;
            Ok(())
        })
        .await
    }

    pub async fn remove_milestone(
        &self,
        goal_id: i64,
        milestone: MilestoneRef,
    ) -> Result<(Goal, Vec<CompletionChange>), AppError> {
        self.mutate_milestones(goal_id, |milestones| {
            let idx = position_of(milestones, goal_id, milestone)?;
            milestones.remove(idx);
            Ok(())
        })
        .await
    }

    pub async fn force_complete_goal(
        &self,
        goal_id: i64,
    ) -> Result<(Goal, Vec<CompletionChange>), AppError> {
        let current = self.get_goal(goal_id).await?;
        let mut next = current.clone();
        progress::force_complete(&mut next);

        let mut changes = Vec::new();
        if !current.completion_forced || current.completion_percentage != next.completion_percentage
        {
            changes.push(CompletionChange {
                goal_id,
                from: current.completion_percentage,
                to: next.completion_percentage,
                reason: format!(
                    "marked complete ({}/{} milestones done)",
                    next.milestones_done(),
                    next.milestones.len()
                ),
            });
        }

        let saved = self.store.update_goal(&next).await?;
        log_changes(&changes);
        Ok((saved, changes))
    }

    pub async fn add_progress_entry(
        &self,
        goal_id: i64,
        input: ProgressInput,
    ) -> Result<ProgressEntry, AppError> {
        ensure_non_empty("progress description", &input.description)?;
        let goal = self.get_goal(goal_id).await?;
        let milestone_id = match input.milestone {
            Some(milestone) => Some(goal.milestones[resolve_milestone(&goal, milestone)?].id),
            None => None,
        };
        self.store
            .add_progress_entry(NewProgressEntry {
                goal_id,
                milestone_id,
                owner_id: goal.owner_id,
                description: input.description,
            })
            .await
    }

    pub async fn list_progress(&self, goal_id: i64) -> Result<Vec<ProgressEntry>, AppError> {
        self.get_goal(goal_id).await?;
        self.store.fetch_progress(self.owner()?, goal_id).await
    }

    pub async fn watch_goal(&self, goal_id: i64) -> Result<GoalSession, AppError> {
        self.get_goal(goal_id).await?;
        Ok(GoalSession::open(self.store.as_ref(), self.owner()?, goal_id))
    }

    async fn mutate_milestones<F>(
        &self,
        goal_id: i64,
        mutate: F,
    ) -> Result<(Goal, Vec<CompletionChange>), AppError>
    where
        F: FnOnce(&mut Vec<Milestone>) -> Result<(), AppError>,
    {
        let current = self.get_goal(goal_id).await?;
        let mut next = current.clone();
        mutate(&mut next.milestones)?;
        progress::recompute_completion(&mut next);
        let changes = completion_changes(goal_id, &current, &next);

        let saved = self.store.update_goal(&next).await?;
        log_changes(&changes);
        Ok((saved, changes))
    }
}

fn completion_changes(goal_id: i64, before: &Goal, after: &Goal) -> Vec<CompletionChange> {
    let done = after.milestones_done();
    let total = after.milestones.len();
    let reason = if before.completion_forced {
        format!("forced completion cleared by milestone change ({done}/{total} done)")
    } else if total > 0 && done == total {
        format!("all milestones are done ({done}/{total})")
    } else {
        format!("milestones done {done}/{total}")
    };
    if before.completion_forced || before.completion_percentage != after.completion_percentage {
        vec![CompletionChange {
            goal_id,
            from: before.completion_percentage,
            to: after.completion_percentage,
            reason,
        }]
    } else {
        Vec::new()
    }
}

fn log_changes(changes: &[CompletionChange]) {
    for change in changes {
        tracing::info!(
            "goal {} completion {:.2}% -> {:.2}%: {}",
            change.goal_id,
            change.from,
            change.to,
            change.reason
        );
    }
}

fn resolve_milestone(goal: &Goal, milestone: MilestoneRef) -> Result<usize, AppError> {
    position_of(&goal.milestones, goal.require_id()?, milestone)
}

fn position_of(
    milestones: &[Milestone],
    goal_id: i64,
    milestone: MilestoneRef,
) -> Result<usize, AppError> {
    milestone.locate(milestones).ok_or_else(|| {
        AppError::NotFound(format!("milestone {milestone} on goal id {goal_id}"))
    })
}

fn ensure_non_empty(label: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{label} cannot be empty")));
    }
    Ok(())
}
