use chrono::{DateTime, FixedOffset, Local};

use crate::error::AppError;
use crate::model::{Goal, ProgressEntry};
use crate::progress::GoalProgress;
use crate::store::{GoalStore, Snapshot, Subscription};

pub type Clock = Box<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct GoalView {
    pub goal: Goal,
    pub entries: Vec<ProgressEntry>,
    pub progress: GoalProgress,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    Changed(GoalView),
    Removed,
}

pub struct GoalSession {
    goal_id: i64,
    goals: Subscription<Vec<Goal>>,
    progress: Subscription<Vec<ProgressEntry>>,
    latest_goals: Option<Vec<Goal>>,
    latest_entries: Option<Vec<ProgressEntry>>,
    clock: Clock,
    view: Option<GoalView>,
    removed: bool,
}

enum Incoming {
    Goals(Option<Snapshot<Vec<Goal>>>),
    Progress(Option<Snapshot<Vec<ProgressEntry>>>),
}

impl GoalSession {
    pub fn open(store: &dyn GoalStore, owner_id: &str, goal_id: i64) -> Self {
        Self::from_subscriptions(
            goal_id,
            store.subscribe_goals(owner_id),
            store.subscribe_progress(owner_id, goal_id),
        )
    }

    pub(crate) fn from_subscriptions(
        goal_id: i64,
        goals: Subscription<Vec<Goal>>,
        progress: Subscription<Vec<ProgressEntry>>,
    ) -> Self {
        Self {
            goal_id,
            goals,
            progress,
            latest_goals: None,
            latest_entries: None,
            clock: Box::new(|| Local::now().fixed_offset()),
            view: None,
            removed: false,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn goal_id(&self) -> i64 {
        self.goal_id
    }

    // A failed snapshot is returned as the error and leaves the view in place.
    pub async fn next_update(&mut self) -> Result<Option<SessionUpdate>, AppError> {
        if self.removed {
            return Ok(None);
        }
        loop {
            let incoming = tokio::select! {
                snapshot = self.goals.next() => Incoming::Goals(snapshot),
                snapshot = self.progress.next() => Incoming::Progress(snapshot),
            };
            match incoming {
                Incoming::Goals(Some(snapshot)) => self.latest_goals = Some(snapshot?),
                Incoming::Progress(Some(snapshot)) => self.latest_entries = Some(snapshot?),
                Incoming::Goals(None) | Incoming::Progress(None) => return Ok(None),
            }
            if let Some(update) = self.refresh() {
                return Ok(Some(update));
            }
        }
    }

    pub fn refresh(&mut self) -> Option<SessionUpdate> {
        let (goals, entries) = match (&self.latest_goals, &self.latest_entries) {
            (Some(goals), Some(entries)) => (goals, entries),
            _ => return None,
        };

        let Some(goal) = goals.iter().find(|goal| goal.id == Some(self.goal_id)) else {
            self.view = None;
            self.removed = true;
            tracing::debug!("goal {} left the live query", self.goal_id);
            return Some(SessionUpdate::Removed);
        };

        let as_of = (self.clock)();
        let next = GoalView {
            progress: GoalProgress::derive(goal, entries, &as_of),
            goal: goal.clone(),
            entries: entries.clone(),
        };
        if self.view.as_ref() == Some(&next) {
            return None;
        }
        self.view = Some(next.clone());
        Some(SessionUpdate::Changed(next))
    }

    pub fn close(self) {
        self.goals.release();
        self.progress.release();
    }
}
