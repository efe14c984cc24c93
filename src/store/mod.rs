mod sqlite;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::error::AppError;
use crate::model::{Goal, NewGoal, NewProgressEntry, ProgressEntry};

pub use sqlite::SqliteStore;

pub type Snapshot<T> = Result<T, AppError>;

#[async_trait]
pub trait GoalStore: Send + Sync {
    fn subscribe_goals(&self, owner_id: &str) -> Subscription<Vec<Goal>>;
    async fn fetch_goals(&self, owner_id: &str) -> Result<Vec<Goal>, AppError>;
    async fn fetch_goal(&self, id: i64) -> Result<Option<Goal>, AppError>;
    async fn create_goal(&self, goal: NewGoal) -> Result<Goal, AppError>;
    async fn update_goal(&self, goal: &Goal) -> Result<Goal, AppError>;
    async fn delete_goal(&self, goal: &Goal) -> Result<(), AppError>;

    fn subscribe_progress(&self, owner_id: &str, goal_id: i64)
        -> Subscription<Vec<ProgressEntry>>;
    async fn fetch_progress(
        &self,
        owner_id: &str,
        goal_id: i64,
    ) -> Result<Vec<ProgressEntry>, AppError>;
    async fn add_progress_entry(&self, entry: NewProgressEntry)
        -> Result<ProgressEntry, AppError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    Goals { owner_id: String },
    Progress { owner_id: String, goal_id: i64 },
}

impl StoreChange {
    pub fn affects_goals_of(&self, owner: &str) -> bool {
        matches!(self, Self::Goals { owner_id } if owner_id == owner)
    }

    pub fn affects_progress_of(&self, owner: &str, goal: i64) -> bool {
        matches!(
            self,
            Self::Progress { owner_id, goal_id } if owner_id == owner && *goal_id == goal
        )
    }
}

pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<Snapshot<T>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub async fn next(&mut self) -> Option<Snapshot<T>> {
        self.receiver.recv().await
    }

    pub fn release(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// Unchanged snapshots are skipped; errors are always delivered.
pub(crate) fn spawn_subscription<T, M, F, Fut>(
    mut changes: broadcast::Receiver<StoreChange>,
    poll_interval: Option<Duration>,
    relevant: M,
    query: F,
) -> Subscription<T>
where
    T: Clone + PartialEq + Send + 'static,
    M: Fn(&StoreChange) -> bool + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Snapshot<T>> + Send + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let mut last: Option<T> = None;
        if !deliver(&sender, query().await, &mut last) {
            return;
        }
        let mut ticker = poll_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        loop {
            tokio::select! {
                received = changes.recv() => match received {
                    Ok(change) if !relevant(&change) => continue,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("subscription lagged by {skipped} changes; re-querying");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick(&mut ticker) => {}
            }
            if !deliver(&sender, query().await, &mut last) {
                break;
            }
        }
        tracing::debug!("subscription task finished");
    });
    Subscription { receiver, task }
}

fn deliver<T: Clone + PartialEq>(
    sender: &mpsc::UnboundedSender<Snapshot<T>>,
    snapshot: Snapshot<T>,
    last: &mut Option<T>,
) -> bool {
    match snapshot {
        Ok(value) => {
            if last.as_ref() == Some(&value) {
                return !sender.is_closed();
            }
            *last = Some(value.clone());
            sender.send(Ok(value)).is_ok()
        }
        Err(err) => {
            tracing::warn!("live query failed: {err}");
            *last = None;
            sender.send(Err(err)).is_ok()
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
