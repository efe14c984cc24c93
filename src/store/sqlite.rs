use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{spawn_subscription, GoalStore, StoreChange, Subscription};
use crate::entities::{goal, progress_entry};
use crate::error::AppError;
use crate::model::{Goal, NewGoal, NewProgressEntry, ProgressEntry};

const CHANGE_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct SqliteStore {
    db: DatabaseConnection,
    changes: broadcast::Sender<StoreChange>,
    poll_interval: Option<Duration>,
}

impl SqliteStore {
    pub fn new(db: DatabaseConnection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            db,
            changes,
            poll_interval: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    #[cfg(test)]
    pub fn live_query_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn publish(&self, change: StoreChange) {
        // No receivers just means nobody is watching.
        let _ = self.changes.send(change);
    }

    async fn load_goals(&self, owner_id: &str) -> Result<Vec<Goal>, AppError> {
        let models = goal::Entity::find()
            .filter(goal::Column::OwnerId.eq(owner_id))
            .order_by_desc(goal::Column::CreatedAt)
            .order_by_desc(goal::Column::Id)
            .all(&self.db)
            .await?;
        models.into_iter().map(goal_from_model).collect()
    }

    async fn load_progress(
        &self,
        owner_id: &str,
        goal_id: i64,
    ) -> Result<Vec<ProgressEntry>, AppError> {
        let models = progress_entry::Entity::find()
            .filter(progress_entry::Column::OwnerId.eq(owner_id))
            .filter(progress_entry::Column::GoalId.eq(goal_id))
            .order_by_desc(progress_entry::Column::CreatedAt)
            .order_by_desc(progress_entry::Column::Id)
            .all(&self.db)
            .await?;
        models.into_iter().map(entry_from_model).collect()
    }
}

#[async_trait]
impl GoalStore for SqliteStore {
    fn subscribe_goals(&self, owner_id: &str) -> Subscription<Vec<Goal>> {
        tracing::debug!("live query: goals of {owner_id}");
        let store = self.clone();
        let owner = owner_id.to_string();
        let filter_owner = owner.clone();
        spawn_subscription(
            self.changes.subscribe(),
            self.poll_interval,
            move |change| change.affects_goals_of(&filter_owner),
            move || {
                let store = store.clone();
                let owner = owner.clone();
                async move { store.load_goals(&owner).await }
            },
        )
    }

    async fn fetch_goals(&self, owner_id: &str) -> Result<Vec<Goal>, AppError> {
        self.load_goals(owner_id).await
    }

    async fn fetch_goal(&self, id: i64) -> Result<Option<Goal>, AppError> {
        goal::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(goal_from_model)
            .transpose()
    }

    async fn create_goal(&self, goal: NewGoal) -> Result<Goal, AppError> {
        let now = Utc::now();
        let milestones = serde_json::to_string(&goal.milestones)?;
        let active = goal::ActiveModel {
            owner_id: Set(goal.owner_id.clone()),
            title: Set(goal.title),
            description: Set(goal.description),
            icon_name: Set(goal.icon_name),
            completion_percentage: Set(goal.completion_percentage),
            completion_forced: Set(false),
            target_date: Set(goal.target_date),
            milestones: Set(milestones),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let insert = goal::Entity::insert(active).exec(&self.db).await?;
        let created = goal::Entity::find_by_id(insert.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::StoreFailure("goal not found after insert".to_string()))?;
        let created = goal_from_model(created)?;
        tracing::info!("created goal {} for {}", insert.last_insert_id, goal.owner_id);
        self.publish(StoreChange::Goals {
            owner_id: goal.owner_id,
        });
        Ok(created)
    }

    async fn update_goal(&self, goal: &Goal) -> Result<Goal, AppError> {
        let id = goal.require_id()?;
        let active = goal::ActiveModel {
            id: Set(id),
            title: Set(goal.title.clone()),
            description: Set(goal.description.clone()),
            icon_name: Set(goal.icon_name.clone()),
            completion_percentage: Set(goal.completion_percentage),
            completion_forced: Set(goal.completion_forced),
            target_date: Set(goal.target_date),
            milestones: Set(serde_json::to_string(&goal.milestones)?),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        let model = match active.update(&self.db).await {
            Ok(model) => model,
            Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
                return Err(AppError::NotFound(format!("goal id {id}")))
            }
            Err(err) => return Err(err.into()),
        };
        let updated = goal_from_model(model)?;
        tracing::debug!(
            "updated goal {id} ({:.2}% complete)",
            updated.completion_percentage
        );
        self.publish(StoreChange::Goals {
            owner_id: updated.owner_id.clone(),
        });
        Ok(updated)
    }

    async fn delete_goal(&self, goal: &Goal) -> Result<(), AppError> {
        let id = goal.require_id()?;
        let txn = self.db.begin().await?;
        let result: Result<u64, AppError> = async {
            let entries = progress_entry::Entity::delete_many()
                .filter(progress_entry::Column::GoalId.eq(id))
                .exec(&txn)
                .await?;
            let deleted = goal::Entity::delete_by_id(id).exec(&txn).await?;
            if deleted.rows_affected == 0 {
                return Err(AppError::NotFound(format!("goal id {id}")));
            }
            Ok(entries.rows_affected)
        }
        .await;
        let entries = finalize_transaction(txn, result).await?;

        tracing::info!("deleted goal {id} and {entries} progress entries");
        self.publish(StoreChange::Goals {
            owner_id: goal.owner_id.clone(),
        });
        self.publish(StoreChange::Progress {
            owner_id: goal.owner_id.clone(),
            goal_id: id,
        });
        Ok(())
    }

    fn subscribe_progress(
        &self,
        owner_id: &str,
        goal_id: i64,
    ) -> Subscription<Vec<ProgressEntry>> {
        tracing::debug!("live query: progress of goal {goal_id} for {owner_id}");
        let store = self.clone();
        let owner = owner_id.to_string();
        let filter_owner = owner.clone();
        spawn_subscription(
            self.changes.subscribe(),
            self.poll_interval,
            move |change| change.affects_progress_of(&filter_owner, goal_id),
            move || {
                let store = store.clone();
                let owner = owner.clone();
                async move { store.load_progress(&owner, goal_id).await }
            },
        )
    }

    async fn fetch_progress(
        &self,
        owner_id: &str,
        goal_id: i64,
    ) -> Result<Vec<ProgressEntry>, AppError> {
        self.load_progress(owner_id, goal_id).await
    }

    async fn add_progress_entry(
        &self,
        entry: NewProgressEntry,
    ) -> Result<ProgressEntry, AppError> {
        let active = progress_entry::ActiveModel {
            goal_id: Set(entry.goal_id),
            milestone_id: Set(entry.milestone_id.map(|id| id.to_string())),
            owner_id: Set(entry.owner_id.clone()),
            description: Set(entry.description),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let insert = progress_entry::Entity::insert(active).exec(&self.db).await?;
        let created = progress_entry::Entity::find_by_id(insert.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                AppError::StoreFailure("progress entry not found after insert".to_string())
            })?;
        let created = entry_from_model(created)?;
        tracing::info!(
            "logged progress entry {} on goal {}",
            created.id,
            created.goal_id
        );
        self.publish(StoreChange::Progress {
            owner_id: entry.owner_id,
            goal_id: entry.goal_id,
        });
        Ok(created)
    }
}

fn goal_from_model(model: goal::Model) -> Result<Goal, AppError> {
    let milestones = serde_json::from_str(&model.milestones)?;
    Ok(Goal {
        id: Some(model.id),
        owner_id: model.owner_id,
        title: model.title,
        description: model.description,
        icon_name: model.icon_name,
        completion_percentage: model.completion_percentage,
        completion_forced: model.completion_forced,
        target_date: model.target_date,
        milestones,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn entry_from_model(model: progress_entry::Model) -> Result<ProgressEntry, AppError> {
    let milestone_id = model
        .milestone_id
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|err| {
            AppError::StoreFailure(format!(
                "malformed milestone id on progress entry {}: {err}",
                model.id
            ))
        })?;
    Ok(ProgressEntry {
        id: model.id,
        goal_id: model.goal_id,
        milestone_id,
        owner_id: model.owner_id,
        description: model.description,
        created_at: model.created_at,
    })
}

async fn finalize_transaction<T>(
    txn: DatabaseTransaction,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                return Err(rollback_err.into());
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::Milestone;
    use chrono::NaiveDate;
    use sea_orm::PaginatorTrait;
    use tempfile::TempDir;

    const OWNER: &str = "owner-a";
    const WAIT: Duration = Duration::from_secs(5);

    async fn setup_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = db::resolve_db_path(dir.path());
        db::ensure_parent_dir(&db_path).expect("ensure parent");
        let db = db::connect(&db_path).await.expect("connect db");
        db::ensure_schema(&db).await.expect("ensure schema");
        (dir, SqliteStore::new(db))
    }

    fn new_goal(owner: &str, title: &str) -> NewGoal {
        NewGoal {
            owner_id: owner.to_string(),
            title: title.to_string(),
            description: "Description".to_string(),
            icon_name: "star.circle".to_string(),
            completion_percentage: 0.0,
            target_date: NaiveDate::from_ymd_opt(2030, 1, 1).expect("date"),
            milestones: vec![Milestone::new("First"), Milestone::new("Second")],
        }
    }

    fn new_entry(owner: &str, goal_id: i64, description: &str) -> NewProgressEntry {
        NewProgressEntry {
            goal_id,
            milestone_id: None,
            owner_id: owner.to_string(),
            description: description.to_string(),
        }
    }

    async fn next_snapshot<T>(subscription: &mut Subscription<T>) -> T {
        tokio::time::timeout(WAIT, subscription.next())
            .await
            .expect("snapshot in time")
            .expect("subscription open")
            .expect("snapshot ok")
    }

    #[tokio::test]
    async fn create_assigns_id_and_round_trips_milestones() {
        let (_dir, store) = setup_store().await;
        let created = store
            .create_goal(new_goal(OWNER, "Learn Rust"))
            .await
            .expect("create goal");
        let id = created.id.expect("assigned id");

        let fetched = store
            .fetch_goal(id)
            .await
            .expect("fetch goal")
            .expect("goal exists");
        assert_eq!(fetched, created);
        assert_eq!(fetched.milestones.len(), 2);
        assert_eq!(fetched.milestones[0].title, "First");
    }

    #[tokio::test]
    async fn goals_are_scoped_to_owner_and_newest_first() {
        let (_dir, store) = setup_store().await;
        let first = store.create_goal(new_goal(OWNER, "First")).await.expect("first");
        let second = store
            .create_goal(new_goal(OWNER, "Second"))
            .await
            .expect("second");
        store
            .create_goal(new_goal("owner-b", "Other"))
            .await
            .expect("other");

        let goals = store.fetch_goals(OWNER).await.expect("fetch goals");
        let ids: Vec<_> = goals.iter().map(|goal| goal.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn unsaved_goals_report_missing_identifier() {
        let (_dir, store) = setup_store().await;
        let mut goal = store.create_goal(new_goal(OWNER, "Goal")).await.expect("create");
        goal.id = None;

        let err = store.update_goal(&goal).await.expect_err("update should fail");
        assert!(matches!(err, AppError::MissingIdentifier(_)));
        let err = store.delete_goal(&goal).await.expect_err("delete should fail");
        assert!(matches!(err, AppError::MissingIdentifier(_)));
    }

    #[tokio::test]
    async fn update_of_deleted_goal_is_not_found() {
        let (_dir, store) = setup_store().await;
        let goal = store.create_goal(new_goal(OWNER, "Goal")).await.expect("create");
        store.delete_goal(&goal).await.expect("delete");

        let err = store.update_goal(&goal).await.expect_err("update should fail");
        assert!(matches!(err, AppError::NotFound(_)));
        let err = store.delete_goal(&goal).await.expect_err("second delete");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_replaces_fields_but_keeps_owner_and_creation_time() {
        let (_dir, store) = setup_store().await;
        let goal = store.create_goal(new_goal(OWNER, "Goal")).await.expect("create");
        let mut changed = goal.clone();
        changed.title = "Renamed".to_string();
        changed.owner_id = "intruder".to_string();
        changed.milestones[1].is_completed = true;
        changed.completion_percentage = 50.0;

        let updated = store.update_goal(&changed).await.expect("update");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.owner_id, OWNER);
        assert_eq!(updated.created_at, goal.created_at);
        assert!(updated.milestones[1].is_completed);
        assert_eq!(updated.completion_percentage, 50.0);
    }

    #[tokio::test]
    async fn delete_goal_cascades_progress_entries() {
        let (_dir, store) = setup_store().await;
        let goal = store.create_goal(new_goal(OWNER, "Goal")).await.expect("create");
        let goal_id = goal.id.expect("id");
        store
            .add_progress_entry(new_entry(OWNER, goal_id, "Ran 5k"))
            .await
            .expect("entry");

        store.delete_goal(&goal).await.expect("delete");

        let remaining = progress_entry::Entity::find()
            .count(&store.db)
            .await
            .expect("count entries");
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn progress_entries_are_newest_first_and_keep_milestone_reference() {
        let (_dir, store) = setup_store().await;
        let goal = store.create_goal(new_goal(OWNER, "Goal")).await.expect("create");
        let goal_id = goal.id.expect("id");
        let milestone_id = goal.milestones[0].id;

        let first = store
            .add_progress_entry(NewProgressEntry {
                milestone_id: Some(milestone_id),
                ..new_entry(OWNER, goal_id, "Milestone work")
            })
            .await
            .expect("first entry");
        let second = store
            .add_progress_entry(new_entry(OWNER, goal_id, "Goal-level note"))
            .await
            .expect("second entry");

        let entries = store.fetch_progress(OWNER, goal_id).await.expect("entries");
        assert_eq!(entries, vec![second, first]);
        assert_eq!(entries[1].milestone_id, Some(milestone_id));
        assert_eq!(entries[0].milestone_id, None);
    }

    #[tokio::test]
    async fn goal_subscription_pushes_initial_and_updated_snapshots() {
        let (_dir, store) = setup_store().await;
        let mut subscription = store.subscribe_goals(OWNER);
        assert!(next_snapshot(&mut subscription).await.is_empty());

        let created = store.create_goal(new_goal(OWNER, "Goal")).await.expect("create");
        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot, vec![created.clone()]);

        let mut changed = created.clone();
        changed.title = "Changed".to_string();
        store.update_goal(&changed).await.expect("update");
        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "Changed");
    }

    #[tokio::test]
    async fn goal_subscription_ignores_other_owners() {
        let (_dir, store) = setup_store().await;
        let mut subscription = store.subscribe_goals(OWNER);
        next_snapshot(&mut subscription).await;

        store
            .create_goal(new_goal("owner-b", "Not mine"))
            .await
            .expect("create");
        let pending = tokio::time::timeout(Duration::from_millis(200), subscription.next()).await;
        assert!(pending.is_err(), "unexpected snapshot: {pending:?}");
    }

    #[tokio::test]
    async fn progress_subscription_is_scoped_to_goal() {
        let (_dir, store) = setup_store().await;
        let goal_a = store.create_goal(new_goal(OWNER, "A")).await.expect("goal a");
        let goal_b = store.create_goal(new_goal(OWNER, "B")).await.expect("goal b");
        let id_a = goal_a.id.expect("id a");
        let id_b = goal_b.id.expect("id b");

        let mut subscription = store.subscribe_progress(OWNER, id_a);
        assert!(next_snapshot(&mut subscription).await.is_empty());

        store
            .add_progress_entry(new_entry(OWNER, id_b, "Other goal"))
            .await
            .expect("entry b");
        let pending = tokio::time::timeout(Duration::from_millis(200), subscription.next()).await;
        assert!(pending.is_err(), "unexpected snapshot: {pending:?}");

        let entry = store
            .add_progress_entry(new_entry(OWNER, id_a, "This goal"))
            .await
            .expect("entry a");
        assert_eq!(next_snapshot(&mut subscription).await, vec![entry]);
    }

    #[tokio::test]
    async fn released_subscription_detaches_from_store() {
        let (_dir, store) = setup_store().await;
        let mut subscription = store.subscribe_goals(OWNER);
        next_snapshot(&mut subscription).await;
        assert_eq!(store.live_query_count(), 1);

        subscription.release();
        for _ in 0..100 {
            if store.live_query_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.live_query_count(), 0);
    }

    #[tokio::test]
    async fn polling_picks_up_writes_from_another_store() {
        let (dir, store) = setup_store().await;
        let watcher = store.clone().with_poll_interval(Duration::from_millis(20));
        // A separate connection has its own change bus, like another process.
        let db_path = db::resolve_db_path(dir.path());
        let other = SqliteStore::new(db::connect(&db_path).await.expect("connect other"));

        let mut subscription = watcher.subscribe_goals(OWNER);
        assert!(next_snapshot(&mut subscription).await.is_empty());

        let created = other.create_goal(new_goal(OWNER, "Remote")).await.expect("create");
        let snapshot = next_snapshot(&mut subscription).await;
        assert_eq!(snapshot, vec![created]);
    }
}
