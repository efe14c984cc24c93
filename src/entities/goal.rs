use sea_orm::entity::prelude::*;

use super::progress_entry;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "goals")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub icon_name: String,
    pub completion_percentage: f64,
    pub completion_forced: bool,
    pub target_date: Date,
    #[sea_orm(column_type = "Text")]
    pub milestones: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    ProgressEntry,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::ProgressEntry => Entity::has_many(progress_entry::Entity).into(),
        }
    }
}

impl Related<progress_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProgressEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
