use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_ICON: &str = "star.circle";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub title: String,
    pub is_completed: bool,
}

impl Milestone {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            is_completed: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Option<i64>,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub icon_name: String,
    pub completion_percentage: f64,
    pub completion_forced: bool,
    pub target_date: NaiveDate,
    pub milestones: Vec<Milestone>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    pub fn require_id(&self) -> Result<i64, AppError> {
        self.id.ok_or_else(|| {
            AppError::MissingIdentifier(format!("goal '{}' has not been saved", self.title))
        })
    }

    pub fn milestones_done(&self) -> usize {
        self.milestones
            .iter()
            .filter(|milestone| milestone.is_completed)
            .count()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewGoal {
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub icon_name: String,
    pub completion_percentage: f64,
    pub target_date: NaiveDate,
    pub milestones: Vec<Milestone>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: i64,
    pub goal_id: i64,
    pub milestone_id: Option<Uuid>,
    pub owner_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewProgressEntry {
    pub goal_id: i64,
    pub milestone_id: Option<Uuid>,
    pub owner_id: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GoalInput {
    pub title: String,
    pub description: String,
    pub icon_name: Option<String>,
    pub target_date: NaiveDate,
    pub milestones: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GoalChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub icon_name: Option<String>,
    pub target_date: Option<NaiveDate>,
}

impl GoalChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.icon_name.is_none()
            && self.target_date.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct ProgressInput {
    pub description: String,
    pub milestone: Option<MilestoneRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MilestoneRef {
    Position(usize),
    Id(Uuid),
}

impl MilestoneRef {
    pub fn locate(&self, milestones: &[Milestone]) -> Option<usize> {
        match *self {
            Self::Position(position) => {
                (1..=milestones.len()).contains(&position).then(|| position - 1)
            }
            Self::Id(id) => milestones.iter().position(|milestone| milestone.id == id),
        }
    }
}

impl FromStr for MilestoneRef {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_start_matches('#');
        if let Ok(position) = trimmed.parse::<usize>() {
            if position == 0 {
                return Err(AppError::InvalidInput(
                    "milestone positions start at 1".to_string(),
                ));
            }
            return Ok(Self::Position(position));
        }
        Uuid::parse_str(trimmed).map(Self::Id).map_err(|_| {
            AppError::InvalidInput(format!(
                "milestone reference must be a position or an id, got '{value}'"
            ))
        })
    }
}

impl fmt::Display for MilestoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(position) => write!(f, "#{position}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}
