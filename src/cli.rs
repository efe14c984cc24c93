use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_POLL_MS, HOME_ENV, OWNER_ENV};
use crate::model::MilestoneRef;

#[derive(Parser, Debug)]
#[command(
    name = "goaltrack",
    version,
    about = "Track goals, milestones and daily progress with SQLite"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = OWNER_ENV,
        value_name = "ID",
        help = "Owner identifier the goals belong to"
    )]
    pub owner: Option<String>,
    #[arg(
        long,
        global = true,
        env = HOME_ENV,
        value_name = "PATH",
        help = "Directory holding goaltrack.db (default: $HOME/.goaltrack)"
    )]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(subcommand)]
    Goal(GoalCommand),
    #[command(subcommand)]
    Milestone(MilestoneCommand),
    #[command(subcommand)]
    Progress(ProgressCommand),
}

#[derive(Subcommand, Debug)]
pub enum GoalCommand {
    Add(GoalAdd),
    List,
    Show(GoalId),
    Update(GoalUpdate),
    #[command(about = "Mark the goal 100% complete regardless of its milestones")]
    Complete(GoalId),
    Remove(GoalId),
    #[command(about = "Re-render the goal on every change until interrupted")]
    Watch(GoalWatch),
}

#[derive(Subcommand, Debug)]
pub enum MilestoneCommand {
    Add(MilestoneAdd),
    Done(MilestoneTarget),
    Undo(MilestoneTarget),
    Toggle(MilestoneTarget),
    Rename(MilestoneRename),
    Remove(MilestoneTarget),
}

#[derive(Subcommand, Debug)]
pub enum ProgressCommand {
    Add(ProgressAdd),
    List(ProgressList),
}

#[derive(Args, Debug)]
pub struct GoalAdd {
    pub title: String,
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    pub target: NaiveDate,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub icon: Option<String>,
    #[arg(long = "milestone", value_name = "TITLE")]
    pub milestones: Vec<String>,
}

#[derive(Args, Debug)]
pub struct GoalId {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct GoalUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub icon: Option<String>,
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    pub target: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct GoalWatch {
    pub id: i64,
    #[arg(
        long,
        default_value_t = DEFAULT_POLL_MS,
        help = "Milliseconds between checks for changes made by other processes"
    )]
    pub poll_ms: u64,
    #[arg(long, value_name = "N", help = "Exit after rendering N views")]
    pub updates: Option<usize>,
}

#[derive(Args, Debug)]
pub struct MilestoneAdd {
    pub goal_id: i64,
    #[arg(required = true, num_args = 1.., value_name = "TITLE")]
    pub titles: Vec<String>,
}

#[derive(Args, Debug)]
pub struct MilestoneTarget {
    pub goal_id: i64,
    #[arg(value_name = "REF", help = "1-based position (2 or #2) or milestone id")]
    pub milestone: MilestoneRef,
}

#[derive(Args, Debug)]
pub struct MilestoneRename {
    pub goal_id: i64,
    #[arg(value_name = "REF", help = "1-based position (2 or #2) or milestone id")]
    pub milestone: MilestoneRef,
    pub title: String,
}

#[derive(Args, Debug)]
pub struct ProgressAdd {
    pub goal_id: i64,
    pub description: String,
    #[arg(long, value_name = "REF")]
    pub milestone: Option<MilestoneRef>,
}

#[derive(Args, Debug)]
pub struct ProgressList {
    pub goal_id: i64,
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("expected a date as YYYY-MM-DD, got '{value}'"))
}
