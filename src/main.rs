mod app;
mod cli;
mod config;
mod db;
mod entities;
mod error;
mod model;
mod progress;
mod session;
mod store;
mod util;

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::{App, CompletionChange};
use crate::cli::{
    Cli, Command, GoalAdd, GoalCommand, GoalUpdate, GoalWatch, MilestoneAdd, MilestoneCommand,
    MilestoneRename, MilestoneTarget, ProgressAdd, ProgressCommand, ProgressList,
};
use crate::config::{Settings, DEFAULT_LOG_FILTER, LOG_ENV};
use crate::error::AppError;
use crate::model::{Goal, GoalChanges, GoalInput, ProgressInput};
use crate::progress::compute_streak;
use crate::session::{GoalSession, SessionUpdate};
use crate::store::SqliteStore;
use crate::util::{
    format_goal_detail, format_goal_list, format_percentage, format_progress_list,
};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run() -> Result<(), AppError> {
    let Cli {
        owner,
        data_dir,
        command,
    } = Cli::parse();
    let settings = Settings::resolve(data_dir, owner)?;
    let db_path = settings.db_path();
    db::ensure_parent_dir(&db_path)?;
    let mut lock = db::open_lock(&db_path)?;
    let guard = lock.write()?;

    let db = db::connect(&db_path).await?;
    db::ensure_schema(&db).await?;
    let store = SqliteStore::new(db);

    if let Command::Goal(GoalCommand::Watch(args)) = command {
        // A watcher only reads; holding the lock would block every writer.
        drop(guard);
        let store = store.with_poll_interval(config::poll_interval(args.poll_ms)?);
        let app = App::new(Arc::new(store), settings.owner);
        return handle_goal_watch(&app, args).await;
    }

    let app = App::new(Arc::new(store), settings.owner);
    match command {
        Command::Goal(command) => handle_goal(&app, command).await?,
        Command::Milestone(command) => handle_milestone(&app, command).await?,
        Command::Progress(command) => handle_progress(&app, command).await?,
    }
    drop(guard);
    Ok(())
}

async fn handle_goal(app: &App, command: GoalCommand) -> Result<(), AppError> {
    match command {
        GoalCommand::Add(args) => handle_goal_add(app, args).await,
        GoalCommand::List => handle_goal_list(app).await,
        GoalCommand::Show(args) => handle_goal_show(app, args.id).await,
        GoalCommand::Update(args) => handle_goal_update(app, args).await,
        GoalCommand::Complete(args) => handle_goal_complete(app, args.id).await,
        GoalCommand::Remove(args) => handle_goal_remove(app, args.id).await,
        GoalCommand::Watch(args) => handle_goal_watch(app, args).await,
    }
}

async fn handle_milestone(app: &App, command: MilestoneCommand) -> Result<(), AppError> {
    match command {
        MilestoneCommand::Add(args) => handle_milestone_add(app, args).await,
        MilestoneCommand::Done(args) => handle_milestone_status(app, args, Some(true)).await,
        MilestoneCommand::Undo(args) => handle_milestone_status(app, args, Some(false)).await,
        MilestoneCommand::Toggle(args) => handle_milestone_status(app, args, None).await,
        MilestoneCommand::Rename(args) => handle_milestone_rename(app, args).await,
        MilestoneCommand::Remove(args) => handle_milestone_remove(app, args).await,
    }
}

async fn handle_progress(app: &App, command: ProgressCommand) -> Result<(), AppError> {
    match command {
        ProgressCommand::Add(args) => handle_progress_add(app, args).await,
        ProgressCommand::List(args) => handle_progress_list(app, args).await,
    }
}

async fn handle_goal_add(app: &App, args: GoalAdd) -> Result<(), AppError> {
    let goal = app
        .create_goal(GoalInput {
            title: args.title,
            description: args.description,
            icon_name: args.icon,
            target_date: args.target,
            milestones: args.milestones,
        })
        .await?;
    println!("Created goal ID: {}: {}", goal.require_id()?, goal.title);
    Ok(())
}

async fn handle_goal_list(app: &App) -> Result<(), AppError> {
    let goals = app.list_goals().await?;
    if goals.is_empty() {
        println!("No goals found.");
        return Ok(());
    }
    println!("{}", format_goal_list(&goals));
    Ok(())
}

async fn handle_goal_show(app: &App, id: i64) -> Result<(), AppError> {
    let detail = app.get_goal_detail(id, &Local::now()).await?;
    println!(
        "{}",
        format_goal_detail(&detail.goal, &detail.entries, &detail.progress)
    );
    Ok(())
}

async fn handle_goal_update(app: &App, args: GoalUpdate) -> Result<(), AppError> {
    let changes = GoalChanges {
        title: args.title,
        description: args.description,
        icon_name: args.icon,
        target_date: args.target,
    };
    if changes.is_empty() {
        return Err(AppError::InvalidInput("no changes provided".to_string()));
    }
    let goal = app.update_goal(args.id, changes).await?;
    println!("Updated goal {}.", goal.require_id()?);
    Ok(())
}

async fn handle_goal_complete(app: &App, id: i64) -> Result<(), AppError> {
    let (goal, changes) = app.force_complete_goal(id).await?;
    println!("Marked goal ID: {} complete.", goal.require_id()?);
    print_completion_changes(&changes);
    Ok(())
}

async fn handle_goal_remove(app: &App, id: i64) -> Result<(), AppError> {
    app.delete_goal(id).await?;
    println!("Removed goal ID: {id}.");
    Ok(())
}

async fn handle_goal_watch(app: &App, args: GoalWatch) -> Result<(), AppError> {
    let mut session = app.watch_goal(args.id).await?;
    let mut stdout = io::stdout();
    watch_session(&mut session, args.updates, tokio::signal::ctrl_c(), &mut stdout).await?;
    session.close();
    Ok(())
}

// A failed snapshot is reported on stderr and the watch keeps going.
async fn watch_session<S, W>(
    session: &mut GoalSession,
    limit: Option<usize>,
    shutdown: S,
    out: &mut W,
) -> Result<usize, AppError>
where
    S: Future,
    W: Write,
{
    tokio::pin!(shutdown);
    let mut rendered = 0usize;
    loop {
        if limit.is_some_and(|limit| rendered >= limit) {
            break;
        }
        let update = tokio::select! {
            update = session.next_update() => update,
            _ = &mut shutdown => break,
        };
        match update {
            Ok(Some(SessionUpdate::Changed(view))) => {
                if rendered > 0 {
                    writeln!(out)?;
                }
                writeln!(
                    out,
                    "{}",
                    format_goal_detail(&view.goal, &view.entries, &view.progress)
                )?;
                out.flush()?;
                rendered += 1;
            }
            Ok(Some(SessionUpdate::Removed)) => {
                writeln!(out, "Goal ID: {} was removed.", session.goal_id())?;
                break;
            }
            Ok(None) => break,
            Err(err) => eprintln!("Error: {err}"),
        }
    }
    Ok(rendered)
}

async fn handle_milestone_add(app: &App, args: MilestoneAdd) -> Result<(), AppError> {
    let count = args.titles.len();
    let (goal, changes) = app.add_milestones(args.goal_id, args.titles).await?;
    println!(
        "Added {count} milestone(s) to goal ID: {}.",
        goal.require_id()?
    );
    print_completion_changes(&changes);
    Ok(())
}

async fn handle_milestone_status(
    app: &App,
    args: MilestoneTarget,
    completed: Option<bool>,
) -> Result<(), AppError> {
    let (goal, changes) = match completed {
        Some(completed) => {
            app.set_milestone_status(args.goal_id, args.milestone, completed)
                .await?
        }
        None => app.toggle_milestone(args.goal_id, args.milestone).await?,
    };
    let state = match args.milestone.locate(&goal.milestones) {
        Some(idx) if goal.milestones[idx].is_completed => "done",
        Some(_) => "open",
        None => "updated",
    };
    println!(
        "Milestone {} on goal ID: {} is {state}.",
        args.milestone,
        goal.require_id()?
    );
    print_completion(&goal);
    print_completion_changes(&changes);
    Ok(())
}

async fn handle_milestone_rename(app: &App, args: MilestoneRename) -> Result<(), AppError> {
    let goal = app
        .rename_milestone(args.goal_id, args.milestone, args.title)
        .await?;
    println!(
        "Renamed milestone {} on goal ID: {}.",
        args.milestone,
        goal.require_id()?
    );
    Ok(())
}

async fn handle_milestone_remove(app: &App, args: MilestoneTarget) -> Result<(), AppError> {
    let (goal, changes) = app.remove_milestone(args.goal_id, args.milestone).await?;
    println!(
        "Removed milestone {} from goal ID: {}.",
        args.milestone,
        goal.require_id()?
    );
    print_completion(&goal);
    print_completion_changes(&changes);
    Ok(())
}

async fn handle_progress_add(app: &App, args: ProgressAdd) -> Result<(), AppError> {
    let entry = app
        .add_progress_entry(
            args.goal_id,
            ProgressInput {
                description: args.description,
                milestone: args.milestone,
            },
        )
        .await?;
    println!(
        "Logged progress entry ID: {} for goal ID: {}.",
        entry.id, entry.goal_id
    );
    Ok(())
}

async fn handle_progress_list(app: &App, args: ProgressList) -> Result<(), AppError> {
    let goal = app.get_goal(args.goal_id).await?;
    let entries = app.list_progress(args.goal_id).await?;
    let streak = compute_streak(&entries, &Local::now());
    println!("{}", format_progress_list(&goal, &entries, streak));
    Ok(())
}

fn print_completion(goal: &Goal) {
    println!(
        "Completion: {} ({}/{} milestones)",
        format_percentage(goal.completion_percentage),
        goal.milestones_done(),
        goal.milestones.len()
    );
}

fn print_completion_changes(changes: &[CompletionChange]) {
    if changes.is_empty() {
        return;
    }

    println!("Completion updates:");
    for change in changes {
        println!(
            "- Goal ID: {} completion changed from {} to {} ({}).",
            change.goal_id,
            format_percentage(change.from),
            format_percentage(change.to),
            change.reason
        );
    }
}
