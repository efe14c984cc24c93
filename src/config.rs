use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db;
use crate::error::AppError;

pub const OWNER_ENV: &str = "GOALTRACK_OWNER";
pub const HOME_ENV: &str = "GOALTRACK_HOME";
pub const LOG_ENV: &str = "GOALTRACK_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";
pub const DEFAULT_POLL_MS: u64 = 1000;
const DATA_DIR_NAME: &str = ".goaltrack";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub owner: Option<String>,
}

impl Settings {
    pub fn resolve(data_dir: Option<PathBuf>, owner: Option<String>) -> Result<Self, AppError> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::resolve_with_home(data_dir, owner, home.as_deref())
    }

    fn resolve_with_home(
        data_dir: Option<PathBuf>,
        owner: Option<String>,
        home: Option<&Path>,
    ) -> Result<Self, AppError> {
        let data_dir = match data_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => home
                .map(|home| home.join(DATA_DIR_NAME))
                .ok_or_else(|| {
                    AppError::InvalidInput(format!(
                        "unable to resolve data directory; pass --data-dir or set {HOME_ENV}"
                    ))
                })?,
        };
        let owner = owner
            .map(|owner| owner.trim().to_string())
            .filter(|owner| !owner.is_empty());
        Ok(Self { data_dir, owner })
    }

    pub fn db_path(&self) -> PathBuf {
        db::resolve_db_path(&self.data_dir)
    }
}

pub fn poll_interval(millis: u64) -> Result<Duration, AppError> {
    if millis == 0 {
        return Err(AppError::InvalidInput(
            "poll interval must be at least 1 ms".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis))
}
