use std::env;
use std::path::PathBuf;

use cascade_core::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub configuration_path: PathBuf,
    pub events_path: PathBuf,
    pub seed_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub migrate_only: bool,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        let database_url = optional_env("DATABASE_URL");
        let database_max_connections = parse_env_u32("CASCADE_DB_MAX_CONNECTIONS", 5)?;

        if database_max_connections == 0 {
            return Err(AppError::Validation(
                "CASCADE_DB_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        if migrate_only {
            if database_url.is_none() {
                return Err(AppError::Validation(
                    "DATABASE_URL is required to run migrations".to_owned(),
                ));
            }

            return Ok(Self {
                configuration_path: PathBuf::new(),
                events_path: PathBuf::new(),
                seed_path: None,
                database_url,
                database_max_connections,
                migrate_only,
            });
        }

        Ok(Self {
            configuration_path: required_env("CASCADE_CONFIG_PATH")?.into(),
            events_path: required_env("CASCADE_EVENTS_PATH")?.into(),
            seed_path: optional_env("CASCADE_SEED_PATH").map(PathBuf::from),
            database_url,
            database_max_connections,
            migrate_only,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    optional_env(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => parse_u32(name, value.as_str()),
        Err(_) => Ok(default),
    }
}

fn parse_u32(name: &str, value: &str) -> AppResult<u32> {
    value.trim().parse::<u32>().map_err(|error| {
        AppError::Validation(format!("invalid {name} value '{value}': {error}"))
    })
}
