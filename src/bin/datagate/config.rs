use anyhow::{bail, Context, Result};
use datagate::DatabaseConfig;
use std::fs;

pub const PROJECT_FILE: &str = "./datagate.toml";

/// Resolves the config for the CLI: the named project from the project file
/// when `--project` is given, otherwise the `DATABASE_*` environment.
pub fn resolve(project: Option<&str>) -> Result<DatabaseConfig> {
    let env_config = DatabaseConfig::from_env()?;

    match project {
        Some(name) => {
            let contents = fs::read_to_string(PROJECT_FILE)
                .with_context(|| format!("{} don't exist", PROJECT_FILE))?;
            let (url, token) = load_project(&contents, name)?;

            Ok(DatabaseConfig {
                url: Some(url),
                token: token.or(env_config.token),
                ..env_config
            })
        }
        None => Ok(env_config),
    }
}

/// Reads `database_url` and the optional `database_token` of one project table.
pub fn load_project(contents: &str, project_name: &str) -> Result<(String, Option<String>)> {
    let config: toml::Table = toml::from_str(contents)?;

    let project = match config.get(project_name).and_then(|p| p.as_table()) {
        Some(p) => p,
        None => bail!("didn't find config for {}", project_name),
    };

    let database_url = match project.get("database_url").and_then(|v| v.as_str()) {
        Some(url) => url.to_string(),
        None => bail!("didn't find database_url for project {}", project_name),
    };

    let database_token = project
        .get("database_token")
        .and_then(|v| v.as_str())
        .map(|t| t.to_string());

    Ok((database_url, database_token))
}
