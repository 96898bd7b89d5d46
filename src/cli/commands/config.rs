//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::cli::output;
use crate::config::schema::RemoteBackend;
use crate::config::{Config, ConfigManager};
use crate::error::{ProxyError, ProxyResult};
use clap::ValueEnum;
use std::path::PathBuf;

/// Keys accepted by `config set`
const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "cache.dir",
    "cache.min_upload_size",
    "remote.backend",
    "remote.gcs.bucket",
    "remote.gcs.cache_key",
    "remote.gcs.endpoint",
    "remote.gcs.service_account",
    "remote.http.base_url",
    "remote.http.secret",
    "server.listen",
    "server.secret",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> ProxyResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let mut config = config.clone();
            set_value(&mut config, &key, &value)?;
            config.validate()?;
            manager.save(&config).await?;
            output::step_ok(&format!("Set {} = {}", key, value));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> ProxyResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> ProxyResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        output::step_warn_hint(
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    output::step_ok_detail("Configuration initialized", &path.display().to_string());
    Ok(())
}

/// Apply one dot-separated key to `config`
fn set_value(config: &mut Config, key: &str, value: &str) -> ProxyResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => config.general.log_format = value.to_string(),

        ["cache", "dir"] => config.cache.dir = optional(value).map(PathBuf::from),
        ["cache", "min_upload_size"] => config.cache.min_upload_size = parse_u64(value)?,

        ["remote", "backend"] => {
            config.remote.backend = RemoteBackend::from_str(value, true).map_err(|_| {
                ProxyError::Setting(format!("Unknown backend {:?}; use none, gcs or http", value))
            })?
        }
        ["remote", "gcs", "bucket"] => config.remote.gcs.bucket = value.to_string(),
        ["remote", "gcs", "cache_key"] => config.remote.gcs.cache_key = value.to_string(),
        ["remote", "gcs", "endpoint"] => config.remote.gcs.endpoint = value.to_string(),
        ["remote", "gcs", "service_account"] => {
            config.remote.gcs.service_account = optional(value)
        }
        ["remote", "http", "base_url"] => config.remote.http.base_url = optional(value),
        ["remote", "http", "secret"] => config.remote.http.secret = optional(value),

        ["server", "listen"] => config.server.listen = value.to_string(),
        ["server", "secret"] => config.server.secret = optional(value),

        _ => {
            return Err(ProxyError::Setting(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

/// Empty string clears an optional setting
fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_bool(value: &str) -> ProxyResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ProxyError::Setting(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_u64(value: &str) -> ProxyResult<u64> {
    value
        .parse()
        .map_err(|_| ProxyError::Setting(format!("Invalid number: {}", value)))
}
