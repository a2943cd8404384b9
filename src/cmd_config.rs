use std::path::Path;

use anyhow::{Result, bail};

use crate::ConfigAction;
use crate::config::AppConfig;

pub fn run(action: &ConfigAction, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init => cmd_init(config_path),
        ConfigAction::Show => cmd_show(config_path),
        ConfigAction::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

fn cmd_init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!(
            "Config already exists at {}\nEdit it directly to change settings",
            config_path.display()
        );
    }
    let mut default = AppConfig::default();
    default.delay = Some(crate::agent::DEFAULT_DELAY_MS as i64);
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, serde_json::to_string_pretty(&default)?)?;
    println!("Created {}", config_path.display());
    Ok(())
}

/// Print the effective configuration, environment overrides included.
fn cmd_show(config_path: &Path) -> Result<()> {
    let config = AppConfig::load_or_default(config_path)?.with_env_overrides();
    println!("{}", serde_json::to_string_pretty(&config)?);
    let mut overrides: Vec<_> = config.runtime_overrides().into_iter().collect();
    overrides.sort();
    for (key, value) in overrides {
        println!("{key} = {value}");
    }
    Ok(())
}
