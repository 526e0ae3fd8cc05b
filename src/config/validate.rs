// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TaskfarmError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TaskfarmError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.engine, raw.adapter))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_adapters(cfg)?;
    validate_engine_section(cfg)?;
    validate_adapter_sections(cfg)?;
    Ok(())
}

fn ensure_has_adapters(cfg: &RawConfigFile) -> Result<()> {
    if cfg.adapter.is_empty() {
        return Err(TaskfarmError::ConfigError(
            "config must contain at least one [adapter.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.op_timeout_secs == 0 {
        return Err(TaskfarmError::ConfigError(
            "[engine].op_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.engine.max_unknown_polls == 0 {
        return Err(TaskfarmError::ConfigError(
            "[engine].max_unknown_polls must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_adapter_sections(cfg: &RawConfigFile) -> Result<()> {
    for (name, adapter) in cfg.adapter.iter() {
        if name.is_empty() {
            return Err(TaskfarmError::ConfigError(
                "adapter name must not be empty".to_string(),
            ));
        }
        if adapter.max_tasks == 0 {
            return Err(TaskfarmError::ConfigError(format!(
                "adapter '{name}': max_tasks must be >= 1 (got 0)"
            )));
        }
        if let Some(cores) = adapter.cores {
            if cores == 0 {
                return Err(TaskfarmError::ConfigError(format!(
                    "adapter '{name}': cores must be >= 1 (got 0)"
                )));
            }
        }
    }
    Ok(())
}
