use std::path::PathBuf;

use crate::app_config::ScannerConfig;
use crate::criteria::{load_criteria, validate_criteria, AndPolicy, LogicOperator, RelevanceSettings};
use crate::ConfigError;

const MAX_FLOOD_WAIT_MULTIPLIER: f64 = 100.0;
const MAX_DEFAULT_DELAY_SECS: f64 = 3_600.0;
const MAX_WAIT_TIME_SECS: f64 = 86_400.0;
const MAX_DISCOVERY_TIMEOUT_SECS: u64 = 7 * 86_400;

/// Load scanner configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid or the criteria file is unusable.
pub fn load_scanner_config() -> Result<ScannerConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_scanner_config_from_env()
}

/// Load scanner configuration from environment variables already in the process.
///
/// Unlike [`load_scanner_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid or the criteria file is unusable.
pub fn load_scanner_config_from_env() -> Result<ScannerConfig, ConfigError> {
    build_scanner_config(|key| std::env::var(key))
}

/// Build scanner configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
fn build_scanner_config<F>(lookup: F) -> Result<ScannerConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = ScannerConfig::default();

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: u32| -> Result<u32, ConfigError> {
        lookup(var).map_or(Ok(default), |raw| {
            raw.trim().parse::<u32>().map_err(|e| invalid(var, e.to_string()))
        })
    };

    let parse_u64 = |var: &str, default: u64| -> Result<u64, ConfigError> {
        lookup(var).map_or(Ok(default), |raw| {
            raw.trim().parse::<u64>().map_err(|e| invalid(var, e.to_string()))
        })
    };

    let parse_i64 = |var: &str, default: i64| -> Result<i64, ConfigError> {
        lookup(var).map_or(Ok(default), |raw| {
            raw.trim().parse::<i64>().map_err(|e| invalid(var, e.to_string()))
        })
    };

    let parse_usize = |var: &str, default: usize| -> Result<usize, ConfigError> {
        lookup(var).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<usize>()
                .map_err(|e| invalid(var, e.to_string()))
        })
    };

    let parse_f64 = |var: &str, default: f64| -> Result<f64, ConfigError> {
        lookup(var).map_or(Ok(default), |raw| {
            let value = raw
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(var, e.to_string()))?;
            if value.is_finite() && value >= 0.0 {
                Ok(value)
            } else {
                Err(invalid(var, format!("must be a non-negative number, got {value}")))
            }
        })
    };

    let at_most = |var: &str, value: f64, max: f64| -> Result<f64, ConfigError> {
        if value > max {
            Err(invalid(var, format!("must be at most {max}, got {value}")))
        } else {
            Ok(value)
        }
    };

    let at_least = |var: &str, value: usize, min: usize| -> Result<usize, ConfigError> {
        if value < min {
            Err(invalid(var, format!("must be at least {min}")))
        } else {
            Ok(value)
        }
    };

    let api_id = lookup("TGSCAN_API_ID").ok().filter(|v| !v.is_empty());
    let api_hash = lookup("TGSCAN_API_HASH").ok().filter(|v| !v.is_empty());
    let log_level = lookup("TGSCAN_LOG_LEVEL").unwrap_or(defaults.log_level);
    let cache_path = lookup("TGSCAN_CACHE_PATH").map_or(defaults.cache_path, PathBuf::from);

    let scan_interval_secs = parse_u64("TGSCAN_SCAN_INTERVAL_SECS", defaults.scan_interval_secs)?;
    if scan_interval_secs == 0 {
        return Err(invalid("TGSCAN_SCAN_INTERVAL_SECS", "must be at least 1".to_owned()));
    }
    let max_history_days = parse_i64("TGSCAN_MAX_HISTORY_DAYS", defaults.max_history_days)?;
    let selected_groups = lookup("TGSCAN_SELECTED_GROUPS")
        .map(|raw| split_list(&raw))
        .unwrap_or_default();

    let requests_per_minute =
        parse_u32("TGSCAN_REQUESTS_PER_MINUTE", defaults.requests_per_minute)?;
    if requests_per_minute == 0 {
        return Err(invalid("TGSCAN_REQUESTS_PER_MINUTE", "must be at least 1".to_owned()));
    }
    let flood_wait_multiplier =
        parse_f64("TGSCAN_FLOOD_WAIT_MULTIPLIER", defaults.flood_wait_multiplier)?;
    if flood_wait_multiplier < 1.0 {
        return Err(invalid(
            "TGSCAN_FLOOD_WAIT_MULTIPLIER",
            format!("must be at least 1.0, got {flood_wait_multiplier}"),
        ));
    }
    let flood_wait_multiplier = at_most(
        "TGSCAN_FLOOD_WAIT_MULTIPLIER",
        flood_wait_multiplier,
        MAX_FLOOD_WAIT_MULTIPLIER,
    )?;
    let default_delay_secs = at_most(
        "TGSCAN_DEFAULT_DELAY_SECS",
        parse_f64("TGSCAN_DEFAULT_DELAY_SECS", defaults.default_delay_secs)?,
        MAX_DEFAULT_DELAY_SECS,
    )?;
    let max_wait_time_secs = at_most(
        "TGSCAN_MAX_WAIT_TIME_SECS",
        parse_f64("TGSCAN_MAX_WAIT_TIME_SECS", defaults.max_wait_time_secs)?,
        MAX_WAIT_TIME_SECS,
    )?;
    let max_retries = parse_u32("TGSCAN_MAX_RETRIES", defaults.max_retries)?;
    let discovery_timeout_secs =
        parse_u64("TGSCAN_DISCOVERY_TIMEOUT_SECS", defaults.discovery_timeout_secs)?;
    if discovery_timeout_secs > MAX_DISCOVERY_TIMEOUT_SECS {
        return Err(invalid(
            "TGSCAN_DISCOVERY_TIMEOUT_SECS",
            format!("must be at most {MAX_DISCOVERY_TIMEOUT_SECS}, got {discovery_timeout_secs}"),
        ));
    }

    let worker_count = at_least(
        "TGSCAN_WORKER_COUNT",
        parse_usize("TGSCAN_WORKER_COUNT", defaults.worker_count)?,
        1,
    )?;
    let queue_capacity = at_least(
        "TGSCAN_QUEUE_CAPACITY",
        parse_usize("TGSCAN_QUEUE_CAPACITY", defaults.queue_capacity)?,
        1,
    )?;
    let history_page_size = at_least(
        "TGSCAN_HISTORY_PAGE_SIZE",
        parse_usize("TGSCAN_HISTORY_PAGE_SIZE", defaults.history_page_size)?,
        1,
    )?;

    let relevance = match lookup("TGSCAN_CRITERIA_PATH") {
        Ok(path) => load_criteria(&PathBuf::from(path))?,
        Err(_) => {
            let settings = RelevanceSettings {
                keywords: lookup("TGSCAN_KEYWORDS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default(),
                regex_patterns: Vec::new(),
                logic: lookup("TGSCAN_LOGIC").map_or(Ok(LogicOperator::default()), |raw| {
                    raw.parse().map_err(|e| invalid("TGSCAN_LOGIC", e))
                })?,
                and_policy: lookup("TGSCAN_AND_POLICY").map_or(Ok(AndPolicy::default()), |raw| {
                    raw.parse().map_err(|e| invalid("TGSCAN_AND_POLICY", e))
                })?,
            };
            validate_criteria(&settings)?;
            settings
        }
    };

    Ok(ScannerConfig {
        api_id,
        api_hash,
        log_level,
        cache_path,
        scan_interval_secs,
        max_history_days,
        selected_groups,
        relevance,
        requests_per_minute,
        flood_wait_multiplier,
        default_delay_secs,
        max_wait_time_secs,
        max_retries,
        discovery_timeout_secs,
        worker_count,
        queue_capacity,
        history_page_size,
    })
}

/// Split a comma-separated env value, trimming entries and dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
