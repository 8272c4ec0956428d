//! Minimal runtime configuration helpers.
//! Everything comes from environment variables, optionally seeded from a `.env` file.

use crate::client::DEFAULT_URL;
use crate::services::fetch::FetchSettings;
use crate::services::sync::{HeatPumpProfile, Profiles};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{fs, io};

pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEATPUMP_PORT: u16 = 502;
pub const DEFAULT_HEATPUMP_UNIT_ID: u8 = 1;
pub const DEFAULT_REGISTER_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FETCH_ALIGN_MINUTES: u32 = 60;
pub const DEFAULT_WINDOW_START_HOUR: u32 = 18;
pub const DEFAULT_WINDOW_END_HOUR: u32 = 9;

/// Setpoints must survive x100 scaling into a signed 16-bit register.
const MAX_ABS_TEMP: i16 = 327;

#[derive(Debug, Clone)]
pub struct Config {
    pub tibber_token: String,
    pub tibber_url: String,
    pub feed_timeout: Duration,
    /// `host:port` of the heat pump's Modbus TCP interface.
    pub heatpump_endpoint: String,
    pub heatpump_unit_id: u8,
    pub register_timeout: Duration,
    pub profiles: Profiles,
    pub sync_interval: Duration,
    pub fetch: FetchSettings,
    pub log_level: Option<LevelFilter>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Prefer env var; fallback to token.txt in working directory
        let tibber_token = match get("TIBBER_TOKEN") {
            Some(v) => v,
            None => match fs::read_to_string("token.txt") {
                Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => {
                    return Err(
                        "Missing Tibber token: set TIBBER_TOKEN or provide token.txt in working directory".to_string(),
                    );
                }
            },
        };
        let tibber_url = get("TIBBER_URL").unwrap_or_else(|| DEFAULT_URL.to_string());

        let host = get("HEATPUMP_HOST").ok_or_else(|| "HEATPUMP_HOST must be set".to_string())?;
        let port: u16 = parse_or(&get, "HEATPUMP_PORT", DEFAULT_HEATPUMP_PORT)?;
        let heatpump_unit_id = parse_or(&get, "HEATPUMP_UNIT_ID", DEFAULT_HEATPUMP_UNIT_ID)?;

        let profiles = Profiles {
            cheap: profile(&get, "CHEAP")?,
            normal: profile(&get, "NORMAL")?,
        };

        let window_start_hour = parse_or(&get, "WINDOW_START_HOUR", DEFAULT_WINDOW_START_HOUR)?;
        let window_end_hour = parse_or(&get, "WINDOW_END_HOUR", DEFAULT_WINDOW_END_HOUR)?;
        for (key, hour) in [("WINDOW_START_HOUR", window_start_hour), ("WINDOW_END_HOUR", window_end_hour)] {
            if hour > 23 {
                return Err(format!("{} must be between 0 and 23, got {}", key, hour));
            }
        }
        let align_minutes = parse_or(&get, "FETCH_ALIGN_MINUTES", DEFAULT_FETCH_ALIGN_MINUTES)?;
        if align_minutes == 0 || align_minutes > 60 || 60 % align_minutes != 0 {
            return Err(format!(
                "FETCH_ALIGN_MINUTES must evenly divide an hour, got {}",
                align_minutes
            ));
        }

        let sync_secs = parse_or(&get, "SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        if sync_secs == 0 {
            return Err("SYNC_INTERVAL_SECS must be positive".to_string());
        }

        let log_level = match get("LOG_LEVEL") {
            Some(s) => Some(
                LevelFilter::from_str(&s).map_err(|_| format!("LOG_LEVEL '{}' is not a valid log level", s))?,
            ),
            None => None,
        };

        Ok(Config {
            tibber_token,
            tibber_url,
            feed_timeout: Duration::from_secs(parse_or(&get, "FEED_TIMEOUT_SECS", DEFAULT_FEED_TIMEOUT_SECS)?),
            heatpump_endpoint: format!("{}:{}", host, port),
            heatpump_unit_id,
            register_timeout: Duration::from_secs(parse_or(
                &get,
                "REGISTER_TIMEOUT_SECS",
                DEFAULT_REGISTER_TIMEOUT_SECS,
            )?),
            profiles,
            sync_interval: Duration::from_secs(sync_secs),
            fetch: FetchSettings {
                window_start_hour,
                window_end_hour,
                align_minutes,
            },
            log_level,
            log_file: get("LOG_FILE").map(PathBuf::from),
        })
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, String> {
    match get(key) {
        Some(s) => s.parse().map_err(|_| format!("{} has invalid value '{}'", key, s)),
        None => Ok(default),
    }
}

fn profile(get: &impl Fn(&str) -> Option<String>, prefix: &str) -> Result<HeatPumpProfile, String> {
    let temp = |suffix: &str| -> Result<i16, String> {
        let key = format!("{}_{}_TEMP", prefix, suffix);
        let raw = get(&key).ok_or_else(|| format!("{} must be set", key))?;
        let value: i16 = raw.parse().map_err(|_| format!("{} has invalid value '{}'", key, raw))?;
        if value.abs() > MAX_ABS_TEMP {
            return Err(format!("{} is out of range: {}", key, value));
        }
        Ok(value)
    };
    let p = HeatPumpProfile {
        start: temp("START")?,
        stop: temp("STOP")?,
    };
    if p.start >= p.stop {
        return Err(format!(
            "{} profile start temperature ({}) must be below stop temperature ({})",
            prefix.to_ascii_lowercase(),
            p.start,
            p.stop
        ));
    }
    Ok(p)
}

/// Set every `KEY=value` from `path` that is not already in the process environment.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let contents = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut applied = 0;
    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Only called from `main` before any thread is spawned.
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parse one `.env` line. Blank lines and `#` comments yield `None`.
/// Supports an optional `export ` prefix, and single- or double-quoted values.
pub fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid variable name '{}'", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => parse_quoted(&raw[1..], q)?,
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

/// Scan a quoted value up to its closing `quote`. Only double quotes honour
/// backslash escapes. After the closing quote only a `#` comment may follow.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if escape {
            result.push(match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            });
            escape = false;
            continue;
        }
        match ch {
            '\\' if quote == '"' => escape = true,
            c if c == quote => {
                let remainder = chars.as_str().trim();
                if remainder.is_empty() || remainder.starts_with('#') {
                    return Ok(result);
                }
                return Err(format!("unexpected characters after closing {} quote", quote));
            }
            other => result.push(other),
        }
    }

    if escape {
        Err("unterminated escape sequence in double-quoted value".to_string())
    } else {
        Err(format!("unterminated {} quoted value", quote))
    }
}

/// Open the configured log file for appending.
pub fn open_log_file(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().create(true).append(true).open(path)
}
