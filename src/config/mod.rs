//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString so it
//! never shows up in logs.

pub mod secrets;

use crate::dispatch::{DispatchSettings, RouteOverrides};
use crate::error::{Error, Result};
use secrets::SecretString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE: &str = "dispatch";
pub const DEFAULT_LOCAL_CYCLES: u32 = 20;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Queue used by tasks that don't route anywhere specific.
    pub default_queue: String,
    /// How many claim-run-check cycles a holder performs before requeueing.
    pub local_cycles: u32,
    /// Refuse dispatch from inside an ambient transaction.
    pub strict: bool,
    /// Skip broker interaction entirely; publishing still returns descriptors.
    pub bypass_broker: bool,
    pub sweep_interval: Duration,
    /// Optional TOML file with per-task queue overrides.
    pub routes_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let local_cycles = parse_var("DISPATCH_LOCAL_CYCLES", DEFAULT_LOCAL_CYCLES)?;
        if local_cycles == 0 {
            return Err(Error::Config(
                "DISPATCH_LOCAL_CYCLES must be at least 1".to_string(),
            ));
        }
        let sweep_secs = parse_var("DISPATCH_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_secs == 0 {
            return Err(Error::Config(
                "DISPATCH_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            default_queue: std::env::var("DISPATCH_DEFAULT_QUEUE")
                .unwrap_or_else(|_| DEFAULT_QUEUE.to_string()),
            local_cycles,
            strict: bool_var("DISPATCH_STRICT", true)?,
            bypass_broker: bool_var("DISPATCH_BYPASS_BROKER", false)?,
            sweep_interval: Duration::from_secs(sweep_secs),
            routes_file: std::env::var("DISPATCH_ROUTES").ok().map(PathBuf::from),
        })
    }

    /// Load the route override file, if one is configured.
    pub fn route_overrides(&self) -> Result<Option<RouteOverrides>> {
        self.routes_file
            .as_deref()
            .map(RouteOverrides::load)
            .transpose()
    }

    /// Runtime knobs for the dispatcher.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            default_queue: self.default_queue.clone(),
            local_cycles: self.local_cycles,
            strict: self.strict,
            bypass_broker: self.bypass_broker,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| Error::Config(format!("{name} is not a boolean: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
