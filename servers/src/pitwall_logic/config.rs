use clap::Parser;
use lib_pitwall::core::{EngineConfig, PitStopPolicy, SchedulerConfig};
use lib_pitwall::ingestors::OpenF1Config;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_pitwall.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Pitwall live race event streaming server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PITWALL_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "PITWALL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PITWALL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PITWALL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PITWALL_OPENF1_URL", help = "Base URL of the OpenF1 REST API.")]
    pub openf1_base_url: Option<String>,

    #[clap(long, env = "PITWALL_RANKING_INTERVAL_SECS", help = "Poll interval for the ranking topic.")]
    pub ranking_interval_secs: Option<u64>,

    #[clap(long, env = "PITWALL_WEATHER_INTERVAL_SECS", help = "Poll interval for the weather topic.")]
    pub weather_interval_secs: Option<u64>,

    #[clap(long, env = "PITWALL_DEFAULT_INTERVAL_SECS", help = "Poll interval for every other topic.")]
    pub default_interval_secs: Option<u64>,

    #[clap(long, env = "PITWALL_ERROR_BACKOFF_SECS", help = "Delay before retrying a failed poll.")]
    pub error_backoff_secs: Option<u64>,

    #[clap(long, env = "PITWALL_EVENT_HISTORY_CAPACITY", help = "Events kept per session for the history endpoint.")]
    pub event_history_capacity: Option<usize>,

    #[clap(long, env = "PITWALL_IDLE_SESSION_TTL_SECS", help = "Seconds without a detection pass before a session is evicted.")]
    pub idle_session_ttl_secs: Option<u64>,

    #[clap(long, env = "PITWALL_IDLE_SWEEP_INTERVAL_SECS", help = "Interval of the idle session sweep.")]
    pub idle_sweep_interval_secs: Option<u64>,

    #[clap(long, env = "PITWALL_EVERY_PIT_STOP", help = "Report every pit stop instead of the first one per driver.")]
    pub every_pit_stop: Option<bool>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    /// Built-in values, the lowest layer of the merge.
    pub fn defaults() -> Config {
        let engine = EngineConfig::default();
        let scheduler = &engine.scheduler;
        Config {
            port: Some(9010),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            openf1_base_url: Some(OpenF1Config::default().base_url),
            ranking_interval_secs: Some(scheduler.ranking_interval.as_secs()),
            weather_interval_secs: Some(scheduler.weather_interval.as_secs()),
            default_interval_secs: Some(scheduler.default_interval.as_secs()),
            error_backoff_secs: Some(scheduler.error_backoff.as_secs()),
            event_history_capacity: Some(engine.event_history_capacity),
            idle_session_ttl_secs: Some(engine.idle_session_ttl.as_secs()),
            idle_sweep_interval_secs: Some(engine.idle_sweep_interval.as_secs()),
            every_pit_stop: Some(false),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            openf1_base_url: other.openf1_base_url.or(self.openf1_base_url),
            ranking_interval_secs: other.ranking_interval_secs.or(self.ranking_interval_secs),
            weather_interval_secs: other.weather_interval_secs.or(self.weather_interval_secs),
            default_interval_secs: other.default_interval_secs.or(self.default_interval_secs),
            error_backoff_secs: other.error_backoff_secs.or(self.error_backoff_secs),
            event_history_capacity: other.event_history_capacity.or(self.event_history_capacity),
            idle_session_ttl_secs: other.idle_session_ttl_secs.or(self.idle_session_ttl_secs),
            idle_sweep_interval_secs: other.idle_sweep_interval_secs.or(self.idle_sweep_interval_secs),
            every_pit_stop: other.every_pit_stop.or(self.every_pit_stop),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9010)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn openf1_config(&self) -> OpenF1Config {
        let mut openf1 = OpenF1Config::default();
        if let Some(url) = &self.openf1_base_url {
            openf1.base_url = url.clone();
        }
        openf1
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let secs = |value: Option<u64>, fallback: Duration| value.map(Duration::from_secs).unwrap_or(fallback);
        EngineConfig {
            scheduler: SchedulerConfig {
                ranking_interval: secs(self.ranking_interval_secs, defaults.scheduler.ranking_interval),
                weather_interval: secs(self.weather_interval_secs, defaults.scheduler.weather_interval),
                default_interval: secs(self.default_interval_secs, defaults.scheduler.default_interval),
                error_backoff: secs(self.error_backoff_secs, defaults.scheduler.error_backoff),
            },
            pit_stop_policy: if self.every_pit_stop.unwrap_or(false) {
                PitStopPolicy::EveryStop
            } else {
                PitStopPolicy::FirstPerDriver
            },
            event_history_capacity: self.event_history_capacity.unwrap_or(defaults.event_history_capacity),
            idle_session_ttl: secs(self.idle_session_ttl_secs, defaults.idle_session_ttl),
            idle_sweep_interval: secs(self.idle_sweep_interval_secs, defaults.idle_sweep_interval),
        }
    }

    /// Both TLS files, when both are configured and present on disk.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) if cert.exists() && key.exists() => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let Ok(config_str) = fs::read_to_string(path) else {
        log::warn!("Failed to read config file: {}. Falling back to other sources.", path.display());
        return None;
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => Some(file_config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, the JSON config file and the parsed CLI/env values.
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config = current_config.merge(cli);

    // Default TLS paths if not already set
    if current_config.tls_cert_path.is_none() || current_config.tls_key_path.is_none() {
        if let Some(home_dir) = dirs::home_dir() {
            let letsencrypt_dir = home_dir.join(".letsencrypt");
            if current_config.tls_cert_path.is_none() {
                current_config.tls_cert_path = Some(letsencrypt_dir.join("fullchain.pem"));
            }
            if current_config.tls_key_path.is_none() {
                current_config.tls_key_path = Some(letsencrypt_dir.join("privkey.pem"));
            }
        } else {
            log::warn!("Could not determine home directory for default TLS paths.");
        }
    }

    current_config
}

pub fn load_config() -> Config {
    resolve(Config::parse())
}
