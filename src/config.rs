// Configuration management for the mesh console
// Supports CLI arguments, config file (TOML), and environment variables

use chrono::FixedOffset;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;

use crate::auth::IdTokenClaims;
use crate::machines::view::ViewSettings;
use crate::machines::DEFAULT_KEY_EXPIRY_DAYS;

/// Mesh console - administrative API for devices, routes and key expiry
#[derive(Parser, Debug, Clone)]
#[command(name = "mesh-console")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Web server port
    #[arg(short, long, env = "MESH_CONSOLE_PORT")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long, env = "MESH_CONSOLE_BIND")]
    pub bind: Option<String>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "MESH_CONSOLE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "MESH_CONSOLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON fixture to seed the in-memory store with
    #[arg(long, env = "MESH_CONSOLE_SEED")]
    pub seed: Option<PathBuf>,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub console: ConsoleConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory with the console front-end, served under /console
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    /// "Personal" shows each caller's own account as the organisation
    #[serde(default = "default_org_name")]
    pub org_name: String,

    #[serde(default = "default_provider")]
    pub provider: String,

    /// Offset used to render timestamps
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Key lifetime for seeded accounts that do not set their own
    #[serde(default = "default_key_expiry_days")]
    pub default_key_expiry_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub strip_email_domain: bool,

    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// A pre-issued ID token and the claims it stands for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl TokenEntry {
    pub fn claims(&self) -> IdTokenClaims {
        IdTokenClaims {
            email: self.email.clone(),
            preferred_username: self.preferred_username.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_base_domain() -> String {
    "mesh.local".to_string()
}
fn default_org_name() -> String {
    "Personal".to_string()
}
fn default_provider() -> String {
    "Mesh SaaS".to_string()
}
fn default_utc_offset_hours() -> i32 {
    8
}
fn default_key_expiry_days() -> u32 {
    DEFAULT_KEY_EXPIRY_DAYS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            bind_address: default_bind_address(),
            static_dir: None,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            base_domain: default_base_domain(),
            org_name: default_org_name(),
            provider: default_provider(),
            utc_offset_hours: default_utc_offset_hours(),
            default_key_expiry_days: default_key_expiry_days(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            strip_email_domain: default_true(),
            tokens: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Console settings handed to request handlers
#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub base_domain: String,
    pub org_name: String,
    pub provider: String,
    pub strip_email_domain: bool,
    pub view: ViewSettings,
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub static_dir: Option<PathBuf>,
    pub log_level: Level,
    pub seed_file: Option<PathBuf>,
    pub default_key_expiry_days: u32,
    pub tokens: Vec<TokenEntry>,
    pub console: ConsoleSettings,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args / environment variables > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();

        let config_file = if let Some(config_path) = &cli_args.config {
            let config_content = std::fs::read_to_string(config_path)?;
            toml::from_str::<ConfigFile>(&config_content)?
        } else {
            let default_path = PathBuf::from("mesh-console.toml");
            if default_path.exists() {
                let config_content = std::fs::read_to_string(&default_path)?;
                toml::from_str::<ConfigFile>(&config_content)?
            } else {
                ConfigFile::default()
            }
        };

        Self::merge(cli_args, config_file)
    }

    fn merge(cli_args: CliArgs, file: ConfigFile) -> anyhow::Result<Self> {
        let log_level = parse_log_level(cli_args.log_level.as_deref().unwrap_or(&file.logging.level))?;
        let offset = parse_utc_offset(file.console.utc_offset_hours)?;
        let default_key_expiry_days = file.console.default_key_expiry_days;
        if !(1..=365).contains(&default_key_expiry_days) {
            anyhow::bail!(
                "Invalid default key lifetime: {} days (expected 1..=365)",
                default_key_expiry_days
            );
        }

        Ok(Config {
            port: cli_args.port.unwrap_or(file.server.port),
            bind_address: cli_args.bind.unwrap_or(file.server.bind_address),
            static_dir: file.server.static_dir,
            log_level,
            seed_file: cli_args.seed.or(file.store.seed_file),
            default_key_expiry_days,
            tokens: file.auth.tokens,
            console: ConsoleSettings {
                base_domain: file.console.base_domain,
                org_name: file.console.org_name,
                provider: file.console.provider,
                strip_email_domain: file.auth.strip_email_domain,
                view: ViewSettings { offset },
            },
        })
    }
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}

fn parse_utc_offset(hours: i32) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| anyhow::anyhow!("Invalid UTC offset: {} hours", hours))
}
