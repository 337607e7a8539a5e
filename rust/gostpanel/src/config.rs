use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{fs, path::{Path, PathBuf}};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the panel listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// JSON array of forwarding rules.
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,

    /// systemctl and /etc/systemd need root; refuse to start without it.
    #[serde(default = "default_true")]
    pub require_root: bool,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,

    /// Lowercase hex SHA-256 of the password (`gostpanel hash-password`).
    #[serde(default = "default_password_sha256")]
    pub password_sha256: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { username: default_username(), password_sha256: default_password_sha256() }
    }
}

impl AuthConfig {
    pub fn uses_default_password(&self) -> bool {
        self.password_sha256.eq_ignore_ascii_case(&default_password_sha256())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// If set, logs are also appended here.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_unit_name")]
    pub unit_name: String,
    #[serde(default = "default_unit_path")]
    pub unit_path: PathBuf,
    #[serde(default = "default_systemctl")]
    pub systemctl: String,
    /// Per systemctl invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Forwarder binary placed at the head of ExecStart.
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_restart")]
    pub restart: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_after")]
    pub after: String,
    #[serde(default = "default_wanted_by")]
    pub wanted_by: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit_name: default_unit_name(),
            unit_path: default_unit_path(),
            systemctl: default_systemctl(),
            command_timeout_secs: default_command_timeout_secs(),
            binary: default_binary(),
            description: default_description(),
            restart: default_restart(),
            user: default_user(),
            after: default_after(),
            wanted_by: default_wanted_by(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            rules_file: default_rules_file(),
            require_root: true,
            auth: AuthConfig::default(),
            log: LogConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

fn default_true() -> bool { true }
fn default_listen() -> String { "0.0.0.0:5000".to_string() }
fn default_rules_file() -> PathBuf { PathBuf::from("/opt/gost_web/rules.json") }
fn default_username() -> String { "admin".to_string() }
fn default_password_sha256() -> String { sha256_hex("admin") }
fn default_log_level() -> String { "info".to_string() }
fn default_unit_name() -> String { "gost".to_string() }
fn default_unit_path() -> PathBuf { PathBuf::from("/etc/systemd/system/gost.service") }
fn default_systemctl() -> String { "systemctl".to_string() }
fn default_command_timeout_secs() -> u64 { 30 }
fn default_binary() -> String { "/usr/local/bin/gost/gost".to_string() }
fn default_description() -> String { "GOST Service".to_string() }
fn default_restart() -> String { "always".to_string() }
fn default_user() -> String { "root".to_string() }
fn default_after() -> String { "network.target".to_string() }
fn default_wanted_by() -> String { "multi-user.target".to_string() }

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&s).with_context(|| format!("parse json {}", path.display()))?;
        Ok(cfg)
    }

    /// Load `path` if given, otherwise start from built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:5000");
        assert_eq!(cfg.rules_file, PathBuf::from("/opt/gost_web/rules.json"));
        assert!(cfg.require_root);
        assert_eq!(cfg.service.unit_name, "gost");
        assert_eq!(cfg.service.unit_path, PathBuf::from("/etc/systemd/system/gost.service"));
        assert_eq!(cfg.service.command_timeout_secs, 30);
        assert_eq!(cfg.auth.username, "admin");
        assert!(cfg.auth.uses_default_password());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"service": {"binary": "/opt/gost"}, "log": {"level": "debug"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.service.binary, "/opt/gost");
        assert_eq!(cfg.service.restart, "always");
        assert_eq!(cfg.log.level, "debug");
        assert!(cfg.log.file.is_none());
    }

    #[test]
    fn load_reads_file_and_reports_bad_json() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"listen": "127.0.0.1:9000", "auth": {{"password_sha256": "{}"}}}}"#, sha256_hex("s3cret")).unwrap();
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert!(!cfg.auth.uses_default_password());

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, "{{").unwrap();
        let err = Config::load(bad.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parse json"));
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
