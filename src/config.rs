use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::export::LineFilter;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_IDENTITY_COMMAND: &str = ":put [/system routerboard get serial-number]";
pub const DEFAULT_EXPORT_COMMAND: &str = "/export show-sensitive; /user export show-sensitive";
pub const DEFAULT_COMMIT_MESSAGE: &str = "[Mikrotik] Auto commit for {file}";

/// Top-level configuration loaded from the file given with `-f`.
///
/// Example TOML:
/// ```toml
/// [device]
/// host     = "192.0.2.1"
/// username = "backup"
/// key_file = "/etc/mtbackup/id_ed25519"
///
/// [git]
/// repo_url = "git@example.com:net/backups.git"
/// key_file = "/etc/mtbackup/deploy_key"
/// user     = "Backup Bot"
/// email    = "backup@example.com"
///
/// [notify]
/// on_failure = "logger -t mtbackup failed"
/// ```
///
/// Key names of the older INI layout (`[mikrotik]`, `keyfile`, `repourl`,
/// `onsuccess`, ...) are accepted as aliases.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(alias = "mikrotik")]
    pub device: DeviceConfig,
    pub git: GitConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// SSH connection parameters of the managed device.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(alias = "keyfile")]
    pub key_file: PathBuf,
    /// Hex SHA-256 of the device host key. Unset means any key is accepted.
    #[serde(default)]
    pub host_key_sha256: Option<String>,
    /// Connect and I/O timeout. Unset means block indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Target repository and commit identity.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    #[serde(alias = "repourl")]
    pub repo_url: String,
    #[serde(default, alias = "keyfile")]
    pub key_file: Option<PathBuf>,
    pub user: String,
    pub email: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_message")]
    pub message: String,
}

/// Remote commands and the line-exclusion list.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default = "default_identity_command")]
    pub identity_command: String,
    #[serde(default = "default_export_command")]
    pub export_command: String,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            identity_command: default_identity_command(),
            export_command: default_export_command(),
            exclude: default_exclude(),
        }
    }
}

/// Shell hooks. Every field is optional.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    #[serde(default, alias = "onsuccess")]
    pub on_success: Option<String>,
    #[serde(default, alias = "onfailure")]
    pub on_failure: Option<String>,
    #[serde(default, alias = "onfailuremsg")]
    pub on_failure_msg: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_message() -> String {
    DEFAULT_COMMIT_MESSAGE.to_string()
}

fn default_identity_command() -> String {
    DEFAULT_IDENTITY_COMMAND.to_string()
}

fn default_export_command() -> String {
    DEFAULT_EXPORT_COMMAND.to_string()
}

fn default_exclude() -> Vec<String> {
    LineFilter::DEFAULT_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Config {
    /// Parse and validate a configuration from TOML text.
    ///
    /// `path` is only used in error messages.
    pub fn from_toml(txt: &str, path: &Path) -> Result<Config> {
        let cfg = Config::parse(txt, path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse without the semantic checks of [`Config::validate`].
    ///
    /// Lets the caller reach `[notify]` even when another value is unusable.
    pub fn parse(txt: &str, path: &Path) -> Result<Config> {
        let mut cfg: Config = toml::from_str(txt).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Build the exclusion filter for the export stream.
    pub fn line_filter(&self) -> Result<LineFilter> {
        LineFilter::new(&self.export.exclude)
    }

    fn normalize(&mut self) {
        fn blank_to_none<T: AsRef<str>>(v: &mut Option<T>) {
            if v.as_ref().is_some_and(|s| s.as_ref().trim().is_empty()) {
                *v = None;
            }
        }
        blank_to_none(&mut self.device.host_key_sha256);
        blank_to_none(&mut self.git.branch);
        blank_to_none(&mut self.notify.on_success);
        blank_to_none(&mut self.notify.on_failure);
        blank_to_none(&mut self.notify.on_failure_msg);
        if self
            .git
            .key_file
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.git.key_file = None;
        }
    }

    /// Check required values, the port, timeouts and exclude patterns.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("device.host", self.device.host.as_str()),
            ("device.username", self.device.username.as_str()),
            ("git.repo_url", self.git.repo_url.as_str()),
            ("git.user", self.git.user.as_str()),
            ("git.email", self.git.email.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(Error::ConfigInvalid(format!("{} must not be empty", key)));
            }
        }
        if self.device.key_file.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid(
                "device.key_file must not be empty".to_string(),
            ));
        }
        if self.device.port == 0 {
            return Err(Error::ConfigInvalid("device.port must not be 0".to_string()));
        }
        if self.device.timeout_secs == Some(0) {
            return Err(Error::ConfigInvalid(
                "device.timeout_secs must not be 0; omit it to disable timeouts".to_string(),
            ));
        }
        if self.export.export_command.trim().is_empty()
            || self.export.identity_command.trim().is_empty()
        {
            return Err(Error::ConfigInvalid(
                "export commands must not be empty".to_string(),
            ));
        }
        self.line_filter()?;
        Ok(())
    }
}

/// Load and parse the configuration file at `path`.
///
/// # Errors
/// - `ConfigRead` if the file cannot be read; the message includes the path.
/// - `ConfigParse` if the TOML is malformed or has unknown keys.
/// - `ConfigInvalid` if a required value is empty or a pattern does not compile.
pub fn load_config(path: &Path) -> Result<Config> {
    let cfg = read_config(path)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Read and parse the configuration file without validating it.
///
/// The backup command validates the result itself, so a bad value still
/// reaches the failure hooks.
///
/// # Errors
/// `ConfigRead` or `ConfigParse`, as for [`load_config`].
pub fn read_config(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    Config::parse(&txt, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
[device]
host = "192.0.2.1"
username = "backup"
key_file = "/keys/id_ed25519"

[git]
repo_url = "git@example.com:net/backups.git"
user = "Backup Bot"
email = "backup@example.com"
"#;

    fn parse(txt: &str) -> Result<Config> {
        Config::from_toml(txt, Path::new("test.toml"))
    }

    #[test]
    fn port_defaults_to_22_when_omitted() {
        let cfg = parse(MINIMAL).unwrap();
        assert_eq!(cfg.device.port, 22);
    }

    #[test]
    fn optional_sections_get_defaults() {
        let cfg = parse(MINIMAL).unwrap();
        assert!(cfg.git.key_file.is_none());
        assert!(cfg.git.branch.is_none());
        assert_eq!(cfg.git.message, DEFAULT_COMMIT_MESSAGE);
        assert_eq!(cfg.export.identity_command, DEFAULT_IDENTITY_COMMAND);
        assert_eq!(cfg.export.export_command, DEFAULT_EXPORT_COMMAND);
        assert_eq!(cfg.export.exclude.len(), 2);
        assert!(cfg.notify.on_success.is_none());
        assert!(cfg.notify.on_failure.is_none());
        assert!(cfg.notify.on_failure_msg.is_none());
        assert!(cfg.device.timeout_secs.is_none());
    }

    #[test]
    fn accepts_legacy_key_names() {
        let txt = r#"
[mikrotik]
host = "10.0.0.1"
port = 2222
username = "admin"
keyfile = "/keys/router"

[git]
repourl = "ssh://git@example.com/backups.git"
keyfile = "/keys/deploy"
user = "bot"
email = "bot@example.com"

[notify]
onsuccess = "true"
onfailure = "false"
onfailuremsg = "logger"
"#;
        let cfg = parse(txt).unwrap();
        assert_eq!(cfg.device.port, 2222);
        assert_eq!(cfg.device.key_file, PathBuf::from("/keys/router"));
        assert_eq!(cfg.git.repo_url, "ssh://git@example.com/backups.git");
        assert_eq!(cfg.git.key_file, Some(PathBuf::from("/keys/deploy")));
        assert_eq!(cfg.notify.on_success.as_deref(), Some("true"));
        assert_eq!(cfg.notify.on_failure.as_deref(), Some("false"));
        assert_eq!(cfg.notify.on_failure_msg.as_deref(), Some("logger"));
    }

    #[test]
    fn blank_optional_values_are_unset() {
        let txt = format!(
            "{}\n[notify]\non_success = \"\"\non_failure = \"  \"\n",
            MINIMAL
        );
        let cfg = parse(&txt).unwrap();
        assert!(cfg.notify.on_success.is_none());
        assert!(cfg.notify.on_failure.is_none());
    }

    #[test]
    fn missing_required_key_is_parse_error() {
        let txt = MINIMAL.replace("host = \"192.0.2.1\"\n", "");
        let err = parse(&txt).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let txt = MINIMAL.replace("[git]\n", "[git]\nrepo = \"typo\"\n");
        assert!(matches!(parse(&txt), Err(Error::ConfigParse { .. })));
    }

    #[test]
    fn empty_required_value_is_invalid() {
        let txt = MINIMAL.replace("user = \"Backup Bot\"", "user = \"\"");
        let err = parse(&txt).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(ref m) if m.contains("git.user")));
    }

    #[test]
    fn bad_exclude_pattern_is_invalid() {
        let txt = format!("{}\n[export]\nexclude = ['(unclosed']\n", MINIMAL);
        assert!(matches!(parse(&txt), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let txt = MINIMAL.replace("[git]\n", "timeout_secs = 0\n\n[git]\n");
        let err = parse(&txt).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(ref m) if m.contains("timeout_secs")));
    }

    #[test]
    fn read_config_keeps_notify_of_invalid_config() {
        let td = tempdir().unwrap();
        let p = td.path().join("mtbackup.toml");
        let txt = format!(
            "{}\n[notify]\non_failure = \"echo failed\"\n",
            MINIMAL.replace("user = \"Backup Bot\"", "user = \"\"")
        );
        fs::write(&p, txt).unwrap();

        let cfg = read_config(&p).unwrap();
        assert_eq!(cfg.notify.on_failure.as_deref(), Some("echo failed"));
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid(_))));
        assert!(matches!(load_config(&p), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let td = tempdir().unwrap();
        let missing = td.path().join("nope.toml");
        let err = load_config(&missing).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn load_config_reads_file() {
        let td = tempdir().unwrap();
        let p = td.path().join("mtbackup.toml");
        fs::write(&p, MINIMAL).unwrap();
        let cfg = load_config(&p).unwrap();
        assert_eq!(cfg.device.host, "192.0.2.1");
        assert_eq!(cfg.git.email, "backup@example.com");
    }
}
