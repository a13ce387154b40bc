use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod calendar;
pub mod version;

use calendar::google::auth::AuthError;
use calendar::google::ClientError;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by all fallible operations within this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid date `{input}` (expected YYYY-MM-DD)")]
    InvalidDate { input: String },
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("unable to retrieve events: {0}")]
    Fetch(#[from] ClientError),
    #[error("unsupported output format `{0}` (expected json or table)")]
    UnsupportedFormat(String),
    #[error("failed to encode events as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// How the client authenticates against the Google Calendar API.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthType {
    /// Interactive OAuth flow with a cached user token.
    #[default]
    #[serde(rename = "oauth")]
    OAuth,
    /// Non-interactive service account credentials.
    #[serde(rename = "service_account")]
    ServiceAccount,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthType::OAuth => f.write_str("oauth"),
            AuthType::ServiceAccount => f.write_str("service_account"),
        }
    }
}

/// Global application configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AppConfig {
    /// Authentication mode.
    #[serde(default)]
    pub auth_type: AuthType,
    /// Path to the client secret (OAuth) or service account key file.
    #[serde(default)]
    pub application_credentials: PathBuf,
    /// Path to the cached OAuth user token. Unused for service accounts.
    #[serde(default)]
    pub user_credentials: Option<PathBuf>,
    /// Calendars to query, in order.
    #[serde(default)]
    pub calendar_id_list: Vec<String>,
}

impl AppConfig {
    /// Loads the configuration from `path` (or `~/.config/gcal/config.toml`) and `GCAL_`-prefixed
    /// environment variables. A non-empty `calendar_ids` replaces the configured calendar list.
    pub fn load(path: Option<&Path>, calendar_ids: &[String]) -> Result<AppConfig> {
        AppConfig::load_with_env(path, calendar_ids, environment())
    }

    fn load_with_env(
        path: Option<&Path>,
        calendar_ids: &[String],
        environment: Environment,
    ) -> Result<AppConfig> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        log::info!("loading configuration from {}", path.display());

        let mut builder = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(environment);

        if !calendar_ids.is_empty() {
            builder = builder.set_override("calendar_id_list", calendar_ids.to_vec())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;

        log::debug!("loaded configuration: {:?}", config);

        config.validate()?;

        Ok(config)
    }

    /// Checks that every setting required by the selected auth mode is present.
    pub fn validate(&self) -> Result<()> {
        if self.application_credentials.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "application_credentials is required".into(),
            ));
        }

        if self.auth_type == AuthType::OAuth && self.user_credentials().is_none() {
            return Err(Error::InvalidConfig(
                "user_credentials is required for OAuth authentication".into(),
            ));
        }

        if self.calendar_id_list.is_empty() {
            return Err(Error::InvalidConfig("calendar_id_list is required".into()));
        }

        Ok(())
    }

    /// The OAuth token cache path, if one is configured.
    pub fn user_credentials(&self) -> Option<&Path> {
        self.user_credentials
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

/// Config from environment variables prefixed with `GCAL_`. `GCAL_CALENDAR_ID_LIST` takes a
/// comma separated list.
fn environment() -> Environment {
    Environment::with_prefix("GCAL")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("calendar_id_list")
}

fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        Error::InvalidConfig("unable to determine home directory, pass --config".into())
    })?;

    Ok(home.join(".config").join("gcal").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_oauth_config() {
        let file = config_file(
            r#"
            application_credentials = "/etc/gcal/client_secret.json"
            user_credentials = "/var/lib/gcal/token.json"
            calendar_id_list = ["primary", "team@group.calendar.google.com"]
            "#,
        );

        let config = AppConfig::load(Some(file.path()), &[]).unwrap();

        assert_eq!(config.auth_type, AuthType::OAuth);
        assert_eq!(
            config.application_credentials,
            PathBuf::from("/etc/gcal/client_secret.json")
        );
        assert_eq!(
            config.user_credentials(),
            Some(Path::new("/var/lib/gcal/token.json"))
        );
        assert_eq!(
            config.calendar_id_list,
            vec!["primary", "team@group.calendar.google.com"]
        );
    }

    #[test]
    fn calendar_ids_from_command_line_replace_configured_ones() {
        let file = config_file(
            r#"
            auth_type = "service_account"
            application_credentials = "/etc/gcal/service_account.json"
            calendar_id_list = ["primary"]
            "#,
        );

        let config =
            AppConfig::load(Some(file.path()), &["a@example.com".into(), "b@example.com".into()])
                .unwrap();

        assert_eq!(config.auth_type, AuthType::ServiceAccount);
        assert_eq!(config.calendar_id_list, vec!["a@example.com", "b@example.com"]);
    }

    fn environment_with(vars: &[(&str, &str)]) -> Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        environment().source(Some(vars))
    }

    #[test]
    fn calendar_ids_from_environment() {
        let file = config_file(
            r#"
            auth_type = "service_account"
            application_credentials = "/etc/gcal/service_account.json"
            calendar_id_list = ["primary"]
            "#,
        );
        let env = environment_with(&[
            ("GCAL_CALENDAR_ID_LIST", "a@example.com,b@example.com"),
            ("GCAL_APPLICATION_CREDENTIALS", "/run/secrets/sa.json"),
        ]);

        let config = AppConfig::load_with_env(Some(file.path()), &[], env).unwrap();

        assert_eq!(config.calendar_id_list, vec!["a@example.com", "b@example.com"]);
        assert_eq!(
            config.application_credentials,
            PathBuf::from("/run/secrets/sa.json")
        );
    }

    #[test]
    fn command_line_calendar_ids_win_over_environment() {
        let file = config_file(
            r#"
            auth_type = "service_account"
            application_credentials = "/etc/gcal/service_account.json"
            "#,
        );
        let env = environment_with(&[("GCAL_CALENDAR_ID_LIST", "primary")]);

        let config =
            AppConfig::load_with_env(Some(file.path()), &["c@example.com".into()], env).unwrap();

        assert_eq!(config.calendar_id_list, vec!["c@example.com"]);
    }

    #[test]
    fn oauth_requires_user_credentials() {
        let file = config_file(
            r#"
            application_credentials = "/etc/gcal/client_secret.json"
            calendar_id_list = ["primary"]
            "#,
        );

        let err = AppConfig::load(Some(file.path()), &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn service_account_does_not_need_user_credentials() {
        let config = AppConfig {
            auth_type: AuthType::ServiceAccount,
            application_credentials: "/etc/gcal/sa.json".into(),
            user_credentials: None,
            calendar_id_list: vec!["primary".into()],
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn calendar_list_is_required() {
        let config = AppConfig {
            auth_type: AuthType::OAuth,
            application_credentials: "/etc/gcal/client_secret.json".into(),
            user_credentials: Some("/tmp/token.json".into()),
            calendar_id_list: vec![],
        };

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/gcal.toml")), &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }
}
