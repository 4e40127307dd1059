//! Resolution of the PV_Forecast user ID and API key.
//!
//! Credentials come from a prioritized list of [`CredentialSource`]s. Each
//! field is resolved on its own: the first source providing it wins.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{PvForecastError, Result};

pub const USER_ID_ENV: &str = "PVFORECAST_USER_ID";
pub const API_KEY_ENV: &str = "PVFORECAST_API_KEY";
/// Accepted for the key only, as older installs used it.
pub const LEGACY_API_KEY_ENV: &str = "PVForecastAPIKey";
pub const CREDENTIALS_FILE_NAME: &str = ".pvforecast_credentials";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Credentials {
            user_id: user_id.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum CredentialSource {
    Explicit {
        user_id: Option<String>,
        api_key: Option<String>,
    },
    /// Reads the named variables; `api_key_vars` are tried in order.
    Environment {
        user_id_var: String,
        api_key_vars: Vec<String>,
    },
    File(PathBuf),
}

impl CredentialSource {
    pub fn environment() -> Self {
        CredentialSource::Environment {
            user_id_var: USER_ID_ENV.to_string(),
            api_key_vars: vec![API_KEY_ENV.to_string(), LEGACY_API_KEY_ENV.to_string()],
        }
    }

    fn lookup(&self) -> Result<PartialCredentials> {
        match self {
            CredentialSource::Explicit { user_id, api_key } => Ok(PartialCredentials {
                user_id: non_empty(user_id.clone()),
                api_key: non_empty(api_key.clone()),
            }),
            CredentialSource::Environment {
                user_id_var,
                api_key_vars,
            } => Ok(PartialCredentials {
                user_id: non_empty(std::env::var(user_id_var).ok()),
                api_key: api_key_vars
                    .iter()
                    .find_map(|var| non_empty(std::env::var(var).ok())),
            }),
            CredentialSource::File(path) => read_credentials_file(path),
        }
    }
}

/// Explicit arguments, then the environment, then `.pvforecast_credentials`
/// in the working directory and in the home directory.
pub fn default_sources(user_id: Option<String>, api_key: Option<String>) -> Vec<CredentialSource> {
    let mut sources = vec![
        CredentialSource::Explicit { user_id, api_key },
        CredentialSource::environment(),
        CredentialSource::File(PathBuf::from(CREDENTIALS_FILE_NAME)),
    ];
    if let Some(home) = dirs::home_dir() {
        sources.push(CredentialSource::File(home.join(CREDENTIALS_FILE_NAME)));
    }
    sources
}

pub fn resolve_credentials(sources: &[CredentialSource]) -> Result<Credentials> {
    let mut user_id = None;
    let mut api_key = None;

    for source in sources {
        if user_id.is_some() && api_key.is_some() {
            break;
        }
        let found = source.lookup()?;
        if user_id.is_none() && found.user_id.is_some() {
            debug!("user_id resolved from {:?}", source_label(source));
            user_id = found.user_id;
        }
        if api_key.is_none() && found.api_key.is_some() {
            debug!("api_key resolved from {:?}", source_label(source));
            api_key = found.api_key;
        }
    }

    match (user_id, api_key) {
        (Some(user_id), Some(api_key)) => Ok(Credentials { user_id, api_key }),
        (None, _) => Err(PvForecastError::MissingCredential { field: "user_id" }),
        (_, None) => Err(PvForecastError::MissingCredential { field: "api_key" }),
    }
}

#[derive(Debug, Default, PartialEq)]
struct PartialCredentials {
    user_id: Option<String>,
    api_key: Option<String>,
}

fn source_label(source: &CredentialSource) -> String {
    match source {
        CredentialSource::Explicit { .. } => "arguments".to_string(),
        CredentialSource::Environment { .. } => "environment".to_string(),
        CredentialSource::File(path) => path.display().to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_credentials_file(path: &Path) -> Result<PartialCredentials> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_credentials(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PartialCredentials::default()),
        Err(source) => Err(PvForecastError::CredentialsFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_credentials(contents: &str) -> PartialCredentials {
    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    let mut found = PartialCredentials::default();
    for line in &lines {
        let Some((key, value)) = line.split_once(|c: char| c == '=' || c == ':') else {
            continue;
        };
        let value = value.trim_matches(|c: char| c.is_whitespace() || c == '"');
        let value = non_empty(Some(value.to_string()));
        match key.trim().to_ascii_lowercase().as_str() {
            "user_id" => found.user_id = value,
            "api_key" | "key" => found.api_key = value,
            _ => {}
        }
    }

    // A single bare line is either `user_id:api_key` or just the key.
    if found == PartialCredentials::default() && lines.len() == 1 {
        match lines[0].split_once(':') {
            Some((user_id, api_key)) => {
                found.user_id = non_empty(Some(user_id.to_string()));
                found.api_key = non_empty(Some(api_key.to_string()));
            }
            None if !lines[0].contains('=') => {
                found.api_key = non_empty(Some(lines[0].trim_matches('"').to_string()));
            }
            None => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn explicit(user_id: Option<&str>, api_key: Option<&str>) -> CredentialSource {
        CredentialSource::Explicit {
            user_id: user_id.map(String::from),
            api_key: api_key.map(String::from),
        }
    }

    #[test]
    fn explicit_arguments_win() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_id = 99\napi_key = from-file").unwrap();

        let creds = resolve_credentials(&[
            explicit(Some("1234"), Some("abcd")),
            CredentialSource::File(file.path().to_path_buf()),
        ])
        .unwrap();
        assert_eq!(creds, Credentials::new("1234", "abcd"));
    }

    #[test]
    fn fields_resolve_independently() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# pvforecast\nuser_id: 99\nkey: from-file").unwrap();

        let creds = resolve_credentials(&[
            explicit(Some("1234"), None),
            CredentialSource::File(file.path().to_path_buf()),
        ])
        .unwrap();
        assert_eq!(creds, Credentials::new("1234", "from-file"));
    }

    #[test]
    fn environment_sits_between_arguments_and_file() {
        std::env::set_var("PVFORECAST_TEST_ENV_USER", "env-user");
        std::env::set_var("PVFORECAST_TEST_ENV_KEY_B", "env-key");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user_id=file-user\napi_key=file-key").unwrap();

        let creds = resolve_credentials(&[
            explicit(None, Some("")),
            CredentialSource::Environment {
                user_id_var: "PVFORECAST_TEST_ENV_USER".to_string(),
                api_key_vars: vec![
                    "PVFORECAST_TEST_ENV_KEY_A".to_string(),
                    "PVFORECAST_TEST_ENV_KEY_B".to_string(),
                ],
            },
            CredentialSource::File(file.path().to_path_buf()),
        ])
        .unwrap();
        assert_eq!(creds, Credentials::new("env-user", "env-key"));
    }

    #[test]
    fn shorthand_file_line() {
        let found = parse_credentials("1234:abcdef\n");
        assert_eq!(found.user_id.as_deref(), Some("1234"));
        assert_eq!(found.api_key.as_deref(), Some("abcdef"));
    }

    #[test]
    fn bare_key_file_supplies_api_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "abcdef0123456789").unwrap();

        let creds = resolve_credentials(&[
            explicit(Some("1234"), None),
            CredentialSource::File(file.path().to_path_buf()),
        ])
        .unwrap();
        assert_eq!(creds, Credentials::new("1234", "abcdef0123456789"));

        let found = parse_credentials("# key only\n\"abcdef0123456789\"\n");
        assert_eq!(found.user_id, None);
        assert_eq!(found.api_key.as_deref(), Some("abcdef0123456789"));
        assert_eq!(parse_credentials("user_id=\n"), PartialCredentials::default());
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_credentials(&[
            explicit(Some("1234"), None),
            CredentialSource::File(dir.path().join("nope")),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            PvForecastError::MissingCredential { field: "api_key" }
        ));
    }

    #[test]
    fn nothing_resolves() {
        let err = resolve_credentials(&[explicit(None, None)]).unwrap_err();
        assert!(matches!(
            err,
            PvForecastError::MissingCredential { field: "user_id" }
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let out = format!("{:?}", Credentials::new("1234", "secret"));
        assert!(out.contains("1234"));
        assert!(!out.contains("secret"));
    }
}
