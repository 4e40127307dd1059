use std::path::PathBuf;

use chrono::{DateTime, Utc};
use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PvForecastError {
    /// Neither the arguments, the environment nor a credentials file provided this field
    #[error("Couldn't resolve the PV_Forecast {field}: pass it explicitly, set the environment variable or add it to a credentials file")]
    MissingCredential { field: &'static str },

    #[error("Failed to read credentials file '{path}'")]
    CredentialsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("end ({end}) must not be earlier than start ({start})")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected PV_Forecast response: {reason}")]
    ResponseFormat { reason: String },

    #[error("Failed to parse PV_Forecast response as JSON")]
    Json {
        #[source]
        source: serde_json::Error,
    },

    #[error("Network request failed for {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request failed for {url} with status {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// The API answers 200 but rejects the user_id/api_key pair
    #[error("The user_id and/or api_key entered are invalid")]
    InvalidCredentials,

    #[error("The user_id and api_key do not give access to the data requested, contact Sheffield Solar <pvforecast@sheffield.ac.uk>")]
    AccessDenied,

    #[error("Failed building DataFrame")]
    DataFrame(#[from] PolarsError),
}

impl PvForecastError {
    pub(crate) fn response_format(reason: impl Into<String>) -> Self {
        PvForecastError::ResponseFormat {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PvForecastError> = std::result::Result<T, E>;
