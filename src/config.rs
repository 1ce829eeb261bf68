// Runtime settings shared by the API client and the object store. They are
// built once in `main` from CLI flags (with environment fallbacks) and passed
// down explicitly; nothing here is global.

use std::time::Duration;

use reqwest::Url;

use crate::error::{Result, UploadError};

pub const DEFAULT_API_URL: &str = "https://api.mapbox.com";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Size of each multipart chunk. Files at or below this size go up in a
/// single request.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Smallest part the storage backend accepts (except for the last one).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the Mapbox API, e.g. `https://api.mapbox.com`.
    pub api_url: String,
    /// Storage region the staging bucket lives in.
    pub region: String,
    /// Applied to every network call, including each upload part.
    pub timeout: Duration,
    pub part_size: usize,
    /// Overrides the storage endpoint, e.g. for an S3-compatible store.
    /// Requests then use path-style addressing.
    pub storage_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_url: DEFAULT_API_URL.to_string(),
            region: DEFAULT_REGION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            part_size: DEFAULT_PART_SIZE,
            storage_endpoint: None,
        }
    }
}

impl Settings {
    /// Check the settings before anything touches the network.
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.region.trim().is_empty() {
            return Err(UploadError::Configuration("storage region must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(UploadError::Configuration("timeout must be greater than zero".into()));
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(UploadError::Configuration(format!(
                "part size {} is below the storage minimum of {} bytes",
                self.part_size, MIN_PART_SIZE
            )));
        }
        if let Some(endpoint) = &self.storage_endpoint {
            Url::parse(endpoint).map_err(|e| {
                UploadError::Configuration(format!("invalid storage endpoint '{}': {}", endpoint, e))
            })?;
        }
        Ok(())
    }

    /// Parsed API base URL.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.api_url).map_err(|e| {
            UploadError::Configuration(format!("invalid API URL '{}': {}", self.api_url, e))
        })?;
        if url.cannot_be_a_base() {
            return Err(UploadError::Configuration(format!(
                "API URL '{}' cannot be used as a base",
                self.api_url
            )));
        }
        Ok(url)
    }
}
