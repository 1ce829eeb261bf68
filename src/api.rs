// API client module: a small blocking HTTP client for the Mapbox Uploads
// API. It covers the two API calls of an upload: issuing staging
// credentials and asking for the staged object to be turned into a tileset.

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Result, UploadError};

/// Raw response of the tileset-creation call (job id, status fields, ...).
/// It is shown to the user as-is and never interpreted.
pub type ConversionResult = serde_json::Value;

/// The two Uploads API calls the workflow needs. `ApiClient` talks to the
/// real service; tests substitute their own implementation.
pub trait UploadsApi {
    /// Exchange a username and access token for short-lived storage
    /// credentials and the object key/URL to upload to.
    fn credentials(&self, username: &str, access_token: &str) -> Result<StagingCredentials>;

    /// Ask the API to convert a staged object into a tileset.
    fn create_tileset(
        &self,
        username: &str,
        access_token: &str,
        request: &TilesetRequest,
    ) -> Result<ConversionResult>;
}

/// Staging credentials issued by `POST /uploads/v1/{username}/credentials`.
/// Field names mirror the API response.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub bucket: String,
    pub key: String,
    pub url: String,
}

impl StagingCredentials {
    /// Name of the first empty field, if any.
    fn first_empty_field(&self) -> Option<&'static str> {
        [
            ("accessKeyId", &self.access_key_id),
            ("secretAccessKey", &self.secret_access_key),
            ("sessionToken", &self.session_token),
            ("bucket", &self.bucket),
            ("key", &self.key),
            ("url", &self.url),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for StagingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("url", &self.url)
            .finish()
    }
}

/// Body of `POST /uploads/v1/{username}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TilesetRequest {
    /// `<username>.<tileset name>`
    pub tileset: String,
    /// Staged object URL, exactly as returned with the credentials.
    pub url: String,
    pub name: String,
}

impl TilesetRequest {
    pub fn new(username: &str, tileset_name: &str, staged_url: &str) -> Self {
        TilesetRequest {
            tileset: format!("{}.{}", username, tileset_name),
            url: staged_url.to_string(),
            name: tileset_name.to_string(),
        }
    }
}

/// Blocking client for the Uploads API. Holds the reqwest client and the
/// base URL of the API.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client from explicit settings. The configured timeout applies
    /// to every request.
    pub fn new(settings: &Settings) -> Result<Self> {
        let base_url = settings.base_url()?;
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("mapbox-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                UploadError::Configuration(format!("failed to build HTTP client: {}", describe(e)))
            })?;
        Ok(ApiClient { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join percent-encoded path segments onto the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UploadError::Configuration(format!("API URL '{}' cannot be used as a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl UploadsApi for ApiClient {
    fn credentials(&self, username: &str, access_token: &str) -> Result<StagingCredentials> {
        require("username", username)?;
        require("access token", access_token)?;

        let url = self.endpoint(&["uploads", "v1", username, "credentials"])?;
        debug!(%url, "requesting staging credentials");
        let res = self
            .client
            .post(url)
            .query(&[("access_token", access_token)])
            .send()
            .map_err(|e| UploadError::Authentication {
                status: None,
                body: describe(e),
            })?;

        let (status, body) = read_body(res).map_err(|(status, e)| UploadError::Authentication {
            status: Some(status.as_u16()),
            body: describe(e),
        })?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "credential request rejected");
            return Err(UploadError::Authentication {
                status: Some(status.as_u16()),
                body,
            });
        }

        let credentials: StagingCredentials =
            serde_json::from_str(&body).map_err(|e| UploadError::Authentication {
                status: Some(status.as_u16()),
                body: format!("unexpected credentials response ({}): {}", e, body),
            })?;
        if let Some(field) = credentials.first_empty_field() {
            return Err(UploadError::Authentication {
                status: Some(status.as_u16()),
                body: format!("credentials response has an empty '{}' field", field),
            });
        }
        debug!(bucket = %credentials.bucket, key = %credentials.key, "staging credentials issued");
        Ok(credentials)
    }

    fn create_tileset(
        &self,
        username: &str,
        access_token: &str,
        request: &TilesetRequest,
    ) -> Result<ConversionResult> {
        let url = self.endpoint(&["uploads", "v1", username])?;
        debug!(%url, tileset = %request.tileset, "requesting tileset conversion");
        let res = self
            .client
            .post(url)
            .query(&[("access_token", access_token)])
            .json(request)
            .send()
            .map_err(|e| UploadError::Conversion {
                status: None,
                body: describe(e),
            })?;

        let (status, body) = read_body(res).map_err(|(status, e)| UploadError::Conversion {
            status: Some(status.as_u16()),
            body: describe(e),
        })?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "tileset conversion rejected");
            return Err(UploadError::Conversion {
                status: Some(status.as_u16()),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| UploadError::Conversion {
            status: Some(status.as_u16()),
            body: format!("unexpected conversion response ({}): {}", e, body),
        })
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(UploadError::Configuration(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Status and body text. A failed body read keeps the status that arrived.
fn read_body(res: Response) -> std::result::Result<(StatusCode, String), (StatusCode, reqwest::Error)> {
    let status = res.status();
    match res.text() {
        Ok(body) => Ok((status, body)),
        Err(e) => Err((status, e)),
    }
}

/// Render a reqwest error with its causes. The request URL is dropped because
/// it carries the access token.
fn describe(err: reqwest::Error) -> String {
    let err = err.without_url();
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
