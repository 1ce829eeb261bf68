// The upload sequence: validate input, broker credentials, upload, convert.
//
// Each step feeds the next and any failure aborts the run. Nothing is
// retried and nothing is rolled back: an object that was uploaded but not
// converted stays in the staging bucket.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::api::{ConversionResult, TilesetRequest, UploadsApi};
use crate::error::{Result, UploadError};
use crate::progress::ProgressSink;
use crate::upload::ObjectStore;

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    BrokeringCredentials,
    Uploading,
    Converting,
    Done,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::BrokeringCredentials => "brokering credentials",
            Stage::Uploading => "uploading",
            Stage::Converting => "converting",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Raw user input for one invocation. Identity fields are whatever the
/// flags or their environment fallbacks produced.
#[derive(Clone)]
pub struct UploadInput {
    pub path: PathBuf,
    pub tileset_name: String,
    pub username: Option<String>,
    pub access_token: Option<String>,
}

impl fmt::Debug for UploadInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadInput")
            .field("path", &self.path)
            .field("tileset_name", &self.tileset_name)
            .field("username", &self.username)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One invocation's input, checked for completeness.
#[derive(Clone)]
pub struct UploadRequest {
    path: PathBuf,
    tileset_name: String,
    username: String,
    access_token: String,
}

impl UploadRequest {
    /// Build a request from user input. `username` and `access_token` come
    /// from flags or their environment fallbacks; missing or blank values
    /// are a configuration error.
    pub fn new(
        path: impl Into<PathBuf>,
        tileset_name: impl Into<String>,
        username: Option<String>,
        access_token: Option<String>,
    ) -> Result<Self> {
        let username = present(username).ok_or_else(|| {
            UploadError::Configuration(
                "You must specify a username either with the --username option or as MAPBOX_USER"
                    .into(),
            )
        })?;
        let access_token = present(access_token).ok_or_else(|| {
            UploadError::Configuration(
                "You must specify an access token either with the --access-token option or as MAPBOX_ACCESS_TOKEN"
                    .into(),
            )
        })?;
        let tileset_name = tileset_name.into();
        if tileset_name.trim().is_empty() {
            return Err(UploadError::Configuration("tileset name must not be empty".into()));
        }
        Ok(UploadRequest {
            path: path.into(),
            tileset_name,
            username,
            access_token,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn tileset_name(&self) -> &str {
        &self.tileset_name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Composite `<username>.<tileset name>` identifier.
    pub fn tileset_id(&self) -> String {
        format!("{}.{}", self.username, self.tileset_name)
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("path", &self.path)
            .field("tileset_name", &self.tileset_name)
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Drives one upload through its stages against the given collaborators.
pub struct Workflow<'a, A: UploadsApi, S: ObjectStore> {
    api: &'a A,
    store: &'a S,
    stage: Stage,
}

impl<'a, A: UploadsApi, S: ObjectStore> Workflow<'a, A, S> {
    pub fn new(api: &'a A, store: &'a S) -> Self {
        Workflow {
            api,
            store,
            stage: Stage::Validating,
        }
    }

    /// Current stage; `Done` or `Aborted` once `run` has returned.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Validate raw input and run the sequence. Missing identity aborts
    /// in `Validating`, before either collaborator is called.
    pub fn run_input(
        &mut self,
        input: UploadInput,
        progress: &mut dyn ProgressSink,
    ) -> Result<ConversionResult> {
        self.enter(Stage::Validating);
        let request = match UploadRequest::new(
            input.path,
            input.tileset_name,
            input.username,
            input.access_token,
        ) {
            Ok(request) => request,
            Err(e) => {
                info!(failed_at = %e.stage(), "upload aborted");
                self.enter(Stage::Aborted);
                return Err(e);
            }
        };
        self.run(&request, progress)
    }

    /// Run the whole sequence for an already validated request. On error the
    /// workflow is left `Aborted` and the error names the stage that failed.
    pub fn run(
        &mut self,
        request: &UploadRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<ConversionResult> {
        match self.run_stages(request, progress) {
            Ok(result) => {
                self.enter(Stage::Done);
                Ok(result)
            }
            Err(e) => {
                info!(failed_at = %e.stage(), "upload aborted");
                self.enter(Stage::Aborted);
                Err(e)
            }
        }
    }

    fn run_stages(
        &mut self,
        request: &UploadRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<ConversionResult> {
        self.enter(Stage::BrokeringCredentials);
        let credentials = self
            .api
            .credentials(request.username(), request.access_token())?;

        self.enter(Stage::Uploading);
        self.store.upload(request.path(), &credentials, progress)?;

        self.enter(Stage::Converting);
        let body = TilesetRequest::new(request.username(), request.tileset_name(), &credentials.url);
        let result = self
            .api
            .create_tileset(request.username(), request.access_token(), &body)?;
        info!(tileset = %request.tileset_id(), "tileset conversion requested");
        Ok(result)
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }
}
