// Object upload: streams a local file to the staging bucket using the
// credentials issued by the API.
//
// The S3 SDK is async, so `S3Store` owns a current-thread tokio runtime and
// blocks on each request. Files up to one part go up in a single PutObject;
// bigger files are sent as a multipart upload, one part at a time. Request
// bodies are `TrackedBody`s, so progress moves as the transport pulls each
// frame rather than when a request completes.

use std::convert::Infallible;
use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::api::StagingCredentials;
use crate::config::Settings;
use crate::error::{Result, UploadError};
use crate::progress::{ProgressReporter, ProgressSink};

/// Largest slice of a request body handed to the transport at once, and so
/// the granularity of progress updates.
pub const FRAME_SIZE: usize = 64 * 1024;

/// Anything that can receive a staged file.
pub trait ObjectStore {
    /// Upload the whole file at `path` to `credentials.bucket`/`credentials.key`,
    /// reporting bytes to `progress` as they are sent.
    fn upload(
        &self,
        path: &Path,
        credentials: &StagingCredentials,
        progress: &mut dyn ProgressSink,
    ) -> Result<()>;
}

/// In-memory request body that yields its data in frames of at most
/// `frame_size` bytes and announces the size of each frame on a channel as
/// the transport polls it.
pub struct TrackedBody {
    data: Bytes,
    frame_size: usize,
    sent: UnboundedSender<u64>,
}

impl TrackedBody {
    pub fn new(data: impl Into<Bytes>, frame_size: usize) -> (Self, UnboundedReceiver<u64>) {
        let (sent, receiver) = unbounded_channel();
        let body = TrackedBody {
            data: data.into(),
            frame_size: frame_size.max(1),
            sent,
        };
        (body, receiver)
    }
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, Infallible>>> {
        if self.data.is_empty() {
            return Poll::Ready(None);
        }
        let len = self.frame_size.min(self.data.len());
        let frame = self.data.split_to(len);
        // The receiver is gone only once the request is finished with.
        let _ = self.sent.send(len as u64);
        Poll::Ready(Some(Ok(Frame::data(frame))))
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.data.len() as u64)
    }
}

/// Object store backed by S3, authenticated with the staging credentials.
pub struct S3Store {
    region: String,
    timeout: std::time::Duration,
    part_size: usize,
    endpoint: Option<String>,
    runtime: Runtime,
}

impl S3Store {
    pub fn new(settings: &Settings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| UploadError::Configuration(format!("failed to start I/O runtime: {}", e)))?;
        Ok(S3Store {
            region: settings.region.clone(),
            timeout: settings.timeout,
            part_size: settings.part_size,
            endpoint: settings.storage_endpoint.clone(),
            runtime,
        })
    }

    /// A client scoped to one set of staging credentials. Retries are off:
    /// a failed request fails the whole upload.
    fn client(&self, credentials: &StagingCredentials) -> Client {
        let _rt = self.runtime.enter();
        let creds = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            None,
            "mapbox-staging",
        );
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(creds)
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(self.timeout)
                    .build(),
            );
        if let Some(endpoint) = &self.endpoint {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }
        Client::from_conf(config.build())
    }

    /// Drive `request` to completion, recording each frame its body hands to
    /// the transport as it goes.
    fn send_tracked<F, T, E>(
        &self,
        request: F,
        mut sent: UnboundedReceiver<u64>,
        progress: &mut ProgressReporter<'_>,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        self.runtime.block_on(async {
            tokio::pin!(request);
            loop {
                tokio::select! {
                    biased;
                    Some(bytes) = sent.recv() => progress.record(bytes),
                    outcome = &mut request => {
                        while let Ok(bytes) = sent.try_recv() {
                            progress.record(bytes);
                        }
                        return outcome;
                    }
                }
            }
        })
    }

    fn put_single(
        &self,
        client: &Client,
        credentials: &StagingCredentials,
        file: &mut File,
        path: &Path,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        let size = progress.state().total();
        let mut data = Vec::with_capacity(size as usize);
        file.by_ref()
            .take(size)
            .read_to_end(&mut data)
            .map_err(|e| UploadError::file_access(path, e))?;

        let (body, sent) = TrackedBody::new(data, FRAME_SIZE);
        let request = client
            .put_object()
            .bucket(&credentials.bucket)
            .key(&credentials.key)
            .body(ByteStream::from_body_1_x(body))
            .send();
        self.send_tracked(request, sent, progress)
            .map_err(|e| transport("PutObject", e))?;
        Ok(())
    }

    fn put_multipart(
        &self,
        client: &Client,
        credentials: &StagingCredentials,
        file: &mut File,
        path: &Path,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        let created = self
            .runtime
            .block_on(
                client
                    .create_multipart_upload()
                    .bucket(&credentials.bucket)
                    .key(&credentials.key)
                    .send(),
            )
            .map_err(|e| transport("CreateMultipartUpload", e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| UploadError::UploadTransport("storage returned no upload id".into()))?
            .to_string();
        debug!(%upload_id, "multipart upload created");

        let result = self.send_parts(client, credentials, &upload_id, file, path, progress);
        if result.is_err() {
            // Only unassembled parts are discarded here.
            let abort = self.runtime.block_on(
                client
                    .abort_multipart_upload()
                    .bucket(&credentials.bucket)
                    .key(&credentials.key)
                    .upload_id(&upload_id)
                    .send(),
            );
            if let Err(e) = abort {
                warn!(%upload_id, "could not abort multipart upload: {}", DisplayErrorContext(&e));
            }
        }
        result
    }

    fn send_parts(
        &self,
        client: &Client,
        credentials: &StagingCredentials,
        upload_id: &str,
        file: &mut File,
        path: &Path,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        let size = progress.state().total();
        let mut parts = Vec::new();
        let mut reader = file.by_ref().take(size);
        send_in_parts(&mut reader, path, self.part_size, progress, |number, chunk, progress| {
            let (body, sent) = TrackedBody::new(chunk, FRAME_SIZE);
            let request = client
                .upload_part()
                .bucket(&credentials.bucket)
                .key(&credentials.key)
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from_body_1_x(body))
                .send();
            let uploaded = self
                .send_tracked(request, sent, progress)
                .map_err(|e| transport("UploadPart", e))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(number)
                    .build(),
            );
            Ok(())
        })?;

        debug!(parts = parts.len(), "completing multipart upload");
        self.runtime
            .block_on(
                client
                    .complete_multipart_upload()
                    .bucket(&credentials.bucket)
                    .key(&credentials.key)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send(),
            )
            .map_err(|e| transport("CompleteMultipartUpload", e))?;
        Ok(())
    }
}

impl ObjectStore for S3Store {
    fn upload(
        &self,
        path: &Path,
        credentials: &StagingCredentials,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        // The handle is released when this scope ends, on every path.
        let (mut file, size) = open_regular_file(path)?;
        info!(
            path = %path.display(),
            size,
            bucket = %credentials.bucket,
            key = %credentials.key,
            "uploading to staging bucket"
        );

        let client = self.client(credentials);
        let mut reporter = ProgressReporter::start(size, progress);
        if size <= self.part_size as u64 {
            self.put_single(&client, credentials, &mut file, path, &mut reporter)?;
        } else {
            self.put_multipart(&client, credentials, &mut file, path, &mut reporter)?;
        }

        if !reporter.state().is_complete() {
            return Err(UploadError::file_access(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "file shrank during upload ({} of {} bytes sent)",
                        reporter.state().transferred(),
                        size
                    ),
                ),
            ));
        }
        reporter.finish();
        Ok(())
    }
}

/// Open `path` for reading and return the handle with the file's size.
/// Directories and other non-regular files are rejected.
pub fn open_regular_file(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path).map_err(|e| UploadError::file_access(path, e))?;
    let meta = file.metadata().map_err(|e| UploadError::file_access(path, e))?;
    if !meta.is_file() {
        return Err(UploadError::file_access(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    Ok((file, meta.len()))
}

/// Read `reader` in chunks of `part_size` bytes and hand each one to `send`
/// with its 1-based part number. `send` is responsible for recording the
/// bytes it transmits. Returns the number of parts.
pub fn send_in_parts<'a, R, F>(
    reader: &mut R,
    path: &Path,
    part_size: usize,
    progress: &mut ProgressReporter<'a>,
    mut send: F,
) -> Result<i32>
where
    R: Read,
    F: FnMut(i32, Vec<u8>, &mut ProgressReporter<'a>) -> Result<()>,
{
    let mut number = 0;
    loop {
        let mut chunk = Vec::with_capacity(part_size);
        reader
            .by_ref()
            .take(part_size as u64)
            .read_to_end(&mut chunk)
            .map_err(|e| UploadError::file_access(path, e))?;
        if chunk.is_empty() {
            break;
        }
        number += 1;
        send(number, chunk, progress)?;
    }
    Ok(number)
}

fn transport<E>(operation: &str, err: E) -> UploadError
where
    E: std::error::Error + 'static,
{
    UploadError::UploadTransport(format!("{} failed: {}", operation, DisplayErrorContext(&err)))
}
