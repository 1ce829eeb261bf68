// Library root
// -----------
// This crate exposes a small library surface for the CLI. The binary
// (`main.rs`) parses arguments and wires these modules together.
//
// Module responsibilities:
// - `api`: HTTP calls to the Mapbox Uploads API (staging credentials and
//   tileset creation).
// - `upload`: streams the local file to the staging bucket.
// - `workflow`: runs credentials -> upload -> conversion as one sequence.
// - `progress` / `ui`: progress reporting and terminal output.
// - `config` / `error`: explicit settings and the error taxonomy.
pub mod api;
pub mod config;
pub mod error;
pub mod progress;
pub mod ui;
pub mod upload;
pub mod workflow;

pub use error::{Result, UploadError};
