// Entrypoint for the `mapbox` CLI.
// - Parses flags (with environment fallbacks) and sets up logging.
// - Builds the API client and object store from explicit settings and hands
//   them to the upload workflow.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mapbox_cli::api::ApiClient;
use mapbox_cli::config::{
    Settings, DEFAULT_API_URL, DEFAULT_PART_SIZE, DEFAULT_REGION, DEFAULT_TIMEOUT,
};
use mapbox_cli::progress::{LogProgress, ProgressSink};
use mapbox_cli::ui::{print_result, ConsoleProgress};
use mapbox_cli::upload::S3Store;
use mapbox_cli::workflow::{UploadInput, Workflow};
use mapbox_cli::UploadError;

#[derive(Parser)]
#[command(name = "mapbox")]
#[command(author, version, about = "A simple CLI for doing routine tasks with Mapbox's API")]
struct Cli {
    /// Debug level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload, stage, and create a tileset. UPLOAD is the path of the file to upload.
    Upload {
        /// Local file to upload
        upload: PathBuf,

        /// Name of the tileset to create
        tileset_name: String,

        /// Mapbox username
        #[arg(short, long, env = "MAPBOX_USER")]
        username: Option<String>,

        /// Mapbox access token
        #[arg(short = 't', long, env = "MAPBOX_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,

        /// Base URL of the Mapbox API
        #[arg(long, env = "MAPBOX_API_URL", default_value = DEFAULT_API_URL)]
        api_url: String,

        /// Region of the staging bucket
        #[arg(long, env = "MAPBOX_REGION", default_value = DEFAULT_REGION)]
        region: String,

        /// Network timeout per request, in seconds
        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
        timeout: u64,

        /// Storage endpoint override for S3-compatible stores (path-style)
        #[arg(long, env = "MAPBOX_STORAGE_ENDPOINT", hide = true)]
        storage_endpoint: Option<String>,

        /// Log progress instead of drawing a progress bar
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli.command) {
        match e.downcast_ref::<UploadError>() {
            Some(upload_err) => eprintln!("Error while {}: {}", upload_err.stage(), upload_err),
            None => eprintln!("Error: {:#}", e),
        }
        process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Upload {
            upload,
            tileset_name,
            username,
            access_token,
            api_url,
            region,
            timeout,
            storage_endpoint,
            quiet,
        } => {
            let settings = Settings {
                api_url,
                region,
                timeout: Duration::from_secs(timeout),
                part_size: DEFAULT_PART_SIZE,
                storage_endpoint,
            };
            settings.validate()?;

            let api = ApiClient::new(&settings)?;
            let store = S3Store::new(&settings)?;
            let input = UploadInput {
                path: upload,
                tileset_name,
                username,
                access_token,
            };
            tracing::debug!(api = %api.base_url(), ?input, "starting upload");

            let mut progress: Box<dyn ProgressSink> = if quiet || !std::io::stderr().is_terminal() {
                Box::new(LogProgress::default())
            } else {
                Box::new(ConsoleProgress::default())
            };

            let mut workflow = Workflow::new(&api, &store);
            let result = workflow.run_input(input, progress.as_mut())?;
            drop(progress);

            print_result(&mut std::io::stdout().lock(), &result)?;
        }
    }
    Ok(())
}
