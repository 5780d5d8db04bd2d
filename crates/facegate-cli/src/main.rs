use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    decode_frame, CommandResponse, Config, EmbeddingStore, FaceAuthService, OnnxEmbedder,
    Rejection, ScrfdLocator,
};
use facegate_store::SqliteBackend;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

type Service = FaceAuthService<ScrfdLocator, OnnxEmbedder, SqliteBackend>;

#[derive(Parser)]
#[command(name = "facegate", about = "FaceGate face enrollment and verification CLI")]
struct Cli {
    /// Read raw image bytes from this file instead of a base64 frame on stdin
    #[arg(long, global = true)]
    image: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect exactly one face and print its region, embedding and preview
    Detect,
    /// Register the face for an identity, refusing duplicates
    Register {
        /// Account identifier
        identity: String,
    },
    /// Verify the face against one identity, or against everyone
    Verify {
        /// Claimed identity; omit to search all enrolled faces
        identity: Option<String>,
    },
    /// Check whether the face is already enrolled under another account
    CheckDuplicate {
        /// Identity to leave out of the comparison
        exclude: Option<String>,
    },
    /// Report whether an identity has an enrolled face
    IsRegistered {
        identity: String,
    },
    /// List enrolled identities
    List,
    /// Remove the enrolled face for an identity
    Remove {
        identity: String,
    },
}

fn main() -> ExitCode {
    // stdout carries the JSON reply only
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            println!("{}", serde_json::json!({ "error": format!("{err:#}") }));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    let store = Arc::new(
        SqliteBackend::open(&config.db_path)
            .and_then(EmbeddingStore::open)
            .with_context(|| format!("failed to open face database {}", config.db_path.display()))?,
    );

    let analysis: Box<dyn FnOnce(&mut Service, &[u8]) -> CommandResponse> = match cli.command {
        Commands::IsRegistered { identity } => {
            let registered = store.contains(&identity)?;
            return Ok(serde_json::json!({ "identity": identity, "registered": registered }).to_string());
        }
        Commands::List => {
            let listing = store.list()?;
            return Ok(serde_json::to_string(&listing)?);
        }
        Commands::Remove { identity } => {
            let removed = store.remove(&identity)?;
            let message = if removed {
                format!("Removed face for {identity}")
            } else {
                format!("No registered face found for {identity}")
            };
            return Ok(serde_json::json!({
                "success": removed,
                "message": message,
                "identity": identity,
            })
            .to_string());
        }
        Commands::Detect => Box::new(|service: &mut Service, frame: &[u8]| -> CommandResponse {
            service.detect(frame).into()
        }),
        Commands::Register { identity } => {
            Box::new(move |service: &mut Service, frame: &[u8]| -> CommandResponse {
                service.register(&identity, frame).into()
            })
        }
        Commands::Verify { identity } => {
            Box::new(move |service: &mut Service, frame: &[u8]| -> CommandResponse {
                service.verify(frame, identity.as_deref()).into()
            })
        }
        Commands::CheckDuplicate { exclude } => {
            Box::new(move |service: &mut Service, frame: &[u8]| -> CommandResponse {
                service.check_duplicate(frame, exclude.as_deref()).into()
            })
        }
    };

    let frame = match read_frame(cli.image.as_deref())? {
        Ok(frame) => frame,
        Err(rejection) => return Ok(CommandResponse::rejected(&rejection).to_json()),
    };

    let pipeline = facegate_core::load_pipeline(&config).context("failed to load face models")?;
    let mut service = FaceAuthService::new(
        pipeline,
        store,
        config.match_tolerance,
        config.duplicate_tolerance,
    );

    let response = analysis(&mut service, &frame);
    Ok(response.to_json())
}

/// Load the frame from `--image` or a base64 document on stdin. The inner
/// error is a frame rejection reported as a normal response.
fn read_frame(image: Option<&Path>) -> Result<Result<Vec<u8>, Rejection>> {
    if let Some(path) = image {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        return Ok(Ok(bytes));
    }

    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read frame from stdin")?;
    Ok(decode_frame(&text))
}
