use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use lineup_core::{
    api::{AddSampleRequest, RecognizeRequest},
    default_model_dir, decode_image, DetectionMode, FaceEngine, Identity, OnnxEngine,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lineup", about = "Lineup face recognition CLI")]
struct Cli {
    /// Base URL of the lineupd service
    #[arg(long, global = true, default_value = "http://127.0.0.1:1234")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a training sample for an identity
    Add {
        /// Numeric identity the sample belongs to
        #[arg(short, long)]
        id: Identity,
        image: PathBuf,
    },
    /// Rebuild the gallery from all stored samples
    Train,
    /// Identify the faces in an image
    Recognize {
        image: PathBuf,
        /// Report every face instead of only the primary one
        #[arg(long)]
        multiple: bool,
        /// Detection mode: fast or accurate
        #[arg(long)]
        mode: Option<DetectionMode>,
        /// Maximum descriptor distance for a match
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Show service status
    Status,
    /// Run the detector locally (bypasses the service)
    Detect {
        image: PathBuf,
        #[arg(long, default_value_t = DetectionMode::Fast)]
        mode: DetectionMode,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    let body = match cli.command {
        Commands::Add { id, image } => {
            let req = AddSampleRequest {
                id,
                data: encode_file(&image)?,
            };
            client.post("add", &req).await?
        }
        Commands::Train => client.post("train", &serde_json::json!({})).await?,
        Commands::Recognize {
            image,
            multiple,
            mode,
            threshold,
        } => {
            let req = RecognizeRequest {
                data: encode_file(&image)?,
                multiple,
                mode,
                threshold,
            };
            client.post("recognize", &req).await?
        }
        Commands::Status => client.get("status").await?,
        Commands::Detect {
            image,
            mode,
            model_dir,
        } => detect_local(&image, mode, model_dir)?,
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.base);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("cannot reach {url}"))?;
        read_body(resp).await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.base);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("cannot reach {url}"))?;
        read_body(resp).await
    }
}

async fn read_body(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.context("invalid JSON response")?;
    if !status.is_success() {
        let message = body["error"]["message"].as_str().unwrap_or("unknown error");
        let kind = body["error"]["kind"].as_str().unwrap_or("unknown");
        bail!("{status}: {kind}: {message}");
    }
    Ok(body)
}

fn encode_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn detect_local(
    path: &Path,
    mode: DetectionMode,
    model_dir: Option<PathBuf>,
) -> Result<serde_json::Value> {
    let model_dir = model_dir.unwrap_or_else(default_model_dir);
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let image = decode_image(&bytes).context("image could not be decoded")?;

    let mut engine = OnnxEngine::load(&model_dir)
        .with_context(|| format!("failed to load models from {}", model_dir.display()))?;
    let started = std::time::Instant::now();
    let descriptors = engine.detect_and_describe(&image, mode)?;
    let elapsed_ms = started.elapsed().as_millis();

    tracing::debug!(faces = descriptors.len(), elapsed_ms, "local detection done");
    Ok(serde_json::json!({
        "image": path.display().to_string(),
        "width": image.width(),
        "height": image.height(),
        "mode": mode,
        "faces": descriptors.len(),
        "descriptor_dim": descriptors.first().map(|d| d.len()),
        "elapsed_ms": elapsed_ms,
    }))
}
