use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lane_offset::config::Config;
use lane_offset::model::{CheckpointPaths, Regressor, RoadNet};
use lane_offset::preview::{preview_random_scene, show_sample};
use lane_offset::telemetry::{TelemetryListener, TelemetrySender};
use lane_offset::training::Trainer;
use lane_offset::video::{CameraDevice, VideoSession};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lane_offset")]
#[command(about = "Train and run a lane offset regressor", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file; built-in defaults when omitted
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Seed for scene generation and weight initialisation
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on synthetic scenes and write checkpoints
    Train,

    /// Predict the offset of one random scene
    Preview {
        /// Checkpoint to load; the newest of the run when omitted
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Show the scene in a window
        #[arg(long)]
        show: bool,
    },

    /// Run the model on the camera and send estimates over UDP
    Video {
        /// Checkpoint to load; overrides the configured one
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Print telemetry datagrams received on a port
    Listen {
        /// Port to bind; the configured telemetry port when omitted
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lane_offset=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading config {}", path.display()),
        None => "building default config".to_string(),
    })?;
    let mut rng = match cli.seed.or(config.training.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    match cli.command {
        Commands::Train => {
            let mut model = RoadNet::from_config(&config.scene, &config.model, &mut rng)
                .context("building model")?;
            let report = Trainer::new(&config.scene, &config.training, rng)
                .run(&mut model)
                .context("training")?;
            if let Some(path) = report.last_checkpoint {
                info!("Last checkpoint: {}", path.display());
            }
        }
        Commands::Preview { checkpoint, show } => {
            let model = load_model(&config, checkpoint.as_deref(), &mut rng)?;
            let sample = preview_random_scene(&model, &config.scene, &mut rng).context("preview")?;
            println!("{}", sample.predicted);
            if show {
                show_sample(&sample, &config.video.window_name).context("showing scene")?;
            }
        }
        Commands::Video { checkpoint } => {
            let explicit = checkpoint.or_else(|| config.video.checkpoint.clone());
            let model = load_model(&config, explicit.as_deref(), &mut rng)?;
            let sender = TelemetrySender::connect(&config.telemetry.host, config.telemetry.port)
                .context("opening telemetry socket")?;
            let window = config.video.show_window.then_some(config.video.window_name.as_str());
            let camera = CameraDevice::open(config.video.device_index, window)
                .with_context(|| format!("opening video device {}", config.video.device_index))?;

            let mut session = VideoSession::new(camera, &model, sender, &config.video, &config.scene);
            session.run().context("video loop")?;
        }
        Commands::Listen { port } => {
            let port = port.unwrap_or(config.telemetry.port);
            let listener = TelemetryListener::bind(("0.0.0.0", port))
                .with_context(|| format!("binding telemetry port {port}"))?;
            listener
                .run(config.telemetry.fudge_factor, None)
                .context("receiving telemetry")?;
        }
    }

    Ok(())
}

/// Builds the configured network and loads `explicit`, or the newest
/// checkpoint of the configured run.
fn load_model(config: &Config, explicit: Option<&Path>, rng: &mut StdRng) -> Result<RoadNet> {
    let path = CheckpointPaths::new(&config.training.checkpoint_dir, &config.training.run_id)
        .resolve(explicit)
        .context("locating checkpoint")?;
    let mut model = RoadNet::from_config(&config.scene, &config.model, rng).context("building model")?;
    model
        .load(&path)
        .with_context(|| format!("loading checkpoint {}", path.display()))?;
    info!("Loaded {}", path.display());
    Ok(model)
}
