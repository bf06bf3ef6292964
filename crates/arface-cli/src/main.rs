use anyhow::{Context, Result};
use arface_core::embedder::DEFAULT_INPUT_SIZE;
use arface_core::matcher::DEFAULT_DISTANCE_THRESHOLD;
use arface_core::registry::DEFAULT_EMBEDDING_DIM;
use arface_core::{
    EmbeddingRegistry, Euclidean, FaceEmbedder, Labels, MobileFaceNet, SimilarityMatcher, Verdict,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "arface", about = "arface face-filter tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// MobileFaceNet ONNX model
    #[arg(short, long, default_value = "models/mobile_face_net.onnx")]
    model: PathBuf,
    /// Square input edge of the model
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: u32,
    /// Embedding length produced by the model
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    embedding_dim: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of a face image as JSON
    Embed {
        #[command(flatten)]
        model: ModelArgs,
        /// Face crop image
        image: PathBuf,
    },
    /// Register one face image and match another against it
    Compare {
        #[command(flatten)]
        model: ModelArgs,
        /// Reference face image
        reference: PathBuf,
        /// Probe face image
        probe: PathBuf,
        /// Label to register the reference under
        #[arg(short, long, default_value = "reference")]
        label: String,
        /// Distance below which the probe is accepted
        #[arg(short, long, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
        threshold: f32,
    },
    /// List a labels resource with indices
    Labels {
        /// Labels file (one label per line)
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Embed { model, image } => {
            let mut embedder = load_embedder(&model)?;
            let embedding = embedder.embed(&open_face(&image)?)?;
            println!("{}", serde_json::to_string(&embedding)?);
        }
        Commands::Compare {
            model,
            reference,
            probe,
            label,
            threshold,
        } => {
            let mut embedder = load_embedder(&model)?;
            let reference = embedder.embed(&open_face(&reference)?)?;
            let probe = embedder.embed(&open_face(&probe)?)?;

            let mut registry = EmbeddingRegistry::new(embedder.embedding_dim());
            registry.register(&label, reference)?;
            let verdict = SimilarityMatcher::new(Euclidean, threshold).compare(&probe, &registry)?;

            match &verdict {
                Verdict::Accepted { label, distance } => {
                    println!("accepted: {label} (distance {distance:.4} < {threshold})")
                }
                Verdict::Rejected { distance } => {
                    println!("rejected (distance {distance:.4} >= {threshold})")
                }
                Verdict::NoEntries => println!("no reference registered"),
            }
        }
        Commands::Labels { path } => {
            let labels = Labels::load(&path)?;
            if labels.is_empty() {
                println!("No labels in {}", path.display());
            }
            for (index, name) in labels.iter() {
                println!("{index:>4}  {name}");
            }
        }
    }

    Ok(())
}

fn load_embedder(args: &ModelArgs) -> Result<MobileFaceNet> {
    let path = args.model.to_string_lossy();
    MobileFaceNet::load(&path, args.input_size, args.embedding_dim)
        .with_context(|| format!("could not initialize classifier from {path}"))
}

fn open_face(path: &Path) -> Result<image::RgbImage> {
    let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(img.to_rgb8())
}
