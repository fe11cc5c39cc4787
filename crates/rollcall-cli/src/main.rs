use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    enroll_samples, match_embedding, CachedStore, CaptureOutcome, EmbeddingStore, EnrollError,
    FileStore, MemoryStore, SqliteStore, StudentId,
};
use rollcall_extract::{EmbeddingFileExtractor, ThumbnailExtractor};
use std::path::PathBuf;
use std::time::Duration;

mod attend;
mod config;
mod engine;

use attend::{run_session, Attendance};
use config::{Config, ExtractorKind, StoreKind};
use engine::{spawn_engine, BoxedExtractor, EngineHandle};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Path to a TOML config file (default: $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from one or more face photos
    Enroll {
        /// Student identifier
        student: String,
        /// Face photos; unusable ones are skipped
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Match one photo against enrolled students
    Match {
        image: PathBuf,
        /// Override the configured match threshold
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Run one attendance session over a sequence of captures
    Attend {
        /// Frames per capture; an identity must win a strict majority of them
        #[arg(long, default_value_t = 1)]
        burst: usize,
        /// Override the configured match threshold
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled students
    List,
    /// Remove a student's embedding
    Remove {
        student: String,
    },
    /// Show configuration and store status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Enroll { student, images } => {
            let engine = start_engine(&config)?;
            let student = StudentId::new(student);
            let samples = engine.extract_all(&images).await?;

            match enroll_samples(store.as_ref(), &student, samples) {
                Ok(enrolled) => {
                    for failure in &enrolled.skipped {
                        println!(
                            "skipped {}: {}",
                            images[failure.index].display(),
                            failure.error
                        );
                    }
                    println!(
                        "Enrolled {student}: {} of {} photos used, {}-dim embedding",
                        enrolled.used,
                        images.len(),
                        enrolled.embedding.dim()
                    );
                }
                Err(EnrollError::EnrollmentFailed { failures, .. }) => {
                    for failure in &failures {
                        println!(
                            "skipped {}: {}",
                            images[failure.index].display(),
                            failure.error
                        );
                    }
                    bail!("no face detected in any photo for {student}, please retry");
                }
                Err(err) => return Err(err).context("enrollment failed"),
            }
        }
        Commands::Match { image, threshold } => {
            let engine = start_engine(&config)?;
            let threshold = threshold.unwrap_or(config.match_threshold);
            let query = engine
                .extract(image.clone())
                .await?
                .with_context(|| format!("extracting {}", image.display()))?;
            let result = match_embedding(&query, threshold, store.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Attend {
            burst,
            threshold,
            images,
        } => {
            let engine = start_engine(&config)?;
            let threshold = threshold.unwrap_or(config.match_threshold);
            let run = run_session(&engine, store.as_ref(), &images, burst, threshold).await?;
            print_attendance(&run)?;
        }
        Commands::List => {
            let snapshot = store.all()?;
            if snapshot.is_empty() {
                println!("No students enrolled");
            }
            for (id, embedding) in &snapshot {
                println!("{id}\t{}", embedding.dim());
            }
        }
        Commands::Remove { student } => {
            let student = StudentId::new(student);
            store.delete(&student)?;
            println!("Removed {student}");
        }
        Commands::Status => {
            let location = match config.store {
                StoreKind::Sqlite => config.db_path.display().to_string(),
                StoreKind::Files => config.embedding_dir.display().to_string(),
                StoreKind::Memory => "memory".to_string(),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "store": config.store,
                    "location": location,
                    "enrolled": store.len()?,
                    "dimension": store.dimension(),
                    "match_threshold": config.match_threshold,
                    "extractor": config.extractor,
                }))?
            );
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Box<dyn EmbeddingStore>> {
    Ok(match config.store {
        StoreKind::Sqlite => Box::new(CachedStore::new(
            SqliteStore::open(&config.db_path)
                .with_context(|| format!("opening {}", config.db_path.display()))?,
        )),
        StoreKind::Files => Box::new(CachedStore::new(
            FileStore::open(&config.embedding_dir)
                .with_context(|| format!("opening {}", config.embedding_dir.display()))?,
        )),
        StoreKind::Memory => Box::new(MemoryStore::new()),
    })
}

fn start_engine(config: &Config) -> Result<EngineHandle> {
    let extractor: BoxedExtractor = match config.extractor {
        ExtractorKind::Thumbnail => Box::new(ThumbnailExtractor::new(config.thumbnail_size)),
        ExtractorKind::EmbeddingFile => Box::new(EmbeddingFileExtractor),
    };
    let timeout = Duration::from_secs(config.extract_timeout_secs);
    Ok(spawn_engine(extractor, timeout)?)
}

fn print_attendance(run: &Attendance) -> Result<()> {
    for capture in &run.captures {
        let label = &capture.label;
        match &capture.outcome {
            Ok(CaptureOutcome::Marked(id)) => println!("{label}: marked {id} present"),
            Ok(CaptureOutcome::AlreadyMarked(id)) => println!("{label}: {id} already marked"),
            Ok(CaptureOutcome::Unrecognized) => println!("{label}: face not recognized"),
            Err(err) => println!("{label}: {err}"),
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "session": run.report,
            "present": run.tally.present_count(),
            "absent": run.tally.absent_count(),
            "tally": run.tally,
        }))?
    );
    Ok(())
}
