mod config;
mod logging;
mod status;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tdse_classifier::{DualClassifierPipeline, ModelStore, ModelUnit, SvmParams};
use tdse_store::DuckStore;
use tracing::{info, warn};

use crate::config::{ApplyArgs, ClassifierArgs, StatusArgs, StoreArgs, TrainArgs};

#[derive(Debug, Parser)]
#[command(name = "tdse-classify", version, about = "Legal/label document classifier")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    classifier: ClassifierArgs,

    /// Directory for a debug-level classifier.log
    #[arg(long, env = "TDSE_LOG_LOCATION")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit the scaler and both classifiers on certified documents
    Train(TrainArgs),
    /// Label uncertain documents, page by page
    Apply(ApplyArgs),
    /// Certify the documents listed in a `documentId;legal;label` file
    Insert {
        #[arg(long, env = "TDSE_DATASET")]
        dataset: PathBuf,
    },
    /// Report persisted model state and corpus counts
    Status(StatusArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_dir.as_deref())?;
    info!("tdse-classify v{}", env!("CARGO_PKG_VERSION"));

    let store = cli.store.open()?;
    let models = ModelStore::new(&cli.store.model_dir);
    let params = cli.classifier.params();

    match &cli.command {
        Command::Train(args) => train(&store, &models, params, args),
        Command::Apply(args) => apply(&store, &models, params, args),
        Command::Insert { dataset } => insert(&store, dataset),
        Command::Status(args) => status(&store, &models, &params, args),
    }
}

fn train(
    store: &DuckStore,
    models: &ModelStore,
    params: SvmParams,
    args: &TrainArgs,
) -> anyhow::Result<()> {
    let pipeline = DualClassifierPipeline::new(store, models, params)
        .context("invalid classifier configuration")?;
    let (_, report) = pipeline.train(&args.config()).context("training failed")?;

    println!(
        "Trained on {} documents ({} labelled), {} features (cutoff {:.2})",
        report.documents,
        report.label_documents,
        report.features,
        report.cutoff.value()
    );
    for (track, scores) in [("legal", &report.legal_accuracy), ("label", &report.label_accuracy)] {
        if !scores.is_empty() {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            println!("  {track:<5} {}-fold accuracy {mean:.3}", scores.len());
        }
    }
    println!("Models saved to {}", models.dir().display());
    Ok(())
}

fn apply(
    store: &DuckStore,
    models: &ModelStore,
    params: SvmParams,
    args: &ApplyArgs,
) -> anyhow::Result<()> {
    let loaded = models.load_snapshot(&params).context("loading models")?;
    for unit in ModelUnit::ALL {
        if let Some(reason) = loaded.fallback(unit) {
            warn!(unit = %unit, %reason, "using an untrained unit");
        }
    }

    let pipeline = DualClassifierPipeline::new(store, models, params)
        .context("invalid classifier configuration")?;
    let report = pipeline
        .drain(&loaded.snapshot, &args.config())
        .context("labelling failed")?;
    println!("Labelled {} documents in {} pages", report.documents, report.pages);
    Ok(())
}

fn insert(store: &DuckStore, dataset: &std::path::Path) -> anyhow::Result<()> {
    let summary = store
        .import_labelled_dataset(dataset)
        .with_context(|| format!("importing {}", dataset.display()))?;
    println!("Certified {} of {} rows", summary.updated, summary.rows);
    Ok(())
}

fn status(
    store: &DuckStore,
    models: &ModelStore,
    params: &SvmParams,
    args: &StatusArgs,
) -> anyhow::Result<()> {
    let loaded = models.load_snapshot(params).context("loading models")?;
    let counts = store
        .corpus_counts(args.quantile, args.low_certainty)
        .context("counting corpus")?;
    print!("{}", status::render(models.dir(), &loaded, &counts));
    Ok(())
}
