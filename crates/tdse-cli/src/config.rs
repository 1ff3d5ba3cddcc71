//! Command-line options. Every option falls back to an environment variable.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tdse_classifier::{
    ApplyConfig, CutoffScope, Kernel, LOW_CERTAINTY, SvmKind, SvmParams, TrainConfig,
};
use tdse_store::DuckStore;
use tracing::info;

/// Language filter value that disables filtering.
const ALL_LANGUAGES: &str = "all";

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// DuckDB corpus file
    #[arg(long = "db", env = "TDSE_DB_PATH", default_value = "tdse.duckdb")]
    pub db: PathBuf,

    /// Directory holding the persisted scaler and classifiers
    #[arg(long, env = "TDSE_MODEL_DIR", default_value = "./outputModels")]
    pub model_dir: PathBuf,

    /// Label seed file, loaded when the labels table is empty
    #[arg(long, env = "TDSE_LABELS")]
    pub labels: Option<PathBuf>,
}

impl StoreArgs {
    /// Open the corpus, seeding labels when a seed file is configured.
    pub fn open(&self) -> anyhow::Result<DuckStore> {
        let store = DuckStore::open_persistent(&self.db)
            .with_context(|| format!("opening corpus {}", self.db.display()))?;
        if let Some(path) = &self.labels {
            let seeded = store
                .seed_labels(path)
                .with_context(|| format!("seeding labels from {}", path.display()))?;
            if seeded > 0 {
                info!(count = seeded, "labels seeded");
            }
        }
        Ok(store)
    }
}

#[derive(Debug, Args)]
pub struct ClassifierArgs {
    /// Classifier family: C_SVC, NU_SVC or LinearSVC
    #[arg(long, env = "CLASSIFIER_SVM_TYPE", default_value = "C_SVC")]
    pub svm_type: SvmKind,

    /// Kernel: linear, polynomial, rbf or sigmoid
    #[arg(long, env = "CLASSIFIER_KERNEL_TYPE", default_value = "linear")]
    pub kernel: Kernel,

    /// Penalty C
    #[arg(long, env = "CLASSIFIER_COST", default_value_t = 10.0)]
    pub cost: f64,

    #[arg(long, env = "CLASSIFIER_NU", default_value_t = 0.5)]
    pub nu: f64,

    /// Polynomial kernel degree
    #[arg(long, env = "CLASSIFIER_DEGREE", default_value_t = 4)]
    pub degree: u32,

    /// Kernel coefficient; defaults to 1 / feature count
    #[arg(long, env = "CLASSIFIER_GAMMA")]
    pub gamma: Option<f64>,

    /// Independent kernel term (polynomial and sigmoid)
    #[arg(short = 'r', long = "coef0", env = "CLASSIFIER_R", default_value_t = 0.0)]
    pub coef0: f64,

    /// Solver stopping tolerance
    #[arg(long, env = "CLASSIFIER_EPS", default_value_t = 1e-3)]
    pub eps: f64,

    #[arg(long, env = "CLASSIFIER_MAX_ITER", default_value_t = 1000)]
    pub max_iter: usize,

    /// Kernel cache size in MB
    #[arg(long, env = "CLASSIFIER_CACHE_SIZE", default_value_t = 1024)]
    pub cache_size: usize,
}

impl ClassifierArgs {
    pub fn params(&self) -> SvmParams {
        SvmParams {
            kind: self.svm_type,
            kernel: self.kernel,
            cost: self.cost,
            nu: self.nu,
            degree: self.degree,
            gamma: self.gamma,
            coef0: self.coef0,
            tolerance: self.eps,
            max_iter: self.max_iter,
            cache_size_mb: self.cache_size,
        }
    }
}

/// Batch selection shared by train and apply.
#[derive(Debug, Args)]
pub struct CorpusArgs {
    /// Language code, or `all`
    #[arg(long, env = "CLASSIFIER_LANGUAGE", default_value = ALL_LANGUAGES)]
    pub language: String,

    /// Fraction of the corpus a term must appear in to become a feature
    #[arg(long, env = "CLASSIFIER_MIN_DF_FREQ", default_value_t = 0.005)]
    pub min_df_freq: f64,

    /// Documents per batch
    #[arg(long, env = "CLASSIFIER_LIMIT", default_value_t = 10_000)]
    pub limit: usize,
}

impl CorpusArgs {
    pub fn language(&self) -> Option<String> {
        if self.language.eq_ignore_ascii_case(ALL_LANGUAGES) {
            None
        } else {
            Some(self.language.clone())
        }
    }
}

#[derive(Debug, Args)]
pub struct TrainArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Minimum mean certainty of a training document
    #[arg(long, env = "CLASSIFIER_QUANTILE", default_value_t = 1.0)]
    pub quantile: f64,

    /// Cross-validation folds; below 2 disables cross-validation
    #[arg(long, env = "CLASSIFIER_KFOLD", default_value_t = 4)]
    pub kfold: usize,
}

impl TrainArgs {
    pub fn config(&self) -> TrainConfig {
        TrainConfig {
            limit: self.corpus.limit,
            df_quantile: self.corpus.min_df_freq,
            certainty_quantile: self.quantile,
            language: self.corpus.language(),
            k_fold: self.kfold,
        }
    }
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Maximum mean certainty of a labelling candidate
    #[arg(long, env = "CLASSIFIER_LOW_CERTAINTY", default_value_t = LOW_CERTAINTY)]
    pub low_certainty: f64,

    /// Resolve the term cutoff once per `run` or before every `page`
    #[arg(long, env = "TDSE_CUTOFF_SCOPE", default_value = "run")]
    pub cutoff_scope: CutoffScope,
}

impl ApplyArgs {
    pub fn config(&self) -> ApplyConfig {
        ApplyConfig {
            limit: self.corpus.limit,
            df_quantile: self.corpus.min_df_freq,
            language: self.corpus.language(),
            max_certainty: self.low_certainty,
            cutoff_scope: self.cutoff_scope,
        }
    }
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Certainty at which a document counts as certified
    #[arg(long, env = "CLASSIFIER_QUANTILE", default_value_t = 1.0)]
    pub quantile: f64,

    #[arg(long, env = "CLASSIFIER_LOW_CERTAINTY", default_value_t = LOW_CERTAINTY)]
    pub low_certainty: f64,
}
