use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of the classification core.
///
/// Every variant aborts the run: a batch with a corrupted feature space would
/// poison every prediction in it, so nothing is skipped per document.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("posting index unavailable: {0}")]
    IndexUnavailable(#[source] BoxError),

    #[error("document source error: {0}")]
    Corpus(#[source] BoxError),

    #[error("feature space mismatch: model expects {expected} columns, batch has {found}")]
    FeatureSpaceMismatch { expected: usize, found: usize },

    #[error("vector mode '{0}' is not implemented")]
    UnsupportedVectorMode(&'static str),

    #[error("empty batch: {0}")]
    EmptyBatch(&'static str),

    #[error("training data has a single class ({0}); at least two are required")]
    SingleClass(i64),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("model file {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model encoding {path}: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ClassifyError {
    pub(crate) fn index(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::IndexUnavailable(Box::new(err))
    }

    pub(crate) fn corpus(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Corpus(Box::new(err))
    }
}
