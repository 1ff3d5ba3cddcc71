//! Classification core: bag-of-words vectors, feature scaling, support-vector
//! classifiers, confidence scoring and the dual legal/label pipeline.

mod error;
pub use error::ClassifyError;

pub mod classifier;
pub mod pipeline;
pub mod scaler;
pub mod scorer;
pub mod snapshot;
pub mod svm;
pub mod vectorizer;

pub use classifier::{ClassLabel, Classifier, MarginRow, cross_validate};
pub use pipeline::{
    ApplyConfig, CutoffScope, DrainReport, DualClassifierPipeline, LOW_CERTAINTY, TrainConfig,
    TrainReport,
};
pub use scaler::StandardScaler;
pub use scorer::{CONFIDENCE_CEILING, Scored, score, score_rows};
pub use snapshot::{
    FallbackReason, Generations, LoadOutcome, LoadedSnapshot, ModelSnapshot, ModelStore,
    ModelUnit, SnapshotManifest, SnapshotState, Stamped,
};
pub use svm::{Kernel, SupportVectorClassifier, SvmKind, SvmParams};
pub use vectorizer::{Cutoff, CutoffPolicy, VectorBuilder, VectorMode};
