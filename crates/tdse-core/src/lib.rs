pub mod corpus;
pub mod document;
pub mod memory;

pub use corpus::{DocumentSource, LabellingQuery, PostingIndex, TrainingQuery};
pub use document::{
    Document, DocumentId, DocumentPrediction, FeatureVector, Label, LabelId, PostingCount,
    Prediction, Term, TermId,
};
pub use memory::{MemoryCorpus, MemoryError};
