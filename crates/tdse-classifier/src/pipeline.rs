//! The dual legal/label pipeline: train both classifiers on certified
//! documents, then label the uncertain ones page by page.
//!
//! Training is the only path that produces model state. It returns a new
//! [`ModelSnapshot`] and persists it; applying borrows a snapshot and never
//! mutates it, so repeated applies over the same page agree.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use tdse_core::{
    DocumentId, DocumentPrediction, DocumentSource, LabellingQuery, PostingIndex, Prediction,
    TrainingQuery,
};
use tracing::{debug, info, warn};

use crate::ClassifyError;
use crate::classifier::{ClassLabel, Classifier, cross_validate};
use crate::scaler::StandardScaler;
use crate::scorer::score_rows;
use crate::snapshot::{Generations, ModelSnapshot, ModelStore, SnapshotManifest};
use crate::svm::{SupportVectorClassifier, SvmParams};
use crate::vectorizer::{Cutoff, CutoffPolicy, VectorBuilder, VectorMode, to_matrix};

/// Mean certainty at or below which a document is a labelling candidate.
pub const LOW_CERTAINTY: f64 = 0.1;

/// When the document-frequency cutoff is resolved during a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutoffScope {
    /// Once per drain; every page shares one feature space.
    #[default]
    PerRun,
    /// Before every page, from the corpus size at that moment.
    PerPage,
}

impl CutoffScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerRun => "run",
            Self::PerPage => "page",
        }
    }
}

impl fmt::Display for CutoffScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CutoffScope {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "run" | "per-run" => Ok(Self::PerRun),
            "page" | "per-page" => Ok(Self::PerPage),
            other => Err(ClassifyError::Configuration(format!(
                "unknown cutoff scope '{other}' (expected run or page)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub limit: usize,
    pub df_quantile: f64,
    pub certainty_quantile: f64,
    pub language: Option<String>,
    /// Cross-validation folds; below 2 disables cross-validation.
    pub k_fold: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            limit: 10_000,
            df_quantile: 0.005,
            certainty_quantile: 1.0,
            language: None,
            k_fold: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyConfig {
    pub limit: usize,
    pub df_quantile: f64,
    pub language: Option<String>,
    pub max_certainty: f64,
    pub cutoff_scope: CutoffScope,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            limit: 10_000,
            df_quantile: 0.005,
            language: None,
            max_certainty: LOW_CERTAINTY,
            cutoff_scope: CutoffScope::PerRun,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub documents: usize,
    /// Documents with a primary label, the label track's training set.
    pub label_documents: usize,
    pub features: usize,
    pub cutoff: Cutoff,
    pub legal_accuracy: Vec<f64>,
    pub label_accuracy: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub pages: usize,
    pub documents: usize,
}

fn check_limit(limit: usize) -> Result<(), ClassifyError> {
    if limit == 0 {
        return Err(ClassifyError::Configuration("limit must be at least 1".into()));
    }
    Ok(())
}

fn check_df_quantile(df_quantile: f64) -> Result<(), ClassifyError> {
    if !(0.0..=1.0).contains(&df_quantile) {
        return Err(ClassifyError::Configuration(format!(
            "df quantile must be in [0, 1], got {df_quantile}"
        )));
    }
    Ok(())
}

/// Orchestrates vectorising, scaling, fitting and scoring over one corpus.
pub struct DualClassifierPipeline<'a, S> {
    source: &'a S,
    store: &'a ModelStore,
    params: SvmParams,
    mode: VectorMode,
}

impl<'a, S: PostingIndex + DocumentSource> DualClassifierPipeline<'a, S> {
    /// Fails with [`ClassifyError::Configuration`] when `params` cannot build
    /// a classifier.
    pub fn new(
        source: &'a S,
        store: &'a ModelStore,
        params: SvmParams,
    ) -> Result<Self, ClassifyError> {
        params.validate()?;
        Ok(Self {
            source,
            store,
            params,
            mode: VectorMode::default(),
        })
    }

    pub fn with_vector_mode(mut self, mode: VectorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn params(&self) -> &SvmParams {
        &self.params
    }

    /// Resolve the cutoff against the current corpus size.
    pub fn cutoff(&self, df_quantile: f64) -> Result<Cutoff, ClassifyError> {
        CutoffPolicy::new(df_quantile).resolve(self.source)
    }

    fn vectors(&self, ids: &[DocumentId], cutoff: Cutoff) -> Result<Vec<Vec<f64>>, ClassifyError> {
        let vectors = VectorBuilder::new(self.source)
            .with_mode(self.mode)
            .build_batch(ids, cutoff)?;
        Ok(to_matrix(&vectors))
    }

    /// Fit the scaler and both classifiers on one batch of certified
    /// documents, persist them, and return the new snapshot.
    pub fn train(
        &self,
        config: &TrainConfig,
    ) -> Result<(ModelSnapshot, TrainReport), ClassifyError> {
        check_limit(config.limit)?;
        check_df_quantile(config.df_quantile)?;

        let documents = self
            .source
            .training_documents(&TrainingQuery {
                limit: config.limit,
                certainty_quantile: config.certainty_quantile,
                language: config.language.clone(),
            })
            .map_err(ClassifyError::corpus)?;
        if documents.is_empty() {
            return Err(ClassifyError::EmptyBatch("no documents meet the certainty quantile"));
        }
        info!(documents = documents.len(), "drew training batch");

        let cutoff = self.cutoff(config.df_quantile)?;
        let ids: Vec<DocumentId> = documents.iter().map(|d| d.id.clone()).collect();
        let x = self.vectors(&ids, cutoff)?;

        let scaler = StandardScaler::fit(&x)?;
        let scaled = scaler.transform(&x)?;
        let features = scaler.n_features().unwrap_or(0);

        let legal_y: Vec<ClassLabel> =
            documents.iter().map(|d| ClassLabel::from(d.legal)).collect();
        let mut legal = SupportVectorClassifier::new(self.params.clone());
        legal.fit(&scaled, &legal_y)?;

        let (label_x, label_y): (Vec<Vec<f64>>, Vec<ClassLabel>) = documents
            .iter()
            .zip(&scaled)
            .filter_map(|(d, row)| d.primary_label.map(|label| (row.clone(), label)))
            .unzip();
        if label_x.len() < documents.len() {
            debug!(
                skipped = documents.len() - label_x.len(),
                "documents without a primary label left out of the label track"
            );
        }
        if label_x.is_empty() {
            return Err(ClassifyError::EmptyBatch("no training document has a primary label"));
        }
        let mut label = SupportVectorClassifier::new(self.params.clone());
        label.fit(&label_x, &label_y)?;

        let legal_accuracy = self.cross_validate("legal", &scaled, &legal_y, config.k_fold)?;
        let label_accuracy = self.cross_validate("label", &label_x, &label_y, config.k_fold)?;

        let trained_at = Utc::now();
        let snapshot = ModelSnapshot {
            scaler,
            legal,
            label,
            generations: Generations::uniform(trained_at),
        };
        let manifest = SnapshotManifest {
            trained_at,
            documents: documents.len(),
            features,
            df_quantile: config.df_quantile,
            params: self.params.clone(),
        };
        self.store.save_snapshot(&snapshot, &manifest)?;

        info!(
            documents = documents.len(),
            label_documents = label_x.len(),
            features,
            cutoff = cutoff.value(),
            "training complete"
        );
        Ok((
            snapshot,
            TrainReport {
                documents: documents.len(),
                label_documents: label_x.len(),
                features,
                cutoff,
                legal_accuracy,
                label_accuracy,
            },
        ))
    }

    fn cross_validate(
        &self,
        track: &str,
        x: &[Vec<f64>],
        y: &[ClassLabel],
        folds: usize,
    ) -> Result<Vec<f64>, ClassifyError> {
        if folds < 2 {
            return Ok(Vec::new());
        }
        if x.len() < folds {
            warn!(track, samples = x.len(), folds, "too few samples to cross-validate");
            return Ok(Vec::new());
        }
        let template = SupportVectorClassifier::new(self.params.clone());
        let scores = cross_validate(&template, x, y, folds)?;
        info!(track, ?scores, "cross-validation accuracy");
        Ok(scores)
    }

    /// Refuse a snapshot whose training manifest names a different df
    /// quantile: the cutoff would select a different term set even when the
    /// term count happens to match.
    ///
    /// Only the manifest written by the run that produced `snapshot` counts;
    /// without one the quantile cannot be checked.
    fn check_training_quantile(
        &self,
        snapshot: &ModelSnapshot,
        df_quantile: f64,
    ) -> Result<(), ClassifyError> {
        let manifest = self
            .store
            .load_manifest()?
            .filter(|m| Some(m.trained_at) == snapshot.generations.common());
        match manifest {
            Some(m) if m.df_quantile != df_quantile => Err(ClassifyError::Configuration(format!(
                "models were trained with df quantile {} but apply uses {df_quantile}",
                m.df_quantile
            ))),
            Some(_) => Ok(()),
            None => {
                warn!(df_quantile, "no training manifest for this snapshot; df quantile unchecked");
                Ok(())
            }
        }
    }

    /// Predict one page of labelling candidates under `cutoff`, strictly
    /// after `after` when given. Nothing is written back.
    pub fn apply(
        &self,
        snapshot: &ModelSnapshot,
        config: &ApplyConfig,
        cutoff: Cutoff,
        after: Option<&DocumentId>,
    ) -> Result<Vec<DocumentPrediction>, ClassifyError> {
        check_limit(config.limit)?;
        snapshot.ensure_ready()?;
        self.check_training_quantile(snapshot, config.df_quantile)?;
        self.score_page(snapshot, config, cutoff, after)
    }

    fn score_page(
        &self,
        snapshot: &ModelSnapshot,
        config: &ApplyConfig,
        cutoff: Cutoff,
        after: Option<&DocumentId>,
    ) -> Result<Vec<DocumentPrediction>, ClassifyError> {
        let documents = self
            .source
            .labelling_documents(&LabellingQuery {
                limit: config.limit,
                max_certainty: config.max_certainty,
                language: config.language.clone(),
                after: after.cloned(),
            })
            .map_err(ClassifyError::corpus)?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<DocumentId> = documents.iter().map(|d| d.id.clone()).collect();
        let x = self.vectors(&ids, cutoff)?;
        let scaled = snapshot.scaler.transform(&x)?;

        let legal = predict_track(&snapshot.legal, &scaled)?;
        let label = predict_track(&snapshot.label, &scaled)?;

        let predictions: Vec<DocumentPrediction> = ids
            .into_iter()
            .zip(legal.into_iter().zip(label))
            .map(|(document, (legal, label))| DocumentPrediction {
                document,
                legal: Prediction {
                    class: legal.class != 0,
                    confidence: legal.confidence,
                },
                label,
            })
            .collect();
        debug!(documents = predictions.len(), cutoff = cutoff.value(), "scored page");
        Ok(predictions)
    }

    /// Apply and record page after page until a page comes back short.
    ///
    /// Pages advance by document id, so a document is visited at most once
    /// per drain even when its recorded confidence stays low.
    pub fn drain(
        &self,
        snapshot: &ModelSnapshot,
        config: &ApplyConfig,
    ) -> Result<DrainReport, ClassifyError> {
        check_limit(config.limit)?;
        check_df_quantile(config.df_quantile)?;
        snapshot.ensure_ready()?;
        self.check_training_quantile(snapshot, config.df_quantile)?;

        let run_cutoff = match config.cutoff_scope {
            CutoffScope::PerRun => Some(self.cutoff(config.df_quantile)?),
            CutoffScope::PerPage => None,
        };

        let mut report = DrainReport::default();
        let mut after: Option<DocumentId> = None;
        loop {
            let cutoff = match run_cutoff {
                Some(cutoff) => cutoff,
                None => self.cutoff(config.df_quantile)?,
            };
            let page = self.score_page(snapshot, config, cutoff, after.as_ref())?;
            if page.is_empty() {
                break;
            }
            self.source
                .record_predictions(&page)
                .map_err(ClassifyError::corpus)?;

            report.pages += 1;
            report.documents += page.len();
            after = page.iter().map(|p| p.document.clone()).max();
            debug!(page = report.pages, documents = page.len(), "recorded page");

            if page.len() < config.limit {
                break;
            }
        }

        info!(
            pages = report.pages,
            documents = report.documents,
            scope = %config.cutoff_scope,
            "drain complete"
        );
        Ok(report)
    }
}

/// Score every row of one track and map class indices to class labels.
fn predict_track(
    classifier: &SupportVectorClassifier,
    x: &[Vec<f64>],
) -> Result<Vec<Prediction<ClassLabel>>, ClassifyError> {
    let margins = classifier.decision_margins(x)?;
    let probabilities = classifier.class_probabilities(x)?;
    let classes = classifier.classes();
    score_rows(&margins, &probabilities)?
        .into_iter()
        .map(|scored| {
            let class = classes.get(scored.index).copied().ok_or_else(|| {
                ClassifyError::ShapeMismatch(format!(
                    "scored index {} outside {} classes",
                    scored.index,
                    classes.len()
                ))
            })?;
            Ok(Prediction {
                class,
                confidence: scored.confidence,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::scorer::CONFIDENCE_CEILING;
    use tdse_core::{Document, MemoryCorpus, MemoryError, PostingCount, Term};

    fn doc(id: &str, legal: bool, label: Option<i64>, certainty: f64) -> Document {
        Document {
            id: DocumentId::new(id),
            language: Some("en".into()),
            legal,
            primary_label: label,
            legal_certainty: certainty,
            label_certainty: certainty,
        }
    }

    /// Three certified groups, interleaved, plus one uncertain document
    /// shaped like each group.
    ///
    /// Group A (legal, label 10) uses terms 1 and 2; B (label 20) terms 3
    /// and 4; C (label 30) terms 5 and 6. Every certified document also
    /// carries term 7.
    fn corpus() -> MemoryCorpus {
        let corpus = MemoryCorpus::new();
        let groups = [("a", true, 10, [1, 2]), ("b", false, 20, [3, 4]), ("c", false, 30, [5, 6])];
        for i in 1..=3u32 {
            for (prefix, legal, label, [t1, t2]) in groups {
                let id = DocumentId::new(format!("{prefix}{i}"));
                corpus.add_document(doc(id.as_str(), legal, Some(label), 1.0)).unwrap();
                corpus.add_posting(&id, t1, 3 + i).unwrap();
                corpus.add_posting(&id, t2, 2).unwrap();
                corpus.add_posting(&id, 7, 1).unwrap();
            }
        }
        for (id, [t1, t2]) in [("u1", [1, 2]), ("u2", [3, 4]), ("u3", [5, 6])] {
            corpus.add_document(doc(id, false, None, 0.0)).unwrap();
            corpus.add_posting(&id.into(), t1, 4).unwrap();
            corpus.add_posting(&id.into(), t2, 2).unwrap();
        }
        corpus
    }

    fn train_config() -> TrainConfig {
        TrainConfig {
            limit: 100,
            df_quantile: 0.1,
            certainty_quantile: 1.0,
            language: None,
            k_fold: 3,
        }
    }

    fn apply_config(limit: usize) -> ApplyConfig {
        ApplyConfig {
            limit,
            df_quantile: 0.1,
            ..ApplyConfig::default()
        }
    }

    fn pipeline<'a, S: PostingIndex + DocumentSource>(
        source: &'a S,
        store: &'a ModelStore,
    ) -> DualClassifierPipeline<'a, S> {
        DualClassifierPipeline::new(source, store, SvmParams::default()).unwrap()
    }

    #[test]
    fn train_then_apply_labels_uncertain_documents() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);

        let (snapshot, report) = pipeline.train(&train_config()).unwrap();
        assert_eq!(report.documents, 9);
        assert_eq!(report.label_documents, 9);
        assert_eq!(report.features, 7);
        assert_eq!(report.legal_accuracy.len(), 3);

        let cutoff = pipeline.cutoff(0.1).unwrap();
        let page = pipeline.apply(&snapshot, &apply_config(10), cutoff, None).unwrap();
        let got: Vec<(&str, bool, i64)> = page
            .iter()
            .map(|p| (p.document.as_str(), p.legal.class, p.label.class))
            .collect();
        assert_eq!(got, vec![("u1", true, 10), ("u2", false, 20), ("u3", false, 30)]);
        for p in &page {
            assert!(p.legal.confidence <= CONFIDENCE_CEILING);
            assert!(p.label.confidence <= CONFIDENCE_CEILING);
            assert!(p.label.confidence > 0.0);
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        let cutoff = pipeline.cutoff(0.1).unwrap();
        let first = pipeline.apply(&snapshot, &apply_config(10), cutoff, None).unwrap();
        let second = pipeline.apply(&snapshot, &apply_config(10), cutoff, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn apply_refuses_an_untrained_snapshot() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);

        let fresh = ModelSnapshot::fresh(pipeline.params());
        let result = pipeline.apply(&fresh, &apply_config(10), Cutoff::new(1.0), None);
        assert!(matches!(result, Err(ClassifyError::ModelUnavailable(_))));
        assert!(matches!(
            pipeline.drain(&fresh, &apply_config(10)),
            Err(ClassifyError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn offline_index_aborts_training() {
        let corpus = corpus();
        corpus.set_offline(true);
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let result = pipeline(&corpus, &store).train(&train_config());
        assert!(matches!(result, Err(ClassifyError::IndexUnavailable(_))));
        assert!(!store.path(crate::ModelUnit::Scaler).exists());
    }

    #[test]
    fn new_terms_after_training_are_a_feature_space_mismatch() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        for id in ["a1", "b1", "c1"] {
            corpus.add_posting(&id.into(), 8, 1).unwrap();
        }
        let cutoff = pipeline.cutoff(0.1).unwrap();
        let result = pipeline.apply(&snapshot, &apply_config(10), cutoff, None);
        assert!(matches!(
            result,
            Err(ClassifyError::FeatureSpaceMismatch { expected: 7, found: 8 })
        ));
    }

    #[test]
    fn drain_records_every_candidate_and_stops_on_short_page() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        let report = pipeline.drain(&snapshot, &apply_config(2)).unwrap();
        assert_eq!(report, DrainReport { pages: 2, documents: 3 });

        let u1 = corpus.document(&"u1".into()).unwrap().unwrap();
        assert!(u1.legal);
        assert_eq!(u1.primary_label, Some(10));
        assert!(u1.label_certainty > 0.0);
        let u3 = corpus.document(&"u3".into()).unwrap().unwrap();
        assert_eq!(u3.primary_label, Some(30));
    }

    #[test]
    fn drain_terminates_on_exact_page_multiples() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        // Three candidates in pages of one: the fourth page is empty.
        let report = pipeline.drain(&snapshot, &apply_config(1)).unwrap();
        assert_eq!(report, DrainReport { pages: 3, documents: 3 });
    }

    #[test]
    fn persisted_snapshot_predicts_like_the_trained_one() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        let loaded = store.load_snapshot(pipeline.params()).unwrap();
        assert_eq!(loaded.snapshot, snapshot);
        assert_eq!(loaded.manifest.map(|m| m.documents), Some(9));

        let cutoff = pipeline.cutoff(0.1).unwrap();
        let a = pipeline.apply(&snapshot, &apply_config(10), cutoff, None).unwrap();
        let b = pipeline.apply(&loaded.snapshot, &apply_config(10), cutoff, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn failed_retrain_keeps_the_previous_models() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (first, _) = pipeline.train(&train_config()).unwrap();

        std::fs::create_dir(dir.path().join("label_model.json.tmp")).unwrap();
        let smaller = TrainConfig {
            limit: 4,
            k_fold: 0,
            ..train_config()
        };
        let result = pipeline.train(&smaller);
        assert!(matches!(result, Err(ClassifyError::Persistence { .. })));

        let loaded = store.load_snapshot(pipeline.params()).unwrap();
        assert_eq!(loaded.snapshot, first);
        assert_eq!(loaded.manifest.map(|m| m.documents), Some(9));
        let cutoff = pipeline.cutoff(0.1).unwrap();
        let page = pipeline.apply(&loaded.snapshot, &apply_config(10), cutoff, None).unwrap();
        assert_eq!(page.len(), 3);
    }

    #[test]
    fn apply_refuses_a_df_quantile_other_than_training() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        // At 0.05 the cutoff is 0.6, which still keeps exactly the seven
        // trained terms.
        let config = ApplyConfig {
            df_quantile: 0.05,
            ..apply_config(10)
        };
        let cutoff = pipeline.cutoff(0.05).unwrap();
        assert!(matches!(
            pipeline.apply(&snapshot, &config, cutoff, None),
            Err(ClassifyError::Configuration(_))
        ));
        assert!(matches!(
            pipeline.drain(&snapshot, &config),
            Err(ClassifyError::Configuration(_))
        ));
        let u1 = corpus.document(&"u1".into()).unwrap().unwrap();
        assert_eq!(u1.primary_label, None);
    }

    #[test]
    fn snapshot_without_a_manifest_still_applies() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();
        std::fs::remove_file(dir.path().join("manifest.json")).unwrap();

        let report = pipeline.drain(&snapshot, &apply_config(10)).unwrap();
        assert_eq!(report, DrainReport { pages: 1, documents: 3 });
    }

    #[test]
    fn training_needs_certified_documents() {
        let corpus = MemoryCorpus::new();
        corpus.add_document(doc("x", true, Some(1), 0.5)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let result = pipeline(&corpus, &store).train(&train_config());
        assert!(matches!(result, Err(ClassifyError::EmptyBatch(_))));
    }

    #[test]
    fn zero_limit_is_a_configuration_error() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let config = TrainConfig {
            limit: 0,
            ..train_config()
        };
        let result = pipeline(&corpus, &store).train(&config);
        assert!(matches!(result, Err(ClassifyError::Configuration(_))));
    }

    #[test]
    fn invalid_params_fail_construction() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let params = SvmParams {
            cost: -1.0,
            ..SvmParams::default()
        };
        let result = DualClassifierPipeline::new(&corpus, &store, params);
        assert!(matches!(result, Err(ClassifyError::Configuration(_))));
    }

    #[test]
    fn set_of_words_mode_is_rejected_at_train() {
        let corpus = corpus();
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let result = pipeline(&corpus, &store)
            .with_vector_mode(VectorMode::SetOfWords)
            .train(&train_config());
        assert!(matches!(result, Err(ClassifyError::UnsupportedVectorMode(_))));
    }

    /// Counts cutoff resolutions.
    struct CountingCorpus {
        inner: MemoryCorpus,
        document_counts: Cell<usize>,
    }

    impl PostingIndex for CountingCorpus {
        type Error = MemoryError;

        fn document_count(&self) -> Result<u64, MemoryError> {
            self.document_counts.set(self.document_counts.get() + 1);
            self.inner.document_count()
        }

        fn terms_above(&self, cutoff: f64) -> Result<Vec<Term>, MemoryError> {
            self.inner.terms_above(cutoff)
        }

        fn posting_counts(
            &self,
            documents: &[DocumentId],
            cutoff: f64,
        ) -> Result<Vec<PostingCount>, MemoryError> {
            self.inner.posting_counts(documents, cutoff)
        }
    }

    impl DocumentSource for CountingCorpus {
        type Error = MemoryError;

        fn training_documents(&self, query: &TrainingQuery) -> Result<Vec<Document>, MemoryError> {
            self.inner.training_documents(query)
        }

        fn labelling_documents(
            &self,
            query: &LabellingQuery,
        ) -> Result<Vec<Document>, MemoryError> {
            self.inner.labelling_documents(query)
        }

        fn record_predictions(
            &self,
            predictions: &[DocumentPrediction],
        ) -> Result<(), MemoryError> {
            self.inner.record_predictions(predictions)
        }
    }

    fn drain_cutoff_resolutions(scope: CutoffScope) -> usize {
        let corpus = CountingCorpus {
            inner: corpus(),
            document_counts: Cell::new(0),
        };
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let pipeline = pipeline(&corpus, &store);
        let (snapshot, _) = pipeline.train(&train_config()).unwrap();

        corpus.document_counts.set(0);
        let config = ApplyConfig {
            cutoff_scope: scope,
            ..apply_config(1)
        };
        pipeline.drain(&snapshot, &config).unwrap();
        corpus.document_counts.get()
    }

    #[test]
    fn per_run_scope_resolves_the_cutoff_once() {
        assert_eq!(drain_cutoff_resolutions(CutoffScope::PerRun), 1);
    }

    #[test]
    fn per_page_scope_resolves_the_cutoff_every_page() {
        // Three full pages of one, then the empty page that ends the drain.
        assert_eq!(drain_cutoff_resolutions(CutoffScope::PerPage), 4);
    }

    #[test]
    fn cutoff_scope_parses() {
        assert_eq!("run".parse::<CutoffScope>().unwrap(), CutoffScope::PerRun);
        assert_eq!("PER-PAGE".parse::<CutoffScope>().unwrap(), CutoffScope::PerPage);
        assert!("batch".parse::<CutoffScope>().is_err());
    }
}
