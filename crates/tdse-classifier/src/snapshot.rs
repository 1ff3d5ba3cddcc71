//! Persisted model state: the scaler and both classifiers, loaded and saved
//! as one [`ModelSnapshot`].
//!
//! Each unit lives in its own JSON file under the model directory and is
//! loaded independently. A missing or undecodable unit falls back to a fresh,
//! untrained instance and says why; any other I/O failure is fatal.
//!
//! Every unit is stamped with the training run that produced it. A save
//! writes all temporary files before renaming any of them; if a rename still
//! fails partway, the stamps on disk disagree and the snapshot refuses to
//! apply until it is retrained.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ClassifyError;
use crate::classifier::Classifier;
use crate::scaler::StandardScaler;
use crate::svm::{SupportVectorClassifier, SvmParams};

const MANIFEST_FILE: &str = "manifest.json";

/// One persisted slot of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelUnit {
    Legal,
    Label,
    Scaler,
}

impl ModelUnit {
    pub const ALL: [ModelUnit; 3] = [Self::Legal, Self::Label, Self::Scaler];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legal => "legal model",
            Self::Label => "label model",
            Self::Scaler => "scaler",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Legal => "legal_model.json",
            Self::Label => "label_model.json",
            Self::Scaler => "scaler.json",
        }
    }
}

impl fmt::Display for ModelUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a unit was replaced by a fresh instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No file: the first run.
    Missing,
    /// A file exists but does not decode.
    Corrupt(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Corrupt(msg) => write!(f, "corrupt: {msg}"),
        }
    }
}

/// Result of loading one unit. Fatal failures are the `Err` side of the
/// surrounding `Result`.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<T> {
    Loaded(T),
    FreshFallback { value: T, reason: FallbackReason },
}

impl<T> LoadOutcome<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn reason(&self) -> Option<&FallbackReason> {
        match self {
            Self::Loaded(_) => None,
            Self::FreshFallback { reason, .. } => Some(reason),
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Loaded(value) | Self::FreshFallback { value, .. } => value,
        }
    }
}

// ── Snapshot ──

/// Readiness of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// The scaler has never been fitted.
    Uninitialized,
    /// The scaler is fitted but at least one classifier is not.
    ScalerReady,
    /// Everything `apply` needs is present.
    ModelsReady,
}

impl SnapshotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::ScalerReady => "scaler-ready",
            Self::ModelsReady => "models-ready",
        }
    }
}

/// Training run that produced each unit; `None` for a unit never saved by a
/// training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generations {
    pub scaler: Option<DateTime<Utc>>,
    pub legal: Option<DateTime<Utc>>,
    pub label: Option<DateTime<Utc>>,
}

impl Generations {
    pub fn uniform(trained_at: DateTime<Utc>) -> Self {
        Self {
            scaler: Some(trained_at),
            legal: Some(trained_at),
            label: Some(trained_at),
        }
    }

    pub fn get(&self, unit: ModelUnit) -> Option<DateTime<Utc>> {
        match unit {
            ModelUnit::Legal => self.legal,
            ModelUnit::Label => self.label,
            ModelUnit::Scaler => self.scaler,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.scaler == self.legal && self.legal == self.label
    }

    /// The run every unit shares, if they share one.
    pub fn common(&self) -> Option<DateTime<Utc>> {
        if self.is_consistent() {
            self.scaler
        } else {
            None
        }
    }
}

/// Scaler plus both classifiers. Replaced wholesale by training; applying
/// only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    pub scaler: StandardScaler,
    pub legal: SupportVectorClassifier,
    pub label: SupportVectorClassifier,
    pub generations: Generations,
}

impl ModelSnapshot {
    /// An untrained snapshot whose classifiers use `params`.
    pub fn fresh(params: &SvmParams) -> Self {
        Self {
            scaler: StandardScaler::default(),
            legal: SupportVectorClassifier::new(params.clone()),
            label: SupportVectorClassifier::new(params.clone()),
            generations: Generations::default(),
        }
    }

    pub fn state(&self) -> SnapshotState {
        if !self.scaler.is_fitted() {
            SnapshotState::Uninitialized
        } else if self.legal.is_fitted() && self.label.is_fitted() {
            SnapshotState::ModelsReady
        } else {
            SnapshotState::ScalerReady
        }
    }

    /// Fails with [`ClassifyError::ModelUnavailable`] unless every unit is
    /// trained, all three come from the same training run, and both
    /// classifiers read the scaler's feature space.
    pub fn ensure_ready(&self) -> Result<(), ClassifyError> {
        let missing: Vec<&str> = [
            (!self.scaler.is_fitted()).then_some(ModelUnit::Scaler.as_str()),
            (!self.legal.is_fitted()).then_some(ModelUnit::Legal.as_str()),
            (!self.label.is_fitted()).then_some(ModelUnit::Label.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !missing.is_empty() {
            return Err(ClassifyError::ModelUnavailable(format!(
                "untrained: {}; run train first",
                missing.join(", ")
            )));
        }

        if !self.generations.is_consistent() {
            let runs: Vec<String> = ModelUnit::ALL
                .iter()
                .map(|&unit| match self.generations.get(unit) {
                    Some(at) => format!("{unit} {}", at.to_rfc3339()),
                    None => format!("{unit} unstamped"),
                })
                .collect();
            return Err(ClassifyError::ModelUnavailable(format!(
                "units come from different training runs ({}); run train again",
                runs.join(", ")
            )));
        }

        let width = self.scaler.n_features();
        let classifiers = [(ModelUnit::Legal, &self.legal), (ModelUnit::Label, &self.label)];
        for (unit, classifier) in classifiers {
            if classifier.n_features() != width {
                return Err(ClassifyError::ModelUnavailable(format!(
                    "{unit} reads {} features but the scaler produces {}; run train again",
                    classifier.n_features().unwrap_or(0),
                    width.unwrap_or(0)
                )));
            }
        }
        Ok(())
    }
}

/// Provenance written next to the units on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub trained_at: DateTime<Utc>,
    pub documents: usize,
    pub features: usize,
    pub df_quantile: f64,
    pub params: SvmParams,
}

/// One unit as written to disk, tagged with the training run that produced
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    #[serde(default)]
    pub generation: Option<DateTime<Utc>>,
    pub unit: T,
}

/// A snapshot assembled from disk, with the outcome of every unit.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub snapshot: ModelSnapshot,
    pub legal: Option<FallbackReason>,
    pub label: Option<FallbackReason>,
    pub scaler: Option<FallbackReason>,
    pub manifest: Option<SnapshotManifest>,
}

impl LoadedSnapshot {
    pub fn fallback(&self, unit: ModelUnit) -> Option<&FallbackReason> {
        match unit {
            ModelUnit::Legal => self.legal.as_ref(),
            ModelUnit::Label => self.label.as_ref(),
            ModelUnit::Scaler => self.scaler.as_ref(),
        }
    }
}

// ── Store ──

/// JSON files in one directory.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, unit: ModelUnit) -> PathBuf {
        self.dir.join(unit.file_name())
    }

    /// Load one unit, or build it with `fresh` when it is missing or corrupt.
    /// A fresh unit carries no generation.
    pub fn load<T: DeserializeOwned>(
        &self,
        unit: ModelUnit,
        fresh: impl FnOnce() -> T,
    ) -> Result<LoadOutcome<Stamped<T>>, ClassifyError> {
        let path = self.path(unit);
        let fresh = || Stamped {
            generation: None,
            unit: fresh(),
        };
        match read_json(&path)? {
            Some(Ok(value)) => {
                debug!(unit = %unit, path = %path.display(), "loaded model unit");
                Ok(LoadOutcome::Loaded(value))
            }
            Some(Err(e)) => {
                warn!(
                    unit = %unit,
                    path = %path.display(),
                    error = %e,
                    "model unit is corrupt; starting fresh"
                );
                Ok(LoadOutcome::FreshFallback {
                    value: fresh(),
                    reason: FallbackReason::Corrupt(e.to_string()),
                })
            }
            None => {
                debug!(unit = %unit, path = %path.display(), "no model unit; starting fresh");
                Ok(LoadOutcome::FreshFallback {
                    value: fresh(),
                    reason: FallbackReason::Missing,
                })
            }
        }
    }

    /// Write one unit stamped with `generation`.
    pub fn save<T: Serialize>(
        &self,
        unit: ModelUnit,
        value: &T,
        generation: DateTime<Utc>,
    ) -> Result<(), ClassifyError> {
        fs::create_dir_all(&self.dir).map_err(persistence(&self.dir))?;
        let stamped = Stamped {
            generation: Some(generation),
            unit: value,
        };
        Staged::write(&self.dir, unit.file_name(), &stamped)?.commit()
    }

    /// Last saved manifest, if any. An undecodable manifest is reported and
    /// ignored; it never gates loading.
    pub fn load_manifest(&self) -> Result<Option<SnapshotManifest>, ClassifyError> {
        let path = self.dir.join(MANIFEST_FILE);
        match read_json(&path)? {
            Some(Ok(manifest)) => Ok(Some(manifest)),
            Some(Err(e)) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt manifest");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Load every unit independently. Fresh classifiers use `params`.
    pub fn load_snapshot(&self, params: &SvmParams) -> Result<LoadedSnapshot, ClassifyError> {
        let scaler = self.load(ModelUnit::Scaler, StandardScaler::default)?;
        let legal = self.load(ModelUnit::Legal, || SupportVectorClassifier::new(params.clone()))?;
        let label = self.load(ModelUnit::Label, || SupportVectorClassifier::new(params.clone()))?;
        let manifest = self.load_manifest()?;

        let (scaler_reason, legal_reason, label_reason) = (
            scaler.reason().cloned(),
            legal.reason().cloned(),
            label.reason().cloned(),
        );
        let (scaler, legal, label) = (scaler.into_value(), legal.into_value(), label.into_value());
        let snapshot = ModelSnapshot {
            scaler: scaler.unit,
            legal: legal.unit,
            label: label.unit,
            generations: Generations {
                scaler: scaler.generation,
                legal: legal.generation,
                label: label.generation,
            },
        };

        let manifest = match manifest {
            Some(m) if Some(m.trained_at) != snapshot.generations.common() => {
                warn!(
                    trained_at = %m.trained_at,
                    "manifest does not match the model units; ignoring it"
                );
                None
            }
            other => other,
        };

        let loaded = LoadedSnapshot {
            snapshot,
            legal: legal_reason,
            label: label_reason,
            scaler: scaler_reason,
            manifest,
        };
        info!(
            dir = %self.dir.display(),
            state = loaded.snapshot.state().as_str(),
            "loaded model snapshot"
        );
        Ok(loaded)
    }

    /// Persist every unit and the manifest, all stamped with the manifest's
    /// `trained_at`.
    ///
    /// Nothing is renamed into place until every temporary file is written;
    /// a failed write removes the ones already staged and leaves the previous
    /// snapshot untouched.
    pub fn save_snapshot(
        &self,
        snapshot: &ModelSnapshot,
        manifest: &SnapshotManifest,
    ) -> Result<(), ClassifyError> {
        fs::create_dir_all(&self.dir).map_err(persistence(&self.dir))?;

        let mut staged = Vec::with_capacity(4);
        if let Err(e) = self.stage_snapshot(&mut staged, snapshot, manifest) {
            for file in staged {
                file.discard();
            }
            return Err(e);
        }

        for file in staged {
            file.commit()?;
        }
        info!(dir = %self.dir.display(), trained_at = %manifest.trained_at, "saved model snapshot");
        Ok(())
    }

    fn stage_snapshot(
        &self,
        staged: &mut Vec<Staged>,
        snapshot: &ModelSnapshot,
        manifest: &SnapshotManifest,
    ) -> Result<(), ClassifyError> {
        let generation = Some(manifest.trained_at);
        let scaler = Stamped {
            generation,
            unit: &snapshot.scaler,
        };
        staged.push(Staged::write(&self.dir, ModelUnit::Scaler.file_name(), &scaler)?);
        let legal = Stamped {
            generation,
            unit: &snapshot.legal,
        };
        staged.push(Staged::write(&self.dir, ModelUnit::Legal.file_name(), &legal)?);
        let label = Stamped {
            generation,
            unit: &snapshot.label,
        };
        staged.push(Staged::write(&self.dir, ModelUnit::Label.file_name(), &label)?);
        staged.push(Staged::write(&self.dir, MANIFEST_FILE, manifest)?);
        Ok(())
    }
}

fn persistence(path: &Path) -> impl FnOnce(io::Error) -> ClassifyError + use<> {
    let path = path.to_path_buf();
    move |source| ClassifyError::Persistence { path, source }
}

/// `None` when the file does not exist; the inner `Err` is a decode failure.
fn read_json<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<Result<T, serde_json::Error>>, ClassifyError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ClassifyError::Persistence {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A file written beside its destination and not yet renamed into place.
struct Staged {
    tmp: PathBuf,
    path: PathBuf,
}

impl Staged {
    fn write<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<Self, ClassifyError> {
        let path = dir.join(file_name);
        let tmp = dir.join(format!("{file_name}.tmp"));
        let json = serde_json::to_vec(value).map_err(|source| ClassifyError::Encoding {
            path: path.clone(),
            source,
        })?;
        fs::write(&tmp, json).map_err(persistence(&tmp))?;
        Ok(Self { tmp, path })
    }

    fn commit(self) -> Result<(), ClassifyError> {
        fs::rename(&self.tmp, &self.path).map_err(persistence(&self.path))
    }

    fn discard(self) {
        if let Err(e) = fs::remove_file(&self.tmp) {
            debug!(path = %self.tmp.display(), error = %e, "could not remove staged file");
        }
    }
}
