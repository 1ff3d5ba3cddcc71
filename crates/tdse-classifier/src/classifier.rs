//! The classifier seam shared by both tracks, plus k-fold cross-validation.
//!
//! The legal track maps `false`/`true` to classes `0`/`1`; the label track uses
//! label ids directly. A fitted classifier exposes its classes in ascending
//! order and reports margins and probabilities aligned to that order.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::ClassifyError;

/// Class identifier as seen by a classifier.
pub type ClassLabel = i64;

/// Decision margins for one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum MarginRow {
    /// Two-class problem: a single signed margin, positive favouring the
    /// second class.
    Binary(f64),
    /// One margin per class.
    PerClass(Vec<f64>),
}

impl MarginRow {
    /// Index of the class the margins favour.
    ///
    /// For per-class margins this is the first maximum. For a binary margin
    /// it is `0` when the margin is negative, otherwise `1`.
    pub fn decision(&self) -> usize {
        match self {
            Self::Binary(m) => usize::from(*m >= 0.0),
            Self::PerClass(margins) => {
                let mut best = 0;
                for (i, &m) in margins.iter().enumerate() {
                    if m > margins[best] {
                        best = i;
                    }
                }
                best
            }
        }
    }
}

/// A supervised multi-class classifier.
pub trait Classifier {
    /// Fit on a dense matrix. Refitting discards the previous fit.
    fn fit(&mut self, x: &[Vec<f64>], y: &[ClassLabel]) -> Result<(), ClassifyError>;

    fn is_fitted(&self) -> bool;

    /// Classes seen during fit, ascending. Empty when unfitted.
    fn classes(&self) -> &[ClassLabel];

    /// Feature width seen during fit.
    fn n_features(&self) -> Option<usize>;

    fn decision_margins(&self, x: &[Vec<f64>]) -> Result<Vec<MarginRow>, ClassifyError>;

    /// Per-class probabilities, each row aligned to [`classes`](Self::classes).
    fn class_probabilities(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ClassifyError>;

    /// Predicted class per sample, by margin.
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<ClassLabel>, ClassifyError> {
        let classes = self.classes();
        self.decision_margins(x)?
            .iter()
            .map(|row| {
                classes.get(row.decision()).copied().ok_or_else(|| {
                    ClassifyError::ShapeMismatch(format!(
                        "margin row selects class {} of {}",
                        row.decision(),
                        classes.len()
                    ))
                })
            })
            .collect()
    }
}

/// Sorted distinct classes of a label vector.
pub(crate) fn distinct_classes(y: &[ClassLabel]) -> Vec<ClassLabel> {
    y.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Accuracy of `template` over `folds` contiguous folds.
///
/// Each fold is held out once while a clone of `template` is fit on the rest.
/// A fold whose training part holds a single class is skipped with a warning;
/// any other failure aborts. Returns one accuracy per evaluated fold.
pub fn cross_validate<C: Classifier + Clone>(
    template: &C,
    x: &[Vec<f64>],
    y: &[ClassLabel],
    folds: usize,
) -> Result<Vec<f64>, ClassifyError> {
    if x.len() != y.len() {
        return Err(ClassifyError::ShapeMismatch(format!(
            "{} samples but {} targets",
            x.len(),
            y.len()
        )));
    }
    if folds < 2 {
        return Err(ClassifyError::Configuration(format!(
            "cross-validation needs at least 2 folds, got {folds}"
        )));
    }
    let n = x.len();
    if n < folds {
        return Err(ClassifyError::Configuration(format!(
            "cannot split {n} samples into {folds} folds"
        )));
    }

    let mut scores = Vec::with_capacity(folds);
    for fold in 0..folds {
        let start = fold * n / folds;
        let end = (fold + 1) * n / folds;

        let mut train_x = Vec::with_capacity(n - (end - start));
        let mut train_y = Vec::with_capacity(n - (end - start));
        for i in (0..start).chain(end..n) {
            train_x.push(x[i].clone());
            train_y.push(y[i]);
        }

        let mut model = template.clone();
        match model.fit(&train_x, &train_y) {
            Ok(()) => {}
            Err(ClassifyError::SingleClass(class)) => {
                warn!(fold, class, "skipping fold: training part has a single class");
                continue;
            }
            Err(e) => return Err(e),
        }

        let predicted = model.predict(&x[start..end])?;
        let correct = predicted
            .iter()
            .zip(&y[start..end])
            .filter(|(p, t)| p == t)
            .count();
        scores.push(correct as f64 / (end - start) as f64);
    }

    if !scores.is_empty() {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        info!(folds = scores.len(), mean_accuracy = mean, "cross-validation");
    }
    Ok(scores)
}
