//! Confidence scoring from margins and probabilities.
//!
//! The predicted class comes from the decision margins; its confidence is
//! the probability the model assigns to that class. When the margin decision
//! and the probability argmax agree the confidence is doubled, then capped
//! below certainty so a predicted row never looks like a human-certified one.

use rayon::prelude::*;

use crate::ClassifyError;
use crate::classifier::MarginRow;

/// Upper bound of any predicted confidence. Certified rows carry 1.0.
pub const CONFIDENCE_CEILING: f64 = 0.99;

/// Scored prediction for one sample: a class index and its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub index: usize,
    pub confidence: f64,
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Score one sample.
pub fn score(margins: &MarginRow, probabilities: &[f64]) -> Result<Scored, ClassifyError> {
    if probabilities.is_empty() {
        return Err(ClassifyError::ShapeMismatch("empty probability row".into()));
    }
    let index = margins.decision();
    let p = *probabilities.get(index).ok_or_else(|| {
        ClassifyError::ShapeMismatch(format!(
            "margin decision {index} outside {} probabilities",
            probabilities.len()
        ))
    })?;
    let boosted = if argmax(probabilities) == index { 2.0 * p } else { p };
    Ok(Scored {
        index,
        confidence: boosted.min(CONFIDENCE_CEILING),
    })
}

/// Score a batch, one row per sample.
pub fn score_rows(
    margins: &[MarginRow],
    probabilities: &[Vec<f64>],
) -> Result<Vec<Scored>, ClassifyError> {
    if margins.len() != probabilities.len() {
        return Err(ClassifyError::ShapeMismatch(format!(
            "{} margin rows but {} probability rows",
            margins.len(),
            probabilities.len()
        )));
    }
    margins
        .par_iter()
        .zip(probabilities.par_iter())
        .map(|(m, p)| score(m, p))
        .collect()
}
