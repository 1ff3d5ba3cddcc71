//! Z-score standardisation fitted once per training batch.

use serde::{Deserialize, Serialize};

use crate::ClassifyError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScalerParams {
    mean: Vec<f64>,
    /// Population standard deviation per column; 1.0 for constant columns.
    scale: Vec<f64>,
    samples: usize,
}

/// Standardises each column to zero mean and unit variance.
///
/// A default scaler is unfitted. [`fit`](Self::fit) always produces a new
/// scaler from one batch; there is no incremental update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    params: Option<ScalerParams>,
}

impl StandardScaler {
    /// Fit column means and deviations on a training matrix.
    pub fn fit(x: &[Vec<f64>]) -> Result<Self, ClassifyError> {
        let first = x
            .first()
            .ok_or(ClassifyError::EmptyBatch("cannot fit scaler on zero rows"))?;
        let width = first.len();
        check_rectangular(x, width)?;

        let n = x.len() as f64;
        let mut mean = vec![0.0; width];
        for row in x {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0; width];
        for row in x {
            for ((acc, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v - m;
                *acc += d * d;
            }
        }
        let scale = var
            .into_iter()
            .map(|v| {
                let sd = (v / n).sqrt();
                if sd > f64::EPSILON { sd } else { 1.0 }
            })
            .collect();

        Ok(Self {
            params: Some(ScalerParams {
                mean,
                scale,
                samples: x.len(),
            }),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    /// Column count the scaler was fitted on.
    pub fn n_features(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.mean.len())
    }

    /// Number of rows the scaler was fitted on.
    pub fn samples(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.samples)
    }

    /// Apply the fitted standardisation. Fails on an unfitted scaler and on
    /// rows whose width differs from the fitted width.
    pub fn transform(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ClassifyError> {
        let params = self.params.as_ref().ok_or_else(|| {
            ClassifyError::ModelUnavailable("scaler has not been trained".into())
        })?;
        let width = params.mean.len();
        if let Some(row) = x.iter().find(|r| r.len() != width) {
            return Err(ClassifyError::FeatureSpaceMismatch {
                expected: width,
                found: row.len(),
            });
        }
        Ok(x.iter()
            .map(|row| {
                row.iter()
                    .zip(&params.mean)
                    .zip(&params.scale)
                    .map(|((&v, &m), &s)| (v - m) / s)
                    .collect()
            })
            .collect())
    }
}

fn check_rectangular(x: &[Vec<f64>], width: usize) -> Result<(), ClassifyError> {
    match x.iter().position(|r| r.len() != width) {
        Some(i) => Err(ClassifyError::ShapeMismatch(format!(
            "row {i} has {} columns, expected {width}",
            x[i].len()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_transform_standardises_columns() {
        let x = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        let t = scaler.transform(&x).unwrap();
        assert!((t[0][0] + 1.0).abs() < 1e-12);
        assert!((t[1][0] - 1.0).abs() < 1e-12);
        // Constant column: centred, unit scale.
        assert_eq!(t[0][1], 0.0);
        assert_eq!(t[1][1], 0.0);
    }

    #[test]
    fn transform_reuses_training_statistics() {
        let scaler = StandardScaler::fit(&[vec![0.0], vec![2.0]]).unwrap();
        let t = scaler.transform(&[vec![4.0]]).unwrap();
        // mean 1, sd 1
        assert!((t[0][0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn unfitted_scaler_refuses_to_transform() {
        let scaler = StandardScaler::default();
        assert!(!scaler.is_fitted());
        let result = scaler.transform(&[vec![1.0]]);
        assert!(matches!(result, Err(ClassifyError::ModelUnavailable(_))));
    }

    #[test]
    fn width_change_is_a_feature_space_mismatch() {
        let scaler = StandardScaler::fit(&[vec![1.0, 2.0], vec![2.0, 3.0]]).unwrap();
        let result = scaler.transform(&[vec![1.0, 2.0, 3.0]]);
        assert!(matches!(
            result,
            Err(ClassifyError::FeatureSpaceMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn fit_rejects_empty_and_ragged_input() {
        assert!(matches!(StandardScaler::fit(&[]), Err(ClassifyError::EmptyBatch(_))));
        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(StandardScaler::fit(&ragged), Err(ClassifyError::ShapeMismatch(_))));
    }

    #[test]
    fn refit_replaces_previous_statistics() {
        let first = StandardScaler::fit(&[vec![0.0], vec![2.0]]).unwrap();
        let second = StandardScaler::fit(&[vec![10.0], vec![30.0], vec![20.0]]).unwrap();
        assert_ne!(first, second);
        assert_eq!(second.samples(), Some(3));
        assert_eq!(second.n_features(), Some(1));
    }
}
