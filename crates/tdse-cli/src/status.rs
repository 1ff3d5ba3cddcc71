//! Plain-text status report: what is persisted, what is missing and why, and
//! how much of the corpus is certified or waiting to be labelled.

use std::fmt::Write;
use std::path::Path;

use tdse_classifier::{LoadedSnapshot, ModelUnit, SnapshotState};
use tdse_store::CorpusCounts;

const LABEL_WIDTH: usize = 12;

pub fn render(model_dir: &Path, loaded: &LoadedSnapshot, counts: &CorpusCounts) -> String {
    let mut out = String::new();

    // ── Models ──
    section(&mut out, "Models");
    row(&mut out, "directory", &model_dir.display().to_string());
    let state = loaded.snapshot.state();
    row(&mut out, "state", state.as_str());
    let problem = (state == SnapshotState::ModelsReady)
        .then(|| loaded.snapshot.ensure_ready().err())
        .flatten();
    if let Some(e) = problem {
        row(&mut out, "unusable", &e.to_string());
    }
    for unit in ModelUnit::ALL {
        let value = match loaded.fallback(unit) {
            None => "loaded".to_string(),
            Some(reason) => format!("fresh ({reason})"),
        };
        row(&mut out, unit.as_str(), &value);
    }
    if let Some(features) = loaded.snapshot.scaler.n_features() {
        row(&mut out, "features", &features.to_string());
    }
    if let Some(manifest) = &loaded.manifest {
        row(
            &mut out,
            "trained at",
            &manifest.trained_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        );
        row(&mut out, "documents", &manifest.documents.to_string());
        row(
            &mut out,
            "classifier",
            &format!("{} / {}", manifest.params.kind, manifest.params.kernel),
        );
    }

    // ── Corpus ──
    out.push('\n');
    section(&mut out, "Corpus");
    row(&mut out, "documents", &counts.documents.to_string());
    row(&mut out, "terms", &counts.terms.to_string());
    row(&mut out, "labels", &counts.labels.to_string());
    row(&mut out, "certified", &counts.certified.to_string());
    row(&mut out, "candidates", &counts.candidates.to_string());
    out
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out, "{title}");
}

fn row(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "  {label:<LABEL_WIDTH$} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdse_classifier::{Classifier, FallbackReason, ModelSnapshot, StandardScaler, SvmParams};

    fn counts() -> CorpusCounts {
        CorpusCounts {
            documents: 12,
            terms: 7,
            labels: 3,
            certified: 9,
            candidates: 3,
        }
    }

    #[test]
    fn first_run_reports_missing_units() {
        let loaded = LoadedSnapshot {
            snapshot: ModelSnapshot::fresh(&SvmParams::default()),
            legal: Some(FallbackReason::Missing),
            label: Some(FallbackReason::Missing),
            scaler: Some(FallbackReason::Missing),
            manifest: None,
        };
        let text = render(Path::new("models"), &loaded, &counts());
        assert!(text.contains("state        uninitialized"));
        assert!(text.contains("legal model  fresh (missing)"));
        assert!(text.contains("candidates   3"));
        assert!(!text.contains("trained at"));
    }

    #[test]
    fn ready_but_inconsistent_models_are_reported_unusable() {
        let x = vec![vec![1.0], vec![-1.0], vec![2.0], vec![-2.0]];
        let mut snapshot = ModelSnapshot::fresh(&SvmParams::default());
        snapshot.scaler = StandardScaler::fit(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        snapshot.legal.fit(&x, &[1, 0, 1, 0]).unwrap();
        snapshot.label.fit(&x, &[5, 6, 5, 6]).unwrap();

        let loaded = LoadedSnapshot {
            snapshot,
            legal: None,
            label: None,
            scaler: None,
            manifest: None,
        };
        let text = render(Path::new("models"), &loaded, &counts());
        assert!(text.contains("state        models-ready"));
        assert!(text.contains("unusable     model unavailable: legal model reads 1 features"));
    }

    #[test]
    fn corrupt_unit_is_distinguished_from_missing() {
        let loaded = LoadedSnapshot {
            snapshot: ModelSnapshot::fresh(&SvmParams::default()),
            legal: None,
            label: Some(FallbackReason::Corrupt("expected value at line 1".into())),
            scaler: Some(FallbackReason::Missing),
            manifest: None,
        };
        let text = render(Path::new("models"), &loaded, &counts());
        assert!(text.contains("legal model  loaded"));
        assert!(text.contains("label model  fresh (corrupt: expected value at line 1)"));
    }
}
