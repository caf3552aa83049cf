//! Dataset analysis backends.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{BackendError, DatasetAnalyzer, ScriptRunner};
use crate::agents::types::{ColumnProfile, DatasetProfile, DatasetSelection};
use crate::backend::process::ScriptMessage;

/// Script invoked as `examine_dataset.py <dataset name> <dataset source>`.
pub const ANALYSIS_SCRIPT: &str = "examine_dataset.py";

/// Returns the canned profile without looking at the dataset.
#[derive(Debug, Clone, Default)]
pub struct CannedAnalyzer;

#[async_trait]
impl DatasetAnalyzer for CannedAnalyzer {
    async fn analyze(&self, dataset: &DatasetSelection) -> Result<DatasetProfile, BackendError> {
        tracing::debug!(dataset = %dataset.name, "Using canned dataset profile");
        Ok(DatasetProfile::fallback())
    }
}

/// Runs the analysis script and converts its report into a profile.
#[derive(Debug, Clone)]
pub struct ScriptAnalyzer {
    runner: ScriptRunner,
    script: String,
}

impl ScriptAnalyzer {
    pub fn new(runner: ScriptRunner) -> Self {
        Self {
            runner,
            script: ANALYSIS_SCRIPT.to_string(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }
}

#[async_trait]
impl DatasetAnalyzer for ScriptAnalyzer {
    async fn analyze(&self, dataset: &DatasetSelection) -> Result<DatasetProfile, BackendError> {
        let mut report: Option<Value> = None;
        let mut reported_error: Option<String> = None;

        let args = [dataset.name.as_str(), dataset.source.as_str()];
        self.runner
            .run_lines(&self.script, &args, |message| match message {
                ScriptMessage::Analysis(analysis) => report = Some(analysis),
                // bare reports without the status envelope
                ScriptMessage::Other(value) if value.get("shape").is_some() => {
                    report = Some(value)
                }
                ScriptMessage::Error(message) => reported_error = Some(message),
                _ => {}
            })
            .await?;

        match (report, reported_error) {
            (Some(report), _) => profile_from_report(report),
            (None, Some(message)) => Err(BackendError::ScriptReported {
                script: self.script.clone(),
                message,
            }),
            (None, None) => Err(BackendError::NoResult {
                script: self.script.clone(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportedColumn {
    Name(String),
    Profile(ColumnProfile),
}

#[derive(Debug, Deserialize)]
struct AnalysisReport {
    #[serde(default)]
    columns: Vec<ReportedColumn>,
    shape: Vec<u64>,
    #[serde(default)]
    dtypes: BTreeMap<String, String>,
    #[serde(default)]
    missing_values: Option<Value>,
    #[serde(default)]
    statistics: Option<BTreeMap<String, Value>>,
}

/// Converts a script report into a [`DatasetProfile`].
///
/// Without explicit statistics, `total_samples` is the row count and
/// `total_features` excludes one target column.
pub fn profile_from_report(report: Value) -> Result<DatasetProfile, BackendError> {
    let report: AnalysisReport = serde_json::from_value(report)
        .map_err(|e| BackendError::InvalidResult(format!("analysis report: {}", e)))?;

    let [rows, cols] = report.shape[..] else {
        return Err(BackendError::InvalidResult(format!(
            "analysis shape must have 2 entries, got {}",
            report.shape.len()
        )));
    };

    let columns = report
        .columns
        .into_iter()
        .map(|column| match column {
            ReportedColumn::Profile(profile) => profile,
            ReportedColumn::Name(name) => ColumnProfile {
                dtype: report.dtypes.get(&name).cloned().unwrap_or_default(),
                name,
                sample: Vec::new(),
                statistics: BTreeMap::new(),
            },
        })
        .collect();

    let statistics = match report.statistics {
        Some(statistics) => statistics,
        None => {
            let mut statistics = BTreeMap::new();
            statistics.insert("total_samples".to_string(), Value::from(rows));
            statistics.insert(
                "total_features".to_string(),
                Value::from(cols.saturating_sub(1)),
            );
            if let Some(missing) = report.missing_values {
                statistics.insert("missing_values".to_string(), missing);
            }
            statistics
        }
    };

    Ok(DatasetProfile {
        columns,
        shape: [rows, cols],
        dtypes: report.dtypes,
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::process::tests::shell_script;
    use serde_json::json;

    fn iris() -> DatasetSelection {
        DatasetSelection {
            source: "hf".to_string(),
            name: "iris".to_string(),
            url: None,
            suggested_preprocessing: Vec::new(),
        }
    }

    #[test]
    fn test_profile_from_report_derives_statistics() {
        let profile = profile_from_report(json!({
            "columns": ["sepal_length", "species"],
            "shape": [150, 5],
            "dtypes": {"sepal_length": "float64", "species": "object"},
            "missing_values": {"sepal_length": 0}
        }))
        .expect("profile");

        assert_eq!(profile.shape, [150, 5]);
        assert_eq!(profile.statistics["total_samples"], json!(150));
        assert_eq!(profile.statistics["total_features"], json!(4));
        assert_eq!(profile.statistics["missing_values"], json!({"sepal_length": 0}));
        assert_eq!(profile.columns[1].dtype, "object");
    }

    #[test]
    fn test_profile_from_report_rejects_bad_shape() {
        let err = profile_from_report(json!({"shape": [150]})).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResult(_)));
    }

    #[tokio::test]
    async fn test_canned_analyzer() {
        let profile = CannedAnalyzer.analyze(&iris()).await.expect("profile");
        assert_eq!(profile, DatasetProfile::fallback());
    }

    #[tokio::test]
    async fn test_script_analyzer_reads_enveloped_report() {
        let (_dir, runner) = shell_script(
            ANALYSIS_SCRIPT,
            r#"echo "loading $1 from $2"
echo '{"status":"complete","analysis":{"columns":["a","label"],"shape":[10,2],"dtypes":{"a":"int64","label":"int64"}}}'
"#,
        );
        let profile = ScriptAnalyzer::new(runner)
            .analyze(&iris())
            .await
            .expect("profile");
        assert_eq!(profile.shape, [10, 2]);
        assert_eq!(profile.statistics["total_features"], json!(1));
    }

    #[tokio::test]
    async fn test_script_analyzer_reads_bare_report() {
        let (_dir, runner) = shell_script(
            ANALYSIS_SCRIPT,
            r#"echo '{"columns":[],"shape":[5,3],"dtypes":{},"statistics":{"total_samples":5}}'"#,
        );
        let profile = ScriptAnalyzer::new(runner)
            .analyze(&iris())
            .await
            .expect("profile");
        assert_eq!(profile.shape, [5, 3]);
        assert_eq!(profile.statistics.len(), 1);
    }

    #[tokio::test]
    async fn test_script_analyzer_without_result() {
        let (_dir, runner) = shell_script(ANALYSIS_SCRIPT, "echo 'nothing useful'\n");
        let err = ScriptAnalyzer::new(runner).analyze(&iris()).await.unwrap_err();
        assert!(matches!(err, BackendError::NoResult { .. }));
    }

    #[tokio::test]
    async fn test_script_analyzer_reported_error() {
        let (_dir, runner) = shell_script(
            ANALYSIS_SCRIPT,
            r#"echo '{"error":"dataset iris not reachable"}'"#,
        );
        let err = ScriptAnalyzer::new(runner).analyze(&iris()).await.unwrap_err();
        assert!(err.to_string().contains("not reachable"));
    }
}
