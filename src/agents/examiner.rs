//! Dataset examiner: profiles the selected dataset.
//!
//! When the analyzer cannot produce a profile, the configured
//! [`AnalysisFallback`] decides between substituting the canned profile
//! (logged and reported in the result) and failing the stage.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::error::{AgentError, AgentResult};
use super::types::{DatasetProfile, DatasetSelection};
use crate::backend::DatasetAnalyzer;
use crate::flow::Validate;
use crate::metrics::MetricsCollector;

/// What to do when dataset analysis fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisFallback {
    /// Substitute [`DatasetProfile::fallback`].
    #[default]
    UseFallbackProfile,
    /// Fail the examination stage.
    Fail,
}

impl fmt::Display for AnalysisFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisFallback::UseFallbackProfile => write!(f, "use_fallback_profile"),
            AnalysisFallback::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for AnalysisFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "use_fallback_profile" | "fallback" => Ok(AnalysisFallback::UseFallbackProfile),
            "fail" => Ok(AnalysisFallback::Fail),
            other => Err(format!(
                "unknown analysis fallback '{}': expected 'use_fallback_profile' or 'fail'",
                other
            )),
        }
    }
}

/// Result of examining a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Examination {
    pub profile: DatasetProfile,
    /// Why the canned profile was substituted, when it was.
    pub substitution: Option<String>,
}

/// Profiles datasets through a [`DatasetAnalyzer`].
pub struct DatasetExaminer {
    analyzer: Arc<dyn DatasetAnalyzer>,
    fallback: AnalysisFallback,
    metrics: MetricsCollector,
}

impl fmt::Debug for DatasetExaminer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetExaminer")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl DatasetExaminer {
    pub const AGENT_NAME: &'static str = "examine_dataset";

    pub fn new(analyzer: Arc<dyn DatasetAnalyzer>, fallback: AnalysisFallback) -> Self {
        Self {
            analyzer,
            fallback,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn fallback(&self) -> AnalysisFallback {
        self.fallback
    }

    pub async fn examine(&self, dataset: &DatasetSelection) -> AgentResult<Examination> {
        let reason = match self.analyzer.analyze(dataset).await {
            Ok(profile) => match profile.validate() {
                Ok(()) => {
                    return Ok(Examination {
                        profile,
                        substitution: None,
                    })
                }
                Err(message) => message,
            },
            Err(e) => e.to_string(),
        };

        match self.fallback {
            AnalysisFallback::UseFallbackProfile => {
                tracing::warn!(
                    dataset = %dataset.name,
                    reason = %reason,
                    "Dataset analysis unavailable, substituting fallback profile"
                );
                self.metrics.record_analysis_fallback();
                Ok(Examination {
                    profile: DatasetProfile::fallback(),
                    substitution: Some(reason),
                })
            }
            AnalysisFallback::Fail => Err(AgentError::AnalysisUnavailable {
                dataset: dataset.name.clone(),
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, CannedAnalyzer};
    use async_trait::async_trait;

    struct BrokenAnalyzer;

    #[async_trait]
    impl DatasetAnalyzer for BrokenAnalyzer {
        async fn analyze(&self, _: &DatasetSelection) -> Result<DatasetProfile, BackendError> {
            Err(BackendError::NoResult {
                script: "examine_dataset.py".to_string(),
            })
        }
    }

    fn dataset() -> DatasetSelection {
        DatasetSelection {
            source: "upload".to_string(),
            name: "sales.csv".to_string(),
            url: None,
            suggested_preprocessing: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_successful_analysis_is_not_a_substitution() {
        let examiner = DatasetExaminer::new(Arc::new(CannedAnalyzer), AnalysisFallback::Fail);
        let examination = examiner.examine(&dataset()).await.expect("examination");
        assert!(examination.substitution.is_none());
    }

    #[tokio::test]
    async fn test_fallback_profile_substituted() {
        let examiner = DatasetExaminer::new(
            Arc::new(BrokenAnalyzer),
            AnalysisFallback::UseFallbackProfile,
        );
        let examination = examiner.examine(&dataset()).await.expect("examination");
        assert_eq!(examination.profile, DatasetProfile::fallback());
        assert!(examination
            .substitution
            .expect("substitution reason")
            .contains("without a result"));
    }

    #[tokio::test]
    async fn test_fail_policy() {
        let examiner = DatasetExaminer::new(Arc::new(BrokenAnalyzer), AnalysisFallback::Fail);
        let err = examiner.examine(&dataset()).await.unwrap_err();
        assert!(matches!(err, AgentError::AnalysisUnavailable { .. }));
    }

    #[test]
    fn test_parse_fallback_policy() {
        assert_eq!(
            "use_fallback_profile".parse::<AnalysisFallback>(),
            Ok(AnalysisFallback::UseFallbackProfile)
        );
        assert_eq!("FAIL".parse::<AnalysisFallback>(), Ok(AnalysisFallback::Fail));
        assert!("retry".parse::<AnalysisFallback>().is_err());
        assert_eq!(AnalysisFallback::Fail.to_string(), "fail");
    }
}
