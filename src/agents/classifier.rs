//! Classifier agent: turns a free-text goal into a task type and project name.

use serde::Serialize;

use super::error::AgentResult;
use super::types::ClassificationResult;
use crate::flow::{Flow, FlowRunner};

/// Expert persona for classification.
const CLASSIFIER_ROLE: &str = "an expert machine learning project classifier";

/// User prompt template for classification.
const CLASSIFY_USER_TEMPLATE: &str = r#"Classify the following project goal into exactly one task type:
- NLP: text classification, sentiment analysis, chatbots, translation
- CV: image classification, object detection, segmentation
- Audio: speech recognition, audio classification, sound generation
- Tabular: regression or classification on structured data

Also suggest a short, descriptive project name (3-5 words).

Project goal: "{{prompt}}""#;

#[derive(Debug, Serialize)]
struct ClassifyInput {
    prompt: String,
}

/// Classifies build goals.
#[derive(Debug)]
pub struct ClassifierAgent {
    runner: FlowRunner,
    flow: Flow<ClassifyInput, ClassificationResult>,
}

impl ClassifierAgent {
    /// Agent name used for identification.
    pub const AGENT_NAME: &'static str = "classify_project";

    pub fn new(runner: FlowRunner) -> Self {
        Self {
            runner,
            flow: Flow::new(Self::AGENT_NAME, CLASSIFIER_ROLE, CLASSIFY_USER_TEMPLATE),
        }
    }

    /// Classifies `prompt` into a task type and suggests a project name.
    pub async fn classify(&self, prompt: &str) -> AgentResult<ClassificationResult> {
        let input = ClassifyInput {
            prompt: prompt.to_string(),
        };
        let classification = self.runner.run(&self.flow, &input).await?;
        tracing::info!(
            task_type = %classification.task_type,
            project_name = %classification.project_name,
            "Classified build goal"
        );
        Ok(classification)
    }
}
