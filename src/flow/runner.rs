//! Executes prompt flows against a completion service.

use std::sync::Arc;
use std::time::Instant;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Flow, Validate};
use crate::error::FlowError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::metrics::MetricsCollector;
use crate::utils::json_extraction::{extract_json_object, JsonExtraction};

/// Default sampling temperature for structured output.
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Default completion budget per flow call.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Characters of an unusable reply kept in error messages.
const PREVIEW_CHARS: usize = 200;

/// Request parameters shared by every flow call.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOptions {
    /// Model identifier; empty uses the provider's default model.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl FlowOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Runs [`Flow`]s: renders, calls the provider, parses and validates.
#[derive(Clone)]
pub struct FlowRunner {
    llm_client: Arc<dyn LlmProvider>,
    options: FlowOptions,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for FlowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRunner")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FlowRunner {
    pub fn new(llm_client: Arc<dyn LlmProvider>, options: FlowOptions) -> Self {
        Self {
            llm_client,
            options,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, FlowOptions::default())
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    /// Runs `flow` on `input` and returns its validated output.
    pub async fn run<I, O>(&self, flow: &Flow<I, O>, input: &I) -> Result<O, FlowError>
    where
        I: Serialize,
        O: DeserializeOwned + JsonSchema + Validate,
    {
        let started = Instant::now();
        let result = self.execute(flow, input).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => outcome_label(e),
        };
        self.metrics
            .record_flow_request(flow.name(), outcome, started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => tracing::debug!(
                flow = flow.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Flow completed"
            ),
            Err(e) => tracing::warn!(flow = flow.name(), outcome, error = %e, "Flow failed"),
        }
        result
    }

    async fn execute<I, O>(&self, flow: &Flow<I, O>, input: &I) -> Result<O, FlowError>
    where
        I: Serialize,
        O: DeserializeOwned + JsonSchema + Validate,
    {
        let name = flow.name();
        let input_value = serde_json::to_value(input).map_err(|source| FlowError::Input {
            flow: name.to_string(),
            source,
        })?;
        let user_prompt = flow
            .template()
            .render(&input_value)
            .map_err(|e| FlowError::Template {
                flow: name.to_string(),
                message: e.to_string(),
            })?;
        let system_prompt = system_prompt_for(flow)?;

        let request = GenerationRequest::new(
            self.options.model.clone(),
            vec![Message::system(system_prompt), Message::user(user_prompt)],
        )
        .with_temperature(self.options.temperature)
        .with_max_tokens(self.options.max_tokens)
        .with_json_output();

        let response = self
            .llm_client
            .generate(request)
            .await
            .map_err(|source| FlowError::Completion {
                flow: name.to_string(),
                source,
            })?;

        let content = response
            .first_content()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| FlowError::EmptyCompletion {
                flow: name.to_string(),
            })?;

        let json = match extract_json_object(content) {
            JsonExtraction::Found(json) => json,
            JsonExtraction::Truncated {
                unclosed_braces, ..
            } => {
                return Err(FlowError::SchemaMismatch {
                    flow: name.to_string(),
                    message: format!(
                        "reply JSON is truncated ({} unclosed braces); raise max_tokens",
                        unclosed_braces
                    ),
                })
            }
            JsonExtraction::NotFound => {
                return Err(FlowError::NoJson {
                    flow: name.to_string(),
                    preview: content.chars().take(PREVIEW_CHARS).collect(),
                })
            }
        };

        let output: O = serde_json::from_str(&json).map_err(|e| FlowError::SchemaMismatch {
            flow: name.to_string(),
            message: e.to_string(),
        })?;

        output.validate().map_err(|message| FlowError::Invalid {
            flow: name.to_string(),
            message,
        })?;

        Ok(output)
    }
}

fn system_prompt_for<I, O>(flow: &Flow<I, O>) -> Result<String, FlowError>
where
    I: Serialize,
    O: DeserializeOwned + JsonSchema + Validate,
{
    let schema = schemars::schema_for!(O);
    let schema_json = serde_json::to_string_pretty(&schema).map_err(|e| FlowError::Template {
        flow: flow.name().to_string(),
        message: format!("output schema could not be rendered: {}", e),
    })?;

    Ok(format!(
        "You are {role} (flow: {name}).\n\n\
         You MUST respond with ONLY a valid JSON object that conforms to this JSON Schema:\n\
         {schema}\n\n\
         CRITICAL: Your entire response must be ONLY the JSON object.",
        role = flow.role(),
        name = flow.name(),
        schema = schema_json,
    ))
}

fn outcome_label(error: &FlowError) -> &'static str {
    match error {
        FlowError::Template { .. } => "template",
        FlowError::Input { .. } => "input",
        FlowError::Completion { .. } => "completion",
        FlowError::EmptyCompletion { .. } => "empty",
        FlowError::NoJson { .. } => "no_json",
        FlowError::SchemaMismatch { .. } => "schema_mismatch",
        FlowError::Invalid { .. } => "invalid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{ClassificationResult, TaskType};
    use crate::error::LlmError;
    use crate::llm::GenerationResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockLlmProvider {
        response: Mutex<Result<String, String>>,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn replying(content: &str) -> Self {
            Self {
                response: Mutex::new(Ok(content.to_string())),
                last_request: Mutex::new(None),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                response: Mutex::new(Err(message.to_string())),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            *self.last_request.lock().expect("lock") = Some(request);
            match &*self.response.lock().expect("lock") {
                Ok(content) => Ok(GenerationResponse::single("mock-model", content.clone())),
                Err(message) => Err(LlmError::RequestFailed(message.clone())),
            }
        }
    }

    #[derive(Serialize)]
    struct PromptInput {
        prompt: String,
    }

    fn classify_flow() -> Flow<PromptInput, ClassificationResult> {
        Flow::new(
            "classify_project",
            "an ML project classifier",
            "Classify this request: {{prompt}}",
        )
    }

    fn input() -> PromptInput {
        PromptInput {
            prompt: "sentiment analysis on product reviews".to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_parses_exact_reply() {
        let mock = Arc::new(MockLlmProvider::replying(
            r#"{"taskType":"NLP","projectName":"Sentiment Analyzer"}"#,
        ));
        let runner = FlowRunner::with_defaults(mock.clone());

        let result = runner.run(&classify_flow(), &input()).await.expect("flow");
        assert_eq!(result.task_type, TaskType::Nlp);
        assert_eq!(result.project_name, "Sentiment Analyzer");

        let request = mock.last_request.lock().expect("lock").clone().expect("request");
        assert!(request.json_output);
        assert_eq!(
            request.user_prompt(),
            Some("Classify this request: sentiment analysis on product reviews")
        );
        let system = request.system_prompt().expect("system prompt");
        assert!(system.contains("flow: classify_project"));
        assert!(system.contains("taskType"));
    }

    #[tokio::test]
    async fn test_run_accepts_fenced_reply() {
        let mock = Arc::new(MockLlmProvider::replying(
            "Here it is:\n```json\n{\"taskType\": \"Tabular\", \"projectName\": \"Churn\"}\n```",
        ));
        let runner = FlowRunner::with_defaults(mock);
        let result = runner.run(&classify_flow(), &input()).await.expect("flow");
        assert_eq!(result.task_type, TaskType::Tabular);
    }

    #[tokio::test]
    async fn test_empty_reply() {
        let runner = FlowRunner::with_defaults(Arc::new(MockLlmProvider::replying("   ")));
        let err = runner.run(&classify_flow(), &input()).await.unwrap_err();
        assert!(matches!(err, FlowError::EmptyCompletion { .. }));
    }

    #[tokio::test]
    async fn test_reply_without_json() {
        let runner = FlowRunner::with_defaults(Arc::new(MockLlmProvider::replying(
            "I am unable to classify that.",
        )));
        let err = runner.run(&classify_flow(), &input()).await.unwrap_err();
        match err {
            FlowError::NoJson { flow, preview } => {
                assert_eq!(flow, "classify_project");
                assert!(preview.starts_with("I am unable"));
            }
            other => panic!("expected NoJson, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_with_wrong_shape() {
        let runner = FlowRunner::with_defaults(Arc::new(MockLlmProvider::replying(
            &json!({"taskType": "Robotics", "projectName": "Arm"}).to_string(),
        )));
        let err = runner.run(&classify_flow(), &input()).await.unwrap_err();
        assert!(matches!(err, FlowError::SchemaMismatch { .. }));
        assert!(err.is_validation_failure());
    }

    #[tokio::test]
    async fn test_reply_failing_validation() {
        let runner = FlowRunner::with_defaults(Arc::new(MockLlmProvider::replying(
            r#"{"taskType":"CV","projectName":"  "}"#,
        )));
        let err = runner.run(&classify_flow(), &input()).await.unwrap_err();
        assert!(matches!(err, FlowError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_a_validation_failure() {
        let runner = FlowRunner::with_defaults(Arc::new(MockLlmProvider::failing("timeout")));
        let err = runner.run(&classify_flow(), &input()).await.unwrap_err();
        assert!(matches!(err, FlowError::Completion { .. }));
        assert!(!err.is_validation_failure());
    }

    #[tokio::test]
    async fn test_template_error_skips_provider() {
        let mock = Arc::new(MockLlmProvider::replying("{}"));
        let runner = FlowRunner::with_defaults(mock.clone());
        let flow: Flow<PromptInput, ClassificationResult> =
            Flow::new("classify_project", "a classifier", "{{prompt}} {{taskHint}}");

        let err = runner.run(&flow, &input()).await.unwrap_err();
        assert!(matches!(err, FlowError::Template { .. }));
        assert!(mock.last_request.lock().expect("lock").is_none());
    }

    #[test]
    fn test_options_builders() {
        let options = FlowOptions::default()
            .with_model("openai/gpt-4o-mini")
            .with_temperature(0.0)
            .with_max_tokens(512);
        assert_eq!(options.model, "openai/gpt-4o-mini");
        assert_eq!(options.max_tokens, 512);
    }
}
