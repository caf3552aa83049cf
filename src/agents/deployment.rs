//! Deployment agent: plans how the trained model is served.

use serde::Serialize;

use super::error::AgentResult;
use super::types::{DeploymentPlan, EvaluationResult, TaskType};
use crate::flow::{Flow, FlowRunner};

const DEPLOYMENT_ROLE: &str = "a Deployment Agent that plans model serving";

const DEPLOYMENT_USER_TEMPLATE: &str = r#"Plan the deployment of this trained model.

Project: {{projectName}}
Task type: {{taskType}}
Model path: {{modelPath}}
Evaluation metrics: {{metrics}}

Choose a deploymentType of "api", "serverless" or "edge", give the endpoint
URL, usage instructions and a short SDK code sample that calls the endpoint."#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentInput {
    project_name: String,
    task_type: TaskType,
    model_path: String,
    metrics: EvaluationResult,
}

/// Plans deployment of a trained model.
#[derive(Debug)]
pub struct DeploymentAgent {
    runner: FlowRunner,
    flow: Flow<DeploymentInput, DeploymentPlan>,
}

impl DeploymentAgent {
    pub const AGENT_NAME: &'static str = "deployment_agent";

    pub fn new(runner: FlowRunner) -> Self {
        Self {
            runner,
            flow: Flow::new(Self::AGENT_NAME, DEPLOYMENT_ROLE, DEPLOYMENT_USER_TEMPLATE),
        }
    }

    pub async fn plan(
        &self,
        project_name: &str,
        task_type: TaskType,
        model_path: &str,
        metrics: &EvaluationResult,
    ) -> AgentResult<DeploymentPlan> {
        let input = DeploymentInput {
            project_name: project_name.to_string(),
            task_type,
            model_path: model_path.to_string(),
            metrics: metrics.clone(),
        };
        let plan = self.runner.run(&self.flow, &input).await?;
        tracing::info!(
            deployment_type = %plan.deployment_type,
            endpoint = %plan.endpoint_url,
            "Planned deployment"
        );
        Ok(plan)
    }
}
