use crate::bookkeeper::AgentBookkeeper;
use crate::worker::{execute_guarded, Worker};
use std::sync::Arc;
use taskmesh_core::{
    AgentInfo, AgentRole, Capability, MeshResult, Task, TaskResult,
};
use taskmesh_llm::{extract_json, CompletionClient, CompletionRequest};
use taskmesh_store::SharedStore;

const DEFAULT_CRITERIA: &[&str] = &["clarity", "accuracy", "completeness"];
const DEFAULT_MIN_LENGTH: u64 = 50;
const DEFAULT_MAX_LENGTH: u64 = 5000;
const PASS_THRESHOLD: f64 = 70.0;

// Fixed penalties for the deterministic path.
const PENALTY_TOO_SHORT: f64 = 25.0;
const PENALTY_TOO_LONG: f64 = 15.0;
const PENALTY_MISSING_KEYWORD: f64 = 10.0;

/// Worker that scores content either through the completion service
/// (criteria-driven) or through local deterministic checks (the
/// `generic` path: length bounds and required-keyword presence with
/// fixed penalties).
pub struct ValidationWorker {
    bookkeeper: AgentBookkeeper,
    llm: Arc<CompletionClient>,
}

impl ValidationWorker {
    /// Creates a validation worker with capacity for three concurrent tasks.
    pub fn new(id: impl Into<String>, store: Arc<dyn SharedStore>, llm: Arc<CompletionClient>) -> Self {
        let info = AgentInfo::new(id, AgentRole::Validation, 3).with_capability(Capability::new(
            "content_validation",
            "Score content against explicit criteria or deterministic checks",
        ));
        Self {
            bookkeeper: AgentBookkeeper::new(store, info),
            llm,
        }
    }

    async fn validate(&self, task: &Task) -> MeshResult<serde_json::Value> {
        let data = &task.input.data;
        if data["mode"].as_str() == Some("generic") {
            return Ok(Self::validate_generic(data));
        }
        self.validate_with_criteria(data).await
    }

    /// Deterministic checks: length bounds and required keywords, scored
    /// by fixed penalties from 100 down.
    fn validate_generic(data: &serde_json::Value) -> serde_json::Value {
        let content = data["content"].as_str().unwrap_or_default();
        let min_length = data["min_length"].as_u64().unwrap_or(DEFAULT_MIN_LENGTH) as usize;
        let max_length = data["max_length"].as_u64().unwrap_or(DEFAULT_MAX_LENGTH) as usize;

        let mut score: f64 = 100.0;
        let mut violations: Vec<String> = Vec::new();

        if content.len() < min_length {
            violations.push(format!(
                "content is {} characters, below the minimum of {min_length}",
                content.len()
            ));
            score -= PENALTY_TOO_SHORT;
        }
        if content.len() > max_length {
            violations.push(format!(
                "content is {} characters, above the maximum of {max_length}",
                content.len()
            ));
            score -= PENALTY_TOO_LONG;
        }

        if let Some(keywords) = data["required_keywords"].as_array() {
            let lowered = content.to_lowercase();
            for keyword in keywords.iter().filter_map(|k| k.as_str()) {
                if !lowered.contains(&keyword.to_lowercase()) {
                    violations.push(format!("missing required keyword '{keyword}'"));
                    score -= PENALTY_MISSING_KEYWORD;
                }
            }
        }

        let score = score.max(0.0);
        serde_json::json!({
            "mode": "generic",
            "score": score,
            "passed": score >= PASS_THRESHOLD,
            "violations": violations,
        })
    }

    /// Asks the completion service to score the content against explicit
    /// or default criteria.
    async fn validate_with_criteria(
        &self,
        data: &serde_json::Value,
    ) -> MeshResult<serde_json::Value> {
        let content = data["content"].as_str().unwrap_or_default();
        let criteria: Vec<String> = data["criteria"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .filter(|list: &Vec<String>| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_CRITERIA.iter().map(|c| (*c).to_string()).collect());

        let prompt = format!(
            "Score the following content from 0 to 100 against these criteria: \
             {}. Reply with ONLY a JSON object: {{\"score\": <number>, \
             \"passed\": <bool>, \"feedback\": <string>}}.\n\nContent:\n{content}",
            criteria.join(", ")
        );

        let request = CompletionRequest::new(prompt).with_temperature(0.1);
        let response = self.llm.complete(&request).await?;
        let mut verdict = extract_json(&response.content)?;

        if let Some(obj) = verdict.as_object_mut() {
            obj.insert("mode".to_string(), serde_json::json!("criteria"));
            obj.insert("criteria".to_string(), serde_json::json!(criteria));
        }
        Ok(verdict)
    }
}

#[async_trait::async_trait]
impl Worker for ValidationWorker {
    fn role(&self) -> AgentRole {
        AgentRole::Validation
    }

    async fn initialize(&self) -> MeshResult<()> {
        self.bookkeeper.register().await?;
        self.bookkeeper.start_heartbeat().await;
        Ok(())
    }

    async fn execute(&self, task: &Task) -> TaskResult {
        execute_guarded(&self.bookkeeper, task, self.validate(task)).await
    }

    async fn info(&self) -> AgentInfo {
        self.bookkeeper.snapshot().await
    }

    async fn heartbeat(&self) -> MeshResult<()> {
        self.bookkeeper.heartbeat().await
    }

    async fn stop_heartbeat(&self) {
        self.bookkeeper.stop_heartbeat().await;
    }
}
