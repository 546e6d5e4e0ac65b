use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_MEMORY_LIMIT_MB, DEFAULT_TIMEOUT_SECONDS};
use crate::domain::{
    ExecutionOutcome, ExecutionProfile, MultiTestOutcome, SandboxRequest, SandboxResult,
    SandboxStatus, SingleTestOutcome, TestCase, TestCaseResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Compile,
    SingleTest,
    MultipleTests,
}

/// The request envelope consumed from the queue boundary. The `id` is
/// the opaque correlation token echoed back on the response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    pub kind: RequestKind,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: i64,
    #[serde(default)]
    pub source_code: Vec<String>,
    pub compiler_name: String,
    #[serde(default)]
    pub stdin_data: Vec<String>,
    #[serde(default)]
    pub test_case: Option<TestCase>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub run_all: bool,
    #[serde(default)]
    pub run_all_parallel: bool,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_memory_limit_mb() -> i64 {
    DEFAULT_MEMORY_LIMIT_MB
}

impl RequestEnvelope {
    /// Lowers the envelope into the core request type, binding it to an
    /// already-validated execution profile.
    pub fn to_sandbox_request(&self, profile: Arc<ExecutionProfile>) -> SandboxRequest {
        SandboxRequest {
            id: self.id,
            created_at: chrono::Utc::now(),
            timeout: Duration::from_secs(self.timeout_seconds),
            memory_limit_mb: self.memory_limit_mb,
            source_code: self.source_code.clone(),
            stdin_data: self.stdin_data.clone(),
            profile,
        }
    }
}

/// The response envelope published back through the queue boundary.
/// The test fields are only populated for the test-carrying kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Uuid,
    pub result: SandboxResult,
    pub status: SandboxStatus,
    pub standard_output: Vec<String>,
    pub standard_error_output: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_result: Option<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_case_results: Vec<TestCaseResult>,
}

impl From<ExecutionOutcome> for ResponseEnvelope {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            id: outcome.request_id,
            result: outcome.result,
            status: outcome.status,
            standard_output: outcome.standard_output,
            standard_error_output: outcome.standard_error_output,
            test_case_result: None,
            test_case_results: Vec::new(),
        }
    }
}

impl From<SingleTestOutcome> for ResponseEnvelope {
    fn from(outcome: SingleTestOutcome) -> Self {
        Self {
            id: outcome.request_id,
            result: outcome.result,
            status: outcome.status,
            standard_output: outcome.test_result.standard_output.clone(),
            standard_error_output: outcome.test_result.standard_error_output.clone(),
            test_case_result: Some(outcome.test_result),
            test_case_results: Vec::new(),
        }
    }
}

impl From<MultiTestOutcome> for ResponseEnvelope {
    fn from(outcome: MultiTestOutcome) -> Self {
        Self {
            id: outcome.request_id,
            result: outcome.result,
            status: outcome.status,
            standard_output: Vec::new(),
            standard_error_output: Vec::new(),
            test_case_result: None,
            test_case_results: outcome.test_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_defaults_match_the_queue_contract() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "kind": "Compile",
            "compiler_name": "python",
            "source_code": ["print('hi')"],
        });

        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.timeout_seconds, 2);
        assert_eq!(envelope.memory_limit_mb, 128);
        assert!(envelope.stdin_data.is_empty());
        assert!(envelope.test_case.is_none());
        assert!(!envelope.run_all);
        assert!(!envelope.run_all_parallel);
    }

    #[test]
    fn multi_test_response_serializes_test_results_only() {
        let response = ResponseEnvelope::from(MultiTestOutcome {
            request_id: Uuid::new_v4(),
            result: SandboxResult::Succeeded,
            status: SandboxStatus::Finished,
            test_results: vec![TestCaseResult::not_ran(Uuid::new_v4())],
        });

        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("test_case_result").is_none());
        assert_eq!(value["test_case_results"].as_array().unwrap().len(), 1);
        assert_eq!(value["result"], "Succeeded");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            kind: RequestKind::MultipleTests,
            timeout_seconds: 5,
            memory_limit_mb: 256,
            source_code: vec!["print('hi')".to_string()],
            compiler_name: "python".to_string(),
            stdin_data: Vec::new(),
            test_case: None,
            test_cases: vec![TestCase {
                id: Uuid::new_v4(),
                stdin_data: vec!["bob".to_string()],
                expected_stdout: vec!["Hello: Bob!".to_string()],
            }],
            run_all: true,
            run_all_parallel: false,
        };

        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: RequestEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.id, envelope.id);
        assert_eq!(parsed.kind, RequestKind::MultipleTests);
        assert_eq!(parsed.test_cases.len(), 1);
        assert!(parsed.run_all);
    }
}
