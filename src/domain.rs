use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The language-specific recipe used to run code for a given language:
/// which image to boot, what entry command the driver script invokes and
/// which files inside the workspace the output is captured into.
#[derive(Clone, Debug)]
pub struct ExecutionProfile {
    pub language: String,
    pub entry_command: String,
    /// Interpreted languages skip the separate compile step, so the
    /// driver script is not given an output binary name.
    pub interpreted: bool,
    pub additional_arguments: String,
    pub image: String,
    pub stdout_file: String,
    pub stderr_file: String,
}

/// One sandboxed execution request, already validated against the
/// compiler registry.
#[derive(Clone, Debug)]
pub struct SandboxRequest {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub timeout: Duration,
    pub memory_limit_mb: i64,
    pub source_code: Vec<String>,
    pub stdin_data: Vec<String>,
    pub profile: Arc<ExecutionProfile>,
}

/// A pair of input lines and expected output lines used to validate a
/// sandbox's captured output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub id: Uuid,
    #[serde(default)]
    pub stdin_data: Vec<String>,
    #[serde(default)]
    pub expected_stdout: Vec<String>,
}

/// Outcome of comparing captured output against one test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestVerdict {
    Passed,
    Failed,
    NotRan,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub id: Uuid,
    pub verdict: TestVerdict,
    pub standard_output: Vec<String>,
    pub standard_error_output: Vec<String>,
}

impl TestCaseResult {
    /// The placeholder recorded for a test that was never scheduled,
    /// either because a sequential run stopped early or because its
    /// sandbox failed to start.
    pub fn not_ran(id: Uuid) -> Self {
        Self {
            id,
            verdict: TestVerdict::NotRan,
            standard_output: Vec::new(),
            standard_error_output: Vec::new(),
        }
    }
}

/// Overall result of one sandbox execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxResult {
    Unknown,
    Succeeded,
    Failed,
}

/// The externally visible status of one sandbox execution, carried on
/// every response envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxStatus {
    Unknown,
    Pending,
    Running,
    Finished,
    MemoryConstraintExceeded,
    TimeLimitExceeded,
    TestFailed,
}

/// The raw capture produced by a completed sandbox, before any test
/// evaluation is applied on top of it.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub request_id: Uuid,
    pub result: SandboxResult,
    pub status: SandboxStatus,
    pub standard_output: Vec<String>,
    pub standard_error_output: Vec<String>,
}

/// A single-test execution: the raw capture plus the evaluated test
/// case result.
#[derive(Clone, Debug)]
pub struct SingleTestOutcome {
    pub request_id: Uuid,
    pub result: SandboxResult,
    pub status: SandboxStatus,
    pub test_result: TestCaseResult,
}

/// The aggregate of a multi-test run. `test_results` always contains
/// exactly one entry per requested test case.
#[derive(Clone, Debug)]
pub struct MultiTestOutcome {
    pub request_id: Uuid,
    pub result: SandboxResult,
    pub status: SandboxStatus,
    pub test_results: Vec<TestCaseResult>,
}
