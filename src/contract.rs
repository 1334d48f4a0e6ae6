//! Contract specs: upload with a local shape check, payload validation and
//! live endpoint testing against a target deployment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::args::require_json_object;
use crate::client::{KoorClient, Response};
use crate::error::{KoorError, Result};
use crate::format::null_as_default;
use crate::request::Request;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Violation {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub message: String,
}

impl Violation {
    fn describe(&self) -> String {
        format!("[{}] {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    violations: Vec<Violation>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    endpoint: &'a str,
    direction: &'a str,
    payload: Value,
}

#[derive(Serialize)]
struct TestRequest<'a> {
    endpoint: &'a str,
    base_url: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EndpointResult {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub request_violations: Vec<Violation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub response_violations: Vec<Violation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ContractDoc {
    #[serde(default, deserialize_with = "null_as_default")]
    endpoints: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub passed: bool,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestReport {
    pub results: Vec<(String, EndpointResult)>,
}

impl TestReport {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.valid).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }

    pub fn passed(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn summary(&self) -> String {
        let total = self.results.len();
        let passed = self.passed_count();
        let failed = self.failed_count();
        if failed == 0 {
            format!("{passed}/{total} endpoints PASS")
        } else {
            format!("{passed}/{total} endpoints PASS, {failed} FAIL")
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (endpoint, result) in &self.results {
            let verdict = if result.valid { "PASS" } else { "FAIL" };
            lines.push(format!(
                "{verdict}  {endpoint} (status: {})",
                result.status_code
            ));
            if let Some(error) = result.error.as_deref().filter(|e| !e.is_empty()) {
                lines.push(format!("  - error: {error}"));
            }
            for v in &result.request_violations {
                lines.push(format!("  - [req] {}", v.describe()));
            }
            for v in &result.response_violations {
                lines.push(format!("  - [resp] {}", v.describe()));
            }
        }
        lines.push(String::new());
        lines.push(self.summary());
        lines
    }
}

fn spec_path(project: &str, name: &str) -> String {
    format!("/api/specs/{project}/{name}")
}

fn contract_path(project: &str, name: &str, action: &str) -> String {
    format!("/api/contracts/{project}/{name}/{action}")
}

/// A contract body must be a JSON object tagged `"kind": "contract"`.
pub fn check_contract_body(body: &[u8]) -> Result<()> {
    let obj = require_json_object(body, "contract")?;
    match obj.get("kind").and_then(Value::as_str) {
        Some("contract") => Ok(()),
        Some(other) => Err(KoorError::usage(format!(
            "contract must have \"kind\": \"contract\" (got {other:?})"
        ))),
        None => Err(KoorError::usage(
            "contract must have \"kind\": \"contract\"",
        )),
    }
}

pub fn set_request(project: &str, name: &str, body: Vec<u8>) -> Result<Request> {
    check_contract_body(&body)?;
    Ok(Request::put(spec_path(project, name)).body(body))
}

pub fn get_request(project: &str, name: &str) -> Request {
    Request::get(spec_path(project, name))
}

/// Builds the validate call. A missing payload is sent as `{}`.
pub fn validate_request(
    project: &str,
    name: &str,
    endpoint: &str,
    direction: &str,
    payload: Option<&[u8]>,
) -> Result<Request> {
    let payload = match payload {
        Some(bytes) => Value::Object(require_json_object(bytes, "payload")?),
        None => Value::Object(Map::new()),
    };
    let body = serde_json::to_vec(&ValidateRequest {
        endpoint,
        direction,
        payload,
    })?;
    Ok(Request::post(contract_path(project, name, "validate")).body(body))
}

pub fn validation_report(endpoint: &str, direction: &str, resp: &Response) -> Result<ValidationReport> {
    let parsed: ValidateResponse = serde_json::from_slice(&resp.body)?;
    if parsed.valid {
        return Ok(ValidationReport {
            passed: true,
            lines: vec![format!("PASS  {direction} {endpoint}")],
        });
    }
    let mut lines = vec![format!("FAIL  {direction} {endpoint}")];
    if let Some(error) = parsed.error.as_deref().filter(|e| !e.is_empty()) {
        lines.push(format!("  - error: {error}"));
    }
    lines.extend(parsed.violations.iter().map(|v| format!("  - {}", v.describe())));
    Ok(ValidationReport {
        passed: false,
        lines,
    })
}

pub fn validate(
    client: &KoorClient,
    project: &str,
    name: &str,
    endpoint: &str,
    direction: &str,
    payload: Option<&[u8]>,
) -> Result<ValidationReport> {
    let req = validate_request(project, name, endpoint, direction, payload)?;
    let resp = client.send(&req)?;
    validation_report(endpoint, direction, &resp)
}

/// Fetches the contract, then asks the server to exercise each declared
/// endpoint against `target`. Endpoints run in the order the server lists them.
pub fn run_tests(client: &KoorClient, project: &str, name: &str, target: &str) -> Result<TestReport> {
    let resp = client.send(&get_request(project, name))?;
    if !resp.is_success() {
        return Err(KoorError::ValidationFailed(format!(
            "could not load contract {project}/{name}: server returned {}",
            resp.status
        )));
    }
    let doc: ContractDoc = serde_json::from_slice(&resp.body)?;
    if doc.endpoints.is_empty() {
        return Err(KoorError::usage(format!(
            "contract {project}/{name} declares no endpoints"
        )));
    }

    let mut report = TestReport::default();
    for endpoint in doc.endpoints.keys() {
        let body = serde_json::to_vec(&TestRequest {
            endpoint,
            base_url: target,
        })?;
        let req = Request::post(contract_path(project, name, "test")).body(body);
        let resp = client.send(&req)?;
        let result: EndpointResult = serde_json::from_slice(&resp.body)?;
        tracing::debug!(%endpoint, valid = result.valid, "endpoint tested");
        report.results.push((endpoint.clone(), result));
    }
    Ok(report)
}
