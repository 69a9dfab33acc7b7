//! Typed client for the supervisor's localhost control API.
//!
//! Every call carries the bearer token and a 2 second timeout; the
//! readiness wait loop is bounded separately by the manifest's declared
//! readiness budget, never by the per-call timeout.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::error::StageError;

/// Per-call HTTP timeout.
const CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Hard cap on log tail lines.
pub const MAX_LOG_TAIL_LINES: u32 = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeStatusReport {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationIssue>,
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
    #[serde(default)]
    pub missing_assets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretStatus {
    pub id: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub has_value: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsReport {
    #[serde(default)]
    pub secrets: Vec<SecretStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceReadiness {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessSnapshot {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceReadiness>,
    /// Stamped by the preflight service after the wait loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_at: Option<String>,
}

pub type PortsMap = BTreeMap<String, BTreeMap<String, u16>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryReport {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

/// Client bound to one supervisor instance.
pub struct ControlClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl ControlClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(CALL_TIMEOUT).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /healthz — liveness only, any 2xx counts.
    pub fn healthz(&self) -> Result<()> {
        self.agent
            .get(&format!("{}/healthz", self.base_url))
            .set("Authorization", &self.bearer())
            .call()
            .map_err(|err| self.map_error("/healthz", err))?;
        Ok(())
    }

    /// GET /status — runtime status including the instance id.
    pub fn status(&self) -> Result<RuntimeStatusReport> {
        self.get_json("/status")
    }

    /// GET /validate — bundle validation report.
    ///
    /// A 422 is a success-shaped response carrying the report, not an
    /// error; it is folded into the normal return path.
    pub fn validate(&self) -> Result<ValidationReport> {
        let url = format!("{}/validate", self.base_url);
        let response = match self
            .agent
            .get(&url)
            .set("Authorization", &self.bearer())
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(422, response)) => response,
            Err(err) => return Err(self.map_error("/validate", err)),
        };

        let mut report: ValidationReport = response
            .into_json()
            .context("decoding /validate response")?;
        // Older runtimes omit the valid flag; derive it from the issues.
        if !report.valid && report.errors.is_empty() && report.missing_assets.is_empty() {
            report.valid = true;
        }
        Ok(report)
    }

    /// GET /secrets — declared secrets with `has_value` flags.
    pub fn secrets(&self) -> Result<SecretsReport> {
        self.get_json("/secrets")
    }

    /// POST /secrets — push non-empty values.
    ///
    /// Empty values are filtered client-side; when nothing is left the
    /// call is a no-op and returns `false`.
    pub fn apply_secrets(&self, values: &BTreeMap<String, String>) -> Result<bool> {
        let filtered: BTreeMap<&String, &String> =
            values.iter().filter(|(_, v)| !v.is_empty()).collect();
        if filtered.is_empty() {
            return Ok(false);
        }

        self.agent
            .post(&format!("{}/secrets", self.base_url))
            .set("Authorization", &self.bearer())
            .send_json(serde_json::json!({ "secrets": filtered }))
            .map_err(|err| self.map_error("/secrets", err))?;
        Ok(true)
    }

    /// GET /readyz — one readiness probe.
    pub fn readyz(&self) -> Result<ReadinessSnapshot> {
        self.get_json("/readyz")
    }

    /// Poll `/readyz` every second until ready or the budget elapses.
    ///
    /// A zero budget skips the poll loop and returns the single probe
    /// unchanged. Returns the last snapshot plus the time actually spent
    /// waiting.
    pub fn wait_ready(&self, budget: Duration) -> Result<(ReadinessSnapshot, f64)> {
        let start = Instant::now();
        let mut snapshot = self.readyz()?;
        if budget.is_zero() {
            return Ok((snapshot, 0.0));
        }

        let deadline = start + budget;
        while !snapshot.ready && Instant::now() < deadline {
            std::thread::sleep(READY_POLL_INTERVAL);
            snapshot = self.readyz()?;
        }
        Ok((snapshot, start.elapsed().as_secs_f64()))
    }

    /// GET /ports — `service id → {port name → port}`.
    pub fn ports(&self) -> Result<PortsMap> {
        self.get_json("/ports")
    }

    /// GET /telemetry — telemetry file pointer and summary.
    pub fn telemetry(&self) -> Result<TelemetryReport> {
        self.get_json("/telemetry")
    }

    /// GET /logs/tail — plaintext tail for one service, capped at
    /// [`MAX_LOG_TAIL_LINES`].
    pub fn log_tail(&self, service_id: &str, lines: u32) -> Result<String> {
        let lines = lines.min(MAX_LOG_TAIL_LINES);
        let response = self
            .agent
            .get(&format!("{}/logs/tail", self.base_url))
            .query("serviceId", service_id)
            .query("lines", &lines.to_string())
            .set("Authorization", &self.bearer())
            .call()
            .map_err(|err| self.map_error("/logs/tail", err))?;
        response
            .into_string()
            .context("reading /logs/tail response")
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .agent
            .get(&format!("{}{}", self.base_url, path))
            .set("Authorization", &self.bearer())
            .call()
            .map_err(|err| self.map_error(path, err))?;
        response
            .into_json()
            .with_context(|| format!("decoding {path} response"))
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn map_error(&self, endpoint: &str, err: ureq::Error) -> anyhow::Error {
        match err {
            ureq::Error::Status(status, _) => StageError::RuntimeCall {
                endpoint: endpoint.to_string(),
                status,
            }
            .into(),
            transport => {
                anyhow::Error::new(transport).context(format!("calling {endpoint}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tiny_http::{Response, Server};

    /// Serve `count` requests with the given handler, then exit.
    fn serve_requests<F>(count: usize, handler: F) -> (String, std::thread::JoinHandle<()>)
    where
        F: Fn(&tiny_http::Request) -> Response<std::io::Cursor<Vec<u8>>> + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let handle = std::thread::spawn(move || {
            for _ in 0..count {
                let Ok(request) = server.recv() else { break };
                let response = handler(&request);
                let _ = request.respond(response);
            }
        });
        (format!("http://127.0.0.1:{port}"), handle)
    }

    fn json_response(status: u16, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
        Response::from_string(body).with_status_code(status)
    }

    #[test]
    fn status_carries_bearer_token() {
        let (url, handle) = serve_requests(1, |request| {
            let auth = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            assert_eq!(auth.as_deref(), Some("Bearer sekrit"));
            json_response(200, r#"{"instance_id":"abc","status":"running"}"#)
        });

        let client = ControlClient::new(&url, "sekrit");
        let status = client.status().unwrap();
        assert_eq!(status.instance_id, "abc");
        handle.join().unwrap();
    }

    #[test]
    fn validate_treats_422_as_report() {
        let (url, handle) = serve_requests(1, |_| {
            json_response(
                422,
                r#"{"valid":false,"errors":[{"service":"api","path":"assets/ui","message":"missing"}],"warnings":[],"missing_assets":["assets/ui"]}"#,
            )
        });

        let client = ControlClient::new(&url, "t");
        let report = client.validate().unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.missing_assets, vec!["assets/ui"]);
        handle.join().unwrap();
    }

    #[test]
    fn validate_derives_valid_flag_when_omitted() {
        let (url, handle) =
            serve_requests(1, |_| json_response(200, r#"{"errors":[],"warnings":[]}"#));
        let client = ControlClient::new(&url, "t");
        assert!(client.validate().unwrap().valid);
        handle.join().unwrap();
    }

    #[test]
    fn non_2xx_maps_to_runtime_call_error() {
        let (url, handle) = serve_requests(1, |_| json_response(500, "{}"));
        let client = ControlClient::new(&url, "t");
        let err = client.ports().unwrap_err();
        assert!(format!("{err:#}").contains("/ports"));
        handle.join().unwrap();
    }

    #[test]
    fn apply_secrets_filters_empty_values() {
        // All-empty: no HTTP call is made at all.
        let client = ControlClient::new("http://127.0.0.1:9", "t");
        let mut values = BTreeMap::new();
        values.insert("API_KEY".to_string(), String::new());
        assert!(!client.apply_secrets(&values).unwrap());

        // One non-empty value goes over the wire.
        let (url, handle) = serve_requests(1, |request| {
            assert_eq!(request.method(), &tiny_http::Method::Post);
            json_response(200, "{}")
        });
        let client = ControlClient::new(&url, "t");
        values.insert("DB_URL".to_string(), "postgres://".to_string());
        assert!(client.apply_secrets(&values).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn wait_ready_polls_until_ready() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        let (url, handle) = serve_requests(2, move |_| {
            let n = calls_in_handler.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                json_response(200, r#"{"ready":false,"services":{}}"#)
            } else {
                json_response(200, r#"{"ready":true,"services":{}}"#)
            }
        });

        let client = ControlClient::new(&url, "t");
        let (snapshot, waited) = client.wait_ready(Duration::from_secs(5)).unwrap();
        assert!(snapshot.ready);
        assert!(waited >= 1.0, "poll interval not honored: {waited}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        handle.join().unwrap();
    }

    #[test]
    fn zero_budget_skips_the_poller() {
        let (url, handle) =
            serve_requests(1, |_| json_response(200, r#"{"ready":false,"services":{}}"#));
        let client = ControlClient::new(&url, "t");
        let (snapshot, waited) = client.wait_ready(Duration::ZERO).unwrap();
        assert!(!snapshot.ready);
        assert_eq!(waited, 0.0);
        handle.join().unwrap();
    }

    #[test]
    fn log_tail_caps_lines() {
        let (url, handle) = serve_requests(1, |request| {
            assert!(request.url().contains("lines=200"));
            Response::from_string("line1\nline2\n")
        });
        let client = ControlClient::new(&url, "t");
        let tail = client.log_tail("api", 5000).unwrap();
        assert!(tail.contains("line1"));
        handle.join().unwrap();
    }
}
