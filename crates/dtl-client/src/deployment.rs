//! ARM template deployments
//!
//! A deployment is submitted with a PUT and then polled with GETs on the same
//! resource until its `provisioningState` is terminal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::http::{HttpRequest, Transport, resource_request};
use crate::poll::{self, PollPolicy, PollStatus, poll_until};

pub const ARM_BASE_URL: &str = "https://management.azure.com";
pub const DEPLOYMENTS_API_VERSION: &str = "2015-11-01";

/// Terminal provisioning state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Succeeded,
    Failed,
    Conflict,
}

impl DeploymentState {
    /// Map a `provisioningState` value. Non-terminal states map to `None`.
    pub fn from_provisioning_state(state: &str) -> Option<Self> {
        match state {
            "Succeeded" => Some(Self::Succeeded),
            "Failed" => Some(Self::Failed),
            "Conflict" => Some(Self::Conflict),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Conflict => "Conflict",
        };
        f.write_str(s)
    }
}

/// A template deployment into one resource group.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub name: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub template: Value,
    pub parameters: Value,
}

impl DeploymentRequest {
    /// Build a request named after the resource group and the current time.
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        template: Value,
        parameters: Value,
    ) -> Self {
        let resource_group = resource_group.into();
        Self {
            name: deployment_name(&resource_group, Utc::now()),
            subscription_id: subscription_id.into(),
            resource_group,
            template,
            parameters,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn body(&self) -> DeploymentBody<'_> {
        DeploymentBody {
            properties: DeploymentProperties {
                mode: "Incremental",
                template: &self.template,
                parameters: &self.parameters,
            },
        }
    }
}

/// `<resource group>_<MMDDYYYY>_<HHMMSS><microseconds>` in UTC.
pub fn deployment_name(resource_group: &str, now: DateTime<Utc>) -> String {
    format!("{resource_group}_{}", now.format("%m%d%Y_%H%M%S%6f"))
}

#[derive(Debug, Serialize)]
struct DeploymentBody<'a> {
    properties: DeploymentProperties<'a>,
}

#[derive(Debug, Serialize)]
struct DeploymentProperties<'a> {
    mode: &'static str,
    template: &'a Value,
    parameters: &'a Value,
}

/// Outcome of a deployment that reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentResult {
    pub name: String,
    pub state: DeploymentState,
    /// Template outputs, keyed by output name. Empty unless the deployment succeeded.
    pub outputs: Map<String, Value>,
    /// The first failed operation's status message.
    pub failure_message: Option<String>,
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        self.state == DeploymentState::Succeeded
    }

    /// The `value` of a named template output.
    pub fn output_value(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name).and_then(|o| o.get("value"))
    }
}

/// Submits deployments and waits for them to finish.
pub struct DeploymentClient {
    transport: Arc<dyn Transport>,
    access_token: String,
    base_url: String,
    policy: PollPolicy,
}

impl DeploymentClient {
    pub fn new(transport: Arc<dyn Transport>, access_token: impl Into<String>) -> Self {
        Self {
            transport,
            access_token: access_token.into(),
            base_url: ARM_BASE_URL.to_string(),
            policy: PollPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Submit `request` and poll it until it succeeds, fails or conflicts.
    ///
    /// A rejected submission is [`ClientError::DeploymentSubmission`]. A
    /// deployment that ends `Failed` or `Conflict` is still `Ok`; check
    /// [`DeploymentResult::is_success`].
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<DeploymentResult, ClientError> {
        let url = self.deployment_url(request, "");
        debug!(deployment = %request.name, resource_group = %request.resource_group, "creating deployment");

        let body = serde_json::to_value(request.body())
            .map_err(|e| ClientError::submission(format!("could not encode deployment: {e}")))?;
        let put = self.arm_request(HttpRequest::put(&url).json(&body));
        let resp = self
            .transport
            .execute(put)
            .await
            .map_err(|e| ClientError::submission(e.to_string()))?;

        if !resp.is_success() {
            return Err(ClientError::submission(format!(
                "HTTP {}: {}",
                resp.status, resp.body
            )));
        }
        if resp.json().is_none() {
            return Err(ClientError::submission(
                "the service returned an empty or unparsable response",
            ));
        }

        debug!(deployment = %request.name, "deployment created, waiting for completion");
        let (state, status_body) = poll_until(&self.policy, cancel, || {
            let get = self.arm_request(HttpRequest::get(&url));
            async move {
                let Some(body) = poll::status_body(self.transport.execute(get).await)? else {
                    return Ok(PollStatus::Pending);
                };

                let provisioning_state = body
                    .pointer("/properties/provisioningState")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                debug!(provisioning_state, "deployment status");

                Ok(match DeploymentState::from_provisioning_state(provisioning_state) {
                    Some(state) => PollStatus::Done((state, body)),
                    None => PollStatus::Pending,
                })
            }
        })
        .await?;

        let mut result = DeploymentResult {
            name: request.name.clone(),
            state,
            outputs: Map::new(),
            failure_message: None,
        };

        match state {
            DeploymentState::Succeeded => {
                if let Some(Value::Object(outputs)) = status_body.pointer("/properties/outputs") {
                    result.outputs = outputs.clone();
                }
            }
            DeploymentState::Failed | DeploymentState::Conflict => {
                result.failure_message = self.failure_message(request).await;
            }
        }

        Ok(result)
    }

    /// The status message of the deployment's first operation.
    async fn failure_message(&self, request: &DeploymentRequest) -> Option<String> {
        let url = self.deployment_url(request, "/operations");
        let resp = match self
            .transport
            .execute(self.arm_request(HttpRequest::get(url)))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, "could not fetch deployment operations");
                return None;
            }
        };

        let message = resp.json()?.pointer("/value/0/properties/statusMessage")?.clone();
        Some(match message {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        })
    }

    fn deployment_url(&self, request: &DeploymentRequest, suffix: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/microsoft.resources/deployments/{}{suffix}?api-version={DEPLOYMENTS_API_VERSION}",
            self.base_url, request.subscription_id, request.resource_group, request.name
        )
    }

    fn arm_request(&self, request: HttpRequest) -> HttpRequest {
        resource_request(request, &self.access_token, DEPLOYMENTS_API_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::http::HttpResponse;
    use crate::http::testing::ScriptedTransport;

    const SUB: &str = "0b7ac1f4-3d2e-4a90-9f1c-12ab34cd56ef";

    fn request() -> DeploymentRequest {
        DeploymentRequest::new(
            SUB,
            "myRG",
            json!({"resources": []}),
            json!({"newVMName": {"value": "vm1"}}),
        )
        .with_name("myRG_05012024_120000000000")
    }

    fn status(state: &str) -> Value {
        json!({"properties": {"provisioningState": state}})
    }

    fn client(transport: &Arc<ScriptedTransport>) -> DeploymentClient {
        DeploymentClient::new(transport.clone(), "tok")
    }

    #[test]
    fn test_deployment_name_format() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T09:08:07.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(deployment_name("myRG", now), "myRG_05012024_090807123456");
    }

    #[test]
    fn test_output_value() {
        let mut outputs = Map::new();
        outputs.insert("vmId".into(), json!({"type": "string", "value": "/x/vm1"}));
        let result = DeploymentResult {
            name: "d".into(),
            state: DeploymentState::Succeeded,
            outputs,
            failure_message: None,
        };
        assert_eq!(result.output_value("vmId"), Some(&json!("/x/vm1")));
        assert!(result.output_value("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_succeeded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        transport.push_json(200, status("Accepted"));
        transport.push_json(200, status("Running"));
        transport.push_json(200, status("Running"));
        transport.push_json(
            200,
            json!({"properties": {
                "provisioningState": "Succeeded",
                "outputs": {"vmId": {"type": "string", "value": "/subscriptions/s/vm1"}}
            }}),
        );
        let start = Instant::now();

        let result = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(
            result.output_value("vmId"),
            Some(&json!("/subscriptions/s/vm1"))
        );
        // One PUT, four GETs, three sleeps in between.
        assert_eq!(transport.requests().len(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_shape() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        transport.push_json(200, status("Succeeded"));

        client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap();

        let put = &transport.requests()[0];
        assert_eq!(put.method, reqwest::Method::PUT);
        assert_eq!(
            put.url,
            format!("https://management.azure.com/subscriptions/{SUB}/resourceGroups/myRG/providers/microsoft.resources/deployments/myRG_05012024_120000000000?api-version=2015-11-01")
        );
        assert_eq!(put.header_value("x-ms-version"), Some(DEPLOYMENTS_API_VERSION));
        let body: Value = serde_json::from_str(put.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["properties"]["mode"], "Incremental");
        assert_eq!(body["properties"]["template"], json!({"resources": []}));
        assert_eq!(body["properties"]["parameters"]["newVMName"]["value"], "vm1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deployment_reads_first_operation() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        transport.push_json(200, status("Failed"));
        transport.push_json(
            200,
            json!({"value": [
                {"properties": {"statusMessage": "Quota exceeded"}},
                {"properties": {"statusMessage": "ignored"}}
            ]}),
        );

        let result = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.state, DeploymentState::Failed);
        assert_eq!(result.failure_message.as_deref(), Some("Quota exceeded"));
        assert!(result.outputs.is_empty());

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].url.contains("/deployments/myRG_05012024_120000000000/operations?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_with_structured_status_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        transport.push_json(200, status("Conflict"));
        transport.push_json(
            200,
            json!({"value": [{"properties": {"statusMessage": {"error": {"code": "Conflict"}}}}]}),
        );

        let result = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.state, DeploymentState::Conflict);
        assert!(result.failure_message.unwrap().contains("\"code\": \"Conflict\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_errors_keep_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        transport.push_failure("timed out");
        transport.push(HttpResponse::new(502, "Bad Gateway"));
        transport.push_json(200, status("Succeeded"));

        let result = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_client_error_ends_wait() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        for _ in 0..10 {
            transport.push_json(401, json!({"error": {"code": "ExpiredAuthenticationToken"}}));
        }

        let policy = PollPolicy::fixed(Duration::from_secs(10))
            .with_timeout(Some(Duration::from_secs(600)));
        let err = client(&transport)
            .with_policy(policy)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Api { status: 401, .. }), "{err:?}");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_submission() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(400, json!({"error": {"code": "InvalidTemplate"}}));
        let err = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DeploymentSubmission { .. }));
        assert_eq!(transport.requests().len(), 1);

        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure("connection refused");
        let err = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DeploymentSubmission { .. }));

        let transport = Arc::new(ScriptedTransport::new());
        transport.push(HttpResponse::new(200, ""));
        let err = client(&transport)
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DeploymentSubmission { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_running() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(201, status("Accepted"));
        for _ in 0..3 {
            transport.push_json(200, status("Running"));
        }

        let err = client(&transport)
            .with_policy(PollPolicy::default().with_timeout(Some(Duration::from_secs(120))))
            .deploy(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::PollTimeout { .. }));
        assert_eq!(transport.requests().len(), 4);
    }
}
