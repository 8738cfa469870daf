//! Opaque remote mutations against already-running subsystems.
//!
//! A [`RemoteCall`] builds one request (possibly reading the store, e.g. for
//! a route host); a [`RemoteTransport`] sends it. Calls are at-least-once:
//! re-running the step on the next tick is the retry.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ConvergeError;
use crate::installer::TickContext;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRequest {
    pub method: Method,
    pub url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub form: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    /// Non-2xx statuses that mean "already done" for this call.
    #[serde(skip)]
    pub tolerated: Vec<u16>,
}

impl RemoteRequest {
    pub fn post_form(url: impl Into<String>, form: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            form: form
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            json: None,
            tolerated: vec![],
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            form: vec![],
            json: Some(body),
            tolerated: vec![],
        }
    }

    pub fn tolerate(mut self, status: u16) -> Self {
        self.tolerated.push(status);
        self
    }

    /// Fail fast on URLs no transport could send.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        let rest = self
            .url
            .strip_prefix("http://")
            .or_else(|| self.url.strip_prefix("https://"))
            .ok_or_else(|| ConvergeError::InvalidConfig(format!("unsupported URL '{}'", self.url)))?;
        let host = rest.split(['/', '?', '#']).next().unwrap_or("");
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(ConvergeError::InvalidConfig(format!("URL '{}' has no valid host", self.url)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

/// One remote mutation, built fresh on every tick.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    fn describe(&self) -> String;

    async fn request(&self, ctx: &TickContext<'_>) -> Result<RemoteRequest, ConvergeError>;
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, ConvergeError>;
}

/// Build, send, and classify one call.
pub async fn run_remote(call: &dyn RemoteCall, ctx: &TickContext<'_>) -> Result<(), ConvergeError> {
    if !ctx.config.remote_calls {
        tracing::info!(call = %call.describe(), "remote calls disabled, skipping");
        return Ok(());
    }
    let request = call.request(ctx).await?;
    request.validate()?;
    let tolerated = request.tolerated.clone();
    let response = ctx.transport.send(request).await?;
    match response.status {
        200..=399 => {
            tracing::info!(call = %call.describe(), status = response.status, "remote call succeeded");
            Ok(())
        }
        status if tolerated.contains(&status) => {
            tracing::debug!(call = %call.describe(), status, "remote call already applied");
            Ok(())
        }
        status => Err(ConvergeError::Remote {
            call: call.describe(),
            reason: format!("HTTP {status}: {}", first_line(&response.body)),
        }),
    }
}

fn first_line(body: &str) -> &str {
    body.lines().next().unwrap_or("").trim()
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Blocking `ureq` client driven from the blocking pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        // Redirects are results here: a sign-up form answers 302 on success.
        let agent = ureq::AgentBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .redirects(0)
            .build();
        Self { agent }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, ConvergeError> {
        let agent = self.agent.clone();
        let url = request.url.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let req = agent.request(request.method.as_str(), &request.url);
            let result = if !request.form.is_empty() {
                let pairs: Vec<(&str, &str)> = request
                    .form
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                req.send_form(&pairs)
            } else if let Some(body) = request.json {
                req.send_json(body)
            } else {
                req.call()
            };
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    Ok(RemoteResponse {
                        status,
                        body: resp.into_string().unwrap_or_default(),
                    })
                }
                Err(ureq::Error::Status(status, resp)) => Ok(RemoteResponse {
                    status,
                    body: resp.into_string().unwrap_or_default(),
                }),
                Err(ureq::Error::Transport(err)) => Err(err.to_string()),
            }
        })
        .await;

        match joined {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => Err(ConvergeError::Remote { call: url, reason }),
            Err(err) => Err(ConvergeError::Remote {
                call: url,
                reason: format!("request task failed: {err}"),
            }),
        }
    }
}

/// Records every request and answers with a fixed status.
#[derive(Debug)]
pub struct RecordingTransport {
    status: u16,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::with_status(200)
    }
}

impl RecordingTransport {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteTransport for RecordingTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, ConvergeError> {
        self.requests
            .lock()
            .map_err(|_| ConvergeError::Remote {
                call: request.url.clone(),
                reason: "recording transport lock poisoned".to_string(),
            })?
            .push(request);
        Ok(RemoteResponse {
            status: self.status,
            body: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://gitea-server-gitea.apps.x/user/sign_up", true)]
    #[case("https://vault.apps.x", true)]
    #[case("http:///user/sign_up", false)]
    #[case("ftp://gitea/user", false)]
    #[case("http://bad host/", false)]
    fn validates_urls(#[case] url: &str, #[case] ok: bool) {
        let request = RemoteRequest::post_form(url, &[]);
        assert_eq!(request.validate().is_ok(), ok, "{url}");
        if !ok {
            assert!(matches!(request.validate(), Err(ConvergeError::InvalidConfig(_))));
        }
    }

    #[tokio::test]
    async fn recording_transport_keeps_requests() {
        let transport = RecordingTransport::with_status(302);
        let response = transport
            .send(RemoteRequest::post_form("http://h/x", &[("user_name", "user1")]))
            .await
            .expect("send");
        assert_eq!(response.status, 302);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].form, vec![("user_name".to_string(), "user1".to_string())]);
    }
}
