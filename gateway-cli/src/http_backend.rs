//! Generic HTTP JSON backend adapter. Each configured provider talks
//! over a simple `{message} -> {content, input_tokens, output_tokens}`
//! contract; provider-specific wire formats are expected to sit behind
//! a small proxy/shim, matching the spec's backend contract (§6) rather
//! than any one vendor's API shape. Grounded in `adk-gemini`'s
//! `reqwest` client/header-auth pattern.

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{Backend, BackendOutput, BackendResult, FailureClass};
use serde::{Deserialize, Serialize};

pub struct HttpBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder should not fail with default TLS config");
        Self {
            name: name.into(),
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct CallRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct CallResponse {
    content: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, message: &str) -> BackendResult {
        let started = std::time::Instant::now();
        let mut request = self.client.post(&self.base_url).json(&CallRequest { message });
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FailureClass::NonRetryableAuth(format!("{} returned {status}", self.name)));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FailureClass::RetryableRateLimit(format!("{} rate limited", self.name)));
        }
        if status.is_client_error() {
            return Err(FailureClass::NonRetryableClient(format!("{} returned {status}", self.name)));
        }
        if status.is_server_error() {
            return Err(FailureClass::RetryableTransient(format!("{} returned {status}", self.name)));
        }

        let body: CallResponse = response.json().await.map_err(|e| {
            FailureClass::NonRetryablePermanent(format!("{} returned an unparseable body: {e}", self.name))
        })?;

        Ok(BackendOutput {
            content: body.content,
            input_tokens: body.input_tokens,
            output_tokens: body.output_tokens,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> FailureClass {
    if e.is_timeout() {
        FailureClass::RetryableTransient(format!("request timed out: {e}"))
    } else if e.is_connect() {
        FailureClass::RetryableTransient(format!("connection failed: {e}"))
    } else {
        FailureClass::NonRetryablePermanent(e.to_string())
    }
}
