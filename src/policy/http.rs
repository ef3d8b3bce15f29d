//! [`PolicyEngine`] backed by an OPA-compatible data API.

use super::{
    FORWARD_AUTH_PACKAGE, ForwardAuthInput, ForwardAuthPolicyResult, PolicyEngine, PolicyError,
};
use crate::APP_USER_AGENT;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{Instrument, info_span};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct DataRequest<'a, T> {
    input: &'a T,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    result: Option<T>,
}

#[derive(Clone, Debug)]
pub struct OpaHttpEngine {
    client: reqwest::Client,
    forward_auth_url: String,
}

impl OpaHttpEngine {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, PolicyError> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            forward_auth_url: data_url(base_url, FORWARD_AUTH_PACKAGE),
        })
    }
}

/// `POST` endpoint for `package`, e.g. `{base}/v1/data/portcullis/forward_auth`.
fn data_url(base_url: &str, package: &str) -> String {
    format!(
        "{}/v1/data/{}",
        base_url.trim_end_matches('/'),
        package.replace('.', "/")
    )
}

#[async_trait]
impl PolicyEngine for OpaHttpEngine {
    async fn evaluate_forward_auth(
        &self,
        input: &ForwardAuthInput,
    ) -> Result<Option<ForwardAuthPolicyResult>, PolicyError> {
        let span = info_span!("policy.evaluate", policy.package = FORWARD_AUTH_PACKAGE);
        async {
            let response = self
                .client
                .post(&self.forward_auth_url)
                .json(&DataRequest { input })
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PolicyError::Status(status.as_u16()));
            }
            let body: DataResponse<ForwardAuthPolicyResult> = response
                .json()
                .await
                .map_err(|err| PolicyError::Decode(err.to_string()))?;
            Ok(body.result)
        }
        .instrument(span)
        .await
    }
}
