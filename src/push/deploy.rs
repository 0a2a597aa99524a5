//! Deployment endpoint: where committed shadow logic goes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::protocol::Runtime;
use crate::store::TagSample;

/// Endpoint answer to a push request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl PushOutcome {
    pub fn accepted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

pub trait DeploymentEndpoint: Send + Sync {
    fn push_to_live<'a>(&'a self, logic_id: &'a str) -> BoxFuture<'a, Result<PushOutcome>>;

    /// Current logic source for one runtime, used for change previews.
    fn fetch_logic<'a>(&'a self, logic_id: &'a str, runtime: Runtime) -> BoxFuture<'a, Result<String>>;
}

/// Supplies the bearer token for deployment calls. Tokens come from an
/// external device-identity provider.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Deployment endpoint over HTTP.
pub struct HttpDeployment {
    base: Url,
    client: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpDeployment {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid deploy url {base_url}"))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("deploy url must be http or https, got {}", base.scheme());
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base,
            client,
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("deploy url cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Current value of every tag stream, for the polling fallback.
    pub async fn fetch_snapshot(&self) -> Result<Vec<TagSample>> {
        let url = self.url(&["tags", "snapshot"])?;
        let response = self.authorized(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("snapshot fetch failed: {} - {}", status, body);
        }
        Ok(response.json().await?)
    }
}

impl DeploymentEndpoint for HttpDeployment {
    fn push_to_live<'a>(&'a self, logic_id: &'a str) -> BoxFuture<'a, Result<PushOutcome>> {
        Box::pin(async move {
            let url = self.url(&["logic", logic_id, "push"])?;
            let response = self
                .authorized(self.client.post(url))
                .json(&serde_json::json!({ "logicId": logic_id }))
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_success() {
                return serde_json::from_str(&body)
                    .with_context(|| format!("unexpected push response: {body}"));
            }
            // endpoint refusals are reported verbatim
            match serde_json::from_str::<PushOutcome>(&body) {
                Ok(outcome) if outcome.error.is_some() => Ok(PushOutcome {
                    success: false,
                    ..outcome
                }),
                _ => Ok(PushOutcome::rejected(format!("{} - {}", status, body))),
            }
        })
    }

    fn fetch_logic<'a>(&'a self, logic_id: &'a str, runtime: Runtime) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut url = self.url(&["logic", logic_id])?;
            url.query_pairs_mut().append_pair("runtime", runtime.as_str());
            let response = self.authorized(self.client.get(url)).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("logic fetch failed: {} - {}", status, body);
            }
            Ok(response.text().await?)
        })
    }
}

/// In-process endpoint holding logic per runtime; a push copies shadow to
/// live. Backs the offline demo and tests.
#[derive(Default)]
pub struct LocalDeployment {
    logic: Mutex<HashMap<(String, Runtime), String>>,
    reject_with: Mutex<Option<String>>,
    pushes: Mutex<Vec<String>>,
}

impl LocalDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_logic(&self, logic_id: &str, runtime: Runtime, source: impl Into<String>) {
        self.logic
            .lock()
            .insert((logic_id.to_string(), runtime), source.into());
    }

    pub fn logic(&self, logic_id: &str, runtime: Runtime) -> Option<String> {
        self.logic.lock().get(&(logic_id.to_string(), runtime)).cloned()
    }

    /// Refuse every push with this reason until cleared with `None`.
    pub fn reject_with(&self, reason: Option<&str>) {
        *self.reject_with.lock() = reason.map(str::to_string);
    }

    /// Logic ids that reached the endpoint, accepted or not.
    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().clone()
    }
}

impl DeploymentEndpoint for LocalDeployment {
    fn push_to_live<'a>(&'a self, logic_id: &'a str) -> BoxFuture<'a, Result<PushOutcome>> {
        Box::pin(async move {
            self.pushes.lock().push(logic_id.to_string());
            if let Some(reason) = self.reject_with.lock().clone() {
                return Ok(PushOutcome::rejected(reason));
            }
            let mut logic = self.logic.lock();
            let shadow = logic
                .get(&(logic_id.to_string(), Runtime::Shadow))
                .cloned()
                .unwrap_or_default();
            logic.insert((logic_id.to_string(), Runtime::Live), shadow);
            Ok(PushOutcome::accepted())
        })
    }

    fn fetch_logic<'a>(&'a self, logic_id: &'a str, runtime: Runtime) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(self.logic(logic_id, runtime).unwrap_or_default()) })
    }
}
