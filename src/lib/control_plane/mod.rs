//! The slice of the Blaxel control plane the shell needs: sandbox lookup and
//! the auth headers forwarded to the sandbox itself.

pub mod types;

pub use types::{Credentials, Environment, Error, Result};

use const_format::concatcp;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};

use crate::mcp::Headers;

pub const USER_AGENT: &str = concatcp!("blsh/", env!("CARGO_PKG_VERSION"));
pub const API_KEY_HEADER: &str = "X-Blaxel-Api-Key";
pub const WORKSPACE_HEADER: &str = "X-Blaxel-Workspace";

/// Exactly one auth header, by priority: API key, then bearer access token,
/// then basic client credentials. Empty when nothing is configured.
pub fn build_auth_headers(credentials: &Credentials) -> Headers {
    let present = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

    let mut headers = Headers::new();
    if let Some(key) = present(&credentials.api_key) {
        headers.insert(API_KEY_HEADER.to_string(), key);
    } else if let Some(token) = present(&credentials.access_token) {
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));
    } else if let Some(basic) = present(&credentials.client_credentials) {
        headers.insert("Authorization".to_string(), format!("Basic {}", basic));
    }
    headers
}

/// `<run>/<workspace>/sandboxes/<name>`, used when metadata carries no URL.
pub fn build_sandbox_url(run_url: &str, workspace: &str, sandbox: &str) -> String {
    format!("{}/{}/sandboxes/{}", run_url.trim_end_matches('/'), workspace, sandbox)
}

#[derive(Debug, Clone)]
pub struct ControlPlane {
    client: reqwest::Client,
    api_url: String,
    run_url: String,
    app_url: String,
    workspace: String,
    headers: Headers,
}

impl ControlPlane {
    pub fn new(
        environment: Environment,
        workspace: impl Into<String>,
        credentials: &Credentials,
    ) -> Result<Self> {
        if credentials.is_empty() {
            return Err(Error::NoCredentials);
        }
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_url: environment.api_url().to_string(),
            run_url: environment.run_url().to_string(),
            app_url: environment.app_url().to_string(),
            workspace: workspace.into(),
            headers: build_auth_headers(credentials),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_run_url(mut self, url: impl Into<String>) -> Self {
        self.run_url = url.into();
        self
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Headers to forward to the sandbox connection.
    pub fn auth_headers(&self) -> &Headers {
        &self.headers
    }

    /// Where to create a sandbox in the web console.
    pub fn console_url(&self) -> String {
        format!(
            "{}/{}/global-agentic-network/sandboxes",
            self.app_url.trim_end_matches('/'),
            self.workspace
        )
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.api_url.trim_end_matches('/'), path);
        debug!(%url, "control plane request");
        let mut request = self
            .client
            .get(&url)
            .header(WORKSPACE_HEADER, self.workspace.as_str());
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        Ok(request.send().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.get(path).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// The sandbox's direct URL from its metadata, or the constructed run URL.
    /// A missing sandbox reports the workspace's other sandboxes.
    pub async fn resolve_sandbox_url(&self, sandbox: &str) -> Result<String> {
        let response = self.get(&format!("sandboxes/{}", sandbox)).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let available = self.list_sandbox_names().await.unwrap_or_default();
            return Err(Error::SandboxNotFound {
                name: sandbox.to_string(),
                available,
            });
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: Value = response.json().await?;
        match body
            .pointer("/metadata/url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
        {
            Some(url) => {
                info!(sandbox, %url, "resolved sandbox url");
                Ok(url.to_string())
            }
            None => {
                let url = build_sandbox_url(&self.run_url, &self.workspace, sandbox);
                info!(sandbox, %url, "sandbox has no direct url, using run url");
                Ok(url)
            }
        }
    }

    pub async fn list_sandbox_names(&self) -> Result<Vec<String>> {
        let body = self.get_json("sandboxes").await?;
        Ok(body
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.pointer("/metadata/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
