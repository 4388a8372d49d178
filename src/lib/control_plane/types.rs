use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no valid credentials found, set BL_API_KEY, BL_ACCESS_TOKEN or BL_CLIENT_CREDENTIALS")]
    NoCredentials,
    #[error("sandbox '{name}' not found{}", available_suffix(.available))]
    SandboxNotFound { name: String, available: Vec<String> },
    #[error("control plane returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),
}

fn available_suffix(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available sandboxes: {})", available.join(", "))
    }
}

/// Which Blaxel deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Prod,
    Dev,
}

impl Environment {
    pub fn api_url(&self) -> &'static str {
        match self {
            Environment::Prod => "https://api.blaxel.ai/v0",
            Environment::Dev => "https://api.blaxel.dev/v0",
        }
    }

    pub fn run_url(&self) -> &'static str {
        match self {
            Environment::Prod => "https://run.blaxel.ai",
            Environment::Dev => "https://run.blaxel.dev",
        }
    }

    pub fn app_url(&self) -> &'static str {
        match self {
            Environment::Prod => "https://app.blaxel.ai",
            Environment::Dev => "https://app.blaxel.dev",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Prod => write!(f, "prod"),
            Environment::Dev => write!(f, "dev"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "dev" | "development" => Ok(Environment::Dev),
            other => Err(format!("unknown environment '{}', expected prod or dev", other)),
        }
    }
}

/// Whatever the user has configured; at most one of these ends up on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub client_credentials: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        [&self.api_key, &self.access_token, &self.client_credentials]
            .iter()
            .all(|c| c.as_deref().is_none_or(str::is_empty))
    }
}
