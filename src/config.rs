//! API credentials and endpoints, read from the environment.
//!
//! Keys are never compiled into the binary. They come from environment
//! variables, which may be set in a `.env` file.

use std::{env, fmt, time::Duration};

use crate::prelude::*;

/// Default base URL for Google's Generative Language API.
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default base URL for the WaveSpeed API.
pub const DEFAULT_WAVESPEED_API_BASE: &str = "https://api.wavespeed.ai";

/// Credentials and endpoints for one provider.
#[derive(Clone)]
pub struct ProviderConfig {
    /// The API key, if one was configured.
    pub api_key: Option<String>,

    /// The base URL of the API, without a trailing slash.
    pub api_base: String,
}

impl ProviderConfig {
    /// Get our API key, or fail with a message naming the variable to set.
    pub fn require_api_key(&self, var_name: &str) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Please set {var_name} (or add it to .env)"))
    }
}

// Hand-written so that keys never end up in logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Configuration for all the APIs we know how to call.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Google (Imagen and Gemini).
    pub gemini: ProviderConfig,

    /// WaveSpeed (HiDream).
    pub wavespeed: ProviderConfig,

    /// Timeout for individual HTTP requests.
    pub request_timeout: Option<Duration>,
}

impl ApiConfig {
    /// Build our configuration from environment variables.
    pub fn from_env(request_timeout: Option<Duration>) -> Self {
        Self::from_lookup(|name| env::var(name).ok(), request_timeout)
    }

    /// Build our configuration using `lookup` to read variables.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let base = |name: &str, default: &str| {
            non_empty(name)
                .unwrap_or_else(|| default.to_owned())
                .trim_end_matches('/')
                .to_owned()
        };
        Self {
            gemini: ProviderConfig {
                api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
                api_base: base("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
            },
            wavespeed: ProviderConfig {
                api_key: non_empty("WAVESPEED_API_KEY"),
                api_base: base("WAVESPEED_API_BASE", DEFAULT_WAVESPEED_API_BASE),
            },
            request_timeout,
        }
    }

    /// Build an HTTP client honoring our timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().context("Failed to build HTTP client")
    }
}
