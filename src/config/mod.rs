use serde::Deserialize;
use std::time::Duration;

use crate::error::PipelineError;

pub const DEFAULT_DEAPI_BASE_URL: &str = "https://api.deapi.ai/api/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// HS256 secret used to verify caller access tokens
    pub jwt_secret: String,

    /// Image generation service API key
    #[serde(default)]
    pub deapi_api_key: Option<String>,

    #[serde(default = "default_deapi_base_url")]
    pub deapi_base_url: String,

    #[serde(default = "default_deapi_model")]
    pub deapi_model: String,

    #[serde(default = "default_deapi_steps")]
    pub deapi_steps: u32,

    #[serde(default = "default_deapi_seed")]
    pub deapi_seed: i64,

    /// Try-on engine base URL
    pub tryon_base_url: String,

    #[serde(default = "default_max_requests_per_minute")]
    pub tryon_max_requests_per_minute: u32,

    #[serde(default = "default_rate_limit_window_seconds")]
    pub tryon_rate_limit_window_seconds: u64,

    /// Idle lifetime of a per-user rate limit entry
    #[serde(default = "default_rate_limit_entry_ttl_seconds")]
    pub tryon_rate_limit_entry_ttl_seconds: u64,

    /// Template garment used when a caller uploads no image
    #[serde(default)]
    pub default_hoodie_image: Option<String>,

    #[serde(default)]
    pub default_tshirt_image: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_deapi_base_url() -> String {
    DEFAULT_DEAPI_BASE_URL.to_string()
}

fn default_deapi_model() -> String {
    "QwenImageEdit_Plus_NF4".to_string()
}

fn default_deapi_steps() -> u32 {
    20
}

fn default_deapi_seed() -> i64 {
    42
}

fn default_max_requests_per_minute() -> u32 {
    10
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_rate_limit_entry_ttl_seconds() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Validated settings for the generation client.
    pub fn generation_settings(&self) -> Result<GenerationSettings, PipelineError> {
        GenerationSettings::new(
            self.deapi_api_key.as_deref().unwrap_or_default(),
            &self.deapi_base_url,
            &self.deapi_model,
            self.deapi_steps,
            self.deapi_seed,
        )
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            max_requests_per_window: self.tryon_max_requests_per_minute,
            window: Duration::from_secs(self.tryon_rate_limit_window_seconds),
            entry_ttl: Duration::from_secs(self.tryon_rate_limit_entry_ttl_seconds),
        }
    }
}

/// Credentials and model parameters for the image generation service.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub steps: u32,
    pub seed: i64,
}

impl GenerationSettings {
    /// Fails with a configuration error when the key or base URL is blank.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        steps: u32,
        seed: i64,
    ) -> Result<Self, PipelineError> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "Image editing service is not configured (DEAPI_API_KEY is missing).".to_string(),
            ));
        }
        if base_url.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "Image editing service base URL is empty.".to_string(),
            ));
        }

        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            model: model.to_string(),
            steps,
            seed,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_requests_per_window: u32,
    pub window: Duration,
    pub entry_ttl: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests_per_window: default_max_requests_per_minute(),
            window: Duration::from_secs(default_rate_limit_window_seconds()),
            entry_ttl: Duration::from_secs(default_rate_limit_entry_ttl_seconds()),
        }
    }
}
