//! HTTP bridge generator
//!
//! Talks to a generation service that answers `POST {url}/generate` with a
//! WAV body. The request carries a text prompt and the duration in seconds,
//! plus the target tempo and key for services that condition on them.
//!
//! Build with `--features remote-bridge` to enable the client; without it
//! the generator reports `NotReady` and every request fails with
//! `BridgeUnavailable`.
//!
//! Readiness never touches the network. A refused connection marks the
//! service `NotReady` for [`RETRY_AFTER`], after which requests are tried
//! again.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{BridgeGenerator, BridgeRequest, Readiness};
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// How long a refused connection keeps the service marked down
pub const RETRY_AFTER: Duration = Duration::from_secs(30);

/// Connection settings for the generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteBridgeConfig {
    pub url: String,
    /// Per-request timeout
    pub timeout_ms: u64,
}

impl Default for RemoteBridgeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            timeout_ms: 45_000,
        }
    }
}

/// Wire body for `/generate`
#[derive(Debug, Serialize)]
struct GenerateRequest {
    prompt: String,
    /// Seconds
    duration: f64,
    bpm: f64,
    key: Option<String>,
}

impl From<&BridgeRequest> for GenerateRequest {
    fn from(request: &BridgeRequest) -> Self {
        Self {
            prompt: request.prompt(),
            duration: request.target_duration_ms as f64 / 1000.0,
            bpm: request.target_bpm,
            key: request.target_key.map(|k| k.camelot_code()),
        }
    }
}

/// Generator backed by the HTTP generation service
#[derive(Debug, Clone)]
pub struct RemoteBridgeGenerator {
    config: RemoteBridgeConfig,
    refused_at: Arc<Mutex<Option<Instant>>>,
}

impl RemoteBridgeGenerator {
    pub fn new(config: RemoteBridgeConfig) -> Self {
        Self {
            config: RemoteBridgeConfig {
                url: config.url.trim_end_matches('/').to_string(),
                ..config
            },
            refused_at: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &RemoteBridgeConfig {
        &self.config
    }

    #[cfg(feature = "remote-bridge")]
    fn mark_refused(&self, at: Option<Instant>) {
        if let Ok(mut refused) = self.refused_at.lock() {
            *refused = at;
        }
    }

    fn recently_refused(&self) -> bool {
        self.refused_at
            .lock()
            .map(|refused| refused.is_some_and(|at| at.elapsed() < RETRY_AFTER))
            .unwrap_or(false)
    }

    #[cfg(feature = "remote-bridge")]
    fn send_request(&self, request: &GenerateRequest) -> Result<Vec<u8>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .build()
            .map_err(|e| SegueError::BridgeUnavailable { reason: e.to_string() })?;

        let url = format!("{}/generate", self.config.url);
        let response = client.post(&url).json(request).send().map_err(|e| {
            let reason = if e.is_timeout() {
                format!("generation timed out after {} ms", self.config.timeout_ms)
            } else if e.is_connect() {
                self.mark_refused(Some(Instant::now()));
                format!("cannot connect to {}: {}", self.config.url, e)
            } else {
                e.to_string()
            };
            SegueError::BridgeUnavailable { reason }
        })?;
        self.mark_refused(None);

        if !response.status().is_success() {
            return Err(SegueError::BridgeUnavailable {
                reason: format!("service returned {}", response.status()),
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| SegueError::BridgeUnavailable {
                reason: format!("invalid response body: {}", e),
            })
    }

    #[cfg(not(feature = "remote-bridge"))]
    fn send_request(&self, _request: &GenerateRequest) -> Result<Vec<u8>> {
        Err(SegueError::BridgeUnavailable {
            reason: "remote bridge support not compiled; build with --features remote-bridge".to_string(),
        })
    }
}

impl BridgeGenerator for RemoteBridgeGenerator {
    fn name(&self) -> &str {
        "remote"
    }

    fn readiness(&self) -> Readiness {
        if cfg!(feature = "remote-bridge") && !self.recently_refused() {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    fn request_bridge(&self, request: &BridgeRequest) -> Result<AudioBuffer> {
        let body = GenerateRequest::from(request);
        tracing::info!(request = %request.id, url = %self.config.url, prompt = %body.prompt, "requesting bridge");
        let bytes = self.send_request(&body)?;
        crate::engine::io::read_wav_bytes(&bytes).map_err(|e| SegueError::BridgeUnavailable {
            reason: format!("service returned unreadable audio: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::FeatureSnapshot;

    #[test]
    fn test_wire_body() {
        let a = FeatureSnapshot::new("a").with_bpm(120.0).with_key("8A".parse().unwrap());
        let b = FeatureSnapshot::new("b").with_bpm(124.0).with_key("9A".parse().unwrap());
        let request = BridgeRequest::new(&a, &b, 8_000).unwrap();
        let body = serde_json::to_value(GenerateRequest::from(&request)).unwrap();
        assert_eq!(body["duration"], 8.0);
        assert_eq!(body["bpm"], 122.0);
        assert_eq!(body["key"], "9A");
        assert!(body["prompt"].as_str().unwrap().contains("122 bpm"));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let generator = RemoteBridgeGenerator::new(RemoteBridgeConfig {
            url: "http://gen.local:5000/".to_string(),
            timeout_ms: 1_000,
        });
        assert_eq!(generator.config().url, "http://gen.local:5000");
    }

    #[cfg(feature = "remote-bridge")]
    #[test]
    fn test_refused_connection_marks_not_ready() {
        let generator = RemoteBridgeGenerator::new(RemoteBridgeConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 2_000,
        });
        assert_eq!(generator.readiness(), Readiness::Ready);

        let a = FeatureSnapshot::new("a").with_bpm(120.0).with_key("8A".parse().unwrap());
        let request = BridgeRequest::new(&a, &a, 1_000).unwrap();
        assert!(generator.request_bridge(&request).is_err());
        assert_eq!(generator.readiness(), Readiness::NotReady);
        assert_eq!(generator.clone().readiness(), Readiness::NotReady);
    }

    #[cfg(not(feature = "remote-bridge"))]
    #[test]
    fn test_without_feature_is_unavailable() {
        let generator = RemoteBridgeGenerator::new(RemoteBridgeConfig::default());
        assert_eq!(generator.readiness(), Readiness::NotReady);
        let a = FeatureSnapshot::new("a").with_bpm(120.0).with_key("8A".parse().unwrap());
        let request = BridgeRequest::new(&a, &a, 1_000).unwrap();
        assert!(matches!(
            generator.request_bridge(&request),
            Err(SegueError::BridgeUnavailable { .. })
        ));
    }
}
