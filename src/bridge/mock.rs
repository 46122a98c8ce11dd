//! Procedural bridge generator
//!
//! Doesn't run a model. It renders a cubic-ramp riser on the target key's
//! root at the requested length, after an optional simulated latency, so the
//! orchestrator's timeout and fallback paths can be exercised offline.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{BridgeGenerator, BridgeRequest, Readiness};
use crate::engine::buffer::{ms_to_samples, DEFAULT_SAMPLE_RATE};
use crate::engine::AudioBuffer;
use crate::error::{Result, SegueError};

/// Mock bridge generator
#[derive(Debug)]
pub struct MockBridgeGenerator {
    readiness: Readiness,
    latency: Duration,
    failure: Option<String>,
    sample_rate: u32,
    requests: AtomicUsize,
}

impl MockBridgeGenerator {
    pub fn new() -> Self {
        Self {
            readiness: Readiness::Ready,
            latency: Duration::ZERO,
            failure: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            requests: AtomicUsize::new(0),
        }
    }

    /// Simulated generation time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every request with `reason`
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Requests received so far, including failed ones
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Default for MockBridgeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeGenerator for MockBridgeGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn readiness(&self) -> Readiness {
        self.readiness
    }

    fn request_bridge(&self, request: &BridgeRequest) -> Result<AudioBuffer> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if let Some(reason) = &self.failure {
            return Err(SegueError::BridgeUnavailable { reason: reason.clone() });
        }
        if request.target_duration_ms <= 0 {
            return Err(SegueError::InvalidParameter {
                param: "target_duration_ms".to_string(),
                value: request.target_duration_ms.to_string(),
                expected: "> 0 ms".to_string(),
            });
        }

        // A3 = 220 Hz, pitch class 9
        let pitch_class = request.target_key.map(|k| k.pitch_class()).unwrap_or(9) as f64;
        let frequency = 220.0 * 2.0_f64.powf((pitch_class - 9.0) / 12.0);
        let len = ms_to_samples(request.target_duration_ms as f64, self.sample_rate);
        let angular = 2.0 * PI * frequency / self.sample_rate as f64;

        let riser: Vec<f32> = (0..len)
            .map(|i| {
                let ramp = (i as f64 / len as f64).powi(3);
                (0.5 * ramp * (angular * i as f64).sin()) as f32
            })
            .collect();
        tracing::debug!(request = %request.id, samples = len, frequency, "mock bridge rendered");
        Ok(AudioBuffer {
            samples: vec![riser.clone(), riser],
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::FeatureSnapshot;

    fn request(duration_ms: i64) -> BridgeRequest {
        let a = FeatureSnapshot::new("a").with_bpm(120.0).with_key("8A".parse().unwrap());
        let b = FeatureSnapshot::new("b").with_bpm(126.0).with_key("9A".parse().unwrap());
        BridgeRequest::new(&a, &b, duration_ms).unwrap()
    }

    #[test]
    fn test_riser_has_requested_length() {
        let generator = MockBridgeGenerator::new();
        let clip = generator.request_bridge(&request(2_000)).unwrap();
        assert_eq!(clip.len(), 88_200);
        assert_eq!(clip.channels(), 2);
        // rises from silence
        assert!(clip.channel(0)[..1000].iter().all(|s| s.abs() < 1e-3));
        assert_eq!(generator.request_count(), 1);
    }

    #[test]
    fn test_failure_still_counts_request() {
        let generator = MockBridgeGenerator::new().failing("model crashed");
        assert!(matches!(
            generator.request_bridge(&request(1_000)),
            Err(SegueError::BridgeUnavailable { .. })
        ));
        assert_eq!(generator.request_count(), 1);
    }

    #[test]
    fn test_readiness_is_configurable() {
        let generator = MockBridgeGenerator::new().with_readiness(Readiness::Initializing);
        assert_eq!(generator.readiness(), Readiness::Initializing);
    }
}
