//! Error handling for Segue
//!
//! Feature- and candidate-level errors are absorbed by the caller with
//! exclusion or fallback; only I/O and resource failures end a job.

use thiserror::Error;

/// Result type alias for Segue operations
pub type Result<T> = std::result::Result<T, SegueError>;

/// Main error type for Segue operations
#[derive(Error, Debug)]
pub enum SegueError {
    // Feature Errors
    #[error("Invalid features for track {track}: {reason}")]
    InvalidFeature { track: String, reason: String },

    #[error("Unknown track: {track}")]
    UnknownTrack { track: String },

    // DSP Errors
    #[error("Stretch ratio {requested:.3} exceeds the allowed bound of ±{max:.3}")]
    StretchRatioExceeded { requested: f64, max: f64 },

    #[error("Processing error: {reason}")]
    ProcessingError { reason: String },

    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // Orchestration Errors
    #[error("Bridge unavailable: {reason}")]
    BridgeUnavailable { reason: String },

    #[error("Search aborted")]
    SearchAborted,

    #[error("Invalid flow: {reason}")]
    InvalidFlow { reason: String },

    #[error("Unknown segment: {segment}")]
    UnknownSegment { segment: u64 },

    // Render Errors
    #[error("Render I/O failure on segment {segment} (track {track}): {reason}")]
    RenderIo {
        segment: u64,
        track: String,
        reason: String,
    },

    #[error("Render cancelled")]
    RenderCancelled,

    // File Errors
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples")]
    EmptyAudio,

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SegueError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SegueError::InvalidFeature { .. } => "INVALID_FEATURE",
            SegueError::UnknownTrack { .. } => "UNKNOWN_TRACK",
            SegueError::StretchRatioExceeded { .. } => "STRETCH_RATIO_EXCEEDED",
            SegueError::ProcessingError { .. } => "PROCESSING_ERROR",
            SegueError::InvalidParameter { .. } => "INVALID_PARAMETER",
            SegueError::BridgeUnavailable { .. } => "BRIDGE_UNAVAILABLE",
            SegueError::SearchAborted => "SEARCH_ABORTED",
            SegueError::InvalidFlow { .. } => "INVALID_FLOW",
            SegueError::UnknownSegment { .. } => "UNKNOWN_SEGMENT",
            SegueError::RenderIo { .. } => "RENDER_IO_ERROR",
            SegueError::RenderCancelled => "RENDER_CANCELLED",
            SegueError::FileNotFound { .. } => "FILE_NOT_FOUND",
            SegueError::InvalidAudio { .. } => "INVALID_AUDIO",
            SegueError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            SegueError::EmptyAudio => "EMPTY_AUDIO",
            SegueError::Io(_) => "IO_ERROR",
            SegueError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is absorbed locally (exclusion or fallback)
    /// rather than failing the surrounding job
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SegueError::InvalidFeature { .. }
                | SegueError::StretchRatioExceeded { .. }
                | SegueError::BridgeUnavailable { .. }
                | SegueError::SearchAborted
        )
    }

    /// Cooperative cancellation is a control signal, not something to show the user
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SegueError::SearchAborted)
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SegueError::InvalidFeature { .. } => vec![
                "Re-run analysis for this track to fill in BPM and key",
                "The track has been excluded from the candidate pool",
            ],
            SegueError::StretchRatioExceeded { .. } => vec![
                "The transition falls back to crossfade and ducking only",
                "Pick a neighbour with a closer tempo for a tighter blend",
            ],
            SegueError::BridgeUnavailable { .. } => vec![
                "A direct crossfade was used instead of a generated bridge",
                "Check that the bridge generation service is running",
                "Increase the bridge timeout in the configuration",
            ],
            SegueError::RenderIo { .. } => vec![
                "Check the source audio file still exists and is readable",
                "Verify there is free space at the output location",
            ],
            SegueError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            SegueError::InvalidAudio { .. } | SegueError::UnsupportedFormat { .. } => vec![
                "Convert the file to 16/24-bit PCM or 32-bit float WAV",
                "The file may be corrupted - try re-exporting from source",
            ],
            SegueError::InvalidFlow { .. } => vec![
                "Undo the last edit to restore a consistent flow",
            ],
            _ => vec![],
        }
    }

    /// Get a user-friendly message for this error
    pub fn friendly_message(&self) -> String {
        match self {
            SegueError::InvalidFeature { track, reason } => {
                format!("Track '{}' was left out of the mix: {}.", track, reason)
            }
            SegueError::StretchRatioExceeded { requested, max } => format!(
                "The tempo gap needs a {:.1}% stretch but only {:.1}% is allowed, so this transition relies on the crossfade alone.",
                (requested - 1.0).abs() * 100.0,
                max * 100.0
            ),
            SegueError::BridgeUnavailable { reason } => format!(
                "No generated bridge this time ({}). I used the best direct transition instead.",
                reason
            ),
            SegueError::RenderIo {
                segment,
                track,
                reason,
            } => format!(
                "Rendering stopped at segment {} because track '{}' could not be read or written: {}",
                segment, track, reason
            ),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SegueError::InvalidFeature {
            track: "7".to_string(),
            reason: "missing BPM".to_string(),
        };
        assert_eq!(err.error_code(), "INVALID_FEATURE");
        assert_eq!(SegueError::SearchAborted.error_code(), "SEARCH_ABORTED");
    }

    #[test]
    fn test_recoverable_taxonomy() {
        assert!(SegueError::StretchRatioExceeded {
            requested: 1.2,
            max: 0.08
        }
        .is_recoverable());
        assert!(SegueError::BridgeUnavailable {
            reason: "timeout".to_string()
        }
        .is_recoverable());
        assert!(!SegueError::RenderIo {
            segment: 3,
            track: "a".to_string(),
            reason: "gone".to_string()
        }
        .is_recoverable());
        assert!(!SegueError::SearchAborted.is_user_visible());
    }

    #[test]
    fn test_friendly_message_names_segment_and_track() {
        let err = SegueError::RenderIo {
            segment: 4,
            track: "kick-loop".to_string(),
            reason: "permission denied".to_string(),
        };
        let msg = err.friendly_message();
        assert!(msg.contains("segment 4"));
        assert!(msg.contains("kick-loop"));
        assert!(!err.recovery_suggestions().is_empty());
    }
}
