use crate::progress::Stage;

/// Errors surfaced by a segmentation call.
///
/// A call either returns a complete `SegmentationResult` or one of these;
/// there is no partial output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentationError {
    /// The pixel buffer is empty or malformed.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    /// A caller-supplied parameter is out of range.
    #[error("invalid parameter `{name}`: {reason}")]
    Parameter { name: &'static str, reason: String },

    /// Cooperative cancellation was observed at entry (`stage: None`) or
    /// after a checkpoint.
    #[error("segmentation cancelled{}", cancelled_at(.stage))]
    Cancelled { stage: Option<Stage> },

    /// The pixel graph would not fit into the configured memory bound.
    #[error("graph needs {required_bytes} bytes, limit is {limit_bytes} bytes")]
    ResourceExhausted {
        required_bytes: usize,
        limit_bytes: usize,
    },
}

impl SegmentationError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Parameter {
            name,
            reason: reason.into(),
        }
    }
}

fn cancelled_at(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => format!(" after stage `{}`", stage.name()),
        None => " before start".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_parameter() {
        let err = SegmentationError::parameter("alpha", "must be > 0, got -1");
        assert_eq!(
            err.to_string(),
            "invalid parameter `alpha`: must be > 0, got -1"
        );
    }

    #[test]
    fn cancelled_message_names_stage() {
        let err = SegmentationError::Cancelled {
            stage: Some(Stage::MstBuilt),
        };
        assert_eq!(err.to_string(), "segmentation cancelled after stage `MST built`");
        let err = SegmentationError::Cancelled { stage: None };
        assert_eq!(err.to_string(), "segmentation cancelled before start");
    }
}
