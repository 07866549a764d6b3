//! Error types for load balancer synthesis

use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Result type for synthesis operations
pub type Result<T> = std::result::Result<T, SynthError>;

/// API error codes meaning the object no longer exists
const NOT_FOUND_CODES: &[&str] = &[
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "RuleNotFound",
];

/// API error codes meaning the object is still referenced by another object
const IN_USE_CODES: &[&str] = &["ResourceInUse"];

/// Error returned by the load-balancing API, reduced to its code and message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {code}: {message}")]
pub struct CloudError {
    /// API operation that failed (e.g. `DeleteTargetGroup`)
    pub operation: String,
    /// Service error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl CloudError {
    /// Create a new cloud error
    pub fn new(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// The object the call targeted does not exist
    pub fn is_not_found(&self) -> bool {
        NOT_FOUND_CODES.contains(&self.code.as_str())
    }

    /// The object cannot be deleted while something references it
    pub fn is_in_use(&self) -> bool {
        IN_USE_CODES.contains(&self.code.as_str())
    }
}

/// Errors that can occur during a synthesis pass
#[derive(Error, Debug)]
pub enum SynthError {
    /// Load-balancing API error
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// A live resource in the tracked set carries no tracking tag
    #[error("{kind} {arn} is missing tracking tag {tag_key}")]
    IdentityViolation {
        kind: String,
        arn: String,
        tag_key: String,
    },

    /// Two resources on the same side share one structural key
    #[error("duplicate {kind} key {key} among {side} resources")]
    DuplicateKey {
        kind: String,
        key: String,
        side: &'static str,
    },

    /// A cross-resource reference has no status yet
    #[error("unresolved reference to {kind} {id}")]
    UnresolvedReference { kind: String, id: String },

    /// Eventual-consistency wait exceeded; the pass should be requeued
    #[error("{reason}, retry after {delay:?}")]
    RetryAfter { reason: String, delay: Duration },

    /// Cluster API error
    #[error("Cluster API error: {0}")]
    Cluster(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Desired model is internally inconsistent
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Pass deadline exceeded
    #[error("Synthesis cancelled after {0:?}")]
    Cancelled(Duration),

    /// Error with added context
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<SynthError>,
    },
}

impl SynthError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cluster API error
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create an invalid spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create a retryable error
    pub fn retry_after(reason: impl Into<String>, delay: Duration) -> Self {
        Self::RetryAfter {
            reason: reason.into(),
            delay,
        }
    }

    /// Wrap this error with context
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// First cloud error found in the source chain
    pub fn cloud_error(&self) -> Option<&CloudError> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(cloud) = err.downcast_ref::<CloudError>() {
                return Some(cloud);
            }
            if let Some(SynthError::Cloud(cloud)) = err.downcast_ref::<SynthError>() {
                return Some(cloud);
            }
            current = err.source();
        }
        None
    }

    /// Whether the root cause is a not-found API error
    pub fn is_not_found(&self) -> bool {
        self.cloud_error().is_some_and(CloudError::is_not_found)
    }

    /// Whether the root cause is a resource-in-use API error
    pub fn is_in_use(&self) -> bool {
        self.cloud_error().is_some_and(CloudError::is_in_use)
    }

    /// Suggested requeue delay, if this error is retryable
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RetryAfter { delay, .. } => Some(*delay),
            Self::Context { source, .. } => source.retry_delay(),
            _ => None,
        }
    }
}

/// Attach context to fallible results
pub trait ResultExt<T> {
    /// Wrap the error with a lazily built context message
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_use_detected_through_context() {
        let err = SynthError::from(CloudError::new(
            "DeleteTargetGroup",
            "ResourceInUse",
            "target group is in use by a listener",
        ))
        .context("deleting target group tg-1")
        .context("synthesizing target groups");

        assert!(err.is_in_use());
        assert!(!err.is_not_found());
        assert_eq!(err.cloud_error().map(|e| e.code.as_str()), Some("ResourceInUse"));
    }

    #[test]
    fn test_not_found_codes() {
        assert!(CloudError::new("DeleteListener", "ListenerNotFound", "").is_not_found());
        assert!(CloudError::new("DeleteRule", "RuleNotFound", "").is_not_found());
        assert!(!CloudError::new("DeleteRule", "Throttling", "").is_not_found());
    }

    #[test]
    fn test_retry_delay_survives_context() {
        let err = SynthError::retry_after("binding not observed", Duration::from_secs(15))
            .context("updating binding default/tgb");
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(15)));
        assert_eq!(SynthError::config("x").retry_delay(), None);
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(SynthError::invalid_spec("empty name"));
        let err = result.with_context(|| "validating load balancer").unwrap_err();
        assert_eq!(err.to_string(), "validating load balancer");
    }
}
