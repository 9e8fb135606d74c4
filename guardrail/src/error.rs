use thiserror::Error;

use crate::resource::ObjectKey;

/// Errors that can occur while loading policy or reconciling an object
#[derive(Error, Debug)]
pub enum Error {
    /// The policy document is unusable
    #[error("ConfigurationError: {0}")]
    ConfigurationError(String),

    /// A feature's namespace pattern is not a valid regular expression
    #[error("ConfigurationError: invalid namespacePattern for {feature}: {source}")]
    InvalidPattern {
        feature: &'static str,
        #[source]
        source: regex::Error,
    },

    /// Error during JSON serialization/deserialization
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Error while parsing the YAML policy document
    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Original and mutated objects cannot be diffed
    #[error("PatchComputationError: {0}")]
    PatchComputationError(String),

    /// Object is missing fields required to address it
    #[error("InvalidObject: {0}")]
    InvalidObject(String),

    /// The store detected a concurrent modification
    #[error("StoreConflict: {0} was modified concurrently")]
    StoreConflict(ObjectKey),

    /// The object vanished before the patch reached the store
    #[error("StoreNotFound: {0} no longer exists")]
    StoreNotFound(ObjectKey),

    /// The store refused the patch
    #[error("StoreRejected: {key} ({code}): {message}")]
    StoreRejected {
        key: ObjectKey,
        code: u16,
        message: String,
    },

    /// The store could not be reached
    #[error("StoreUnavailable: {key}: {source}")]
    StoreUnavailable {
        key: ObjectKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error from the Kubernetes client
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),
}

impl Error {
    /// Maps a failed patch call to the store outcome it represents
    pub(crate) fn from_store(key: &ObjectKey, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => Self::StoreConflict(key.clone()),
            kube::Error::Api(resp) if resp.code == 404 => Self::StoreNotFound(key.clone()),
            kube::Error::Api(resp) => Self::StoreRejected {
                key: key.clone(),
                code: resp.code,
                message: resp.message,
            },
            other => Self::StoreUnavailable {
                key: key.clone(),
                source: Box::new(other),
            },
        }
    }

    /// Whether a later event for the same object may succeed where this one failed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreConflict(_) | Self::StoreUnavailable { .. } | Self::KubeError(_)
        )
    }
}

/// Result type for guardrail operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
