//! Error types for the Nimbus inventory refresh engine.

/// Result type alias for Nimbus operations.
pub type Result<T> = std::result::Result<T, NimbusError>;

/// Main error type for the refresh engine.
#[derive(Debug, thiserror::Error)]
pub enum NimbusError {
    /// A record lacks a usable identity key
    #[error("Identity error ({}): {reason}", .collection.as_deref().unwrap_or("unscoped"))]
    Identity {
        collection: Option<String>,
        reason: String,
    },

    /// Cyclic lazy projections between collections
    #[error("Resolution deadlock between collections: {}", .collections.join(", "))]
    ResolutionDeadlock { collections: Vec<String> },

    /// A collection name not declared by the manager definition
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target store errors scoped to a single collection
    #[error("Store error in {collection}: {message}")]
    Store { collection: String, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NimbusError {
    /// Create a new identity error not yet tied to a collection
    pub fn identity(reason: impl Into<String>) -> Self {
        Self::Identity {
            collection: None,
            reason: reason.into(),
        }
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new unknown collection error
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection(name.into())
    }

    /// Create a new store error for a collection
    pub fn store(collection: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            collection: collection.into(),
            message: msg.into(),
        }
    }

    /// Create a new resolution deadlock error; names are sorted and de-duplicated
    pub fn deadlock<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collections: Vec<String> = collections.into_iter().map(Into::into).collect();
        collections.sort();
        collections.dedup();
        Self::ResolutionDeadlock { collections }
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Attach a collection name to an identity error. Other errors pass through.
    pub fn in_collection(self, name: &str) -> Self {
        match self {
            Self::Identity {
                collection: None,
                reason,
            } => Self::Identity {
                collection: Some(name.to_string()),
                reason,
            },
            other => other,
        }
    }

    /// Errors that only invalidate the record being parsed
    pub fn is_record_scoped(&self) -> bool {
        matches!(self, Self::Identity { .. })
    }

    /// Errors that invalidate the manager definition or configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownCollection(_) | Self::ConfigParse(_)
        )
    }

    /// Check if this is a store error
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}
