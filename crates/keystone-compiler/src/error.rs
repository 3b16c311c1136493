//! Error types for keystone-compiler.

/// Result type alias using [`CompileError`].
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors produced while compiling a resource graph.
///
/// Compilation aborts on the first error; no partial output is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// The node's `type` is not in the resource catalog.
    #[error("unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    /// A required property is absent from a node.
    #[error("validation failed for {node_id}: missing required field: {field}")]
    ValidationFailed {
        /// Node whose properties failed validation.
        node_id: String,
        /// Name of the missing property.
        field: &'static str,
    },

    /// A property is present but cannot be rendered.
    #[error("compilation failed for {node_id}: invalid property {field}: {reason}")]
    InvalidProperty {
        /// Node carrying the property.
        node_id: String,
        /// Property name.
        field: String,
        /// What is wrong with the value.
        reason: String,
    },
}

impl CompileError {
    /// Create an invalid property error.
    #[must_use]
    pub fn invalid_property(
        node_id: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            node_id: node_id.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Identifier of the node that caused the error, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::UnsupportedResourceType(_) => None,
            Self::ValidationFailed { node_id, .. } | Self::InvalidProperty { node_id, .. } => {
                Some(node_id)
            }
        }
    }
}
