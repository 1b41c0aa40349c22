/// Failure to decode an inbound frame into a [`crate::Message`].
///
/// Both variants are recoverable per frame: the channel that produced the
/// frame is still usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame carried a `type` tag outside the protocol's message set.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),
    /// The frame is not valid JSON, has no tag, or its payload does not match
    /// the schema for its tag.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl ProtocolError {
    pub(crate) fn malformed(tag: &str, reason: impl std::fmt::Display) -> Self {
        ProtocolError::Malformed(format!("`{tag}`: {reason}"))
    }
}
