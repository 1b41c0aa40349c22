use crate::{connection::ConnectionHandle, error::SessionError};
use async_trait::async_trait;
use std::sync::Arc;
use vatel_types::Message;

/// Anything outbound messages can be sent through.
///
/// The audio ingress consumer and the tool-call coordinator only depend on
/// this trait, so they can run against a live [`ConnectionHandle`] or an
/// in-memory recorder.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), SessionError>;
}

#[async_trait]
impl MessageSink for ConnectionHandle {
    async fn send(&self, message: Message) -> Result<(), SessionError> {
        ConnectionHandle::send(self, message).await
    }
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    async fn send(&self, message: Message) -> Result<(), SessionError> {
        (**self).send(message).await
    }
}
