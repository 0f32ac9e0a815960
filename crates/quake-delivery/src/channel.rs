//! Messaging channel contract and outbound message shape

use crate::error::DeliveryError;
use async_trait::async_trait;
use quake_model::{ChatId, GeoPoint, MessageHandle};
use std::fmt;

/// Rendered image attachment
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    /// File name shown when sent as a document
    pub file_name: String,
    /// Encoded image bytes
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Extra sent after the alert text
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Location pin
    Location(GeoPoint),
    /// Image, sent as photo or document per subscriber preference
    Image(Image),
}

/// Rendered alert: text first, then attachments in order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundMessage {
    /// Message text, the only part later edits touch
    pub text: String,
    /// Follow-up attachments
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// Text-only message
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    /// Add attachment
    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Outbound messaging platform
///
/// Every call is one platform request. Implementations map platform
/// responses onto [`DeliveryError`], typically via
/// [`DeliveryError::from_platform`].
///
/// # Testing
///
/// Enable the `testing` feature to get `MockDeliveryChannel` via mockall.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send a new text message
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageHandle, DeliveryError>;

    /// Replace the text of a sent message
    async fn edit_text(&self, handle: MessageHandle, text: &str) -> Result<(), DeliveryError>;

    /// Send a location pin
    async fn send_location(&self, chat: ChatId, point: GeoPoint) -> Result<(), DeliveryError>;

    /// Send an image as a compressed photo
    async fn send_photo(&self, chat: ChatId, image: &Image) -> Result<(), DeliveryError>;

    /// Send an image as a file
    async fn send_document(&self, chat: ChatId, image: &Image) -> Result<(), DeliveryError>;
}
