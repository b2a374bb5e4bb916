//! Messaging: template catalogue and the WhatsApp gateway client.

use thiserror::Error;

mod delivery;
mod templates;

pub use delivery::{DeliveryReceipt, MessageSender, WhatsAppClient, WhatsAppClientConfig};
pub use templates::{required_slots, MessageContent, TemplateExtras, TemplateRegistry};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("no template configured for notification kind {0}")]
    MissingTemplate(String),

    #[error("gateway client error: {0}")]
    Client(#[from] anyhow::Error),
}
