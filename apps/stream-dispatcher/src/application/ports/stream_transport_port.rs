//! Stream Transport Port (Driven Port)
//!
//! One logical bidirectional stream per category. The transport must
//! acknowledge a subscription before delivering its events and must report
//! disconnects explicitly.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::streaming::StreamEvent;
use crate::domain::subscription::SubscriptionGroup;

/// A message on an open category stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// The subscription was accepted.
    Acknowledged {
        /// Number of subscribed entries.
        subscribed: usize,
    },
    /// An event.
    Event(StreamEvent),
    /// The venue closed the stream.
    Disconnected {
        /// Reason given by the venue.
        reason: String,
    },
}

/// Stream of transport messages for one category.
pub type EventStream = BoxStream<'static, Result<TransportMessage, TransportError>>;

/// Transport error. Recoverable by resubscribing.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// The venue rejected the subscription.
    #[error("Subscription rejected: {message}")]
    Rejected {
        /// Error details.
        message: String,
    },

    /// A message could not be decoded.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error details.
        message: String,
    },
}

/// Port for opening category streams.
#[async_trait]
pub trait StreamTransportPort: Send + Sync {
    /// Send the subscription and return the message stream.
    async fn open(&self, group: &SubscriptionGroup) -> Result<EventStream, TransportError>;

    /// Unsubscribe on shutdown.
    async fn unsubscribe(&self, group: &SubscriptionGroup) -> Result<(), TransportError>;
}
