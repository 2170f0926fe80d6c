//! In-Memory Adapters
//!
//! Port implementations that keep everything in process: a scriptable
//! per-category transport and a fixed instrument catalog. Used by the demo
//! binary and the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::application::ports::{
    EventStream, InstrumentLookupPort, LookupError, StreamTransportPort, TransportError,
    TransportMessage,
};
use crate::domain::instrument::{InstrumentInfo, InstrumentType};
use crate::domain::streaming::{Category, StreamEvent};
use crate::domain::subscription::SubscriptionGroup;

// =============================================================================
// Transport
// =============================================================================

type FeedSender = mpsc::UnboundedSender<Result<TransportMessage, TransportError>>;

#[derive(Default)]
struct TransportState {
    feeds: HashMap<Category, FeedSender>,
    failing_opens: HashMap<Category, u32>,
    opened: Vec<SubscriptionGroup>,
    unsubscribed: Vec<SubscriptionGroup>,
}

/// Scriptable transport with one unbounded feed per open category.
///
/// Every `open` replaces the category's feed, so messages published after a
/// resubscription land on the new stream only.
pub struct InMemoryTransport {
    state: Mutex<TransportState>,
    auto_ack: bool,
    opens: watch::Sender<usize>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Transport that acknowledges every subscription as soon as it opens.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState::default()),
            auto_ack: true,
            opens: watch::Sender::new(0),
        }
    }

    /// Transport that waits for [`acknowledge`](Self::acknowledge).
    #[must_use]
    pub fn with_manual_ack() -> Self {
        Self {
            auto_ack: false,
            ..Self::new()
        }
    }

    /// Push an event onto its category's feed.
    ///
    /// Returns `false` if the category has no open feed.
    pub fn publish(&self, event: StreamEvent) -> bool {
        let category = event.category();
        self.send(category, Ok(TransportMessage::Event(event)))
    }

    /// Acknowledge the current subscription of a category.
    pub fn acknowledge(&self, category: Category) -> bool {
        let subscribed = self
            .state
            .lock()
            .opened
            .iter()
            .rev()
            .find(|group| group.category == category)
            .map_or(0, |group| group.params.len());
        self.send(category, Ok(TransportMessage::Acknowledged { subscribed }))
    }

    /// Close a category's feed with a disconnect notice.
    pub fn disconnect(&self, category: Category, reason: &str) -> bool {
        let sent = self.send(
            category,
            Ok(TransportMessage::Disconnected {
                reason: reason.to_string(),
            }),
        );
        self.state.lock().feeds.remove(&category);
        sent
    }

    /// Deliver a transport error on a category's feed.
    pub fn fail(&self, category: Category, error: TransportError) -> bool {
        self.send(category, Err(error))
    }

    /// Make the next `count` opens of a category fail.
    pub fn fail_next_opens(&self, category: Category, count: u32) {
        self.state.lock().failing_opens.insert(category, count);
    }

    /// Every subscription request seen, in order.
    #[must_use]
    pub fn opened(&self) -> Vec<SubscriptionGroup> {
        self.state.lock().opened.clone()
    }

    /// Number of subscription requests for a category.
    #[must_use]
    pub fn open_count(&self, category: Category) -> usize {
        self.state
            .lock()
            .opened
            .iter()
            .filter(|group| group.category == category)
            .count()
    }

    /// Every unsubscribe request seen, in order.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<SubscriptionGroup> {
        self.state.lock().unsubscribed.clone()
    }

    /// Wait until a category has been opened at least `count` times.
    pub async fn wait_for_open(&self, category: Category, count: usize) {
        let mut opens = self.opens.subscribe();
        while self.open_count(category) < count {
            if opens.changed().await.is_err() {
                return;
            }
        }
    }

    fn send(&self, category: Category, message: Result<TransportMessage, TransportError>) -> bool {
        self.state
            .lock()
            .feeds
            .get(&category)
            .is_some_and(|feed| feed.send(message).is_ok())
    }
}

#[async_trait]
impl StreamTransportPort for InMemoryTransport {
    async fn open(&self, group: &SubscriptionGroup) -> Result<EventStream, TransportError> {
        let result = {
            let mut state = self.state.lock();
            state.opened.push(group.clone());

            match state.failing_opens.get_mut(&group.category) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(TransportError::Connection {
                        message: format!("{} feed unavailable", group.category),
                    })
                }
                _ => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    if self.auto_ack {
                        let _ = tx.send(Ok(TransportMessage::Acknowledged {
                            subscribed: group.params.len(),
                        }));
                    }
                    state.feeds.insert(group.category, tx);
                    Ok(UnboundedReceiverStream::new(rx).boxed())
                }
            }
        };

        self.opens.send_modify(|count| *count += 1);
        result
    }

    async fn unsubscribe(&self, group: &SubscriptionGroup) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.unsubscribed.push(group.clone());
        state.feeds.remove(&group.category);
        Ok(())
    }
}

// =============================================================================
// Instrument Lookup
// =============================================================================

/// Lookup over a fixed catalog.
///
/// The type hint is ignored; the resolver filters candidates itself.
#[derive(Debug, Default)]
pub struct StaticInstrumentLookup {
    catalog: Vec<InstrumentInfo>,
    lookups: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticInstrumentLookup {
    /// Create a lookup over `catalog`.
    #[must_use]
    pub const fn new(catalog: Vec<InstrumentInfo>) -> Self {
        Self {
            catalog,
            lookups: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Answer every query after `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of queries answered.
    #[must_use]
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstrumentLookupPort for StaticInstrumentLookup {
    async fn find_by_ticker(
        &self,
        ticker: &str,
        _hint: Option<InstrumentType>,
    ) -> Result<Vec<InstrumentInfo>, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .catalog
            .iter()
            .filter(|info| info.ticker.eq_ignore_ascii_case(ticker))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::instrument::CanonicalId;
    use crate::domain::subscription::SubscriptionParams;

    fn trades_group() -> SubscriptionGroup {
        SubscriptionGroup {
            category: Category::Trades,
            params: SubscriptionParams::Instruments(BTreeSet::from([CanonicalId::InstrumentUid(
                "uid-sber".to_string(),
            )])),
        }
    }

    #[tokio::test]
    async fn open_acknowledges_and_records() {
        let transport = InMemoryTransport::new();
        let mut stream = transport.open(&trades_group()).await.unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            TransportMessage::Acknowledged { subscribed: 1 }
        );
        assert_eq!(transport.open_count(Category::Trades), 1);
    }

    #[tokio::test]
    async fn scripted_open_failures() {
        let transport = InMemoryTransport::new();
        transport.fail_next_opens(Category::Trades, 1);

        assert!(transport.open(&trades_group()).await.is_err());
        tokio_test::assert_ok!(transport.open(&trades_group()).await);
        assert_eq!(transport.open_count(Category::Trades), 2);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_feed() {
        let transport = InMemoryTransport::with_manual_ack();
        let mut stream = transport.open(&trades_group()).await.unwrap();

        tokio_test::assert_ok!(transport.unsubscribe(&trades_group()).await);
        assert!(stream.next().await.is_none());
        assert_eq!(transport.unsubscribed().len(), 1);
    }

    #[tokio::test]
    async fn static_lookup_matches_ticker_case_insensitively() {
        let lookup = StaticInstrumentLookup::new(vec![InstrumentInfo {
            ticker: "SiH4".to_string(),
            class_code: "SPBFUT".to_string(),
            figi: "FUTSI0324000".to_string(),
            instrument_uid: "uid-sih4".to_string(),
            instrument_type: InstrumentType::Future,
        }]);

        let found = lookup.find_by_ticker("sih4", None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(lookup.find_by_ticker("SBER", None).await.unwrap().is_empty());
        assert_eq!(lookup.lookup_count(), 2);
    }
}
