//! Instrument Key Resolver
//!
//! Turns declared identifiers into canonical ids. Figi and instrument-uid
//! keys pass through untouched. Tickers are looked up at most once per
//! (ticker, type hint) for the life of the resolver.
//!
//! # Single-flight
//!
//! The first request for a query stores a [`Shared`] lookup future in the
//! cache; every later or concurrent request for the same query awaits a
//! clone of it, so all callers observe the same result, success or
//! failure. A ticker with and without a hint are distinct queries: a hinted
//! answer never stands in for an unhinted one, so a ticker that is
//! ambiguous on its own stays ambiguous.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::ports::{InstrumentLookupPort, LookupError};
use crate::domain::instrument::{CanonicalId, InstrumentInfo, InstrumentKey, InstrumentType};
use crate::infrastructure::metrics::{self, LookupOutcome};

// =============================================================================
// Errors
// =============================================================================

/// Ticker resolution failure. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No instrument trades under the ticker (with the given hint).
    #[error("no instrument found for ticker {ticker}{}", hint_suffix(.hint.as_ref()))]
    NotFound {
        /// Ticker.
        ticker: String,
        /// Type hint used.
        hint: Option<InstrumentType>,
    },

    /// Several distinct instruments match.
    #[error("ticker {ticker} is ambiguous: {}", .candidates.join(", "))]
    Ambiguous {
        /// Ticker.
        ticker: String,
        /// Matching instruments, as `class_code/type/uid`.
        candidates: Vec<String>,
    },

    /// The lookup service failed.
    #[error("lookup for ticker {ticker} failed: {source}")]
    Lookup {
        /// Ticker.
        ticker: String,
        /// Underlying error.
        source: LookupError,
    },
}

fn hint_suffix(hint: Option<&InstrumentType>) -> String {
    hint.map(|kind| format!(" ({kind})")).unwrap_or_default()
}

// =============================================================================
// Resolver
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TickerQuery {
    ticker: String,
    hint: Option<InstrumentType>,
}

impl fmt::Display for TickerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ticker, hint_suffix(self.hint.as_ref()))
    }
}

type LookupFuture = Shared<BoxFuture<'static, Result<InstrumentInfo, ResolveError>>>;

/// Single-flight resolver over an [`InstrumentLookupPort`].
pub struct InstrumentKeyResolver {
    lookup: Arc<dyn InstrumentLookupPort>,
    cache: Mutex<HashMap<TickerQuery, LookupFuture>>,
}

impl InstrumentKeyResolver {
    /// Create a resolver with an empty cache.
    #[must_use]
    pub fn new(lookup: Arc<dyn InstrumentLookupPort>) -> Self {
        Self {
            lookup,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a declared key to its canonical id.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if a ticker lookup fails, finds nothing,
    /// or is ambiguous.
    pub async fn resolve(&self, key: &InstrumentKey) -> Result<CanonicalId, ResolveError> {
        match key {
            InstrumentKey::Ticker {
                ticker,
                instrument_type,
            } => Ok(self
                .resolve_ticker(ticker, *instrument_type)
                .await?
                .canonical_id()),
            InstrumentKey::Figi(figi) => Ok(CanonicalId::Figi(figi.clone())),
            InstrumentKey::InstrumentUid(uid) => Ok(CanonicalId::InstrumentUid(uid.clone())),
        }
    }

    /// Resolve a ticker to the single instrument it denotes.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] if the lookup fails, finds nothing, or is
    /// ambiguous.
    pub async fn resolve_ticker(
        &self,
        ticker: &str,
        hint: Option<InstrumentType>,
    ) -> Result<InstrumentInfo, ResolveError> {
        let query = TickerQuery {
            ticker: ticker.to_string(),
            hint,
        };
        self.lookup_future(query).await
    }

    /// Number of distinct queries seen.
    #[must_use]
    pub fn cached_queries(&self) -> usize {
        self.cache.lock().len()
    }

    fn lookup_future(&self, query: TickerQuery) -> LookupFuture {
        let mut cache = self.cache.lock();

        if let Some(existing) = cache.get(&query) {
            metrics::record_lookup(LookupOutcome::Coalesced);
            debug!(query = %query, "Joining existing instrument lookup");
            return existing.clone();
        }

        metrics::record_lookup(LookupOutcome::Issued);
        info!(query = %query, "Looking up instrument");

        let future = Self::issue(Arc::clone(&self.lookup), query.clone())
            .boxed()
            .shared();
        cache.insert(query, future.clone());
        future
    }

    async fn issue(
        lookup: Arc<dyn InstrumentLookupPort>,
        query: TickerQuery,
    ) -> Result<InstrumentInfo, ResolveError> {
        let result = match lookup.find_by_ticker(&query.ticker, query.hint).await {
            Ok(candidates) => select_candidate(&query, candidates),
            Err(source) => Err(ResolveError::Lookup {
                ticker: query.ticker.clone(),
                source,
            }),
        };

        match &result {
            Ok(info) => debug!(
                query = %query,
                figi = %info.figi,
                instrument_uid = %info.instrument_uid,
                "Instrument resolved"
            ),
            Err(e) => {
                metrics::record_lookup(LookupOutcome::Failed);
                warn!(query = %query, error = %e, "Instrument resolution failed");
            }
        }
        result
    }
}

impl fmt::Debug for InstrumentKeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentKeyResolver")
            .field("cached_queries", &self.cached_queries())
            .finish_non_exhaustive()
    }
}

/// Narrow lookup candidates to exactly one instrument.
fn select_candidate(
    query: &TickerQuery,
    candidates: Vec<InstrumentInfo>,
) -> Result<InstrumentInfo, ResolveError> {
    let mut matching: Vec<InstrumentInfo> = Vec::new();
    for candidate in candidates {
        if !candidate.ticker.eq_ignore_ascii_case(&query.ticker) {
            continue;
        }
        if query
            .hint
            .is_some_and(|hint| hint != candidate.instrument_type)
        {
            continue;
        }
        if matching
            .iter()
            .any(|seen| seen.instrument_uid == candidate.instrument_uid)
        {
            continue;
        }
        matching.push(candidate);
    }

    match matching.len() {
        0 => Err(ResolveError::NotFound {
            ticker: query.ticker.clone(),
            hint: query.hint,
        }),
        1 => Ok(matching.remove(0)),
        _ => Err(ResolveError::Ambiguous {
            ticker: query.ticker.clone(),
            candidates: matching
                .iter()
                .map(|info| {
                    format!(
                        "{}/{}/{}",
                        info.class_code, info.instrument_type, info.instrument_uid
                    )
                })
                .collect(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::application::ports::MockInstrumentLookupPort;

    fn info(ticker: &str, uid: &str, instrument_type: InstrumentType) -> InstrumentInfo {
        InstrumentInfo {
            ticker: ticker.to_string(),
            class_code: "TQBR".to_string(),
            figi: format!("FIGI-{uid}"),
            instrument_uid: uid.to_string(),
            instrument_type,
        }
    }

    #[tokio::test]
    async fn figi_and_uid_skip_lookup() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker().never();
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        assert_eq!(
            resolver
                .resolve(&InstrumentKey::Figi("BBG004730N88".to_string()))
                .await
                .unwrap(),
            CanonicalId::Figi("BBG004730N88".to_string())
        );
        assert_eq!(
            resolver
                .resolve(&InstrumentKey::InstrumentUid("uid-1".to_string()))
                .await
                .unwrap(),
            CanonicalId::InstrumentUid("uid-1".to_string())
        );
    }

    #[tokio::test]
    async fn concurrent_requests_issue_one_lookup() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker()
            .times(1)
            .returning(|_, _| Ok(vec![info("SBER", "sber-uid", InstrumentType::Share)]));
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        let key = InstrumentKey::ticker("SBER");
        let results = join_all((0..16).map(|_| resolver.resolve(&key))).await;

        for result in results {
            assert_eq!(
                result.unwrap(),
                CanonicalId::InstrumentUid("sber-uid".to_string())
            );
        }
        assert_eq!(resolver.cached_queries(), 1);
    }

    #[tokio::test]
    async fn failures_are_shared_by_every_waiter() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker().times(1).returning(|_, _| {
            Err(LookupError::Unavailable {
                message: "timeout".to_string(),
            })
        });
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        let first = resolver.resolve_ticker("LKOH", None).await.unwrap_err();
        let second = resolver.resolve_ticker("LKOH", None).await.unwrap_err();
        assert_eq!(first, second);
        assert!(matches!(first, ResolveError::Lookup { .. }));
    }

    #[tokio::test]
    async fn hint_discards_other_types() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker().times(1).returning(|_, _| {
            Ok(vec![
                info("SiH4", "si-future", InstrumentType::Future),
                info("SiH4", "si-option", InstrumentType::Option),
            ])
        });
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        let resolved = resolver
            .resolve_ticker("SiH4", Some(InstrumentType::Future))
            .await
            .unwrap();
        assert_eq!(resolved.instrument_uid, "si-future");
    }

    #[tokio::test]
    async fn ambiguous_without_hint() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker().times(1).returning(|_, _| {
            Ok(vec![
                info("SiH4", "si-future", InstrumentType::Future),
                info("SiH4", "si-option", InstrumentType::Option),
            ])
        });
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        let err = resolver.resolve_ticker("SiH4", None).await.unwrap_err();
        match err {
            ResolveError::Ambiguous { ticker, candidates } => {
                assert_eq!(ticker, "SiH4");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_names_the_ticker() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker()
            .times(1)
            .returning(|_, _| Ok(vec![info("SBERP", "sberp-uid", InstrumentType::Share)]));
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        let err = resolver
            .resolve_ticker("SBER", Some(InstrumentType::Share))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no instrument found for ticker SBER (share)");
    }

    #[tokio::test]
    async fn hinted_lookup_does_not_settle_an_ambiguous_unhinted_ticker() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker().times(2).returning(|_, _| {
            Ok(vec![
                info("SiH4", "si-future", InstrumentType::Future),
                info("SiH4", "si-option", InstrumentType::Option),
            ])
        });
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));

        let hinted = resolver
            .resolve_ticker("SiH4", Some(InstrumentType::Future))
            .await
            .unwrap();
        assert_eq!(hinted.instrument_uid, "si-future");

        let err = resolver.resolve_ticker("SiH4", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { .. }));
        assert_eq!(resolver.cached_queries(), 2);
    }

    #[tokio::test]
    async fn duplicate_candidates_are_not_ambiguous() {
        let mut mock = MockInstrumentLookupPort::new();
        mock.expect_find_by_ticker().times(1).returning(|_, _| {
            Ok(vec![
                info("SBER", "sber-uid", InstrumentType::Share),
                info("sber", "sber-uid", InstrumentType::Share),
            ])
        });
        let resolver = InstrumentKeyResolver::new(Arc::new(mock));
        assert!(resolver.resolve_ticker("SBER", None).await.is_ok());
    }
}
