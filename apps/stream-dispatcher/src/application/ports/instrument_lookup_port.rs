//! Instrument Lookup Port (Driven Port)
//!
//! Maps a ticker to the instruments it may denote.

use async_trait::async_trait;

use crate::domain::instrument::{InstrumentInfo, InstrumentType};

/// Lookup service error.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    /// The service could not be reached.
    #[error("Instrument lookup unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// The service answered with an error.
    #[error("Instrument lookup API error: {message}")]
    ApiError {
        /// Error details.
        message: String,
    },
}

/// Port for resolving tickers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentLookupPort: Send + Sync {
    /// Every instrument trading under `ticker`.
    ///
    /// `hint` may be used by the service to narrow the search; callers
    /// still filter the result themselves.
    async fn find_by_ticker(
        &self,
        ticker: &str,
        hint: Option<InstrumentType>,
    ) -> Result<Vec<InstrumentInfo>, LookupError>;
}
