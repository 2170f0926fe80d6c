//! Instrument Identifiers
//!
//! Declared identifiers (ticker, figi, instrument-uid) and the canonical
//! identities they resolve to.
//!
//! # Design
//!
//! A handler may be declared against a ticker, but tickers are only a
//! startup convenience: after resolution every handler is keyed by a
//! single [`CanonicalId`]. Incoming events carry an [`InstrumentRef`]
//! with whatever identifiers the venue sent, and routing looks up each of
//! them.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Instrument Type
// =============================================================================

/// Instrument type hint used to narrow ticker lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    /// Equity share.
    Share,
    /// Bond.
    Bond,
    /// Exchange-traded fund.
    Etf,
    /// Futures contract.
    Future,
    /// Option contract.
    Option,
    /// Currency pair.
    Currency,
}

impl InstrumentType {
    /// Get the wire name of the instrument type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Share => "share",
            Self::Bond => "bond",
            Self::Etf => "etf",
            Self::Future => "futures",
            Self::Option => "option",
            Self::Currency => "currency",
        }
    }

    /// Parse an instrument type, ignoring case.
    ///
    /// Returns `None` for unknown names.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "share" | "shares" => Some(Self::Share),
            "bond" | "bonds" => Some(Self::Bond),
            "etf" => Some(Self::Etf),
            "future" | "futures" => Some(Self::Future),
            "option" | "options" => Some(Self::Option),
            "currency" => Some(Self::Currency),
            _ => None,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Declared Key
// =============================================================================

/// An instrument identifier as declared by a handler, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstrumentKey {
    /// Exchange ticker, optionally with a type hint.
    Ticker {
        /// Ticker symbol (e.g. `SBER`, `SiH4`).
        ticker: String,
        /// Optional instrument type used to narrow the lookup.
        instrument_type: Option<InstrumentType>,
    },
    /// Financial Instrument Global Identifier.
    Figi(String),
    /// Venue-assigned instrument uid.
    InstrumentUid(String),
}

impl InstrumentKey {
    /// Create a ticker key without a type hint.
    #[must_use]
    pub fn ticker(ticker: impl Into<String>) -> Self {
        Self::Ticker {
            ticker: ticker.into(),
            instrument_type: None,
        }
    }

    /// Whether resolving this key requires an external lookup.
    #[must_use]
    pub const fn needs_lookup(&self) -> bool {
        matches!(self, Self::Ticker { .. })
    }

    /// The canonical identity of this key when no lookup is required.
    #[must_use]
    pub fn as_canonical(&self) -> Option<CanonicalId> {
        match self {
            Self::Ticker { .. } => None,
            Self::Figi(figi) => Some(CanonicalId::Figi(figi.clone())),
            Self::InstrumentUid(uid) => Some(CanonicalId::InstrumentUid(uid.clone())),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticker {
                ticker,
                instrument_type: Some(kind),
            } => write!(f, "ticker:{ticker}({kind})"),
            Self::Ticker { ticker, .. } => write!(f, "ticker:{ticker}"),
            Self::Figi(figi) => write!(f, "figi:{figi}"),
            Self::InstrumentUid(uid) => write!(f, "uid:{uid}"),
        }
    }
}

// =============================================================================
// Canonical Identity
// =============================================================================

/// The identity a resolved handler is keyed by at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CanonicalId {
    /// Keyed by figi.
    Figi(String),
    /// Keyed by instrument uid.
    InstrumentUid(String),
}

impl CanonicalId {
    /// The raw identifier value.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Figi(v) | Self::InstrumentUid(v) => v,
        }
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Figi(figi) => write!(f, "figi:{figi}"),
            Self::InstrumentUid(uid) => write!(f, "uid:{uid}"),
        }
    }
}

// =============================================================================
// Lookup Result
// =============================================================================

/// Instrument description returned by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    /// Ticker symbol.
    pub ticker: String,
    /// Class code (trading board).
    pub class_code: String,
    /// Figi.
    pub figi: String,
    /// Instrument uid.
    pub instrument_uid: String,
    /// Instrument type.
    pub instrument_type: InstrumentType,
}

impl InstrumentInfo {
    /// The canonical identity for this instrument.
    ///
    /// Ticker lookups always key handlers by instrument uid.
    #[must_use]
    pub fn canonical_id(&self) -> CanonicalId {
        CanonicalId::InstrumentUid(self.instrument_uid.clone())
    }
}

// =============================================================================
// Event Identity
// =============================================================================

/// Instrument identifiers carried by an incoming event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRef {
    /// Figi, if sent.
    pub figi: Option<String>,
    /// Instrument uid, if sent.
    pub instrument_uid: Option<String>,
}

impl InstrumentRef {
    /// Reference carrying both identifiers.
    #[must_use]
    pub fn new(figi: impl Into<String>, instrument_uid: impl Into<String>) -> Self {
        Self {
            figi: Some(figi.into()),
            instrument_uid: Some(instrument_uid.into()),
        }
    }

    /// Reference carrying only a figi.
    #[must_use]
    pub fn figi(figi: impl Into<String>) -> Self {
        Self {
            figi: Some(figi.into()),
            instrument_uid: None,
        }
    }

    /// Reference carrying only an instrument uid.
    #[must_use]
    pub fn uid(instrument_uid: impl Into<String>) -> Self {
        Self {
            figi: None,
            instrument_uid: Some(instrument_uid.into()),
        }
    }

    /// Every canonical identity this reference can match.
    #[must_use]
    pub fn canonical_ids(&self) -> Vec<CanonicalId> {
        let mut ids = Vec::with_capacity(2);
        if let Some(figi) = &self.figi {
            ids.push(CanonicalId::Figi(figi.clone()));
        }
        if let Some(uid) = &self.instrument_uid {
            ids.push(CanonicalId::InstrumentUid(uid.clone()));
        }
        ids
    }

    /// Whether this reference matches the given canonical identity.
    #[must_use]
    pub fn matches(&self, id: &CanonicalId) -> bool {
        match id {
            CanonicalId::Figi(figi) => self.figi.as_deref() == Some(figi.as_str()),
            CanonicalId::InstrumentUid(uid) => self.instrument_uid.as_deref() == Some(uid.as_str()),
        }
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.figi, &self.instrument_uid) {
            (Some(figi), Some(uid)) => write!(f, "figi:{figi}/uid:{uid}"),
            (Some(figi), None) => write!(f, "figi:{figi}"),
            (None, Some(uid)) => write!(f, "uid:{uid}"),
            (None, None) => f.write_str("unknown"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
