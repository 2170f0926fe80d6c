//! Demo wiring: a fixed instrument catalog, the handler set and a
//! synthetic event feed.

pub mod feed;
pub mod handlers;

use stream_dispatcher::{InstrumentInfo, InstrumentType};

/// Tickers the builder registrations watch.
pub const WATCHLIST: [&str; 4] = ["CRH4", "BRG4", "SBER", "LKOH"];

/// Demo account ids.
pub const ACCOUNTS: [&str; 2] = ["accountId", "accountId2"];

/// Instruments the static lookup knows about.
#[must_use]
pub fn catalog() -> Vec<InstrumentInfo> {
    [
        (
            "SiH4",
            "SPBFUT",
            "FUTSI0324000",
            "5bcff194-f10d-4314-b9ee-56b7fdb344fd",
            InstrumentType::Future,
        ),
        (
            "CRH4",
            "SPBFUT",
            "FUTCNY032400",
            "2c2d0de8-5e17-4fc5-b2a7-1f6b1a6a3f0d",
            InstrumentType::Future,
        ),
        (
            "BRG4",
            "SPBFUT",
            "FUTBR0224000",
            "8e7c9a1f-25a4-4b3f-9d2d-0bfa8c44f6b1",
            InstrumentType::Future,
        ),
        (
            "SBER",
            "TQBR",
            "BBG004730N88",
            "e6123145-9665-43e0-8413-cd61b8aa9b13",
            InstrumentType::Share,
        ),
        (
            "LKOH",
            "TQBR",
            "BBG004731032",
            "02cfdf61-6298-4c0f-a9ca-9cabc82afaf3",
            InstrumentType::Share,
        ),
    ]
    .into_iter()
    .map(|(ticker, class_code, figi, uid, instrument_type)| InstrumentInfo {
        ticker: ticker.to_string(),
        class_code: class_code.to_string(),
        figi: figi.to_string(),
        instrument_uid: uid.to_string(),
        instrument_type,
    })
    .collect()
}
