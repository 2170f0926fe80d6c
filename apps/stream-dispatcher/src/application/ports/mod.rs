//! Port Interfaces
//!
//! Contracts the infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `InstrumentLookupPort`: ticker to instrument lookup
//! - `StreamTransportPort`: per-category event streams from the venue

mod instrument_lookup_port;
mod stream_transport_port;

#[cfg(test)]
pub use instrument_lookup_port::MockInstrumentLookupPort;
pub use instrument_lookup_port::{InstrumentLookupPort, LookupError};
pub use stream_transport_port::{EventStream, StreamTransportPort, TransportError, TransportMessage};
