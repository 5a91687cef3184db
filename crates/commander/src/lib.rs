//! kanalfunk-commander – Zulassung und Befehlsverteilung fuer Kanalfunk
//!
//! Jeder wiedergabeveraendernde Befehl laeuft durch den [`Dispatcher`]:
//! - **Zulassung**: Fixed-Window [`RateLimiter`] pro Identitaet
//! - **Serialisierung**: exklusive Sperre pro Kanal
//! - **Weiterleitung**: Queue, PlaybackSession oder Radio-Supervisor

pub mod commands;
pub mod rate_limit;

pub use commands::{Anfrage, Antwort, Ausgang, Befehl, Dispatcher, SteuerAktion};
pub use rate_limit::{
    FehlerStrategie, InMemoryZaehler, RateLimitEntscheidung, RateLimitKonfig, RateLimiter,
    ZaehlerSpeicher, ZaehlerStand,
};
