//! kanalfunk-core – Gemeinsame Typen, Ereignisse und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Kanalfunk-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{KanalfunkError, Result};
pub use event::{BroadcastBus, EskalationsEreignis, EventBus, KanalfunkEvent, ZustandGeaendert};
pub use types::{ChannelId, Identity, ItemId, PlaybackStatus};
