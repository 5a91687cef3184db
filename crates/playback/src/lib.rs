//! kanalfunk-playback – Wiedergabe-Kern
//!
//! Enthaelt alles was pro Kanal Zustand haelt:
//! - [`PriorityQueue`] – wartende Titel in drei Prioritaetsstufen
//! - [`PlaybackSession`] – Transport-Zustandsautomat (Tempo, Seek, Pause)
//! - [`EqualizerZustand`] – 10-Band-Equalizer mit Presets
//! - [`StreamSourceManager`] – Radio-Quellen mit begrenzter Wiederverbindung
//! - [`AudioEngine`] – Schnittstelle zur externen Audio-Verarbeitung

pub mod engine;
pub mod equalizer;
pub mod queue;
pub mod radio;
pub mod session;

pub use engine::{
    AudioEngine, AudioFilter, EngineBefehl, LoggendeEngine, TempoFilter, MAX_SPEED, MIN_SPEED,
};
pub use equalizer::{EqualizerPreset, EqualizerZustand, BAND_ANZAHL, PRESETS};
pub use queue::{NeuerEintrag, PrioritaetsStufe, PriorityQueue, QueueItem, QueueKonfig, QueueStatistik};
pub use radio::{
    url_validieren, HttpStreamVerbinder, QuellenArt, QuellenStatus, RadioKonfig, StreamQuelle,
    StreamSourceManager, StreamVerbinder,
};
pub use session::{
    AktuelleQuelle, GeteilteSession, PlaybackSession, SeekErgebnis, SessionRegistry,
    SessionZustand, WiedergabeKonfig,
};
