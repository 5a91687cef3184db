//! Befehls- und Antworttypen fuer den Dispatcher

use kanalfunk_core::{ChannelId, Identity, ItemId};
use kanalfunk_playback::{
    PrioritaetsStufe, QueueItem, QueueStatistik, SessionZustand, StreamQuelle,
};
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitEntscheidung;

/// Eingehende Anfrage: wer, welcher Kanal, was
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anfrage {
    pub identitaet: Identity,
    pub kanal_id: ChannelId,
    pub befehl: Befehl,
}

impl Anfrage {
    pub fn neu(identitaet: impl Into<String>, kanal_id: impl Into<String>, befehl: Befehl) -> Self {
        Self {
            identitaet: Identity::neu(identitaet),
            kanal_id: ChannelId::neu(kanal_id),
            befehl,
        }
    }
}

/// Alle Befehle die die Zulassungspruefung durchlaufen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "befehl", rename_all = "snake_case")]
pub enum Befehl {
    // --- Queue ---
    /// Titel einreihen
    Einreihen {
        payload_ref: String,
        #[serde(default)]
        titel: Option<String>,
        #[serde(default)]
        dauer_sekunden: Option<f64>,
        #[serde(default = "standard_prioritaet")]
        prioritaet: PrioritaetsStufe,
    },
    /// Wartenden Titel entfernen
    AusQueueEntfernen { item_id: ItemId },
    /// Wartende Titel auflisten
    QueueListe,
    /// Alle wartenden Titel verwerfen
    QueueLeeren,
    /// Verteilung auf die Prioritaetsstufen
    QueueStatistik,

    // --- Wiedergabe ---
    /// Transport-Steuerung der Session
    Steuerung { aktion: SteuerAktion },
    /// Zustand der Session abfragen
    Zustand,

    // --- Radio ---
    /// Radio-Quelle starten (ersetzt eine laufende)
    RadioStarten { url: String },
    /// Radio-Quelle stoppen
    RadioStoppen,
    /// Status der Radio-Quelle abfragen
    RadioStatus,
}

fn standard_prioritaet() -> PrioritaetsStufe {
    PrioritaetsStufe::Normal
}

impl Befehl {
    /// Kurzname fuer Logs und Metrik-Labels
    pub fn name(&self) -> &'static str {
        match self {
            Self::Einreihen { .. } => "einreihen",
            Self::AusQueueEntfernen { .. } => "queue_entfernen",
            Self::QueueListe => "queue_liste",
            Self::QueueLeeren => "queue_leeren",
            Self::QueueStatistik => "queue_statistik",
            Self::Steuerung { aktion } => aktion.name(),
            Self::Zustand => "zustand",
            Self::RadioStarten { .. } => "radio_starten",
            Self::RadioStoppen => "radio_stoppen",
            Self::RadioStatus => "radio_status",
        }
    }
}

/// Transport-Aktionen einer PlaybackSession
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "art", content = "wert", rename_all = "snake_case")]
pub enum SteuerAktion {
    Speed(f64),
    /// Relativer Sprung in Sekunden
    Seek(f64),
    Pausieren,
    Fortsetzen,
    /// Tonhoehe in Halbtoenen
    Pitch(i8),
    PitchKorrektur(bool),
    /// Equalizer-Preset nach Name (`flat`, `rock`, `voice`, ...)
    EqualizerPreset(String),
    /// Eigene Verstaerkung fuer alle zehn Baender in dB
    Equalizer(Vec<f64>),
    /// Aktuellen Titel ueberspringen
    Naechster,
}

impl SteuerAktion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Speed(_) => "speed",
            Self::Seek(_) => "seek",
            Self::Pausieren => "pausieren",
            Self::Fortsetzen => "fortsetzen",
            Self::Pitch(_) => "pitch",
            Self::PitchKorrektur(_) => "pitch_korrektur",
            Self::EqualizerPreset(_) => "equalizer_preset",
            Self::Equalizer(_) => "equalizer",
            Self::Naechster => "naechster",
        }
    }
}

/// Antworten des Dispatchers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum Antwort {
    /// `position` 0: der Titel wurde sofort geladen
    Eingereiht { item: QueueItem, position: usize },
    Entfernt { item: QueueItem },
    Queue { eintraege: Vec<QueueItem> },
    Geleert { anzahl: usize },
    Statistik { statistik: QueueStatistik },
    Zustand { zustand: SessionZustand },
    Seek {
        vorher: f64,
        nachher: f64,
        naechster: Option<QueueItem>,
    },
    Naechster { item: Option<QueueItem> },
    Radio { quelle: StreamQuelle },
    RadioGestoppt { war_aktiv: bool },
    RadioStatus { quelle: Option<StreamQuelle> },
}

/// Erfolgreiches Ergebnis inklusive Rate-Limit-Information fuer die Header
#[derive(Debug, Clone, PartialEq)]
pub struct Ausgang {
    pub antwort: Antwort,
    pub rate_limit: RateLimitEntscheidung,
}
