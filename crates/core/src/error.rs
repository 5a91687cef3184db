//! Fehlertypen fuer Kanalfunk
//!
//! Zentraler Fehler-Enum der alle Fehlerzustaende der Steuerungsebene abdeckt.
//! Die HTTP-Grenze bildet die Varianten ueber [`KanalfunkError::http_status`] ab.

use crate::types::PlaybackStatus;
use thiserror::Error;

/// Globaler Result-Alias fuer Kanalfunk
pub type Result<T> = std::result::Result<T, KanalfunkError>;

/// Alle moeglichen Fehler im Kanalfunk-System
#[derive(Debug, Error)]
pub enum KanalfunkError {
    // --- Zulassung ---
    #[error("Rate Limit ueberschritten: bitte warte {retry_after_secs} Sekunden")]
    ZulassungAbgelehnt {
        retry_after_secs: u64,
        limit: u32,
        reset_unix: i64,
    },

    #[error("Infrastruktur nicht verfuegbar: {0}")]
    InfrastrukturNichtVerfuegbar(String),

    // --- Eingaben ---
    #[error("Ungueltiges Argument: {0}")]
    UngueltigesArgument(String),

    #[error("Nicht unterstuetzt: {0}")]
    NichtUnterstuetzt(String),

    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Queue voll: maximal {max} Eintraege pro Kanal")]
    QueueVoll { max: usize },

    // --- Zustandsautomat ---
    #[error("Ungueltiger Zustandswechsel: {von} -> {nach}")]
    UngueltigerUebergang {
        von: PlaybackStatus,
        nach: PlaybackStatus,
    },

    // --- Quellen ---
    #[error("Quellenfehler: {0}")]
    QuellenFehler(String),

    #[error("Wiederverbindung erschoepft nach {versuche} Versuchen")]
    WiederholungenErschoepft { versuche: u32 },

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl KanalfunkError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Aufrufer es spaeter erneut versuchen kann
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::ZulassungAbgelehnt { .. }
                | Self::InfrastrukturNichtVerfuegbar(_)
                | Self::QuellenFehler(_)
                | Self::QueueVoll { .. }
        )
    }

    /// HTTP-Statuscode fuer die (externe) API-Grenze
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ZulassungAbgelehnt { .. } => 429,
            Self::InfrastrukturNichtVerfuegbar(_) => 503,
            Self::UngueltigesArgument(_) => 400,
            Self::NichtUnterstuetzt(_) => 422,
            Self::NichtGefunden(_) => 404,
            Self::QueueVoll { .. } | Self::UngueltigerUebergang { .. } => 409,
            Self::QuellenFehler(_) | Self::WiederholungenErschoepft { .. } => 502,
            Self::Intern(_) | Self::Anyhow(_) => 500,
        }
    }

    /// `Retry-After` in Sekunden, falls der Fehler eine Wartezeit vorgibt
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::ZulassungAbgelehnt {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
