//! Event-Bus fuer ausgehende Ereignisse
//!
//! Zustandswechsel der PlaybackSessions und Eskalationen des Radio-Supervisors
//! werden ueber den Bus an Abonnenten verteilt (WebSocket-Fan-out,
//! Benachrichtigungen, Metriken). Die Standard-Implementierung nutzt
//! einen tokio-Broadcast-Kanal.

use crate::error::KanalfunkError;
use crate::types::{ChannelId, PlaybackStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Kapazitaet des Broadcast-Kanals; langsame Abonnenten erhalten `Lagged`
pub const EVENT_KANAL_KAPAZITAET: usize = 256;

/// `state-changed` – wird bei jedem Zustandswechsel einer Session gesendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZustandGeaendert {
    pub kanal_id: ChannelId,
    pub status: PlaybackStatus,
    pub position_sekunden: f64,
    pub speed: f64,
}

/// Einmalige Meldung wenn die automatische Wiederverbindung erschoepft ist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EskalationsEreignis {
    pub kanal_id: ChannelId,
    /// URL der ausgefallenen Quelle
    pub url: String,
    pub grund: String,
    pub versuche: u32,
    pub zeitpunkt: DateTime<Utc>,
}

impl EskalationsEreignis {
    /// Fehler den die betroffene Session als Ursache uebernimmt
    pub fn als_fehler(&self) -> KanalfunkError {
        KanalfunkError::WiederholungenErschoepft {
            versuche: self.versuche,
        }
    }
}

/// Alle Ereignisse die ueber den Bus fliessen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum KanalfunkEvent {
    /// Eine PlaybackSession hat ihren Zustand gewechselt
    ZustandGeaendert(ZustandGeaendert),
    /// Eine Radio-Quelle ist endgueltig ausgefallen
    Eskalation(EskalationsEreignis),
    /// Eine Radio-Quelle ist (wieder) verbunden
    QuelleVerbunden { kanal_id: ChannelId, url: String },
    /// Ein Wiederverbindungsversuch wurde eingeplant
    Wiederverbindung {
        kanal_id: ChannelId,
        versuch: u32,
        grund: String,
    },
}

impl KanalfunkEvent {
    /// Kanal auf den sich das Ereignis bezieht
    pub fn kanal_id(&self) -> &ChannelId {
        match self {
            Self::ZustandGeaendert(e) => &e.kanal_id,
            Self::Eskalation(e) => &e.kanal_id,
            Self::QuelleVerbunden { kanal_id, .. } | Self::Wiederverbindung { kanal_id, .. } => {
                kanal_id
            }
        }
    }
}

/// Trait fuer den Event-Bus
///
/// Senden ist nicht-blockierend; ohne Abonnenten wird das Ereignis verworfen.
pub trait EventBus: Send + Sync + 'static {
    /// Sendet ein Ereignis an alle Abonnenten
    fn senden(&self, event: KanalfunkEvent);

    /// Abonniert alle zukuenftigen Ereignisse
    fn abonnieren(&self) -> broadcast::Receiver<KanalfunkEvent>;
}

/// Event-Bus auf Basis von `tokio::sync::broadcast`
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<KanalfunkEvent>,
}

impl BroadcastBus {
    pub fn neu() -> Self {
        Self::mit_kapazitaet(EVENT_KANAL_KAPAZITAET)
    }

    pub fn mit_kapazitaet(kapazitaet: usize) -> Self {
        let (tx, _) = broadcast::channel(kapazitaet);
        Self { tx }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::neu()
    }
}

impl EventBus for BroadcastBus {
    fn senden(&self, event: KanalfunkEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Keine Abonnenten – Ereignis verworfen");
        }
    }

    fn abonnieren(&self) -> broadcast::Receiver<KanalfunkEvent> {
        self.tx.subscribe()
    }
}
