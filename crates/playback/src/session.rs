//! PlaybackSession – Transport-Zustandsautomat pro Kanal
//!
//! ```text
//! Idle -> Loading -> Playing <-> Paused
//!                       |   \     |
//!                       |    Seeking
//!                       v
//!                     Ended -> Loading (naechster Titel)
//! ```
//!
//! Ein neuer Queue-Eintrag startet eine stehende Session (`Idle`, `Ended`,
//! `Error`) sofort. `Error` ist aus jedem aktiven Zustand erreichbar. Ungueltige Wechsel sind
//! Programmierfehler: sie werden mit `error!` protokolliert und als
//! [`KanalfunkError::UngueltigerUebergang`] zurueckgegeben.
//!
//! Die Session selbst ist nicht synchronisiert. Exklusiver Zugriff pro Kanal
//! entsteht ueber den `tokio::sync::Mutex` in der [`SessionRegistry`].

use crate::engine::{
    AudioEngine, AudioFilter, EngineBefehl, TempoFilter, MAX_PITCH_HALBTOENE, MAX_SPEED, MIN_SPEED,
};
use crate::equalizer::EqualizerZustand;
use crate::queue::{PriorityQueue, QueueItem};
use dashmap::DashMap;
use kanalfunk_core::{
    ChannelId, EventBus, KanalfunkError, KanalfunkEvent, PlaybackStatus, Result, ZustandGeaendert,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Startwerte fuer neu angelegte Sessions
#[derive(Debug, Clone, Copy)]
pub struct WiedergabeKonfig {
    pub standard_speed: f64,
    pub pitch_korrektur: bool,
}

impl Default for WiedergabeKonfig {
    fn default() -> Self {
        Self {
            standard_speed: 1.0,
            pitch_korrektur: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Was die Session gerade abspielt
#[derive(Debug, Clone, PartialEq)]
pub enum AktuelleQuelle {
    /// Titel aus der Queue (feste Laenge, spulbar)
    Titel(QueueItem),
    /// Live-Radio (keine Laenge, nicht spulbar)
    Radio { url: String },
}

impl AktuelleQuelle {
    fn bezeichnung(&self) -> String {
        match self {
            Self::Titel(item) => item.titel.clone().unwrap_or_else(|| item.payload_ref.clone()),
            Self::Radio { url } => url.clone(),
        }
    }
}

/// Snapshot einer Session (`getState`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionZustand {
    pub kanal_id: ChannelId,
    pub status: PlaybackStatus,
    pub position_sekunden: f64,
    /// None bei Live-Quellen oder unbekannter Laenge
    pub dauer_sekunden: Option<f64>,
    pub speed: f64,
    pub pitch_halbtoene: i8,
    pub pitch_korrektur: bool,
    pub equalizer: EqualizerZustand,
    pub aktuell: Option<String>,
    pub live: bool,
    /// Ursache des letzten Fehlers, bis eine neue Quelle geladen wird
    pub fehler: Option<String>,
}

/// Ergebnis eines Seek-Befehls
#[derive(Debug, Clone, PartialEq)]
pub struct SeekErgebnis {
    pub vorher: f64,
    pub nachher: f64,
    /// Gesetzt wenn der Seek ueber das Ende hinausging und der naechste Titel geladen wurde
    pub naechster: Option<QueueItem>,
}

/// Erlaubte Zustandswechsel
fn ist_erlaubt(von: PlaybackStatus, nach: PlaybackStatus) -> bool {
    use PlaybackStatus::*;
    match (von, nach) {
        (Idle | Ended | Error, Loading) => true,
        (Loading, Playing | Ended) => true,
        (Playing, Paused | Seeking | Ended) => true,
        (Paused, Playing | Seeking | Ended) => true,
        (Seeking, Playing | Paused | Ended) => true,
        (Idle | Loading | Playing | Paused | Seeking, Error) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// PlaybackSession
// ---------------------------------------------------------------------------

pub struct PlaybackSession {
    kanal_id: ChannelId,
    status: PlaybackStatus,
    speed: f64,
    pitch_korrektur: bool,
    pitch_halbtoene: i8,
    equalizer: EqualizerZustand,
    aktuelle_quelle: Option<AktuelleQuelle>,
    position_sekunden: f64,
    dauer_sekunden: Option<f64>,
    letzter_fehler: Option<String>,
    engine: Arc<dyn AudioEngine>,
    bus: Arc<dyn EventBus>,
}

impl PlaybackSession {
    pub fn neu(
        kanal_id: ChannelId,
        konfig: &WiedergabeKonfig,
        engine: Arc<dyn AudioEngine>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            kanal_id,
            status: PlaybackStatus::Idle,
            speed: konfig.standard_speed,
            pitch_korrektur: konfig.pitch_korrektur,
            pitch_halbtoene: 0,
            equalizer: EqualizerZustand::default(),
            aktuelle_quelle: None,
            position_sekunden: 0.0,
            dauer_sekunden: None,
            letzter_fehler: None,
            engine,
            bus,
        }
    }

    pub fn kanal_id(&self) -> &ChannelId {
        &self.kanal_id
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn position(&self) -> f64 {
        self.position_sekunden
    }

    pub fn aktuelle_quelle(&self) -> Option<&AktuelleQuelle> {
        self.aktuelle_quelle.as_ref()
    }

    pub fn ist_live(&self) -> bool {
        matches!(self.aktuelle_quelle, Some(AktuelleQuelle::Radio { .. }))
    }

    /// true wenn genau diese Radio-URL die aktuelle Quelle ist
    pub fn spielt_live(&self, url: &str) -> bool {
        matches!(&self.aktuelle_quelle, Some(AktuelleQuelle::Radio { url: aktuell }) if aktuell == url)
    }

    pub fn equalizer(&self) -> &EqualizerZustand {
        &self.equalizer
    }

    fn filter(&self) -> AudioFilter {
        AudioFilter {
            tempo: TempoFilter {
                speed: self.speed,
                pitch_korrektur: self.pitch_korrektur,
                pitch_halbtoene: self.pitch_halbtoene,
            },
            equalizer: self.equalizer.baender,
        }
    }

    fn engine(&self, befehl: EngineBefehl) {
        self.engine.anwenden(&self.kanal_id, befehl);
    }

    /// Fuehrt einen Zustandswechsel durch und sendet `state-changed`
    fn uebergang(&mut self, nach: PlaybackStatus) -> Result<()> {
        let von = self.status;
        if !ist_erlaubt(von, nach) {
            tracing::error!(
                kanal_id = %self.kanal_id,
                von = %von,
                nach = %nach,
                "Ungueltiger Zustandswechsel"
            );
            return Err(KanalfunkError::UngueltigerUebergang { von, nach });
        }

        self.status = nach;
        tracing::debug!(kanal_id = %self.kanal_id, von = %von, nach = %nach, "Zustandswechsel");
        self.bus
            .senden(KanalfunkEvent::ZustandGeaendert(ZustandGeaendert {
                kanal_id: self.kanal_id.clone(),
                status: nach,
                position_sekunden: self.position_sekunden,
                speed: self.speed,
            }));
        Ok(())
    }

    /// Laedt eine neue Quelle (Titel oder Radio) und wechselt nach `Loading`
    fn laden(&mut self, quelle: AktuelleQuelle) -> Result<()> {
        let (ziel, dauer) = match &quelle {
            AktuelleQuelle::Titel(item) => (item.payload_ref.clone(), item.dauer_sekunden),
            AktuelleQuelle::Radio { url } => (url.clone(), None),
        };

        self.position_sekunden = 0.0;
        self.dauer_sekunden = dauer;
        self.letzter_fehler = None;
        self.aktuelle_quelle = Some(quelle);
        self.uebergang(PlaybackStatus::Loading)?;

        self.engine(EngineBefehl::Laden {
            quelle: ziel,
            start_sekunden: 0.0,
            filter: self.filter(),
        });
        Ok(())
    }

    /// Beendet die aktuelle Quelle falls eine aktiv ist
    fn aktuelle_beenden(&mut self) -> Result<()> {
        if self.status.ist_aktiv() {
            if let Some(dauer) = self.dauer_sekunden {
                self.position_sekunden = dauer;
            }
            self.uebergang(PlaybackStatus::Ended)?;
            self.engine(EngineBefehl::Stoppen);
        }
        Ok(())
    }

    /// Laedt den naechsten Titel aus der Queue; leer = bleibt stehen
    fn weiterschalten(&mut self, queue: &PriorityQueue) -> Result<Option<QueueItem>> {
        match queue.pop(&self.kanal_id) {
            Some(item) => {
                tracing::info!(
                    kanal_id = %self.kanal_id,
                    item_id = %item.id,
                    "Naechster Titel wird geladen"
                );
                self.laden(AktuelleQuelle::Titel(item.clone()))?;
                Ok(Some(item))
            }
            None => {
                tracing::info!(kanal_id = %self.kanal_id, "Queue leer – Wiedergabe beendet");
                self.aktuelle_quelle = None;
                self.dauer_sekunden = None;
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transport-Befehle
    // -----------------------------------------------------------------------

    /// Setzt das Wiedergabetempo (0.5..=2.0), bleibt fuer folgende Titel erhalten
    pub fn speed_setzen(&mut self, speed: f64) -> Result<()> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(KanalfunkError::UngueltigesArgument(format!(
                "speed muss zwischen {MIN_SPEED} und {MAX_SPEED} liegen, erhalten: {speed}"
            )));
        }

        self.speed = speed;
        if self.status.ist_aktiv() {
            self.engine(EngineBefehl::Filter(self.filter()));
        }
        tracing::info!(kanal_id = %self.kanal_id, speed, "Tempo gesetzt");
        Ok(())
    }

    /// Setzt die Tonhoehenverschiebung in Halbtoenen (-12..=12)
    pub fn pitch_setzen(&mut self, halbtoene: i8) -> Result<()> {
        if !(-MAX_PITCH_HALBTOENE..=MAX_PITCH_HALBTOENE).contains(&halbtoene) {
            return Err(KanalfunkError::UngueltigesArgument(format!(
                "pitch muss zwischen -{MAX_PITCH_HALBTOENE} und {MAX_PITCH_HALBTOENE} liegen, erhalten: {halbtoene}"
            )));
        }

        self.pitch_halbtoene = halbtoene;
        if self.status.ist_aktiv() {
            self.engine(EngineBefehl::Filter(self.filter()));
        }
        tracing::info!(kanal_id = %self.kanal_id, halbtoene, "Tonhoehe gesetzt");
        Ok(())
    }

    pub fn pitch_korrektur_setzen(&mut self, aktiv: bool) {
        self.pitch_korrektur = aktiv;
        if self.status.ist_aktiv() {
            self.engine(EngineBefehl::Filter(self.filter()));
        }
    }

    /// Aktiviert ein Equalizer-Preset, bleibt fuer folgende Titel erhalten
    pub fn equalizer_preset_setzen(&mut self, name: &str) -> Result<()> {
        self.equalizer_uebernehmen(EqualizerZustand::aus_preset(name)?);
        Ok(())
    }

    /// Setzt eigene Werte fuer alle zehn Baender
    pub fn equalizer_setzen(&mut self, baender: &[f64]) -> Result<()> {
        self.equalizer_uebernehmen(EqualizerZustand::benutzerdefiniert(baender)?);
        Ok(())
    }

    fn equalizer_uebernehmen(&mut self, equalizer: EqualizerZustand) {
        tracing::info!(kanal_id = %self.kanal_id, preset = %equalizer.preset, "Equalizer gesetzt");
        self.equalizer = equalizer;
        if self.status.ist_aktiv() {
            self.engine(EngineBefehl::Filter(self.filter()));
        }
    }

    /// Springt um `delta_sekunden` relativ zur aktuellen Position
    ///
    /// Ein Ziel am oder hinter dem Ende beendet den Titel und laedt den naechsten.
    pub fn seek(&mut self, delta_sekunden: f64, queue: &PriorityQueue) -> Result<SeekErgebnis> {
        if !delta_sekunden.is_finite() {
            return Err(KanalfunkError::UngueltigesArgument(format!(
                "ungueltiges Seek-Delta: {delta_sekunden}"
            )));
        }
        if self.ist_live() {
            return Err(KanalfunkError::NichtUnterstuetzt(
                "Seek ist bei Live-Quellen nicht moeglich".into(),
            ));
        }
        if !matches!(self.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
            tracing::error!(kanal_id = %self.kanal_id, status = %self.status, "Seek ohne laufenden Titel");
            return Err(KanalfunkError::UngueltigerUebergang {
                von: self.status,
                nach: PlaybackStatus::Seeking,
            });
        }
        let Some(dauer) = self.dauer_sekunden else {
            return Err(KanalfunkError::NichtUnterstuetzt(
                "Seek ohne bekannte Titellaenge nicht moeglich".into(),
            ));
        };

        let vorher = self.position_sekunden;
        let ziel = (vorher + delta_sekunden).clamp(0.0, dauer);
        let rueckkehr = self.status;

        self.uebergang(PlaybackStatus::Seeking)?;

        if ziel >= dauer {
            self.position_sekunden = dauer;
            self.uebergang(PlaybackStatus::Ended)?;
            self.engine(EngineBefehl::Stoppen);
            let naechster = self.weiterschalten(queue)?;
            return Ok(SeekErgebnis {
                vorher,
                nachher: dauer,
                naechster,
            });
        }

        self.position_sekunden = ziel;
        self.engine(EngineBefehl::Position(ziel));
        self.uebergang(rueckkehr)?;

        tracing::info!(kanal_id = %self.kanal_id, vorher, nachher = ziel, "Seek ausgefuehrt");
        Ok(SeekErgebnis {
            vorher,
            nachher: ziel,
            naechster: None,
        })
    }

    pub fn pausieren(&mut self) -> Result<()> {
        self.uebergang(PlaybackStatus::Paused)?;
        self.engine(EngineBefehl::Pausieren);
        Ok(())
    }

    pub fn fortsetzen(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Paused {
            tracing::error!(kanal_id = %self.kanal_id, status = %self.status, "Fortsetzen ohne Pause");
            return Err(KanalfunkError::UngueltigerUebergang {
                von: self.status,
                nach: PlaybackStatus::Playing,
            });
        }
        self.uebergang(PlaybackStatus::Playing)?;
        self.engine(EngineBefehl::Fortsetzen);
        Ok(())
    }

    /// Ein Titel wurde eingereiht: eine stehende Session (`Idle`, `Ended`, `Error`) laedt ihn sofort
    pub fn eingereiht(&mut self, queue: &PriorityQueue) -> Result<Option<QueueItem>> {
        if self.status.ist_aktiv() {
            return Ok(None);
        }
        self.weiterschalten(queue)
    }

    /// Ueberspringt die aktuelle Quelle und laedt den naechsten Titel
    pub fn naechster(&mut self, queue: &PriorityQueue) -> Result<Option<QueueItem>> {
        self.aktuelle_beenden()?;
        self.weiterschalten(queue)
    }

    /// Wechselt auf eine Live-Quelle; ein laufender Titel wird beendet
    pub fn live_laden(&mut self, url: impl Into<String>) -> Result<()> {
        self.aktuelle_beenden()?;
        self.laden(AktuelleQuelle::Radio { url: url.into() })
    }

    /// Beendet eine laufende Live-Quelle
    pub fn live_beenden(&mut self) -> Result<()> {
        if !self.ist_live() {
            return Ok(());
        }
        self.aktuelle_beenden()?;
        self.aktuelle_quelle = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rueckmeldungen der Engine
    // -----------------------------------------------------------------------

    /// Die Engine hat die geladene Quelle gestartet
    pub fn titel_gestartet(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Loading {
            tracing::error!(kanal_id = %self.kanal_id, status = %self.status, "Start ohne Ladevorgang");
            return Err(KanalfunkError::UngueltigerUebergang {
                von: self.status,
                nach: PlaybackStatus::Playing,
            });
        }
        self.uebergang(PlaybackStatus::Playing)
    }

    /// Der aktuelle Titel ist regulaer zu Ende gespielt
    pub fn titel_beendet(&mut self, queue: &PriorityQueue) -> Result<Option<QueueItem>> {
        if !self.status.ist_aktiv() {
            return Err(KanalfunkError::UngueltigerUebergang {
                von: self.status,
                nach: PlaybackStatus::Ended,
            });
        }
        self.aktuelle_beenden()?;
        self.weiterschalten(queue)
    }

    /// Positionsmeldung der Engine (kein `state-changed`)
    pub fn position_melden(&mut self, sekunden: f64) {
        if !self.status.ist_aktiv() || !sekunden.is_finite() {
            tracing::debug!(kanal_id = %self.kanal_id, sekunden, "Positionsmeldung ignoriert");
            return;
        }
        let obergrenze = self.dauer_sekunden.unwrap_or(f64::MAX);
        self.position_sekunden = sekunden.clamp(0.0, obergrenze);
    }

    /// Die Quelle ist fehlgeschlagen
    pub fn fehler(&mut self, grund: &str) -> Result<()> {
        tracing::warn!(kanal_id = %self.kanal_id, grund, "Wiedergabe fehlgeschlagen");
        self.uebergang(PlaybackStatus::Error)?;
        self.letzter_fehler = Some(grund.to_string());
        self.engine(EngineBefehl::Stoppen);
        Ok(())
    }

    /// Snapshot des aktuellen Zustands
    pub fn snapshot(&self) -> SessionZustand {
        SessionZustand {
            kanal_id: self.kanal_id.clone(),
            status: self.status,
            position_sekunden: self.position_sekunden,
            dauer_sekunden: self.dauer_sekunden,
            speed: self.speed,
            pitch_halbtoene: self.pitch_halbtoene,
            pitch_korrektur: self.pitch_korrektur,
            equalizer: self.equalizer.clone(),
            aktuell: self.aktuelle_quelle.as_ref().map(AktuelleQuelle::bezeichnung),
            live: self.ist_live(),
            fehler: self.letzter_fehler.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Geteilte Session eines Kanals – der Mutex serialisiert alle Mutationen
pub type GeteilteSession = Arc<Mutex<PlaybackSession>>;

/// Verwaltet die Sessions aller Kanaele; Sessions entstehen bei Bedarf als `Idle`
pub struct SessionRegistry {
    konfig: WiedergabeKonfig,
    engine: Arc<dyn AudioEngine>,
    bus: Arc<dyn EventBus>,
    sitzungen: DashMap<ChannelId, GeteilteSession>,
}

impl SessionRegistry {
    pub fn neu(konfig: WiedergabeKonfig, engine: Arc<dyn AudioEngine>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            konfig,
            engine,
            bus,
            sitzungen: DashMap::new(),
        }
    }

    /// Gibt die Session eines Kanals zurueck und legt sie bei Bedarf an
    pub fn sitzung(&self, kanal_id: &ChannelId) -> GeteilteSession {
        let eintrag = self.sitzungen.entry(kanal_id.clone()).or_insert_with(|| {
            tracing::debug!(kanal_id = %kanal_id, "Neue PlaybackSession angelegt");
            Arc::new(Mutex::new(PlaybackSession::neu(
                kanal_id.clone(),
                &self.konfig,
                Arc::clone(&self.engine),
                Arc::clone(&self.bus),
            )))
        });
        Arc::clone(&eintrag)
    }

    /// Gibt die Session nur zurueck wenn sie bereits existiert
    pub fn vorhanden(&self, kanal_id: &ChannelId) -> Option<GeteilteSession> {
        self.sitzungen.get(kanal_id).map(|s| Arc::clone(&s))
    }

    pub fn anzahl(&self) -> usize {
        self.sitzungen.len()
    }
}
