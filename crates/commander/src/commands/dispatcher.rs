//! Dispatcher – einziger Eingang fuer wiedergabeveraendernde Befehle
//!
//! Ablauf pro Anfrage:
//! 1. Zulassung ueber den [`RateLimiter`] (Ablehnung = keine Seiteneffekte)
//! 2. Exklusive Sperre des adressierten Kanals
//! 3. Weiterleitung an Queue, PlaybackSession oder StreamSourceManager
//!
//! Befehle desselben Kanals laufen nie ueberlappend, verschiedene Kanaele
//! teilen keine Sperre. Rueckmeldungen der Engine und des Radio-Supervisors
//! nehmen dieselbe Kanal-Sperre, umgehen aber die Zulassung.

use std::sync::Arc;
use std::time::Instant;

use kanalfunk_core::{ChannelId, Identity, KanalfunkError, KanalfunkEvent, PlaybackStatus, Result};
use kanalfunk_observability::metrics::{ERGEBNIS_ABGELEHNT, ERGEBNIS_AUSGEFUEHRT, ERGEBNIS_FEHLER};
use kanalfunk_observability::KanalfunkMetrics;
use kanalfunk_playback::{
    NeuerEintrag, PlaybackSession, PriorityQueue, QueueItem, SessionRegistry, SessionZustand,
    StreamSourceManager,
};
use tokio::sync::broadcast;

use crate::commands::types::{Anfrage, Antwort, Ausgang, Befehl, SteuerAktion};
use crate::rate_limit::RateLimiter;

/// Zentraler Dispatcher aller Kanaele
pub struct Dispatcher {
    limiter: Arc<RateLimiter>,
    queue: Arc<PriorityQueue>,
    sitzungen: Arc<SessionRegistry>,
    radio: StreamSourceManager,
    metriken: KanalfunkMetrics,
}

impl Dispatcher {
    pub fn neu(
        limiter: Arc<RateLimiter>,
        queue: Arc<PriorityQueue>,
        sitzungen: Arc<SessionRegistry>,
        radio: StreamSourceManager,
        metriken: KanalfunkMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            limiter,
            queue,
            sitzungen,
            radio,
            metriken,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    pub fn sitzungen(&self) -> &Arc<SessionRegistry> {
        &self.sitzungen
    }

    pub fn radio(&self) -> &StreamSourceManager {
        &self.radio
    }

    /// Nimmt eine Anfrage entgegen: Zulassung, dann Ausfuehrung unter Kanal-Sperre
    pub async fn dispatch(&self, anfrage: Anfrage) -> Result<Ausgang> {
        let Anfrage {
            identitaet,
            kanal_id,
            befehl,
        } = anfrage;
        let name = befehl.name();

        let pruefung = self.limiter.pruefen(&identitaet).await;
        if !self.limiter.speicher_erreichbar() {
            self.metriken.speicher_ausfaelle_total.inc();
        }
        let entscheidung = match pruefung {
            Ok(entscheidung) => entscheidung,
            Err(e) => {
                self.metriken.befehl_zaehlen(name, ERGEBNIS_ABGELEHNT);
                return Err(e);
            }
        };

        if !entscheidung.erlaubt {
            tracing::info!(
                identitaet = %identitaet,
                kanal_id = %kanal_id,
                befehl = name,
                retry_after = ?entscheidung.retry_after_secs(),
                "Befehl abgelehnt – Rate Limit"
            );
            self.metriken.befehl_zaehlen(name, ERGEBNIS_ABGELEHNT);
            return Err(entscheidung.als_fehler());
        }

        tracing::debug!(identitaet = %identitaet, kanal_id = %kanal_id, befehl = name, "Befehl zugelassen");

        let start = Instant::now();
        let ergebnis = self.ausfuehren(&kanal_id, &identitaet, befehl).await;
        self.metriken
            .befehl_dauer_sekunden
            .with_label_values(&[name])
            .observe(start.elapsed().as_secs_f64());

        match &ergebnis {
            Ok(_) => self.metriken.befehl_zaehlen(name, ERGEBNIS_AUSGEFUEHRT),
            Err(e) => {
                tracing::info!(kanal_id = %kanal_id, befehl = name, fehler = %e, "Befehl fehlgeschlagen");
                self.metriken.befehl_zaehlen(name, ERGEBNIS_FEHLER);
            }
        }

        ergebnis.map(|antwort| Ausgang {
            antwort,
            rate_limit: entscheidung,
        })
    }

    async fn ausfuehren(
        &self,
        kanal_id: &ChannelId,
        identitaet: &Identity,
        befehl: Befehl,
    ) -> Result<Antwort> {
        let sitzung = self.sitzungen.sitzung(kanal_id);
        let mut session = sitzung.lock().await;

        match befehl {
            // --- Queue ---
            Befehl::Einreihen {
                payload_ref,
                titel,
                dauer_sekunden,
                prioritaet,
            } => {
                let eintrag = NeuerEintrag {
                    payload_ref,
                    titel,
                    dauer_sekunden,
                    angefragt_von: Some(identitaet.clone()),
                };
                let item = self.queue.hinzufuegen(kanal_id, eintrag, prioritaet)?;
                // Eine stehende Session uebernimmt den Eintrag sofort
                session.eingereiht(&self.queue)?;
                let position = self
                    .queue
                    .alle(kanal_id)
                    .iter()
                    .position(|i| i.id == item.id)
                    .map_or(0, |p| p + 1);
                Ok(Antwort::Eingereiht { item, position })
            }
            Befehl::AusQueueEntfernen { item_id } => self
                .queue
                .entfernen(kanal_id, &item_id)
                .map(|item| Antwort::Entfernt { item })
                .ok_or_else(|| KanalfunkError::NichtGefunden(format!("{item_id} in {kanal_id}"))),
            Befehl::QueueListe => Ok(Antwort::Queue {
                eintraege: self.queue.alle(kanal_id),
            }),
            Befehl::QueueLeeren => Ok(Antwort::Geleert {
                anzahl: self.queue.leeren(kanal_id),
            }),
            Befehl::QueueStatistik => Ok(Antwort::Statistik {
                statistik: self.queue.statistik(kanal_id),
            }),

            // --- Wiedergabe ---
            Befehl::Steuerung { aktion } => self.steuern(&mut session, aktion),
            Befehl::Zustand => Ok(Antwort::Zustand {
                zustand: session.snapshot(),
            }),

            // --- Radio ---
            Befehl::RadioStarten { url } => {
                let quelle = self.radio.starten(kanal_id, &url)?;
                session.live_laden(quelle.url.clone())?;
                Ok(Antwort::Radio { quelle })
            }
            Befehl::RadioStoppen => {
                let war_aktiv = self.radio.stoppen(kanal_id);
                session.live_beenden()?;
                Ok(Antwort::RadioGestoppt { war_aktiv })
            }
            Befehl::RadioStatus => Ok(Antwort::RadioStatus {
                quelle: self.radio.status(kanal_id),
            }),
        }
    }

    fn steuern(&self, session: &mut PlaybackSession, aktion: SteuerAktion) -> Result<Antwort> {
        match aktion {
            SteuerAktion::Speed(speed) => session.speed_setzen(speed)?,
            SteuerAktion::Seek(delta) => {
                let ergebnis = session.seek(delta, &self.queue)?;
                return Ok(Antwort::Seek {
                    vorher: ergebnis.vorher,
                    nachher: ergebnis.nachher,
                    naechster: ergebnis.naechster,
                });
            }
            SteuerAktion::Pausieren => session.pausieren()?,
            SteuerAktion::Fortsetzen => session.fortsetzen()?,
            SteuerAktion::Pitch(halbtoene) => session.pitch_setzen(halbtoene)?,
            SteuerAktion::PitchKorrektur(aktiv) => session.pitch_korrektur_setzen(aktiv),
            SteuerAktion::EqualizerPreset(name) => session.equalizer_preset_setzen(&name)?,
            SteuerAktion::Equalizer(baender) => session.equalizer_setzen(&baender)?,
            SteuerAktion::Naechster => {
                if session.ist_live() {
                    self.radio.stoppen(session.kanal_id());
                }
                let item = session.naechster(&self.queue)?;
                return Ok(Antwort::Naechster { item });
            }
        }
        Ok(Antwort::Zustand {
            zustand: session.snapshot(),
        })
    }

    // -----------------------------------------------------------------------
    // Interne Rueckmeldungen (ohne Zulassungspruefung)
    // -----------------------------------------------------------------------

    /// Die Engine hat die geladene Quelle gestartet
    pub async fn titel_gestartet(&self, kanal_id: &ChannelId) -> Result<SessionZustand> {
        let sitzung = self.sitzungen.sitzung(kanal_id);
        let mut session = sitzung.lock().await;
        session.titel_gestartet()?;
        Ok(session.snapshot())
    }

    /// Der aktuelle Titel ist zu Ende gespielt; der naechste wird geladen
    pub async fn titel_beendet(&self, kanal_id: &ChannelId) -> Result<Option<QueueItem>> {
        let sitzung = self.sitzungen.sitzung(kanal_id);
        let mut session = sitzung.lock().await;
        session.titel_beendet(&self.queue)
    }

    /// Positionsmeldung der Engine
    pub async fn position_melden(&self, kanal_id: &ChannelId, sekunden: f64) {
        if let Some(sitzung) = self.sitzungen.vorhanden(kanal_id) {
            sitzung.lock().await.position_melden(sekunden);
        }
    }

    /// Die Engine meldet einen Wiedergabefehler
    pub async fn wiedergabe_fehlgeschlagen(&self, kanal_id: &ChannelId, grund: &str) -> Result<()> {
        let sitzung = self.sitzungen.sitzung(kanal_id);
        let mut session = sitzung.lock().await;
        session.fehler(grund)
    }

    /// Wendet ein Ereignis des Busses an (Metriken, Radio -> Session)
    pub async fn ereignis_anwenden(&self, event: &KanalfunkEvent) {
        match event {
            KanalfunkEvent::ZustandGeaendert(z) => {
                let status = z.status.to_string();
                self.metriken
                    .zustandswechsel_total
                    .with_label_values(&[status.as_str()])
                    .inc();
            }
            KanalfunkEvent::Wiederverbindung { .. } => {
                self.metriken.wiederverbindungen_total.inc();
            }
            KanalfunkEvent::QuelleVerbunden { kanal_id, url } => {
                let Some(sitzung) = self.sitzungen.vorhanden(kanal_id) else {
                    return;
                };
                let mut session = sitzung.lock().await;
                if !session.spielt_live(url) {
                    tracing::debug!(kanal_id = %kanal_id, url = %url, "Verbindung einer ersetzten Quelle ignoriert");
                    return;
                }
                if session.status() == PlaybackStatus::Loading {
                    if let Err(e) = session.titel_gestartet() {
                        tracing::warn!(kanal_id = %kanal_id, fehler = %e, "Radio-Start nicht uebernommen");
                    }
                }
            }
            KanalfunkEvent::Eskalation(eskalation) => {
                self.metriken.eskalationen_total.inc();
                let Some(sitzung) = self.sitzungen.vorhanden(&eskalation.kanal_id) else {
                    return;
                };
                let mut session = sitzung.lock().await;
                if !session.spielt_live(&eskalation.url) {
                    tracing::debug!(
                        kanal_id = %eskalation.kanal_id,
                        url = %eskalation.url,
                        "Eskalation einer ersetzten Quelle ignoriert"
                    );
                    return;
                }
                if session.status().ist_aktiv() {
                    let grund = format!("{}: {}", eskalation.als_fehler(), eskalation.grund);
                    if let Err(e) = session.fehler(&grund) {
                        tracing::warn!(kanal_id = %eskalation.kanal_id, fehler = %e, "Eskalation nicht uebernommen");
                    }
                }
            }
        }
    }

    /// Verarbeitet Ereignisse bis der Bus geschlossen wird
    pub async fn ereignisse_verarbeiten(self: Arc<Self>, mut rx: broadcast::Receiver<KanalfunkEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.ereignis_anwenden(&event).await,
                Err(broadcast::error::RecvError::Lagged(anzahl)) => {
                    tracing::warn!(anzahl, "Ereignisse verpasst – Verarbeitung zu langsam");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event-Bus geschlossen");
                    break;
                }
            }
        }
    }
}
