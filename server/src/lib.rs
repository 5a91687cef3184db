//! kanalfunk-server – Bibliotheks-Root
//!
//! Baut alle Komponenten aus der Konfiguration zusammen und stellt den
//! oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use config::KanalfunkConfig;
use kanalfunk_commander::{Dispatcher, FehlerStrategie, RateLimiter};
use kanalfunk_core::{BroadcastBus, EventBus};
use kanalfunk_observability::{HealthState, KanalfunkMetrics};
use kanalfunk_playback::{
    HttpStreamVerbinder, LoggendeEngine, PriorityQueue, SessionRegistry, StreamSourceManager,
};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: KanalfunkConfig,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<BroadcastBus>,
    metriken: KanalfunkMetrics,
    health: HealthState,
}

impl Server {
    /// Erstellt alle Komponenten aus der gegebenen Konfiguration
    pub fn neu(config: KanalfunkConfig) -> Result<Self> {
        let bus = Arc::new(BroadcastBus::neu());
        let bus_dyn: Arc<dyn EventBus> = bus.clone();
        let metriken = KanalfunkMetrics::neu()?;

        let limiter = RateLimiter::im_speicher(config.rate_limit_konfig());
        let queue = Arc::new(PriorityQueue::neu(config.queue_konfig()));
        let sitzungen = Arc::new(SessionRegistry::neu(
            config.wiedergabe_konfig(),
            Arc::new(LoggendeEngine),
            bus_dyn.clone(),
        ));
        let radio_konfig = config.radio_konfig();
        let verbinder = Arc::new(HttpStreamVerbinder::neu(radio_konfig.verbindungs_timeout)?);
        let radio = StreamSourceManager::neu(radio_konfig, verbinder, bus_dyn);

        let dispatcher = Dispatcher::neu(limiter, queue, sitzungen, radio, metriken.clone());
        let health = HealthState::neu()
            .fail_closed(config.rate_limit.strategie == FehlerStrategie::Closed);

        Ok(Self {
            config,
            dispatcher,
            bus,
            metriken,
            health,
        })
    }

    /// Einstiegspunkt fuer eingehende Befehle
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Event-Bus fuer Abonnenten (Fan-out, Benachrichtigungen)
    pub fn bus(&self) -> Arc<BroadcastBus> {
        Arc::clone(&self.bus)
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Ein Wartungsdurchlauf: Rate-Limit-Bereinigung, Health und Gauges
    pub async fn wartung(&self) {
        wartung_ausfuehren(&self.dispatcher, &self.health, &self.metriken).await;
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Ereignisverarbeitung (Radio -> Session, Metriken)
    /// 2. Periodische Wartung
    /// 3. Observability-Server (falls aktiviert)
    /// 4. Auf Ctrl-C warten, danach alle Radio-Quellen stoppen
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            rate_limit = self.config.rate_limit.limit,
            fenster_sekunden = self.config.rate_limit.fenster_sekunden,
            strategie = ?self.config.rate_limit.strategie,
            "Server startet"
        );

        tokio::spawn(
            self.dispatcher
                .clone()
                .ereignisse_verarbeiten(self.bus.abonnieren()),
        );

        let intervall = Duration::from_secs(self.config.server.wartung_intervall_sekunden.max(1));
        let (dispatcher, health, metriken) = (
            self.dispatcher.clone(),
            self.health.clone(),
            self.metriken.clone(),
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(intervall);
            loop {
                ticker.tick().await;
                wartung_ausfuehren(&dispatcher, &health, &metriken).await;
            }
        });

        if self.config.observability.aktiviert {
            let adresse: SocketAddr = self.config.observability_bind_adresse().parse()?;
            let (metriken, health) = (self.metriken.clone(), self.health.clone());
            tokio::spawn(async move {
                if let Err(e) =
                    kanalfunk_observability::observability_server_starten(adresse, metriken, health)
                        .await
                {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        self.dispatcher.radio().alle_stoppen();
        Ok(())
    }
}

async fn wartung_ausfuehren(dispatcher: &Dispatcher, health: &HealthState, metriken: &KanalfunkMetrics) {
    if let Err(e) = dispatcher.limiter().cleanup().await {
        tracing::warn!(fehler = %e, "Rate-Limit-Bereinigung fehlgeschlagen");
    }
    health.speicher_status_setzen(dispatcher.limiter().speicher_erreichbar());

    let kanaele = dispatcher.sitzungen().anzahl();
    health.kanaele_setzen(kanaele);
    metriken.aktive_kanaele.set(kanaele as f64);
    metriken
        .aktive_radioquellen
        .set(dispatcher.radio().aktive().len() as f64);
}
