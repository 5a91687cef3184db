//! Health-Check-Endpunkt fuer Kanalfunk
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Erreichbarkeit des Zaehler-Speichers
//!
//! Ist der Speicher weg, haengt der Status von der Rate-Limit-Strategie ab:
//! fail-open laeuft weiter (`degraded`), fail-closed lehnt jeden Befehl ab
//! (`unhealthy`, HTTP 503).

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub speicher_erreichbar: bool,
    pub aktive_kanaele: usize,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub speicher_erreichbar: Arc<AtomicBool>,
    pub aktive_kanaele: Arc<AtomicUsize>,
    /// Rate-Limit lehnt bei Speicherausfall alles ab
    pub fail_closed: bool,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            speicher_erreichbar: Arc::new(AtomicBool::new(true)),
            aktive_kanaele: Arc::new(AtomicUsize::new(0)),
            fail_closed: false,
        }
    }

    pub fn fail_closed(mut self, aktiv: bool) -> Self {
        self.fail_closed = aktiv;
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn speicher_ok(&self) -> bool {
        self.speicher_erreichbar.load(Ordering::Relaxed)
    }

    pub fn speicher_status_setzen(&self, erreichbar: bool) {
        self.speicher_erreichbar.store(erreichbar, Ordering::Relaxed);
    }

    pub fn kanaele_setzen(&self, anzahl: usize) {
        self.aktive_kanaele.store(anzahl, Ordering::Relaxed);
    }

    /// Baut die Antwort aus dem aktuellen Zustand
    pub fn antwort(&self) -> HealthResponse {
        let speicher_erreichbar = self.speicher_ok();
        let status = match (speicher_erreichbar, self.fail_closed) {
            (true, _) => HealthStatus::Healthy,
            (false, false) => HealthStatus::Degraded,
            (false, true) => HealthStatus::Unhealthy,
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            speicher_erreichbar,
            aktive_kanaele: self.aktive_kanaele.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();

    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // fail-open: Befehle laufen weiter
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}
