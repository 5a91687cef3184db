//! Prometheus-kompatible Metriken fuer Kanalfunk
//!
//! Registrierte Metriken:
//! - `kanalfunk_befehle_total` – Counter: Befehle nach Art und Ergebnis
//! - `kanalfunk_befehl_dauer_sekunden` – Histogram: Ausfuehrungszeit pro Befehlsart
//! - `kanalfunk_zustandswechsel_total` – Counter: Session-Zustandswechsel nach Zielstatus
//! - `kanalfunk_wiederverbindungen_total` – Counter: Geplante Radio-Wiederverbindungen
//! - `kanalfunk_eskalationen_total` – Counter: Erschoepfte Radio-Quellen
//! - `kanalfunk_speicher_ausfaelle_total` – Counter: Nicht erreichbarer Zaehler-Speicher
//! - `kanalfunk_aktive_kanaele` – Gauge: Kanaele mit PlaybackSession
//! - `kanalfunk_aktive_radioquellen` – Gauge: Verwaltete Radio-Quellen

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Ergebnis-Label fuer `kanalfunk_befehle_total`
pub const ERGEBNIS_AUSGEFUEHRT: &str = "ausgefuehrt";
pub const ERGEBNIS_ABGELEHNT: &str = "abgelehnt";
pub const ERGEBNIS_FEHLER: &str = "fehler";

/// Alle Kanalfunk-Prometheus-Metriken
#[derive(Clone)]
pub struct KanalfunkMetrics {
    pub registry: Arc<Registry>,

    // Befehle
    pub befehle_total: IntCounterVec,
    pub befehl_dauer_sekunden: HistogramVec,

    // Wiedergabe
    pub zustandswechsel_total: IntCounterVec,
    pub aktive_kanaele: Gauge,

    // Radio
    pub wiederverbindungen_total: IntCounter,
    pub eskalationen_total: IntCounter,
    pub aktive_radioquellen: Gauge,

    // Rate Limiting
    pub speicher_ausfaelle_total: IntCounter,
}

impl KanalfunkMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Befehle ---
        let befehle_total = IntCounterVec::new(
            Opts::new("kanalfunk_befehle_total", "Gesamtanzahl eingegangener Befehle"),
            &["befehl", "ergebnis"],
        )?;
        registry.register(Box::new(befehle_total.clone()))?;

        let befehl_dauer_sekunden = HistogramVec::new(
            HistogramOpts::new(
                "kanalfunk_befehl_dauer_sekunden",
                "Ausfuehrungszeit eines Befehls in Sekunden (inkl. Kanal-Sperre)",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["befehl"],
        )?;
        registry.register(Box::new(befehl_dauer_sekunden.clone()))?;

        // --- Wiedergabe ---
        let zustandswechsel_total = IntCounterVec::new(
            Opts::new(
                "kanalfunk_zustandswechsel_total",
                "Zustandswechsel aller PlaybackSessions",
            ),
            &["status"],
        )?;
        registry.register(Box::new(zustandswechsel_total.clone()))?;

        let aktive_kanaele = Gauge::with_opts(Opts::new(
            "kanalfunk_aktive_kanaele",
            "Anzahl Kanaele mit PlaybackSession",
        ))?;
        registry.register(Box::new(aktive_kanaele.clone()))?;

        // --- Radio ---
        let wiederverbindungen_total = IntCounter::with_opts(Opts::new(
            "kanalfunk_wiederverbindungen_total",
            "Geplante Wiederverbindungen von Radio-Quellen",
        ))?;
        registry.register(Box::new(wiederverbindungen_total.clone()))?;

        let eskalationen_total = IntCounter::with_opts(Opts::new(
            "kanalfunk_eskalationen_total",
            "Radio-Quellen mit erschoepften Wiederverbindungen",
        ))?;
        registry.register(Box::new(eskalationen_total.clone()))?;

        let aktive_radioquellen = Gauge::with_opts(Opts::new(
            "kanalfunk_aktive_radioquellen",
            "Anzahl verwalteter Radio-Quellen",
        ))?;
        registry.register(Box::new(aktive_radioquellen.clone()))?;

        // --- Rate Limiting ---
        let speicher_ausfaelle_total = IntCounter::with_opts(Opts::new(
            "kanalfunk_speicher_ausfaelle_total",
            "Fehlgeschlagene Zugriffe auf den Zaehler-Speicher",
        ))?;
        registry.register(Box::new(speicher_ausfaelle_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            befehle_total,
            befehl_dauer_sekunden,
            zustandswechsel_total,
            aktive_kanaele,
            wiederverbindungen_total,
            eskalationen_total,
            aktive_radioquellen,
            speicher_ausfaelle_total,
        })
    }

    /// Zaehlt einen Befehl mit Ergebnis
    pub fn befehl_zaehlen(&self, befehl: &str, ergebnis: &str) {
        self.befehle_total.with_label_values(&[befehl, ergebnis]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: KanalfunkMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<KanalfunkMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = KanalfunkMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn befehle_mit_labels_zaehlen() {
        let metriken = KanalfunkMetrics::neu().unwrap();
        metriken.befehl_zaehlen("steuerung", ERGEBNIS_AUSGEFUEHRT);
        metriken.befehl_zaehlen("steuerung", ERGEBNIS_AUSGEFUEHRT);
        metriken.befehl_zaehlen("steuerung", ERGEBNIS_ABGELEHNT);

        let ausgefuehrt = metriken
            .befehle_total
            .with_label_values(&["steuerung", ERGEBNIS_AUSGEFUEHRT])
            .get();
        let abgelehnt = metriken
            .befehle_total
            .with_label_values(&["steuerung", ERGEBNIS_ABGELEHNT])
            .get();
        assert_eq!(ausgefuehrt, 2);
        assert_eq!(abgelehnt, 1);
    }

    #[test]
    fn zwei_instanzen_sind_unabhaengig() {
        let a = KanalfunkMetrics::neu().unwrap();
        let b = KanalfunkMetrics::neu().unwrap();
        a.eskalationen_total.inc();
        assert_eq!(a.eskalationen_total.get(), 1);
        assert_eq!(b.eskalationen_total.get(), 0);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = KanalfunkMetrics::neu().unwrap();
        metriken.aktive_kanaele.set(3.0);
        metriken.wiederverbindungen_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("kanalfunk_aktive_kanaele 3"));
        assert!(output.contains("kanalfunk_wiederverbindungen_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = KanalfunkMetrics::neu().unwrap();

        // Vec-Metriken erscheinen in gather() erst nach dem ersten Label-Zugriff
        metriken.befehl_zaehlen("einreihen", ERGEBNIS_FEHLER);
        metriken
            .befehl_dauer_sekunden
            .with_label_values(&["einreihen"])
            .observe(0.002);
        metriken
            .zustandswechsel_total
            .with_label_values(&["playing"])
            .inc();

        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "kanalfunk_befehle_total",
            "kanalfunk_befehl_dauer_sekunden",
            "kanalfunk_zustandswechsel_total",
            "kanalfunk_aktive_kanaele",
            "kanalfunk_wiederverbindungen_total",
            "kanalfunk_eskalationen_total",
            "kanalfunk_aktive_radioquellen",
            "kanalfunk_speicher_ausfaelle_total",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
