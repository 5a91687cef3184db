//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use std::time::Duration;

use anyhow::{bail, Result};
use kanalfunk_commander::{FehlerStrategie, RateLimitKonfig};
use kanalfunk_observability::{log_format_gueltig, log_level_gueltig};
use kanalfunk_playback::{QueueKonfig, RadioKonfig, WiedergabeKonfig, MAX_SPEED, MIN_SPEED};
use serde::{Deserialize, Serialize};

/// Vollstaendige Kanalfunk-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KanalfunkConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Zulassung (Fixed Window pro Identitaet)
    pub rate_limit: RateLimitEinstellungen,
    /// Priority Queue pro Kanal
    pub queue: QueueEinstellungen,
    /// Startwerte neuer PlaybackSessions
    pub wiedergabe: WiedergabeEinstellungen,
    /// Radio-Quellen und Wiederverbindung
    pub radio: RadioEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename der Instanz (nur fuer Logs)
    pub name: String,
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Intervall der Wartung (Rate-Limit-Bereinigung, Health) in Sekunden
    pub wartung_intervall_sekunden: u64,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Kanalfunk".into(),
            bind_adresse: "0.0.0.0".into(),
            wartung_intervall_sekunden: 30,
        }
    }
}

/// Rate-Limit-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitEinstellungen {
    /// Maximale Befehle pro Fenster und Identitaet
    pub limit: u32,
    /// Fensterlaenge in Sekunden
    pub fenster_sekunden: u64,
    /// Verhalten bei nicht erreichbarem Zaehler-Speicher: "open" oder "closed"
    pub strategie: FehlerStrategie,
}

impl Default for RateLimitEinstellungen {
    fn default() -> Self {
        Self {
            limit: 100,
            fenster_sekunden: 60,
            strategie: FehlerStrategie::Open,
        }
    }
}

/// Queue-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueEinstellungen {
    /// Maximale wartende Eintraege pro Kanal
    pub max_groesse: usize,
}

impl Default for QueueEinstellungen {
    fn default() -> Self {
        Self { max_groesse: 100 }
    }
}

/// Wiedergabe-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WiedergabeEinstellungen {
    /// Tempo neuer Sessions (0.5 bis 2.0)
    pub standard_speed: f64,
    /// Tonhoehe beim Tempowechsel erhalten
    pub pitch_korrektur: bool,
}

impl Default for WiedergabeEinstellungen {
    fn default() -> Self {
        Self {
            standard_speed: 1.0,
            pitch_korrektur: true,
        }
    }
}

/// Radio-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioEinstellungen {
    /// Wiederverbindungsversuche bevor eskaliert wird
    pub max_versuche: u32,
    /// Feste Wartezeit vor jedem Versuch in Sekunden
    pub backoff_sekunden: u64,
    /// Timeout eines Verbindungsversuchs in Sekunden
    pub verbindungs_timeout_sekunden: u64,
}

impl Default for RadioEinstellungen {
    fn default() -> Self {
        Self {
            max_versuche: 3,
            backoff_sekunden: 5,
            verbindungs_timeout_sekunden: 10,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl KanalfunkConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => bail!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}"),
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Wertebereiche die serde nicht abdeckt
    pub fn validieren(&self) -> Result<()> {
        if self.rate_limit.limit == 0 {
            bail!("rate_limit.limit muss groesser als 0 sein");
        }
        if self.rate_limit.fenster_sekunden == 0 {
            bail!("rate_limit.fenster_sekunden muss groesser als 0 sein");
        }
        if self.queue.max_groesse == 0 {
            bail!("queue.max_groesse muss groesser als 0 sein");
        }
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.wiedergabe.standard_speed) {
            bail!(
                "wiedergabe.standard_speed muss zwischen {MIN_SPEED} und {MAX_SPEED} liegen"
            );
        }
        if self.radio.verbindungs_timeout_sekunden == 0 {
            bail!("radio.verbindungs_timeout_sekunden muss groesser als 0 sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("logging.level ungueltig: '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("logging.format muss 'text' oder 'json' sein, erhalten: '{}'", self.logging.format);
        }
        Ok(())
    }

    pub fn rate_limit_konfig(&self) -> RateLimitKonfig {
        RateLimitKonfig {
            limit: self.rate_limit.limit,
            fenster: Duration::from_secs(self.rate_limit.fenster_sekunden),
            strategie: self.rate_limit.strategie,
        }
    }

    pub fn queue_konfig(&self) -> QueueKonfig {
        QueueKonfig {
            max_groesse: self.queue.max_groesse,
        }
    }

    pub fn wiedergabe_konfig(&self) -> WiedergabeKonfig {
        WiedergabeKonfig {
            standard_speed: self.wiedergabe.standard_speed,
            pitch_korrektur: self.wiedergabe.pitch_korrektur,
        }
    }

    pub fn radio_konfig(&self) -> RadioKonfig {
        RadioKonfig {
            max_versuche: self.radio.max_versuche,
            backoff: Duration::from_secs(self.radio.backoff_sekunden),
            verbindungs_timeout: Duration::from_secs(self.radio.verbindungs_timeout_sekunden),
        }
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.server.bind_adresse, self.observability.port)
    }
}
