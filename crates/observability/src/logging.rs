//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `KF_LOG_LEVEL`: Log-Level oder Filter-Direktive, Standard: info
//! - `KF_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Kanal und Identitaet werden als strukturierte Felder (`kanal_id`,
//! `identitaet`) an die Events gehaengt.

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "KF_LOG_LEVEL";
/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "KF_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `KF_LOG_LEVEL` und `KF_LOG_FORMAT` haben Vorrang vor den uebergebenen
/// Werten aus der Konfigurationsdatei.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format_env = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| format.to_string());

    match format_env.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

const LOG_LEVEL: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Prueft den `level`-Wert aus `[logging]`
///
/// Erlaubt ist ein einfacher Level oder eine Filter-Direktive mit Ziel
/// (`kanalfunk_commander=debug,info`). Ein einzelnes unbekanntes Wort wuerde
/// `EnvFilter` als Zielname lesen und wird deshalb abgelehnt.
pub fn log_level_gueltig(level: &str) -> bool {
    if LOG_LEVEL.contains(&level) {
        return true;
    }
    level.contains('=') && EnvFilter::try_new(level).is_ok()
}

/// Prueft den `format`-Wert aus `[logging]`
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
