//! Schnittstelle zur Audio-Engine
//!
//! Die eigentliche Audio-Verarbeitung (Dekodieren, Resampling, Ausgabe in
//! den Voice-Chat) laeuft ausserhalb der Steuerungsebene. Die Session
//! schickt nur Befehle; die Engine meldet Ereignisse (gestartet, beendet,
//! Position, Fehler) ueber den Dispatcher zurueck.

use crate::equalizer::{equalizer_kette, Baender, BAND_ANZAHL};
use kanalfunk_core::ChannelId;

/// Untere Grenze des Wiedergabetempos
pub const MIN_SPEED: f64 = 0.5;
/// Obere Grenze des Wiedergabetempos
pub const MAX_SPEED: f64 = 2.0;
/// Betrag der maximalen Tonhoehenverschiebung in Halbtoenen
pub const MAX_PITCH_HALBTOENE: i8 = 12;
/// Ausgabe-Samplerate der Engine
pub const AUSGABE_SAMPLERATE: u32 = 48_000;

/// Tempo- und Tonhoehen-Einstellung fuer die Engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoFilter {
    pub speed: f64,
    /// true = Tonhoehe bleibt beim Tempowechsel erhalten (Time-Stretching)
    pub pitch_korrektur: bool,
    pub pitch_halbtoene: i8,
}

impl Default for TempoFilter {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch_korrektur: true,
            pitch_halbtoene: 0,
        }
    }
}

impl TempoFilter {
    /// true wenn der Filter das Signal unveraendert durchreicht
    pub fn ist_neutral(&self) -> bool {
        (self.speed - 1.0).abs() < f64::EPSILON && self.pitch_halbtoene == 0
    }

    /// Erzeugt die Filterkette im ffmpeg-Format (`None` wenn neutral)
    ///
    /// `atempo` akzeptiert nur Faktoren in 0.5..=2.0, groessere Faktoren
    /// entstehen durch die Pitch-Kompensation und werden verkettet.
    pub fn filter_kette(&self) -> Option<String> {
        if self.ist_neutral() {
            return None;
        }

        if !self.pitch_korrektur {
            // Tempo und Tonhoehe gemeinsam ueber die Samplerate
            let faktor = self.speed * pitch_faktor(self.pitch_halbtoene);
            return Some(samplerate_kette(faktor));
        }

        if self.pitch_halbtoene == 0 {
            return Some(atempo_kette(self.speed));
        }

        let faktor = pitch_faktor(self.pitch_halbtoene);
        Some(format!(
            "{},{}",
            samplerate_kette(faktor),
            atempo_kette(self.speed / faktor)
        ))
    }
}

/// Vollstaendige Filtereinstellung einer Session: Tempo/Tonhoehe und Equalizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFilter {
    pub tempo: TempoFilter,
    pub equalizer: Baender,
}

impl Default for AudioFilter {
    fn default() -> Self {
        Self {
            tempo: TempoFilter::default(),
            equalizer: [0.0; BAND_ANZAHL],
        }
    }
}

impl AudioFilter {
    /// Tempo-Kette gefolgt von der Equalizer-Kette (`None` wenn beide neutral)
    pub fn filter_kette(&self) -> Option<String> {
        match (self.tempo.filter_kette(), equalizer_kette(&self.equalizer)) {
            (Some(tempo), Some(eq)) => Some(format!("{tempo},{eq}")),
            (tempo, eq) => tempo.or(eq),
        }
    }
}

fn pitch_faktor(halbtoene: i8) -> f64 {
    2f64.powf(f64::from(halbtoene) / 12.0)
}

fn samplerate_kette(faktor: f64) -> String {
    let rate = (f64::from(AUSGABE_SAMPLERATE) * faktor).round() as u32;
    format!("asetrate={rate},aresample={AUSGABE_SAMPLERATE}")
}

fn atempo_kette(mut faktor: f64) -> String {
    let mut glieder = Vec::new();
    while faktor > MAX_SPEED {
        glieder.push(format!("atempo={MAX_SPEED:.1}"));
        faktor /= MAX_SPEED;
    }
    while faktor < MIN_SPEED {
        glieder.push(format!("atempo={MIN_SPEED:.1}"));
        faktor /= MIN_SPEED;
    }
    glieder.push(format!("atempo={faktor:.4}"));
    glieder.join(",")
}

// ---------------------------------------------------------------------------
// Befehle
// ---------------------------------------------------------------------------

/// Befehle von der Session an die Engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineBefehl {
    /// Quelle laden und ab `start_sekunden` abspielen
    Laden {
        quelle: String,
        start_sekunden: f64,
        filter: AudioFilter,
    },
    /// Tempo, Tonhoehe oder Equalizer der laufenden Wiedergabe aendern
    Filter(AudioFilter),
    /// An Position springen
    Position(f64),
    Pausieren,
    Fortsetzen,
    Stoppen,
}

/// Audio-Engine eines Kanals
///
/// Aufrufe duerfen nicht blockieren – die Session haelt dabei die Kanal-Sperre.
pub trait AudioEngine: Send + Sync + 'static {
    fn anwenden(&self, kanal_id: &ChannelId, befehl: EngineBefehl);
}

/// Engine die alle Befehle nur protokolliert
///
/// Wird verwendet wenn keine externe Engine angebunden ist.
#[derive(Debug, Default)]
pub struct LoggendeEngine;

impl AudioEngine for LoggendeEngine {
    fn anwenden(&self, kanal_id: &ChannelId, befehl: EngineBefehl) {
        match &befehl {
            EngineBefehl::Laden { quelle, filter, .. } => tracing::info!(
                kanal_id = %kanal_id,
                quelle = %quelle,
                filter = filter.filter_kette().as_deref().unwrap_or("-"),
                "Engine: Quelle laden"
            ),
            EngineBefehl::Filter(filter) => tracing::info!(
                kanal_id = %kanal_id,
                filter = filter.filter_kette().as_deref().unwrap_or("-"),
                "Engine: Filter setzen"
            ),
            andere => tracing::debug!(kanal_id = %kanal_id, befehl = ?andere, "Engine-Befehl"),
        }
    }
}
