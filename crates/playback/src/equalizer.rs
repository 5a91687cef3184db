//! 10-Band-Equalizer pro Kanal
//!
//! Baender in dB von -24 bis +12, Mittenfrequenzen wie beim klassischen
//! Oktav-Equalizer (29 Hz .. 15 kHz). Presets sind fest hinterlegt; eigene
//! Einstellungen laufen unter dem Namen `custom`.

use kanalfunk_core::{KanalfunkError, Result};
use serde::{Deserialize, Serialize};

/// Anzahl der Frequenzbaender
pub const BAND_ANZAHL: usize = 10;
/// Mittenfrequenzen der Baender in Hz
pub const BAND_FREQUENZEN: [u32; BAND_ANZAHL] =
    [29, 59, 119, 237, 474, 947, 1889, 3770, 7523, 15011];
pub const MIN_BAND_DB: f64 = -24.0;
pub const MAX_BAND_DB: f64 = 12.0;

/// Name fuer benutzerdefinierte Baender
pub const PRESET_CUSTOM: &str = "custom";
pub const PRESET_FLAT: &str = "flat";

/// Verstaerkung pro Band in dB
pub type Baender = [f64; BAND_ANZAHL];

/// Fest hinterlegtes Preset
#[derive(Debug, Clone, Copy)]
pub struct EqualizerPreset {
    pub name: &'static str,
    pub kategorie: &'static str,
    pub baender: Baender,
}

const fn preset(name: &'static str, kategorie: &'static str, baender: Baender) -> EqualizerPreset {
    EqualizerPreset {
        name,
        kategorie,
        baender,
    }
}

pub const PRESETS: &[EqualizerPreset] = &[
    preset(PRESET_FLAT, "standard", [0.0; BAND_ANZAHL]),
    preset("rock", "standard", [5.0, 4.0, 3.0, 2.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0]),
    preset("jazz", "standard", [4.0, 3.0, 1.0, 2.0, -1.0, -1.0, 0.0, 1.0, 2.0, 3.0]),
    preset("classical", "standard", [5.0, 4.0, 3.0, 2.0, -1.0, -2.0, 0.0, 2.0, 3.0, 4.0]),
    preset("voice", "standard", [-2.0, -1.0, 0.0, 3.0, 5.0, 5.0, 4.0, 2.0, 0.0, -2.0]),
    preset("bass_boost", "standard", [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    preset("meditation", "meditation", [3.0, 2.0, 1.0, 0.0, -1.0, -2.0, -1.0, 0.0, 1.0, 2.0]),
    preset("relax", "meditation", [2.0, 3.0, 2.0, 1.0, 0.0, -1.0, -1.0, 0.0, 1.0, 1.0]),
    preset("new_age", "meditation", [4.0, 3.0, 2.0, 0.0, -2.0, -2.0, 0.0, 2.0, 3.0, 4.0]),
    preset("ambient", "meditation", [3.0, 4.0, 3.0, 1.0, -1.0, -2.0, -1.0, 1.0, 2.0, 3.0]),
    preset("sleep", "meditation", [2.0, 2.0, 1.0, 0.0, -1.0, -2.0, -2.0, -1.0, 0.0, 0.0]),
    preset("nature", "meditation", [1.0, 2.0, 2.0, 1.0, 0.0, 0.0, 1.0, 2.0, 2.0, 1.0]),
];

/// Sucht ein Preset anhand seines Namens
pub fn preset_finden(name: &str) -> Option<&'static EqualizerPreset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// Aktive Equalizer-Einstellung einer Session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualizerZustand {
    /// Preset-Name oder `custom`
    pub preset: String,
    pub baender: Baender,
}

impl Default for EqualizerZustand {
    fn default() -> Self {
        Self {
            preset: PRESET_FLAT.into(),
            baender: [0.0; BAND_ANZAHL],
        }
    }
}

impl EqualizerZustand {
    pub fn aus_preset(name: &str) -> Result<Self> {
        let preset = preset_finden(name).ok_or_else(|| {
            let namen: Vec<&str> = PRESETS.iter().map(|p| p.name).collect();
            KanalfunkError::UngueltigesArgument(format!(
                "unbekanntes Equalizer-Preset '{name}', verfuegbar: {}",
                namen.join(", ")
            ))
        })?;
        Ok(Self {
            preset: preset.name.into(),
            baender: preset.baender,
        })
    }

    /// Eigene Baender; genau zehn Werte im Bereich -24..=12 dB
    pub fn benutzerdefiniert(werte: &[f64]) -> Result<Self> {
        let baender: Baender = werte.try_into().map_err(|_| {
            KanalfunkError::UngueltigesArgument(format!(
                "Equalizer erwartet {BAND_ANZAHL} Baender, erhalten: {}",
                werte.len()
            ))
        })?;
        if let Some((index, wert)) = baender
            .iter()
            .enumerate()
            .find(|(_, w)| !(MIN_BAND_DB..=MAX_BAND_DB).contains(*w))
        {
            return Err(KanalfunkError::UngueltigesArgument(format!(
                "Band {index} ausserhalb von {MIN_BAND_DB}..{MAX_BAND_DB} dB: {wert}"
            )));
        }
        Ok(Self {
            preset: PRESET_CUSTOM.into(),
            baender,
        })
    }
}

/// Equalizer-Kette im ffmpeg-Format; Baender mit 0 dB entfallen
pub fn equalizer_kette(baender: &Baender) -> Option<String> {
    let glieder: Vec<String> = BAND_FREQUENZEN
        .iter()
        .zip(baender)
        .filter(|(_, gain)| gain.abs() > f64::EPSILON)
        .map(|(frequenz, gain)| format!("equalizer=f={frequenz}:t=o:w=1:g={gain:.1}"))
        .collect();
    (!glieder.is_empty()).then(|| glieder.join(","))
}
