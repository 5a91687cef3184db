//! Priority Queue – geordnete Warteschlange pro Kanal
//!
//! Drei Prioritaetsstufen (`high=0`, `normal=50`, `low=100`). Der Sortier-
//! schluessel ist `(stufe, sequenz)`; die Sequenz stammt aus einem atomaren
//! Zaehler pro Kanal und wird nie wiederverwendet. Innerhalb einer Stufe
//! bleibt damit die Einfuege-Reihenfolge erhalten, unabhaengig davon wie
//! nah beieinander die Aufrufe eintreffen.
//!
//! Thread-safe durch DashMap (Kanal-Liste) und einen Mutex pro Kanal.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kanalfunk_core::{ChannelId, Identity, ItemId, KanalfunkError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standard-Obergrenze fuer Eintraege pro Kanal
pub const STANDARD_MAX_GROESSE: usize = 100;

#[derive(Debug, Clone)]
pub struct QueueKonfig {
    /// Maximale Anzahl wartender Eintraege pro Kanal
    pub max_groesse: usize,
}

impl Default for QueueKonfig {
    fn default() -> Self {
        Self {
            max_groesse: STANDARD_MAX_GROESSE,
        }
    }
}

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Prioritaetsstufe – kleinere Werte werden zuerst gespielt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrioritaetsStufe {
    #[serde(rename = "high")]
    Hoch,
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "low")]
    Niedrig,
}

impl PrioritaetsStufe {
    /// Sortiergewicht der Stufe
    pub fn gewicht(self) -> u8 {
        match self {
            Self::Hoch => 0,
            Self::Normal => 50,
            Self::Niedrig => 100,
        }
    }
}

/// Sortierschluessel: (Stufengewicht, Sequenz) – durch die Sequenz nie gleich
type SortSchluessel = (u8, u64);

/// Ein wartender Eintrag in der Queue eines Kanals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub kanal_id: ChannelId,
    /// Verweis auf die Audio-Nutzlast (Datei-Pfad, URL, Telegram-File-ID)
    pub payload_ref: String,
    pub titel: Option<String>,
    /// Laenge in Sekunden (None = unbekannt)
    pub dauer_sekunden: Option<f64>,
    pub angefragt_von: Option<Identity>,
    pub prioritaet: PrioritaetsStufe,
    pub sequenz: u64,
    pub eingereiht_am: DateTime<Utc>,
}

impl QueueItem {
    fn sort_schluessel(&self) -> SortSchluessel {
        (self.prioritaet.gewicht(), self.sequenz)
    }
}

/// Eingabedaten fuer einen neuen Queue-Eintrag
#[derive(Debug, Clone, Default)]
pub struct NeuerEintrag {
    pub payload_ref: String,
    pub titel: Option<String>,
    pub dauer_sekunden: Option<f64>,
    pub angefragt_von: Option<Identity>,
}

impl NeuerEintrag {
    pub fn neu(payload_ref: impl Into<String>) -> Self {
        Self {
            payload_ref: payload_ref.into(),
            ..Default::default()
        }
    }

    pub fn mit_dauer(mut self, sekunden: f64) -> Self {
        self.dauer_sekunden = Some(sekunden);
        self
    }

    pub fn mit_titel(mut self, titel: impl Into<String>) -> Self {
        self.titel = Some(titel.into());
        self
    }

    fn validieren(&self) -> Result<()> {
        if self.payload_ref.trim().is_empty() {
            return Err(KanalfunkError::UngueltigesArgument(
                "payload_ref darf nicht leer sein".into(),
            ));
        }
        if let Some(dauer) = self.dauer_sekunden {
            if !dauer.is_finite() || dauer <= 0.0 {
                return Err(KanalfunkError::UngueltigesArgument(format!(
                    "dauer_sekunden muss positiv sein, erhalten: {dauer}"
                )));
            }
        }
        Ok(())
    }
}

/// Verteilung der wartenden Eintraege auf die Stufen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistik {
    pub gesamt: usize,
    pub hoch: usize,
    pub normal: usize,
    pub niedrig: usize,
    /// Summe aller bekannten Laengen
    pub gesamtdauer_sekunden: f64,
}

// ---------------------------------------------------------------------------
// KanalQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KanalEintraege {
    geordnet: BTreeMap<SortSchluessel, QueueItem>,
    index: HashMap<ItemId, SortSchluessel>,
}

/// Queue eines einzelnen Kanals
#[derive(Default)]
struct KanalQueue {
    /// Naechste freie Sequenznummer
    sequenz: AtomicU64,
    eintraege: Mutex<KanalEintraege>,
}

// ---------------------------------------------------------------------------
// PriorityQueue
// ---------------------------------------------------------------------------

/// Priority Queue aller Kanaele
pub struct PriorityQueue {
    konfig: QueueKonfig,
    kanaele: DashMap<ChannelId, Arc<KanalQueue>>,
}

impl PriorityQueue {
    pub fn neu(konfig: QueueKonfig) -> Self {
        Self {
            konfig,
            kanaele: DashMap::new(),
        }
    }

    fn kanal(&self, kanal_id: &ChannelId) -> Option<Arc<KanalQueue>> {
        self.kanaele.get(kanal_id).map(|q| Arc::clone(&q))
    }

    fn kanal_oder_neu(&self, kanal_id: &ChannelId) -> Arc<KanalQueue> {
        Arc::clone(&self.kanaele.entry(kanal_id.clone()).or_default())
    }

    /// Reiht einen neuen Eintrag mit der angegebenen Stufe ein
    pub fn hinzufuegen(
        &self,
        kanal_id: &ChannelId,
        eintrag: NeuerEintrag,
        stufe: PrioritaetsStufe,
    ) -> Result<QueueItem> {
        eintrag.validieren()?;

        let queue = self.kanal_oder_neu(kanal_id);
        let mut eintraege = queue.eintraege.lock();

        if eintraege.geordnet.len() >= self.konfig.max_groesse {
            tracing::warn!(
                kanal_id = %kanal_id,
                max = self.konfig.max_groesse,
                "Queue voll – Eintrag abgelehnt"
            );
            return Err(KanalfunkError::QueueVoll {
                max: self.konfig.max_groesse,
            });
        }

        let item = QueueItem {
            id: ItemId::new(),
            kanal_id: kanal_id.clone(),
            payload_ref: eintrag.payload_ref,
            titel: eintrag.titel,
            dauer_sekunden: eintrag.dauer_sekunden,
            angefragt_von: eintrag.angefragt_von,
            prioritaet: stufe,
            sequenz: queue.sequenz.fetch_add(1, Ordering::SeqCst),
            eingereiht_am: Utc::now(),
        };

        let schluessel = item.sort_schluessel();
        eintraege.index.insert(item.id, schluessel);
        eintraege.geordnet.insert(schluessel, item.clone());

        tracing::info!(
            kanal_id = %kanal_id,
            item_id = %item.id,
            prioritaet = ?stufe,
            sequenz = item.sequenz,
            "Eintrag eingereiht"
        );

        Ok(item)
    }

    /// Entnimmt den Eintrag mit dem kleinsten Sortierschluessel
    pub fn pop(&self, kanal_id: &ChannelId) -> Option<QueueItem> {
        let queue = self.kanal(kanal_id)?;
        let mut eintraege = queue.eintraege.lock();
        let (_, item) = eintraege.geordnet.pop_first()?;
        eintraege.index.remove(&item.id);
        tracing::debug!(kanal_id = %kanal_id, item_id = %item.id, "Eintrag entnommen");
        Some(item)
    }

    /// Geordneter Snapshot aller wartenden Eintraege (veraendert nichts)
    pub fn alle(&self, kanal_id: &ChannelId) -> Vec<QueueItem> {
        match self.kanal(kanal_id) {
            Some(queue) => queue.eintraege.lock().geordnet.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Entfernt einen bestimmten wartenden Eintrag
    pub fn entfernen(&self, kanal_id: &ChannelId, item_id: &ItemId) -> Option<QueueItem> {
        let queue = self.kanal(kanal_id)?;
        let mut eintraege = queue.eintraege.lock();
        let schluessel = eintraege.index.remove(item_id)?;
        let item = eintraege.geordnet.remove(&schluessel);
        if item.is_some() {
            tracing::info!(kanal_id = %kanal_id, item_id = %item_id, "Eintrag entfernt");
        }
        item
    }

    /// Leert die Queue eines Kanals und gibt die Anzahl entfernter Eintraege zurueck
    pub fn leeren(&self, kanal_id: &ChannelId) -> usize {
        let Some(queue) = self.kanal(kanal_id) else {
            return 0;
        };
        let mut eintraege = queue.eintraege.lock();
        let anzahl = eintraege.geordnet.len();
        eintraege.geordnet.clear();
        eintraege.index.clear();
        tracing::info!(kanal_id = %kanal_id, anzahl, "Queue geleert");
        anzahl
    }

    pub fn laenge(&self, kanal_id: &ChannelId) -> usize {
        self.kanal(kanal_id)
            .map(|q| q.eintraege.lock().geordnet.len())
            .unwrap_or(0)
    }

    /// Verteilung der Eintraege auf die Prioritaetsstufen
    pub fn statistik(&self, kanal_id: &ChannelId) -> QueueStatistik {
        let mut stat = QueueStatistik::default();
        for item in self.alle(kanal_id) {
            stat.gesamt += 1;
            match item.prioritaet {
                PrioritaetsStufe::Hoch => stat.hoch += 1,
                PrioritaetsStufe::Normal => stat.normal += 1,
                PrioritaetsStufe::Niedrig => stat.niedrig += 1,
            }
            stat.gesamtdauer_sekunden += item.dauer_sekunden.unwrap_or(0.0);
        }
        stat
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::neu(QueueKonfig::default())
    }
}
