//! StreamSourceManager – Radio-Quellen mit begrenzter Wiederverbindung
//!
//! ```text
//! Connecting -> Streaming -> (Fehler) Reconnecting -> Streaming | Failed
//! ```
//!
//! Pro Kanal existiert hoechstens eine Quelle und hoechstens ein laufender
//! Verbindungsversuch. Jeder Versuch laeuft als eigener Task mit einem
//! Kind-Token des Quellen-Tokens; `stoppen()` bricht damit auch eine
//! wartende Wiederverbindung sofort ab. Ergebnisse veralteter Versuche
//! (ersetzte oder gestoppte Quelle) werden ueber Epoche und Token verworfen.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kanalfunk_core::{ChannelId, EskalationsEreignis, EventBus, KanalfunkError, KanalfunkEvent, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RadioKonfig {
    /// Maximale Wiederverbindungsversuche bevor eskaliert wird
    pub max_versuche: u32,
    /// Feste Wartezeit vor jedem Wiederverbindungsversuch
    pub backoff: Duration,
    /// Timeout fuer einen einzelnen Verbindungsversuch
    pub verbindungs_timeout: Duration,
}

impl Default for RadioKonfig {
    fn default() -> Self {
        Self {
            max_versuche: 3,
            backoff: Duration::from_secs(5),
            verbindungs_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuellenArt {
    Datei,
    Radio,
}

const DATEI_ENDUNGEN: &[&str] = &[".mp3", ".ogg", ".opus", ".flac", ".m4a", ".wav", ".aac"];

impl QuellenArt {
    /// Leitet die Art aus dem Pfad der URL ab (bekannte Audio-Endung = Datei)
    pub fn aus_url(url: &reqwest::Url) -> Self {
        let pfad = url.path().to_ascii_lowercase();
        if DATEI_ENDUNGEN.iter().any(|endung| pfad.ends_with(endung)) {
            Self::Datei
        } else {
            Self::Radio
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuellenStatus {
    Connecting,
    Streaming,
    Reconnecting,
    Failed,
}

/// Oeffentlicher Snapshot einer Stream-Quelle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamQuelle {
    pub kanal_id: ChannelId,
    pub url: String,
    pub art: QuellenArt,
    pub versuche: u32,
    pub max_versuche: u32,
    pub backoff_sekunden: u64,
    pub status: QuellenStatus,
}

/// Verwaltungseintrag einer Quelle
struct QuellenEintrag {
    quelle: StreamQuelle,
    /// Eindeutige Kennung dieses `starten()`-Aufrufs
    epoche: u64,
    /// Eltern-Token – bricht beim Stoppen alle Versuche ab
    abbruch: CancellationToken,
    /// Token des aktuell geplanten oder laufenden Versuchs
    laufend: Option<CancellationToken>,
}

/// Herkunft eines Task-Ergebnisses
struct Versuch {
    epoche: u64,
    token: CancellationToken,
}

impl Versuch {
    fn ist_aktuell(&self, eintrag: &QuellenEintrag) -> bool {
        eintrag.epoche == self.epoche && !self.token.is_cancelled()
    }
}

/// Baut die Verbindung zu einer Stream-URL auf (bzw. prueft sie)
#[async_trait]
pub trait StreamVerbinder: Send + Sync + 'static {
    async fn verbinden(&self, kanal_id: &ChannelId, url: &str) -> Result<()>;
}

/// Prueft eine URL auf Schema und Host und gibt sie geparst zurueck
pub fn url_validieren(url: &str) -> Result<reqwest::Url> {
    let geparst = reqwest::Url::parse(url.trim())
        .map_err(|e| KanalfunkError::UngueltigesArgument(format!("ungueltige Stream-URL '{url}': {e}")))?;

    if !matches!(geparst.scheme(), "http" | "https") {
        return Err(KanalfunkError::UngueltigesArgument(format!(
            "Stream-URL muss http:// oder https:// verwenden: {url}"
        )));
    }
    if geparst.host_str().map_or(true, str::is_empty) {
        return Err(KanalfunkError::UngueltigesArgument(format!(
            "Stream-URL ohne Host: {url}"
        )));
    }
    Ok(geparst)
}

// ---------------------------------------------------------------------------
// HttpStreamVerbinder
// ---------------------------------------------------------------------------

/// Prueft eine Radio-URL per HTTP HEAD (Status 200, Content-Type wird geloggt)
pub struct HttpStreamVerbinder {
    client: reqwest::Client,
}

impl HttpStreamVerbinder {
    pub fn neu(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kanalfunk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KanalfunkError::intern(format!("HTTP-Client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamVerbinder for HttpStreamVerbinder {
    async fn verbinden(&self, kanal_id: &ChannelId, url: &str) -> Result<()> {
        let antwort = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| KanalfunkError::QuellenFehler(format!("{url}: {e}")))?;

        if antwort.status() != reqwest::StatusCode::OK {
            return Err(KanalfunkError::QuellenFehler(format!(
                "{url}: HTTP {}",
                antwort.status()
            )));
        }

        let content_type = antwort
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("audio/") {
            tracing::warn!(
                kanal_id = %kanal_id,
                url,
                content_type,
                "Stream liefert keinen Audio-Content-Type"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StreamSourceManager
// ---------------------------------------------------------------------------

struct Inner {
    konfig: RadioKonfig,
    verbinder: Arc<dyn StreamVerbinder>,
    bus: Arc<dyn EventBus>,
    quellen: DashMap<ChannelId, QuellenEintrag>,
    naechste_epoche: AtomicU64,
}

/// Supervisor aller Radio-Quellen (guenstig klonbar)
#[derive(Clone)]
pub struct StreamSourceManager {
    inner: Arc<Inner>,
}

impl StreamSourceManager {
    pub fn neu(
        konfig: RadioKonfig,
        verbinder: Arc<dyn StreamVerbinder>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                konfig,
                verbinder,
                bus,
                quellen: DashMap::new(),
                naechste_epoche: AtomicU64::new(1),
            }),
        }
    }

    /// Startet eine Quelle; eine bestehende Quelle des Kanals wird ersetzt
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn starten(&self, kanal_id: &ChannelId, url: &str) -> Result<StreamQuelle> {
        let geparst = url_validieren(url)?;
        let epoche = self.inner.naechste_epoche.fetch_add(1, Ordering::SeqCst);
        let abbruch = CancellationToken::new();
        let token = abbruch.child_token();

        let quelle = StreamQuelle {
            kanal_id: kanal_id.clone(),
            url: geparst.to_string(),
            art: QuellenArt::aus_url(&geparst),
            versuche: 0,
            max_versuche: self.inner.konfig.max_versuche,
            backoff_sekunden: self.inner.konfig.backoff.as_secs(),
            status: QuellenStatus::Connecting,
        };

        let alt = self.inner.quellen.insert(
            kanal_id.clone(),
            QuellenEintrag {
                quelle: quelle.clone(),
                epoche,
                abbruch,
                laufend: Some(token.clone()),
            },
        );
        if let Some(alt) = alt {
            alt.abbruch.cancel();
            tracing::info!(
                kanal_id = %kanal_id,
                alte_url = %alt.quelle.url,
                "Bestehende Quelle ersetzt"
            );
        }

        tracing::info!(kanal_id = %kanal_id, url = %quelle.url, art = ?quelle.art, "Quelle wird verbunden");
        self.versuch_planen(kanal_id.clone(), quelle.url.clone(), Versuch { epoche, token }, None);
        Ok(quelle)
    }

    /// Stoppt die Quelle eines Kanals; wartende Versuche werden abgebrochen
    pub fn stoppen(&self, kanal_id: &ChannelId) -> bool {
        match self.inner.quellen.remove(kanal_id) {
            Some((_, eintrag)) => {
                eintrag.abbruch.cancel();
                tracing::info!(kanal_id = %kanal_id, url = %eintrag.quelle.url, "Quelle gestoppt");
                true
            }
            None => false,
        }
    }

    /// Stoppt alle Quellen (Shutdown)
    pub fn alle_stoppen(&self) {
        let kanaele: Vec<ChannelId> = self.inner.quellen.iter().map(|e| e.key().clone()).collect();
        for kanal_id in kanaele {
            self.stoppen(&kanal_id);
        }
    }

    /// Meldet einen Fehler der aktuellen Quelle (z.B. Stream-Abbruch waehrend `Streaming`)
    pub fn bei_fehler(&self, kanal_id: &ChannelId, grund: &str) {
        self.fehler_verarbeiten(kanal_id, None, grund.to_string());
    }

    /// Meldet eine erfolgreiche (Wieder-)Verbindung der aktuellen Quelle
    pub fn bei_erfolg(&self, kanal_id: &ChannelId) {
        self.erfolg_verarbeiten(kanal_id, None);
    }

    pub fn status(&self, kanal_id: &ChannelId) -> Option<StreamQuelle> {
        self.inner.quellen.get(kanal_id).map(|e| e.quelle.clone())
    }

    /// Alle aktuell verwalteten Quellen
    pub fn aktive(&self) -> Vec<StreamQuelle> {
        self.inner.quellen.iter().map(|e| e.quelle.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Interne Logik
    // -----------------------------------------------------------------------

    fn versuch_planen(
        &self,
        kanal_id: ChannelId,
        url: String,
        versuch: Versuch,
        verzoegerung: Option<Duration>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.versuch_ausfuehren(kanal_id, url, versuch, verzoegerung).await;
        });
    }

    async fn versuch_ausfuehren(
        &self,
        kanal_id: ChannelId,
        url: String,
        versuch: Versuch,
        verzoegerung: Option<Duration>,
    ) {
        if let Some(verzoegerung) = verzoegerung {
            tokio::select! {
                biased;
                _ = versuch.token.cancelled() => {
                    tracing::debug!(kanal_id = %kanal_id, "Wiederverbindung abgebrochen");
                    return;
                }
                _ = tokio::time::sleep(verzoegerung) => {}
            }

            match self.inner.quellen.get_mut(&kanal_id) {
                Some(mut eintrag) if versuch.ist_aktuell(&eintrag) => {
                    eintrag.quelle.status = QuellenStatus::Connecting;
                }
                _ => return,
            }
        }

        let timeout = self.inner.konfig.verbindungs_timeout;
        let ergebnis = tokio::select! {
            biased;
            _ = versuch.token.cancelled() => return,
            r = tokio::time::timeout(timeout, self.inner.verbinder.verbinden(&kanal_id, &url)) => r,
        };

        match ergebnis {
            Ok(Ok(())) => self.erfolg_verarbeiten(&kanal_id, Some(&versuch)),
            Ok(Err(e)) => self.fehler_verarbeiten(&kanal_id, Some(&versuch), e.to_string()),
            Err(_) => self.fehler_verarbeiten(
                &kanal_id,
                Some(&versuch),
                format!("Zeitueberschreitung nach {}s", timeout.as_secs()),
            ),
        }
    }

    fn erfolg_verarbeiten(&self, kanal_id: &ChannelId, versuch: Option<&Versuch>) {
        let url = {
            let Some(mut eintrag) = self.inner.quellen.get_mut(kanal_id) else {
                return;
            };
            if versuch.is_some_and(|v| !v.ist_aktuell(&eintrag)) {
                tracing::debug!(kanal_id = %kanal_id, "Veraltete Erfolgsmeldung verworfen");
                return;
            }
            eintrag.quelle.versuche = 0;
            eintrag.quelle.status = QuellenStatus::Streaming;
            if let Some(laufend) = eintrag.laufend.take() {
                laufend.cancel();
            }
            eintrag.quelle.url.clone()
        };

        tracing::info!(kanal_id = %kanal_id, url = %url, "Quelle verbunden");
        self.inner.bus.senden(KanalfunkEvent::QuelleVerbunden {
            kanal_id: kanal_id.clone(),
            url,
        });
    }

    fn fehler_verarbeiten(&self, kanal_id: &ChannelId, versuch: Option<&Versuch>, grund: String) {
        let Entry::Occupied(mut eintrag) = self.inner.quellen.entry(kanal_id.clone()) else {
            tracing::debug!(kanal_id = %kanal_id, grund = %grund, "Fehler ohne aktive Quelle verworfen");
            return;
        };
        if versuch.is_some_and(|v| !v.ist_aktuell(eintrag.get())) {
            tracing::debug!(kanal_id = %kanal_id, grund = %grund, "Veraltete Fehlermeldung verworfen");
            return;
        }

        let max = self.inner.konfig.max_versuche;
        let q = eintrag.get_mut();
        q.quelle.versuche += 1;
        let versuche = q.quelle.versuche;

        if versuche <= max {
            q.quelle.status = QuellenStatus::Reconnecting;
            if let Some(alt) = q.laufend.take() {
                alt.cancel();
            }
            let token = q.abbruch.child_token();
            q.laufend = Some(token.clone());
            let naechster = Versuch {
                epoche: q.epoche,
                token,
            };
            let url = q.quelle.url.clone();
            drop(eintrag);

            tracing::warn!(
                kanal_id = %kanal_id,
                versuch = versuche,
                max,
                grund = %grund,
                "Quelle ausgefallen – Wiederverbindung geplant"
            );
            self.inner.bus.senden(KanalfunkEvent::Wiederverbindung {
                kanal_id: kanal_id.clone(),
                versuch: versuche,
                grund,
            });
            self.versuch_planen(kanal_id.clone(), url, naechster, Some(self.inner.konfig.backoff));
        } else {
            let (_, mut entfernt) = eintrag.remove_entry();
            entfernt.quelle.status = QuellenStatus::Failed;
            entfernt.abbruch.cancel();

            tracing::error!(
                kanal_id = %kanal_id,
                url = %entfernt.quelle.url,
                versuche,
                grund = %grund,
                "Wiederverbindung erschoepft – Eskalation"
            );
            self.inner.bus.senden(KanalfunkEvent::Eskalation(EskalationsEreignis {
                kanal_id: kanal_id.clone(),
                url: entfernt.quelle.url,
                grund,
                versuche,
                zeitpunkt: Utc::now(),
            }));
        }
    }
}
