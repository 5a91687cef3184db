//! Rate Limiter fuer den Kanalfunk Commander
//!
//! Fixed-Window-Zaehler pro Identitaet. Jeder Aufruf von
//! [`RateLimiter::pruefen`] erhoeht den Zaehler in einem einzigen atomaren
//! Speicher-Schritt; der erste Schritt eines neuen Fensters setzt den Ablauf.
//! Abgelehnte Anfragen zaehlen mit und werden nicht zurueckgerollt.
//!
//! Der Zaehler-Speicher ist austauschbar ([`ZaehlerSpeicher`]). Ist er nicht
//! erreichbar, entscheidet die [`FehlerStrategie`] ueber Zulassung.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kanalfunk_core::{Identity, KanalfunkError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Verhalten wenn der Zaehler-Speicher nicht erreichbar ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FehlerStrategie {
    /// Anfrage zulassen und warnen
    #[default]
    Open,
    /// Anfrage mit `InfrastrukturNichtVerfuegbar` ablehnen
    Closed,
}

/// Konfiguration fuer den Rate Limiter
#[derive(Debug, Clone)]
pub struct RateLimitKonfig {
    /// Maximale Anfragen pro Fenster und Identitaet
    pub limit: u32,
    /// Laenge eines Fensters
    pub fenster: Duration,
    pub strategie: FehlerStrategie,
}

impl Default for RateLimitKonfig {
    fn default() -> Self {
        Self {
            limit: 100,
            fenster: Duration::from_secs(60),
            strategie: FehlerStrategie::Open,
        }
    }
}

// ---------------------------------------------------------------------------
// Zaehler-Speicher
// ---------------------------------------------------------------------------

/// Stand eines Zaehlers direkt nach dem Inkrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZaehlerStand {
    pub anzahl: u64,
    /// Restlaufzeit des aktuellen Fensters
    pub laeuft_ab_in: Duration,
}

/// Speicher fuer Fenster-Zaehler (Semantik wie Redis `INCR` + `EXPIRE` + `TTL`)
#[async_trait]
pub trait ZaehlerSpeicher: Send + Sync + 'static {
    /// Erhoeht den Zaehler atomar; startet ein neues Fenster falls das alte abgelaufen ist
    async fn inkrementieren(&self, schluessel: &str, fenster: Duration) -> Result<ZaehlerStand>;

    /// Loescht den Zaehler eines Schluessels
    async fn zuruecksetzen(&self, schluessel: &str) -> Result<()>;

    /// Entfernt abgelaufene Fenster und gibt deren Anzahl zurueck
    async fn aufraeumen(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
struct Fenster {
    anzahl: u64,
    ablauf: Instant,
}

/// Prozesslokaler Zaehler-Speicher
///
/// Der DashMap-Entry sperrt den Schluessel waehrend des Inkrements, damit
/// ist jeder Zaehlschritt atomar.
#[derive(Default)]
pub struct InMemoryZaehler {
    fenster: DashMap<String, Fenster>,
}

impl InMemoryZaehler {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Aktueller Zaehlerstand (None wenn kein laufendes Fenster existiert)
    pub fn anzahl(&self, schluessel: &str) -> Option<u64> {
        self.fenster
            .get(schluessel)
            .filter(|f| f.ablauf > Instant::now())
            .map(|f| f.anzahl)
    }
}

#[async_trait]
impl ZaehlerSpeicher for InMemoryZaehler {
    async fn inkrementieren(&self, schluessel: &str, fenster: Duration) -> Result<ZaehlerStand> {
        let jetzt = Instant::now();
        let mut eintrag = self
            .fenster
            .entry(schluessel.to_string())
            .or_insert(Fenster {
                anzahl: 0,
                ablauf: jetzt + fenster,
            });

        if eintrag.ablauf <= jetzt {
            eintrag.anzahl = 0;
            eintrag.ablauf = jetzt + fenster;
        }
        eintrag.anzahl = eintrag.anzahl.saturating_add(1);

        Ok(ZaehlerStand {
            anzahl: eintrag.anzahl,
            laeuft_ab_in: eintrag.ablauf - jetzt,
        })
    }

    async fn zuruecksetzen(&self, schluessel: &str) -> Result<()> {
        self.fenster.remove(schluessel);
        Ok(())
    }

    async fn aufraeumen(&self) -> Result<usize> {
        let jetzt = Instant::now();
        let vorher = self.fenster.len();
        self.fenster.retain(|_, f| f.ablauf > jetzt);
        Ok(vorher.saturating_sub(self.fenster.len()))
    }
}

// ---------------------------------------------------------------------------
// Entscheidung
// ---------------------------------------------------------------------------

/// Ergebnis einer Zulassungspruefung
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitEntscheidung {
    pub erlaubt: bool,
    pub limit: u32,
    pub verbleibend: u32,
    pub reset_at: DateTime<Utc>,
    /// Nur bei Ablehnung gesetzt
    pub retry_after: Option<Duration>,
}

impl RateLimitEntscheidung {
    /// Wartezeit in ganzen Sekunden (aufgerundet, mindestens 1)
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
            .map(|s| s.max(1))
    }

    /// Standard-Header fuer die HTTP-Grenze
    pub fn header(&self) -> Vec<(&'static str, String)> {
        let mut header = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.verbleibend.to_string()),
            ("X-RateLimit-Reset", self.reset_at.timestamp().to_string()),
        ];
        if let Some(sekunden) = self.retry_after_secs() {
            header.push(("Retry-After", sekunden.to_string()));
        }
        header
    }

    /// Wandelt eine Ablehnung in den passenden Fehler
    pub fn als_fehler(&self) -> KanalfunkError {
        KanalfunkError::ZulassungAbgelehnt {
            retry_after_secs: self.retry_after_secs().unwrap_or(1),
            limit: self.limit,
            reset_unix: self.reset_at.timestamp(),
        }
    }
}

fn zeitpunkt_in(dauer: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(dauer).unwrap_or_else(|_| chrono::Duration::zero())
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Rate Limiter mit Fixed-Window-Zaehler pro Identitaet
pub struct RateLimiter {
    konfig: RateLimitKonfig,
    speicher: Arc<dyn ZaehlerSpeicher>,
    speicher_erreichbar: AtomicBool,
}

impl RateLimiter {
    pub fn neu(konfig: RateLimitKonfig, speicher: Arc<dyn ZaehlerSpeicher>) -> Arc<Self> {
        Arc::new(Self {
            konfig,
            speicher,
            speicher_erreichbar: AtomicBool::new(true),
        })
    }

    /// Rate Limiter mit prozesslokalem Speicher
    pub fn im_speicher(konfig: RateLimitKonfig) -> Arc<Self> {
        Self::neu(konfig, Arc::new(InMemoryZaehler::neu()))
    }

    pub fn konfig(&self) -> &RateLimitKonfig {
        &self.konfig
    }

    fn schluessel(identitaet: &Identity) -> String {
        format!("rate_limit:{identitaet}")
    }

    /// true solange der letzte Speicherzugriff erfolgreich war
    pub fn speicher_erreichbar(&self) -> bool {
        self.speicher_erreichbar.load(Ordering::Relaxed)
    }

    /// Prueft und zaehlt eine Anfrage der Identitaet.
    ///
    /// `Err` nur bei nicht erreichbarem Speicher und [`FehlerStrategie::Closed`].
    pub async fn pruefen(&self, identitaet: &Identity) -> Result<RateLimitEntscheidung> {
        let limit = self.konfig.limit;

        let stand = match self
            .speicher
            .inkrementieren(&Self::schluessel(identitaet), self.konfig.fenster)
            .await
        {
            Ok(stand) => {
                self.speicher_erreichbar.store(true, Ordering::Relaxed);
                stand
            }
            Err(e) => {
                self.speicher_erreichbar.store(false, Ordering::Relaxed);
                return match self.konfig.strategie {
                    FehlerStrategie::Open => {
                        tracing::warn!(
                            identitaet = %identitaet,
                            fehler = %e,
                            "Zaehler-Speicher nicht erreichbar – Anfrage zugelassen (fail-open)"
                        );
                        Ok(RateLimitEntscheidung {
                            erlaubt: true,
                            limit,
                            verbleibend: limit,
                            reset_at: zeitpunkt_in(self.konfig.fenster),
                            retry_after: None,
                        })
                    }
                    FehlerStrategie::Closed => {
                        tracing::error!(
                            identitaet = %identitaet,
                            fehler = %e,
                            "Zaehler-Speicher nicht erreichbar – Anfrage abgelehnt (fail-closed)"
                        );
                        Err(KanalfunkError::InfrastrukturNichtVerfuegbar(format!(
                            "Zaehler-Speicher: {e}"
                        )))
                    }
                };
            }
        };

        let reset_at = zeitpunkt_in(stand.laeuft_ab_in);
        if stand.anzahl > u64::from(limit) {
            tracing::debug!(
                identitaet = %identitaet,
                anzahl = stand.anzahl,
                limit,
                "Rate Limit ueberschritten"
            );
            return Ok(RateLimitEntscheidung {
                erlaubt: false,
                limit,
                verbleibend: 0,
                reset_at,
                retry_after: Some(stand.laeuft_ab_in),
            });
        }

        Ok(RateLimitEntscheidung {
            erlaubt: true,
            limit,
            verbleibend: limit - stand.anzahl as u32,
            reset_at,
            retry_after: None,
        })
    }

    /// Setzt den Zaehler einer Identitaet zurueck (Admin)
    pub async fn zuruecksetzen(&self, identitaet: &Identity) -> Result<()> {
        self.speicher.zuruecksetzen(&Self::schluessel(identitaet)).await?;
        tracing::info!(identitaet = %identitaet, "Rate Limit zurueckgesetzt");
        Ok(())
    }

    /// Bereinigt abgelaufene Fenster (Speicher-Management).
    pub async fn cleanup(&self) -> Result<usize> {
        let entfernt = self.speicher.aufraeumen().await?;
        if entfernt > 0 {
            tracing::debug!(entfernt, "Abgelaufene Rate-Limit-Fenster entfernt");
        }
        Ok(entfernt)
    }
}
