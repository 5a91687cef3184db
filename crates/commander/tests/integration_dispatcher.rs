//! Integration-Tests fuer den Dispatcher (Zulassung, Kanal-Sperre, Routing)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kanalfunk_commander::{
    Anfrage, Antwort, Befehl, Dispatcher, FehlerStrategie, RateLimitKonfig, RateLimiter,
    SteuerAktion, ZaehlerSpeicher, ZaehlerStand,
};
use kanalfunk_core::{
    BroadcastBus, ChannelId, EskalationsEreignis, EventBus, KanalfunkError, KanalfunkEvent,
    PlaybackStatus, Result,
};
use kanalfunk_observability::KanalfunkMetrics;
use kanalfunk_playback::{
    LoggendeEngine, PrioritaetsStufe, PriorityQueue, QueueKonfig, RadioKonfig, SessionRegistry,
    SessionZustand, StreamSourceManager, StreamVerbinder, WiedergabeKonfig,
};

/// Verbinder mit festem Ergebnis
struct TestVerbinder {
    erfolgreich: bool,
}

#[async_trait]
impl StreamVerbinder for TestVerbinder {
    async fn verbinden(&self, _kanal_id: &ChannelId, _url: &str) -> Result<()> {
        if self.erfolgreich {
            Ok(())
        } else {
            Err(KanalfunkError::QuellenFehler("503 Service Unavailable".into()))
        }
    }
}

/// Zaehler-Speicher der nie erreichbar ist
struct AusgefallenerSpeicher;

#[async_trait]
impl ZaehlerSpeicher for AusgefallenerSpeicher {
    async fn inkrementieren(&self, _schluessel: &str, _fenster: Duration) -> Result<ZaehlerStand> {
        Err(KanalfunkError::InfrastrukturNichtVerfuegbar("Timeout".into()))
    }
    async fn zuruecksetzen(&self, _schluessel: &str) -> Result<()> {
        Ok(())
    }
    async fn aufraeumen(&self) -> Result<usize> {
        Ok(0)
    }
}

struct Aufbau {
    dispatcher: Arc<Dispatcher>,
    metriken: KanalfunkMetrics,
}

fn aufbau_mit(limiter: Arc<RateLimiter>, radio_ok: bool) -> Aufbau {
    let bus: Arc<dyn EventBus> = Arc::new(BroadcastBus::neu());
    let metriken = KanalfunkMetrics::neu().unwrap();
    let sitzungen = Arc::new(SessionRegistry::neu(
        WiedergabeKonfig::default(),
        Arc::new(LoggendeEngine),
        bus.clone(),
    ));
    let radio = StreamSourceManager::neu(
        RadioKonfig::default(),
        Arc::new(TestVerbinder {
            erfolgreich: radio_ok,
        }),
        bus.clone(),
    );
    let dispatcher = Dispatcher::neu(
        limiter,
        Arc::new(PriorityQueue::neu(QueueKonfig::default())),
        sitzungen,
        radio,
        metriken.clone(),
    );
    tokio::spawn(dispatcher.clone().ereignisse_verarbeiten(bus.abonnieren()));
    Aufbau {
        dispatcher,
        metriken,
    }
}

fn aufbau(limit: u32) -> Aufbau {
    let limiter = RateLimiter::im_speicher(RateLimitKonfig {
        limit,
        ..Default::default()
    });
    aufbau_mit(limiter, true)
}

fn einreihen(name: &str, dauer: f64, prioritaet: PrioritaetsStufe) -> Befehl {
    Befehl::Einreihen {
        payload_ref: name.to_string(),
        titel: Some(name.to_uppercase()),
        dauer_sekunden: Some(dauer),
        prioritaet,
    }
}

fn steuerung(aktion: SteuerAktion) -> Befehl {
    Befehl::Steuerung { aktion }
}

async fn senden(a: &Aufbau, kanal: &str, befehl: Befehl) -> Result<Antwort> {
    a.dispatcher
        .dispatch(Anfrage::neu("user-1", kanal, befehl))
        .await
        .map(|ausgang| ausgang.antwort)
}

async fn zustand(a: &Aufbau, kanal: &str) -> SessionZustand {
    match senden(a, kanal, Befehl::Zustand).await.unwrap() {
        Antwort::Zustand { zustand } => zustand,
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }
}

async fn status(a: &Aufbau, kanal: &str) -> PlaybackStatus {
    zustand(a, kanal).await.status
}

fn position(antwort: Antwort) -> usize {
    match antwort {
        Antwort::Eingereiht { position, .. } => position,
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }
}

/// Wartet (virtuelle Zeit) bis die Session eines Kanals den Status erreicht
async fn warte_auf_status(a: &Aufbau, kanal: &str, ziel: PlaybackStatus) {
    let kanal_id = ChannelId::from(kanal);
    for _ in 0..100 {
        if let Some(sitzung) = a.dispatcher.sitzungen().vorhanden(&kanal_id) {
            if sitzung.lock().await.status() == ziel {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Status {ziel} wurde nicht erreicht");
}

#[tokio::test]
async fn ablehnung_ohne_seiteneffekte() {
    let a = aufbau(1);
    senden(&a, "ch1", einreihen("a", 100.0, PrioritaetsStufe::Normal))
        .await
        .unwrap();

    let fehler = senden(&a, "ch1", einreihen("b", 100.0, PrioritaetsStufe::Hoch))
        .await
        .unwrap_err();
    assert!(matches!(fehler, KanalfunkError::ZulassungAbgelehnt { limit: 1, .. }));
    assert_eq!(fehler.http_status(), 429);
    assert!(fehler.retry_after_secs().unwrap() > 0);

    // "a" laeuft bereits, "b" wurde weder eingereiht noch geladen
    let kanal = ChannelId::from("ch1");
    assert_eq!(a.dispatcher.queue().laenge(&kanal), 0);
    let sitzung = a.dispatcher.sitzungen().vorhanden(&kanal).unwrap();
    assert_eq!(sitzung.lock().await.snapshot().aktuell.as_deref(), Some("A"));

    // Auch fuer unbekannte Kanaele entsteht keine Session
    senden(&a, "ch2", Befehl::Zustand).await.unwrap_err();
    assert!(a.dispatcher.sitzungen().vorhanden(&ChannelId::from("ch2")).is_none());
}

#[tokio::test]
async fn ausgang_traegt_rate_limit_info() {
    let a = aufbau(5);
    let ausgang = a
        .dispatcher
        .dispatch(Anfrage::neu("user-1", "ch1", Befehl::QueueListe))
        .await
        .unwrap();
    assert_eq!(ausgang.rate_limit.limit, 5);
    assert_eq!(ausgang.rate_limit.verbleibend, 4);
    assert!(ausgang
        .rate_limit
        .header()
        .iter()
        .any(|(name, wert)| *name == "X-RateLimit-Remaining" && wert == "4"));
}

#[tokio::test]
async fn unbekannter_kanal_startet_idle() {
    let a = aufbau(100);
    assert_eq!(status(&a, "neu").await, PlaybackStatus::Idle);
}

#[tokio::test]
async fn einreihen_startet_leerlauf() {
    let a = aufbau(100);
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Idle);

    let antwort = senden(&a, "ch1", einreihen("a", 100.0, PrioritaetsStufe::Normal))
        .await
        .unwrap();
    assert_eq!(position(antwort), 0, "sofort geladen");

    let z = zustand(&a, "ch1").await;
    assert_eq!(z.status, PlaybackStatus::Loading);
    assert_eq!(z.aktuell.as_deref(), Some("A"));
    assert_eq!(a.dispatcher.queue().laenge(&ChannelId::from("ch1")), 0);

    // Weitere Eintraege warten hinter dem laufenden Titel
    let antwort = senden(&a, "ch1", einreihen("b", 100.0, PrioritaetsStufe::Normal))
        .await
        .unwrap();
    assert_eq!(position(antwort), 1);
    assert_eq!(zustand(&a, "ch1").await.aktuell.as_deref(), Some("A"));
}

#[tokio::test]
async fn einreihen_nach_leerlauf_der_queue() {
    let a = aufbau(100);
    let kanal = ChannelId::from("ch1");
    senden(&a, "ch1", einreihen("a", 100.0, PrioritaetsStufe::Normal)).await.unwrap();
    a.dispatcher.titel_gestartet(&kanal).await.unwrap();
    assert!(a.dispatcher.titel_beendet(&kanal).await.unwrap().is_none());
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Ended);

    let antwort = senden(&a, "ch1", einreihen("b", 50.0, PrioritaetsStufe::Niedrig))
        .await
        .unwrap();
    assert_eq!(position(antwort), 0);
    let z = zustand(&a, "ch1").await;
    assert_eq!(z.status, PlaybackStatus::Loading);
    assert_eq!(z.aktuell.as_deref(), Some("B"));
    assert_eq!(z.dauer_sekunden, Some(50.0));
}

#[tokio::test]
async fn einreihen_nach_fehler_startet_neu() {
    let a = aufbau(100);
    let kanal = ChannelId::from("ch1");
    senden(&a, "ch1", einreihen("a", 100.0, PrioritaetsStufe::Normal)).await.unwrap();
    a.dispatcher
        .wiedergabe_fehlgeschlagen(&kanal, "Decoder abgestuerzt")
        .await
        .unwrap();
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Error);

    senden(&a, "ch1", einreihen("b", 100.0, PrioritaetsStufe::Normal)).await.unwrap();
    let z = zustand(&a, "ch1").await;
    assert_eq!(z.status, PlaybackStatus::Loading);
    assert_eq!(z.aktuell.as_deref(), Some("B"));
    assert!(z.fehler.is_none());
}

#[tokio::test]
async fn prioritaeten_und_seek_ueber_ende() {
    let a = aufbau(100);
    // Der erste Eintrag startet sofort, die folgenden warten
    senden(&a, "ch1", einreihen("laufend", 100.0, PrioritaetsStufe::Normal)).await.unwrap();
    senden(&a, "ch1", einreihen("a", 100.0, PrioritaetsStufe::Normal)).await.unwrap();
    senden(&a, "ch1", einreihen("b", 100.0, PrioritaetsStufe::Hoch)).await.unwrap();
    senden(&a, "ch1", einreihen("c", 100.0, PrioritaetsStufe::Normal)).await.unwrap();

    let erster = senden(&a, "ch1", steuerung(SteuerAktion::Naechster)).await.unwrap();
    assert!(matches!(erster, Antwort::Naechster { item: Some(ref i) } if i.payload_ref == "b"));

    let kanal = ChannelId::from("ch1");
    a.dispatcher.titel_gestartet(&kanal).await.unwrap();
    a.dispatcher.position_melden(&kanal, 95.0).await;

    senden(&a, "ch1", steuerung(SteuerAktion::Speed(1.5))).await.unwrap();

    match senden(&a, "ch1", steuerung(SteuerAktion::Seek(10.0))).await.unwrap() {
        Antwort::Seek {
            vorher,
            nachher,
            naechster,
        } => {
            assert_eq!(vorher, 95.0);
            assert_eq!(nachher, 100.0);
            assert_eq!(naechster.unwrap().payload_ref, "a");
        }
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }

    match senden(&a, "ch1", Befehl::Zustand).await.unwrap() {
        Antwort::Zustand { zustand } => {
            assert_eq!(zustand.status, PlaybackStatus::Loading);
            assert_eq!(zustand.speed, 1.5, "Tempo bleibt fuer den naechsten Titel");
            assert_eq!(zustand.position_sekunden, 0.0);
        }
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }

    // Natuerliches Ende laedt c
    a.dispatcher.titel_gestartet(&kanal).await.unwrap();
    let naechster = a.dispatcher.titel_beendet(&kanal).await.unwrap();
    assert_eq!(naechster.unwrap().payload_ref, "c");
}

#[tokio::test]
async fn ungueltiges_tempo_wird_abgelehnt() {
    let a = aufbau(100);
    for speed in [0.4, 2.1, 2.5] {
        let fehler = senden(&a, "ch1", steuerung(SteuerAktion::Speed(speed)))
            .await
            .unwrap_err();
        assert!(matches!(fehler, KanalfunkError::UngueltigesArgument(_)), "{speed}");
        assert_eq!(fehler.http_status(), 400);
    }
    assert_eq!(zustand(&a, "ch1").await.speed, 1.0);

    for speed in [0.5, 2.0] {
        senden(&a, "ch1", steuerung(SteuerAktion::Speed(speed))).await.unwrap();
        assert_eq!(zustand(&a, "ch1").await.speed, speed);
    }
}

#[tokio::test]
async fn equalizer_ueber_dispatcher() {
    let a = aufbau(100);
    senden(&a, "ch1", steuerung(SteuerAktion::EqualizerPreset("rock".into())))
        .await
        .unwrap();
    assert_eq!(zustand(&a, "ch1").await.equalizer.preset, "rock");

    let fehler = senden(&a, "ch1", steuerung(SteuerAktion::Equalizer(vec![1.0; 9])))
        .await
        .unwrap_err();
    assert_eq!(fehler.http_status(), 400);
    assert_eq!(zustand(&a, "ch1").await.equalizer.preset, "rock", "unveraendert");

    let fehler = senden(&a, "ch1", steuerung(SteuerAktion::EqualizerPreset("disco".into())))
        .await
        .unwrap_err();
    assert_eq!(fehler.http_status(), 400);

    // Eigene Baender ueberdauern den Titelwechsel
    let mut baender = vec![0.0; 10];
    baender[4] = -3.0;
    senden(&a, "ch1", steuerung(SteuerAktion::Equalizer(baender))).await.unwrap();
    senden(&a, "ch1", einreihen("a", 10.0, PrioritaetsStufe::Normal)).await.unwrap();
    senden(&a, "ch1", einreihen("b", 10.0, PrioritaetsStufe::Normal)).await.unwrap();
    senden(&a, "ch1", steuerung(SteuerAktion::Naechster)).await.unwrap();

    let z = zustand(&a, "ch1").await;
    assert_eq!(z.aktuell.as_deref(), Some("B"));
    assert_eq!(z.equalizer.preset, "custom");
    assert_eq!(z.equalizer.baender[4], -3.0);
}

#[tokio::test]
async fn queue_verwaltung() {
    let a = aufbau(100);
    let laufend = senden(&a, "ch1", einreihen("laufend", 30.0, PrioritaetsStufe::Normal))
        .await
        .unwrap();
    assert_eq!(position(laufend), 0);

    let item = match senden(&a, "ch1", einreihen("a", 30.0, PrioritaetsStufe::Niedrig)).await.unwrap() {
        Antwort::Eingereiht { item, position } => {
            assert_eq!(position, 1);
            item
        }
        andere => panic!("unerwartete Antwort: {andere:?}"),
    };
    match senden(&a, "ch1", einreihen("b", 30.0, PrioritaetsStufe::Hoch)).await.unwrap() {
        Antwort::Eingereiht { position, .. } => assert_eq!(position, 1, "Hoch landet vorne"),
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }

    let entfernt = senden(&a, "ch1", Befehl::AusQueueEntfernen { item_id: item.id })
        .await
        .unwrap();
    assert!(matches!(entfernt, Antwort::Entfernt { .. }));

    let nochmal = senden(&a, "ch1", Befehl::AusQueueEntfernen { item_id: item.id })
        .await
        .unwrap_err();
    assert_eq!(nochmal.http_status(), 404);

    match senden(&a, "ch1", Befehl::QueueLeeren).await.unwrap() {
        Antwort::Geleert { anzahl } => assert_eq!(anzahl, 1),
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gleicher_kanal_wird_serialisiert() {
    let a = Arc::new(aufbau(1_000));
    let aufgaben: Vec<_> = (0..20)
        .map(|i| {
            let a = Arc::clone(&a);
            tokio::spawn(async move {
                match senden(&a, "ch1", einreihen(&format!("t{i}"), 10.0, PrioritaetsStufe::Normal))
                    .await
                    .unwrap()
                {
                    Antwort::Eingereiht { position, .. } => position,
                    andere => panic!("unerwartete Antwort: {andere:?}"),
                }
            })
        })
        .collect();

    let mut positionen = Vec::new();
    for aufgabe in aufgaben {
        positionen.push(aufgabe.await.unwrap());
    }
    positionen.sort_unstable();
    // Der erste Eintrag wird sofort geladen, die uebrigen stehen lueckenlos an
    assert_eq!(positionen, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn andere_kanaele_laufen_parallel() {
    let a = aufbau(100);
    let sitzung = a.dispatcher.sitzungen().sitzung(&ChannelId::from("a"));
    let sperre = sitzung.lock().await;

    let b = tokio::time::timeout(
        Duration::from_secs(1),
        senden(&a, "b", einreihen("x", 10.0, PrioritaetsStufe::Normal)),
    )
    .await;
    assert!(matches!(b, Ok(Ok(Antwort::Eingereiht { .. }))), "Kanal b wartet nicht auf a");

    let blockiert = tokio::time::timeout(
        Duration::from_millis(100),
        senden(&a, "a", einreihen("y", 10.0, PrioritaetsStufe::Normal)),
    )
    .await;
    assert!(blockiert.is_err(), "Kanal a ist gesperrt");

    drop(sperre);
    assert_eq!(status(&a, "a").await, PlaybackStatus::Idle, "abgebrochener Befehl ohne Wirkung");
    senden(&a, "a", einreihen("y", 10.0, PrioritaetsStufe::Normal)).await.unwrap();
    assert_eq!(status(&a, "a").await, PlaybackStatus::Loading);
}

#[tokio::test(start_paused = true)]
async fn seek_bei_radio_nicht_unterstuetzt() {
    let a = aufbau(100);
    let antwort = senden(
        &a,
        "ch1",
        Befehl::RadioStarten {
            url: "https://radio.example/live".into(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(antwort, Antwort::Radio { .. }));

    warte_auf_status(&a, "ch1", PlaybackStatus::Playing).await;

    let fehler = senden(&a, "ch1", steuerung(SteuerAktion::Seek(30.0)))
        .await
        .unwrap_err();
    assert!(matches!(fehler, KanalfunkError::NichtUnterstuetzt(_)));
    assert_eq!(fehler.http_status(), 422);
}

#[tokio::test(start_paused = true)]
async fn eskalation_setzt_session_auf_fehler() {
    let limiter = RateLimiter::im_speicher(RateLimitKonfig::default());
    let a = aufbau_mit(limiter, false);

    senden(
        &a,
        "ch1",
        Befehl::RadioStarten {
            url: "http://kaputt.example/stream".into(),
        },
    )
    .await
    .unwrap();

    warte_auf_status(&a, "ch1", PlaybackStatus::Error).await;
    let fehler = zustand(&a, "ch1").await.fehler.unwrap();
    assert!(fehler.contains("erschoepft"), "{fehler}");
    assert_eq!(a.metriken.eskalationen_total.get(), 1);
    assert_eq!(a.metriken.wiederverbindungen_total.get(), 3);

    match senden(&a, "ch1", Befehl::RadioStatus).await.unwrap() {
        Antwort::RadioStatus { quelle } => assert!(quelle.is_none()),
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }
}

#[tokio::test]
async fn ereignisse_ersetzter_quellen_werden_ignoriert() {
    let a = aufbau(100);
    let kanal = ChannelId::from("ch1");
    let sitzung = a.dispatcher.sitzungen().sitzung(&kanal);
    sitzung.lock().await.live_laden("https://neu.example/live").unwrap();

    let verbunden = |url: &str| KanalfunkEvent::QuelleVerbunden {
        kanal_id: kanal.clone(),
        url: url.into(),
    };
    a.dispatcher
        .ereignis_anwenden(&verbunden("https://alt.example/live"))
        .await;
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Loading);
    a.dispatcher
        .ereignis_anwenden(&verbunden("https://neu.example/live"))
        .await;
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Playing);

    let eskalation = |url: &str| {
        KanalfunkEvent::Eskalation(EskalationsEreignis {
            kanal_id: kanal.clone(),
            url: url.into(),
            grund: "503 Service Unavailable".into(),
            versuche: 4,
            zeitpunkt: chrono::Utc::now(),
        })
    };
    a.dispatcher
        .ereignis_anwenden(&eskalation("https://alt.example/live"))
        .await;
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Playing);

    a.dispatcher
        .ereignis_anwenden(&eskalation("https://neu.example/live"))
        .await;
    let z = zustand(&a, "ch1").await;
    assert_eq!(z.status, PlaybackStatus::Error);
    assert!(z.fehler.unwrap().contains("erschoepft nach 4 Versuchen"));
}

#[tokio::test(start_paused = true)]
async fn radio_stoppen_beendet_live() {
    let a = aufbau(100);
    senden(
        &a,
        "ch1",
        Befehl::RadioStarten {
            url: "https://radio.example/live".into(),
        },
    )
    .await
    .unwrap();
    warte_auf_status(&a, "ch1", PlaybackStatus::Playing).await;

    match senden(&a, "ch1", Befehl::RadioStoppen).await.unwrap() {
        Antwort::RadioGestoppt { war_aktiv } => assert!(war_aktiv),
        andere => panic!("unerwartete Antwort: {andere:?}"),
    }
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Ended);
}

#[tokio::test]
async fn ungueltige_radio_url() {
    let a = aufbau(100);
    let fehler = senden(
        &a,
        "ch1",
        Befehl::RadioStarten {
            url: "ftp://radio.example/live".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(fehler.http_status(), 400);
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Idle);
}

#[tokio::test]
async fn fail_closed_liefert_503() {
    let limiter = RateLimiter::neu(
        RateLimitKonfig {
            strategie: FehlerStrategie::Closed,
            ..Default::default()
        },
        Arc::new(AusgefallenerSpeicher),
    );
    let a = aufbau_mit(limiter, true);

    let fehler = senden(&a, "ch1", Befehl::Zustand).await.unwrap_err();
    assert!(matches!(fehler, KanalfunkError::InfrastrukturNichtVerfuegbar(_)));
    assert_eq!(fehler.http_status(), 503);
    assert_eq!(a.metriken.speicher_ausfaelle_total.get(), 1);
}

#[tokio::test]
async fn fail_open_laesst_befehle_durch() {
    let limiter = RateLimiter::neu(RateLimitKonfig::default(), Arc::new(AusgefallenerSpeicher));
    let a = aufbau_mit(limiter, true);
    assert_eq!(status(&a, "ch1").await, PlaybackStatus::Idle);
    assert!(!a.dispatcher.limiter().speicher_erreichbar());
}

#[tokio::test]
async fn metriken_zaehlen_befehle() {
    let a = aufbau(1);
    senden(&a, "ch1", Befehl::QueueListe).await.unwrap();
    senden(&a, "ch1", Befehl::QueueListe).await.unwrap_err();

    let ausgefuehrt = a
        .metriken
        .befehle_total
        .with_label_values(&["queue_liste", "ausgefuehrt"])
        .get();
    let abgelehnt = a
        .metriken
        .befehle_total
        .with_label_values(&["queue_liste", "abgelehnt"])
        .get();
    assert_eq!((ausgefuehrt, abgelehnt), (1, 1));
}
