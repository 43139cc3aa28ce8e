//! # Connection Supervisor
//!
//! Owns the lifecycle of one feed-to-parser pipeline per race: connect,
//! stream, cancel. Each pipeline is a single tokio task holding exclusive
//! ownership of its race register; the supervisor only ever talks to it
//! through its cancellation token.
//!
//! Feed connections are resilient the way long-lived ingestors have to be:
//! connect failures retry on a fixed backoff, and a watchdog reconnects a
//! feed that has gone silent without closing the socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::configs::TimingConfig;
use crate::core::bus::EventBus;
use crate::core::events::{EventKind, RaceEvent};
use crate::ingestors::racehero::{RaceHeroParser, RaceHeroPayload};
use crate::ingestors::rmonitor::RMonitorParser;
use crate::ingestors::RaceContext;

/// The closed set of supported feed providers, selected at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    RMonitor,
    RaceHero,
}

/// A validated race-connect request from the outer service layer. The
/// `cars` set arrives pre-validated; the pipeline trusts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceConnectRequest {
    pub track: String,
    pub provider: Provider,
    /// Provider-specific: `host:port` for the line protocol, an event slug
    /// for the structured-payload API.
    pub race_id: String,
    #[serde(default)]
    pub cars: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("invalid race id")]
    InvalidRaceId,

    #[error("race already connected for {0}")]
    AlreadyConnected(String),
}

struct RaceHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Registry of live feed pipelines, keyed by (track, provider).
pub struct RaceSupervisor {
    bus: Arc<EventBus>,
    config: TimingConfig,
    races: Mutex<HashMap<(String, Provider), RaceHandle>>,
}

impl RaceSupervisor {
    pub fn new(bus: Arc<EventBus>, config: TimingConfig) -> Self {
        Self {
            bus,
            config,
            races: Mutex::new(HashMap::new()),
        }
    }

    /// Validates the request and spawns its feed pipeline. Must be called
    /// from within a tokio runtime.
    pub fn connect(&self, request: RaceConnectRequest) -> Result<(), ConnectError> {
        validate_race_id(&request)?;

        let key = (request.track.clone(), request.provider);
        let mut races = self.races.lock().expect("supervisor lock poisoned");
        if let Some(handle) = races.get(&key) {
            if !handle.task.is_finished() {
                return Err(ConnectError::AlreadyConnected(request.track));
            }
        }

        let token = CancellationToken::new();
        let task = self.spawn_pipeline(request, token.clone());
        races.insert(key, RaceHandle { token, task });
        Ok(())
    }

    /// Whether the (track, provider) pipeline is currently running.
    pub fn is_live(&self, track: &str, provider: Provider) -> bool {
        let races = self.races.lock().expect("supervisor lock poisoned");
        races
            .get(&(track.to_string(), provider))
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Cancels one pipeline and waits for its teardown (socket closed, bus
    /// subscriptions dropped, `RaceDisconnected` emitted). Returns false
    /// when nothing was connected.
    pub async fn disconnect(&self, track: &str, provider: Provider) -> bool {
        let handle = {
            let mut races = self.races.lock().expect("supervisor lock poisoned");
            races.remove(&(track.to_string(), provider))
        };
        match handle {
            Some(handle) => {
                handle.token.cancel();
                let _ = handle.task.await;
                true
            }
            None => false,
        }
    }

    /// Cancels every pipeline. Used on process shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<RaceHandle> = {
            let mut races = self.races.lock().expect("supervisor lock poisoned");
            races.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.token.cancel();
        }
        for handle in handles {
            let _ = handle.task.await;
        }
    }

    fn spawn_pipeline(&self, request: RaceConnectRequest, token: CancellationToken) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();

        tokio::spawn(async move {
            let track = request.track.clone();
            let filter_track = track.clone();
            let (car_sub, car_rx) = bus.subscribe(
                &[EventKind::CarConnected],
                Some(Box::new(move |event| event.track() == filter_track)),
            );

            let ctx = RaceContext::new(&track, Arc::clone(&bus), request.cars.clone());
            match request.provider {
                Provider::RMonitor => {
                    run_rmonitor(RMonitorParser::new(ctx), request.race_id, car_rx, token, &config)
                        .await
                }
                Provider::RaceHero => {
                    let url = format!("{}/{}/live", config.racehero_base_url, request.race_id);
                    run_racehero(RaceHeroParser::new(ctx), url, car_rx, token, &config).await
                }
            }

            bus.unsubscribe(car_sub);
            log::info!("race {} pipeline torn down", track);
            bus.emit(RaceEvent::RaceDisconnected { track });
        })
    }
}

fn validate_race_id(request: &RaceConnectRequest) -> Result<(), ConnectError> {
    let id = request.race_id.trim();
    let valid = match request.provider {
        Provider::RMonitor => id
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok()),
        Provider::RaceHero => {
            !id.is_empty() && !id.contains(char::is_whitespace) && !id.contains('/')
        }
    };
    if valid {
        Ok(())
    } else {
        Err(ConnectError::InvalidRaceId)
    }
}

/// Handles a `CarConnected` signal inside a feed task: grows the interest
/// set and schedules the synthetic announcement after the settling delay.
fn register_car(
    ctx: &mut RaceContext,
    settle_tx: &mpsc::UnboundedSender<String>,
    settling: Duration,
    event: &RaceEvent,
) {
    let RaceEvent::CarConnected { car, .. } = event else {
        return;
    };
    if !ctx.add_target(car) {
        return;
    }
    log::info!("car {} now of interest on {}", car, ctx.track());

    let settle_tx = settle_tx.clone();
    let car = car.clone();
    tokio::spawn(async move {
        sleep(settling).await;
        let _ = settle_tx.send(car);
    });
}

async fn run_rmonitor(
    mut parser: RMonitorParser,
    addr: String,
    mut car_rx: mpsc::UnboundedReceiver<Arc<RaceEvent>>,
    token: CancellationToken,
    config: &TimingConfig,
) {
    let settling = Duration::from_millis(config.settling_delay_ms);
    let reconnect = Duration::from_secs(config.reconnect_delay_secs);
    let idle_timeout = Duration::from_secs(config.feed_idle_timeout_secs);
    let (settle_tx, mut settle_rx) = mpsc::unbounded_channel::<String>();

    loop {
        log::info!("connecting to rmonitor feed {}", addr);
        let stream = tokio::select! {
            _ = token.cancelled() => return,
            result = TcpStream::connect(&addr) => match result {
                Ok(stream) => stream,
                Err(error) => {
                    log::error!("rmonitor connect to {} failed: {}", addr, error);
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = sleep(reconnect) => continue,
                    }
                }
            },
        };
        log::info!("rmonitor feed {} connected", addr);
        let mut lines = BufReader::new(stream).lines();
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        last_activity = Instant::now();
                        parser.handle_line(&line);
                    }
                    Ok(None) => {
                        log::warn!("rmonitor feed {} closed by remote", addr);
                        break;
                    }
                    Err(error) => {
                        log::error!("rmonitor feed {} read error: {}", addr, error);
                        break;
                    }
                },
                Some(event) = car_rx.recv() => {
                    register_car(parser.context_mut(), &settle_tx, settling, &event);
                }
                Some(car) = settle_rx.recv() => {
                    parser.context_mut().announce_target(&car);
                }
                // Watchdog: a feed that stays connected but silent is dead.
                _ = sleep(Duration::from_secs(1)) => {
                    if last_activity.elapsed() > idle_timeout {
                        log::warn!("rmonitor feed {} silent too long, reconnecting", addr);
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(reconnect) => {}
        }
    }
}

async fn run_racehero(
    mut parser: RaceHeroParser,
    url: String,
    mut car_rx: mpsc::UnboundedReceiver<Arc<RaceEvent>>,
    token: CancellationToken,
    config: &TimingConfig,
) {
    let settling = Duration::from_millis(config.settling_delay_ms);
    let interval = Duration::from_secs(config.racehero_poll_interval_secs);
    let (settle_tx, mut settle_rx) = mpsc::unbounded_channel::<String>();

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent("racestream/0.1")
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            log::error!("failed to build http client: {}", error);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            Some(event) = car_rx.recv() => {
                register_car(parser.context_mut(), &settle_tx, settling, &event);
            }
            Some(car) = settle_rx.recv() => {
                parser.context_mut().announce_target(&car);
            }
            _ = sleep(interval) => {
                match client.get(&url).send().await {
                    Ok(response) => match response.json::<RaceHeroPayload>().await {
                        Ok(payload) => parser.handle_payload(&payload),
                        Err(error) => log::warn!("bad racehero payload from {}: {}", url, error),
                    },
                    Err(error) => log::error!("racehero poll {} failed: {}", url, error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::LapCompleted;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn quick_config() -> TimingConfig {
        TimingConfig {
            settling_delay_ms: 10,
            reconnect_delay_secs: 1,
            ..TimingConfig::default()
        }
    }

    #[tokio::test]
    async fn invalid_race_ids_are_rejected() {
        let supervisor = RaceSupervisor::new(Arc::new(EventBus::new()), quick_config());

        let bad_rmonitor = RaceConnectRequest {
            track: "vir".to_string(),
            provider: Provider::RMonitor,
            race_id: "not-a-socket-addr".to_string(),
            cars: vec![],
        };
        assert_eq!(
            supervisor.connect(bad_rmonitor),
            Err(ConnectError::InvalidRaceId)
        );

        let bad_racehero = RaceConnectRequest {
            track: "vir".to_string(),
            provider: Provider::RaceHero,
            race_id: "has / slash".to_string(),
            cars: vec![],
        };
        assert_eq!(
            supervisor.connect(bad_racehero),
            Err(ConnectError::InvalidRaceId)
        );
    }

    #[tokio::test]
    async fn rmonitor_pipeline_streams_events_and_tears_down() {
        let bus = Arc::new(EventBus::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let feeder = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(
                    b"$COMP,\"181\",,,A,\"Jane\",\"Doe\"\r\n\
                      $C,A,\"ClassA\"\r\n\
                      $G,1,\"181\",3\r\n\
                      $RMHL,\"181\",\"4\",\"1\",\"01:02.500\",\"green\",0,0\r\n",
                )
                .await
                .unwrap();
            socket
        });

        let supervisor = RaceSupervisor::new(Arc::clone(&bus), quick_config());
        let (_id, mut rx) = bus.subscribe(
            &[EventKind::LapCompleted, EventKind::RaceDisconnected],
            None,
        );

        let request = RaceConnectRequest {
            track: "vir".to_string(),
            provider: Provider::RMonitor,
            race_id: addr.to_string(),
            cars: vec!["181".to_string()],
        };
        supervisor.connect(request.clone()).unwrap();
        assert_eq!(
            supervisor.connect(request),
            Err(ConnectError::AlreadyConnected("vir".to_string()))
        );

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        match event.as_ref() {
            RaceEvent::LapCompleted(LapCompleted {
                car, laps, position, ..
            }) => {
                assert_eq!(car, "181");
                assert_eq!(*laps, 4);
                assert_eq!(*position, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(supervisor.is_live("vir", Provider::RMonitor));

        assert!(supervisor.disconnect("vir", Provider::RMonitor).await);
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::RaceDisconnected);
        assert!(!supervisor.is_live("vir", Provider::RMonitor));

        let _socket = feeder.await.unwrap();
    }

    #[tokio::test]
    async fn newly_connected_car_gets_a_settled_announcement() {
        let bus = Arc::new(EventBus::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let feeder = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"$COMP,\"7\",,,A,\"New\",\"Joiner\"\r\n$G,1,\"7\",2\r\n")
                .await
                .unwrap();
            socket
        });

        let supervisor = RaceSupervisor::new(Arc::clone(&bus), quick_config());
        let (_id, mut rx) = bus.subscribe(&[EventKind::LapCompleted], None);

        supervisor
            .connect(RaceConnectRequest {
                track: "vir".to_string(),
                provider: Provider::RMonitor,
                race_id: addr.to_string(),
                cars: vec![],
            })
            .unwrap();

        // Let the feed land the entrant before the car connects.
        sleep(Duration::from_millis(200)).await;
        bus.emit(RaceEvent::CarConnected {
            track: "vir".to_string(),
            car: "7".to_string(),
        });

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        match event.as_ref() {
            RaceEvent::LapCompleted(lap) => {
                assert_eq!(lap.car, "7");
                assert_eq!(lap.gap, "-", "no comparison baseline yet");
                assert_eq!(lap.ahead, None);
            }
            other => panic!("unexpected event {:?}", other),
        }

        supervisor.shutdown().await;
        let _socket = feeder.await.unwrap();
    }
}
