//! Top-level wiring: owns every component and drives the ingest loop.

use alloc::sync::Arc;
use std::path::Path;

use eyre::WrapErr as _;
use tokio::io::{AsyncBufRead, Lines};
use tracing::{Instrument as _, debug, error, info, warn};

use crate::{
    config::{FeedConfig, MonitorConfig, resolve_config_relative_path},
    detector::{Outcome, TransitionDetector},
    ingest::{DiscoveryTarget, parse_line, spawn_feed},
    notifier::{Notifier, Publisher, mqtt::MqttPublisher},
    probe::{ActiveProber, Prober},
    queue::NotificationQueue,
    shutdown::{Shutdown, ShutdownRx, spawn_signal_listener},
    store::{HostStore, SqliteStore},
};

/// Why the ingest loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    /// Shutdown was requested while waiting for the next line.
    Shutdown,
    /// The feed closed its output.
    Closed,
    /// Reading from the feed failed.
    Failed,
}

/// The running monitor and all of its parts.
pub struct Monitor<S, P, B> {
    detector: TransitionDetector<S, P>,
    notifier: Notifier<B>,
    shutdown: Arc<Shutdown>,
    feed: FeedConfig,
}

impl Monitor<SqliteStore, ActiveProber, MqttPublisher> {
    /// Builds the production monitor: `SQLite` store, ping-backed prober, MQTT notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn from_config(
        config: &MonitorConfig,
        config_path: Option<&Path>,
    ) -> eyre::Result<Self> {
        let db_path = resolve_config_relative_path(config_path, &config.db.path);
        let store = SqliteStore::open(&db_path).await.wrap_err(format!(
            "Failed to open host database at: {}",
            db_path.display()
        ))?;
        info!("Using host database at {}", db_path.display());

        Ok(Self::new(
            store,
            ActiveProber::from_config(&config.probe),
            MqttPublisher::from_config(&config.broker),
            config,
        ))
    }
}

impl<S, P, B> Monitor<S, P, B>
where
    S: HostStore,
    P: Prober,
    B: Publisher + Send + Sync + 'static,
{
    /// Wires the given store, prober and publisher together around a fresh queue.
    pub fn new(store: S, prober: P, publisher: B, config: &MonitorConfig) -> Self {
        let queue = Arc::new(NotificationQueue::new(config.monitor.queue_capacity));
        let detector = TransitionDetector::new(
            store,
            prober,
            queue.clone(),
            config.monitor.default_notify,
        );
        let notifier = Notifier::new(publisher, queue, &config.broker, &config.monitor);
        Self {
            detector,
            notifier,
            shutdown: Arc::new(Shutdown::new()),
            feed: config.feed.clone(),
        }
    }

    /// Handle to the shutdown controller, e.g. for triggering shutdown from outside.
    #[must_use]
    pub fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Spawns the discovery feed for `target` and runs until shutdown or the feed ends.
    ///
    /// # Errors
    ///
    /// Returns an error only if the feed process cannot be started.
    pub async fn run(self, target: DiscoveryTarget) -> eyre::Result<FeedEnd> {
        let target = target.resolve(self.feed.default_prefix_len);
        let (_child, lines) = spawn_feed(&self.feed.command, &target)?;
        let signals = spawn_signal_listener(self.shutdown.clone());
        let end = self.run_with_lines(lines).await;
        signals.abort();
        Ok(end)
    }

    /// Runs the notifier and the ingest loop over `lines` until either stops.
    pub async fn run_with_lines<R: AsyncBufRead + Unpin>(self, mut lines: Lines<R>) -> FeedEnd {
        let Self {
            detector,
            notifier,
            shutdown,
            ..
        } = self;

        let notifier_handle = notifier.spawn(shutdown.subscribe());

        let end = ingest(&mut lines, &detector, shutdown.subscribe())
            .instrument(tracing::info_span!("monitor.ingest"))
            .await;
        if end != FeedEnd::Shutdown {
            shutdown.trigger();
        }

        if let Err(e) = notifier_handle.await {
            error!("Notifier task failed: {e}");
        }
        shutdown.finish();
        end
    }
}

/// Ingest loop: one line, one observation, one detector pass.
///
/// Shutdown is only observed while waiting for the next line, never mid-observation.
pub async fn ingest<R, S, P>(
    lines: &mut Lines<R>,
    detector: &TransitionDetector<S, P>,
    mut shutdown: ShutdownRx,
) -> FeedEnd
where
    R: AsyncBufRead + Unpin,
    S: HostStore,
    P: Prober,
{
    loop {
        if shutdown.is_stopping() {
            return FeedEnd::Shutdown;
        }
        let line = tokio::select! {
            biased;
            () = shutdown.wait() => return FeedEnd::Shutdown,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => handle_line(detector, &line).await,
            Ok(None) => {
                warn!("Discovery feed closed its output");
                return FeedEnd::Closed;
            }
            Err(e) => {
                error!("Failed to read from discovery feed: {e}");
                return FeedEnd::Failed;
            }
        }
    }
}

async fn handle_line<S: HostStore, P: Prober>(detector: &TransitionDetector<S, P>, line: &str) {
    let observation = match parse_line(line) {
        Ok(Some(observation)) => observation,
        Ok(None) => return,
        Err(e) => {
            debug!("Skipping malformed feed line {line:?}: {e}");
            return;
        }
    };

    match detector.process(&observation).await {
        Ok(Outcome::Unchanged) => {}
        Ok(outcome) => debug!("{} -> {:?}", observation.ip_address, outcome),
        Err(e) => error!(
            "Failed to process observation for {}: {:#}",
            observation.ip_address,
            eyre::Report::new(e)
        ),
    }
}
