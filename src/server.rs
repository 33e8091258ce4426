use crate::audit::{AuditSink, CsvAuditSink};
use crate::config::{Config, ListsConfig};
use crate::engine::{handle_call, CallOutcome, FilterServices};
use crate::session::{CallSession, TokioSleeper};
use crate::stats::StatsAggregator;
use crate::store::NumberListStore;
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

#[cfg(feature = "watch")]
use crate::watch::ListWatcher;

// Editors tend to write a file in several steps
const CHANGE_SETTLE: Duration = Duration::from_millis(250);

pub struct Server {
    services: Arc<FilterServices>,
    lists: Arc<ListsConfig>,
    stats_interval: Duration,
}

impl Server {
    /// Load the lists and open the audit files. Either failing is fatal.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let stats = Arc::new(StatsAggregator::new());
        let store = Arc::new(NumberListStore::new(stats));
        store
            .reload(&config.lists.block_paths, &config.lists.allow_paths)
            .context("Failed to load number lists")?;

        let audit = CsvAuditSink::open(
            config.audit_files.blocked_numbers.clone(),
            config.audit_files.allowed_numbers.clone(),
        )
        .context("Failed to open audit files")?;

        let services = Arc::new(FilterServices {
            store,
            audit: Arc::new(audit),
            sleeper: Arc::new(TokioSleeper),
            country_code: config.country_code.clone(),
            tarpit: config.tarpit,
        });
        Ok(Self::with_services(config, services))
    }

    pub fn with_services(config: &Config, services: Arc<FilterServices>) -> Self {
        Server {
            services,
            lists: Arc::new(config.lists.clone()),
            stats_interval: config.stats_interval,
        }
    }

    pub fn services(&self) -> &Arc<FilterServices> {
        &self.services
    }

    /// Handle every call received on `calls`, one task per call, until
    /// `shutdown` resolves or the feed closes and the remaining calls finish.
    /// Calls still in progress at shutdown are aborted.
    pub async fn run<S, F>(&self, mut calls: mpsc::Receiver<S>, shutdown: F) -> anyhow::Result<()>
    where
        S: CallSession + 'static,
        F: Future<Output = ()>,
    {
        log::info!(
            "Starting call filter (country code {}, {} block entries, {} allow entries)",
            self.services.country_code,
            self.services.store.snapshot().block.entry_count(),
            self.services.store.snapshot().allow.entry_count()
        );

        let reporter = self.services.store.stats().clone().spawn_reporter(self.stats_interval);
        let maintenance = self.spawn_maintenance()?;

        let mut in_flight: JoinSet<CallOutcome> = JoinSet::new();
        let mut accepting = true;
        tokio::pin!(shutdown);

        loop {
            if !accepting && in_flight.is_empty() {
                break;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, {} calls in progress", in_flight.len());
                    break;
                }
                call = calls.recv(), if accepting => match call {
                    Some(session) => {
                        let services = self.services.clone();
                        in_flight.spawn(async move { handle_call(services, &session).await });
                    }
                    None => {
                        log::info!("Call feed closed, waiting for {} calls", in_flight.len());
                        accepting = false;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_finished(joined);
                }
            }
        }

        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next().await {
            log_finished(joined);
        }

        maintenance.abort();
        reporter.abort();
        if let Some(summary) = self.services.store.stats().report() {
            log::info!("{}", summary);
        }
        self.services.audit.close();
        log::info!("Call filter stopped");
        Ok(())
    }

    fn spawn_maintenance(&self) -> anyhow::Result<JoinHandle<()>> {
        let reload = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
        let rotate = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let (events, rx) = mpsc::unbounded_channel();
        let watcher = self.watch_lists(&events)?;
        let services = self.services.clone();
        let lists = self.lists.clone();

        Ok(tokio::spawn(async move {
            let _watcher = watcher;
            tokio::select! {
                _ = forward_signals(reload, rotate, events) => {}
                _ = maintain(services, lists, rx) => {}
            }
        }))
    }

    #[cfg(feature = "watch")]
    fn watch_lists(
        &self,
        events: &mpsc::UnboundedSender<MaintenanceEvent>,
    ) -> anyhow::Result<Option<ListWatcher>> {
        if !self.lists.watch {
            return Ok(None);
        }
        let events = events.clone();
        let paths: Vec<_> = self
            .lists
            .block_paths
            .iter()
            .chain(self.lists.allow_paths.iter())
            .collect();
        let watcher = ListWatcher::start(&paths, move || {
            let _ = events.send(MaintenanceEvent::ListsChanged);
        })
        .context("Failed to watch list files")?;
        Ok(Some(watcher))
    }

    #[cfg(not(feature = "watch"))]
    fn watch_lists(&self, _events: &mpsc::UnboundedSender<MaintenanceEvent>) -> anyhow::Result<Option<()>> {
        if self.lists.watch {
            log::warn!("lists.watch is set but this build has no file watching support");
        }
        Ok(None)
    }
}

/// Background work requested by signals or the list watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceEvent {
    ReloadLists,
    ReopenAudit,
    /// A list file changed on disk. Bursts are coalesced into one reload.
    ListsChanged,
}

async fn forward_signals(
    mut reload: Signal,
    mut rotate: Signal,
    events: mpsc::UnboundedSender<MaintenanceEvent>,
) {
    loop {
        let event = tokio::select! {
            Some(()) = reload.recv() => {
                log::info!("SIGUSR1 received, reloading lists");
                MaintenanceEvent::ReloadLists
            }
            Some(()) = rotate.recv() => {
                log::info!("SIGHUP received, reopening audit files");
                MaintenanceEvent::ReopenAudit
            }
            else => break,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

/// Act on maintenance events until every sender is gone.
pub async fn maintain(
    services: Arc<FilterServices>,
    lists: Arc<ListsConfig>,
    mut events: mpsc::UnboundedReceiver<MaintenanceEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut reload = event == MaintenanceEvent::ReloadLists;
        let mut reopen = event == MaintenanceEvent::ReopenAudit;

        if event == MaintenanceEvent::ListsChanged {
            tokio::time::sleep(CHANGE_SETTLE).await;
            log::info!("List files changed, reloading lists");
            reload = true;
            while let Ok(pending) = events.try_recv() {
                reopen |= pending == MaintenanceEvent::ReopenAudit;
            }
        }

        if reopen {
            if let Err(e) = services.audit.reopen() {
                log::error!("Failed to reopen audit files: {}", e);
            }
        }
        if reload {
            reload_lists(services.store.clone(), lists.clone()).await;
        }
    }
}

/// Reload the lists on the blocking pool. Failures are logged and leave the
/// current lists in place.
pub async fn reload_lists(store: Arc<NumberListStore>, lists: Arc<ListsConfig>) -> bool {
    let result =
        tokio::task::spawn_blocking(move || store.reload(&lists.block_paths, &lists.allow_paths))
            .await;
    match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            log::error!("List reload failed, keeping previous lists: {}", e);
            false
        }
        Err(e) => {
            log::error!("List reload task failed: {}", e);
            false
        }
    }
}

fn log_finished(joined: Result<CallOutcome, JoinError>) {
    match joined {
        Ok(outcome) => log::debug!("Call finished: {:?}", outcome),
        Err(e) if e.is_cancelled() => log::debug!("Call aborted at shutdown"),
        Err(e) => log::error!("Call task failed: {}", e),
    }
}
