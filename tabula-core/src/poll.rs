// tabula_core/src/poll.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::domain::{ListFetch, ListParams, Record, TableId};
use crate::error::Result;
use crate::repo::TableRepo;
use crate::schedule::{CancelToken, Scheduler};

#[derive(Clone, Debug)]
pub struct PollConfig {
    pub base_interval: Duration,
    pub max_backoff: Duration,
    /// Minimum delay while the page is hidden.
    pub hidden_floor: Duration,
    /// Send `If-None-Match` with the last ETag.
    pub conditional: bool,
    pub params: ListParams,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(3),
            max_backoff: Duration::from_secs(60),
            hidden_floor: Duration::from_secs(15),
            conditional: true,
            params: ListParams::default(),
        }
    }
}

impl PollConfig {
    /// Fixed-interval refresh without conditional requests.
    pub fn interval(every: Duration) -> Self {
        Self {
            base_interval: every,
            conditional: false,
            ..Self::default()
        }
    }
}

/// Exponential backoff: `base` while healthy, doubling per consecutive
/// failure, capped at `ceiling`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            failures: 0,
        }
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    pub fn on_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return self.base;
        }
        let shift = (self.failures - 1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PollPhase {
    #[default]
    Idle,
    Fetching,
    /// Last fetch failed; waiting out the backoff.
    Backoff,
}

/// What a list screen renders.
#[derive(Clone, Debug, Default)]
pub struct PollView {
    pub records: Vec<Record>,
    pub etag: Option<String>,
    pub phase: PollPhase,
    pub last_error: Option<String>,
    /// Completed fetches that were applied (stale ones excluded).
    pub applied: u64,
}

/// External stimuli a poller reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Focus,
    Visible(bool),
    Refresh,
}

/// Generation, backoff and visibility bookkeeping, free of I/O.
#[derive(Debug)]
pub struct FreshnessState {
    generation: u64,
    backoff: Backoff,
    hidden_floor: Duration,
    visible: bool,
    view: PollView,
}

impl FreshnessState {
    pub fn new(cfg: &PollConfig) -> Self {
        Self {
            generation: 0,
            backoff: Backoff::new(cfg.base_interval, cfg.max_backoff),
            hidden_floor: cfg.hidden_floor,
            visible: true,
            view: PollView::default(),
        }
    }

    pub fn view(&self) -> &PollView {
        &self.view
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Starts a fetch and returns its generation. Any fetch started earlier is
    /// stale from here on.
    pub fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.view.phase = PollPhase::Fetching;
        self.generation
    }

    /// Applies a completion. Returns the delay until the next fetch, or `None`
    /// when the completion is stale and was ignored.
    pub fn complete(&mut self, generation: u64, outcome: Result<ListFetch>) -> Option<Duration> {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "dropping stale poll result");
            return None;
        }
        match outcome {
            Ok(ListFetch::Fresh { etag, records }) => {
                self.view.records = records;
                self.view.etag = etag;
                self.succeed();
            }
            Ok(ListFetch::NotModified { etag }) => {
                if etag.is_some() {
                    self.view.etag = etag;
                }
                self.succeed();
            }
            Err(e) => {
                self.backoff.on_failure();
                self.view.phase = PollPhase::Backoff;
                self.view.last_error = Some(e.to_string());
                tracing::warn!(error = %e, failures = self.backoff.failures(), "poll failed");
            }
        }
        self.view.applied += 1;
        Some(self.next_delay())
    }

    pub fn next_delay(&self) -> Duration {
        let d = self.backoff.delay();
        if self.visible { d } else { d.max(self.hidden_floor) }
    }

    fn succeed(&mut self) {
        self.backoff.on_success();
        self.view.phase = PollPhase::Idle;
        self.view.last_error = None;
    }
}

enum Msg {
    Trigger(Trigger),
    Completed { generation: u64, outcome: Result<ListFetch> },
    Stop,
}

/// Sends triggers to a running [`Poller`]. The poller exits once it receives
/// `stop` or every handle is dropped.
#[derive(Clone)]
pub struct PollHandle {
    tx: mpsc::UnboundedSender<Msg>,
}

impl PollHandle {
    pub fn focus(&self) {
        let _ = self.tx.send(Msg::Trigger(Trigger::Focus));
    }

    pub fn set_visible(&self, visible: bool) {
        let _ = self.tx.send(Msg::Trigger(Trigger::Visible(visible)));
    }

    pub fn refresh(&self) {
        let _ = self.tx.send(Msg::Trigger(Trigger::Refresh));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Msg::Stop);
    }
}

pub struct Poller {
    repo: Arc<dyn TableRepo>,
    table: TableId,
    cfg: PollConfig,
    scheduler: Arc<dyn Scheduler>,
    state: FreshnessState,
    weak: mpsc::WeakUnboundedSender<Msg>,
    rx: mpsc::UnboundedReceiver<Msg>,
    view_tx: watch::Sender<PollView>,
    timer: Option<CancelToken>,
    inflight: Option<AbortHandle>,
}

impl Poller {
    pub fn new(
        repo: Arc<dyn TableRepo>,
        table: TableId,
        cfg: PollConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> (Self, PollHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = FreshnessState::new(&cfg);
        let (view_tx, _) = watch::channel(PollView::default());
        let poller = Self {
            repo,
            table,
            cfg,
            scheduler,
            state,
            weak: tx.downgrade(),
            rx,
            view_tx,
            timer: None,
            inflight: None,
        };
        (poller, PollHandle { tx })
    }

    pub fn subscribe(&self) -> watch::Receiver<PollView> {
        self.view_tx.subscribe()
    }

    /// Fetches immediately, then keeps the cycle going until stopped.
    pub async fn run(mut self) {
        tracing::debug!(table = %self.table, "poller started");
        self.start_fetch();
        while let Some(msg) = self.rx.recv().await {
            match msg {
                Msg::Trigger(Trigger::Visible(false)) => {
                    self.state.set_visible(false);
                }
                Msg::Trigger(Trigger::Visible(true)) => {
                    self.state.set_visible(true);
                    self.start_fetch();
                }
                Msg::Trigger(Trigger::Tick | Trigger::Focus | Trigger::Refresh) => {
                    self.start_fetch();
                }
                Msg::Completed { generation, outcome } => {
                    if let Some(delay) = self.state.complete(generation, outcome) {
                        self.inflight = None;
                        self.publish();
                        self.arm_timer(delay);
                    }
                }
                Msg::Stop => break,
            }
        }
        self.shutdown();
        tracing::debug!(table = %self.table, "poller stopped");
    }

    fn start_fetch(&mut self) {
        let Some(tx) = self.weak.upgrade() else {
            return;
        };
        if let Some(t) = self.timer.take() {
            t.cancel();
        }
        if let Some(h) = self.inflight.take() {
            h.abort();
        }
        let generation = self.state.begin();
        self.publish();

        let repo = self.repo.clone();
        let table = self.table.clone();
        let params = self.cfg.params.clone();
        let etag = self.state.view().etag.clone();
        let conditional = self.cfg.conditional;
        let task = tokio::spawn(async move {
            let outcome = if conditional {
                repo.list_with_etag(&table, &params, etag.as_deref()).await
            } else {
                repo.list(&table, &params)
                    .await
                    .map(|records| ListFetch::Fresh { etag: None, records })
            };
            let _ = tx.send(Msg::Completed { generation, outcome });
        });
        self.inflight = Some(task.abort_handle());
    }

    fn arm_timer(&mut self, delay: Duration) {
        let weak = self.weak.clone();
        let token = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(tx) = weak.upgrade() {
                    let _ = tx.send(Msg::Trigger(Trigger::Tick));
                }
            }),
        );
        self.timer = Some(token);
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.state.view().clone());
    }

    fn shutdown(&mut self) {
        if let Some(t) = self.timer.take() {
            t.cancel();
        }
        if let Some(h) = self.inflight.take() {
            h.abort();
        }
    }
}
