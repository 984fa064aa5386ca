//! Destination recalculation.
//!
//! When the destination (or any other settings) change after a scan, the
//! already-scanned batch is re-planned without touching metadata or
//! thumbnails. A [`Recalculator`] drives the [`RecalcModel`] reducer from a
//! single actor task:
//!
//! - requests and worker results arrive as events
//! - the reducer decides what happens next
//! - the actor executes the returned commands
//!
//! The current file set is published as a whole through a `watch` channel,
//! so readers never see a half-updated batch. Each settings change gets a
//! oneshot ticket that resolves with its [`RecalcOutcome`].
//!
//! # Usage
//!
//! ```ignore
//! let recalc = Recalculator::spawn(settings, ScanConfig::default());
//! recalc.load(scanned).await;
//! let outcome = recalc.set_settings(new_settings).await?;
//! let files = recalc.files();
//! ```

mod model;

pub use model::{
    FileSet, RecalcCommand, RecalcEvent, RecalcModel, RecalcOutcome, RecalcState, Ticket,
};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::config::{ScanConfig, Settings};
use crate::error::{Error, Result};
use crate::model::MediaFile;
use crate::planner::plan_destinations;

/// Re-plans a batch: `None` means cancelled.
type PlanFn =
    Arc<dyn Fn(&[MediaFile], &Settings, &CancellationToken) -> Option<Vec<MediaFile>> + Send + Sync>;

enum Request {
    Load(Vec<MediaFile>),
    Change(Settings, oneshot::Sender<RecalcOutcome>),
    ImportStarted,
    ImportFinished(Vec<MediaFile>),
}

/// Handle to the recalculation actor. Clones share the same actor.
#[derive(Clone)]
pub struct Recalculator {
    tx: mpsc::Sender<Request>,
    files: watch::Receiver<FileSet>,
}

impl Recalculator {
    /// Start the actor with the current settings. Must be called from
    /// within a tokio runtime.
    pub fn spawn(settings: Settings, scan: ScanConfig) -> Self {
        Self::spawn_with_span(settings, scan, tracing::info_span!("recalc"))
    }

    pub fn spawn_with_span(settings: Settings, scan: ScanConfig, span: Span) -> Self {
        let plan: PlanFn = Arc::new(move |files: &[MediaFile], settings: &Settings, cancel: &CancellationToken| {
            plan_destinations(files, settings, &scan, cancel)
        });
        Self::spawn_with_planner(settings, plan, span)
    }

    fn spawn_with_planner(settings: Settings, plan: PlanFn, span: Span) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let (files_tx, files_rx) = watch::channel(FileSet::default());
        let (done_tx, done_rx) = mpsc::channel(8);

        let driver = Driver {
            model: RecalcModel::new(settings),
            files: files_tx,
            tickets: HashMap::new(),
            next_ticket: 0,
            in_flight: None,
            plan,
            done_tx,
        };
        tokio::spawn(driver.run(rx, done_rx).instrument(span));

        Self {
            tx,
            files: files_rx,
        }
    }

    /// Replace the working set with a freshly scanned batch.
    pub async fn load(&self, files: Vec<MediaFile>) -> Result<()> {
        self.send(Request::Load(files)).await
    }

    /// Submit new settings and return the completion ticket.
    pub async fn submit(&self, settings: Settings) -> Result<oneshot::Receiver<RecalcOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Change(settings, reply)).await?;
        Ok(rx)
    }

    /// Submit new settings and wait until the request is settled.
    pub async fn set_settings(&self, settings: Settings) -> Result<RecalcOutcome> {
        self.submit(settings)
            .await?
            .await
            .map_err(|_| Error::RecalculationFailed("recalculation actor stopped".into()))
    }

    /// The import owns the file set until [`import_finished`](Self::import_finished).
    pub async fn import_started(&self) -> Result<()> {
        self.send(Request::ImportStarted).await
    }

    /// Hand back the imported files; any deferred change runs now.
    pub async fn import_finished(&self, files: Vec<MediaFile>) -> Result<()> {
        self.send(Request::ImportFinished(files)).await
    }

    /// Current published set.
    pub fn files(&self) -> FileSet {
        self.files.borrow().clone()
    }

    /// Watch the published set.
    pub fn subscribe(&self) -> watch::Receiver<FileSet> {
        self.files.clone()
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::RecalculationFailed("recalculation actor stopped".into()))
    }
}

struct Driver {
    model: RecalcModel,
    files: watch::Sender<FileSet>,
    tickets: HashMap<Ticket, oneshot::Sender<RecalcOutcome>>,
    next_ticket: Ticket,
    in_flight: Option<CancellationToken>,
    plan: PlanFn,
    done_tx: mpsc::Sender<RecalcEvent>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>, mut done_rx: mpsc::Receiver<RecalcEvent>) {
        tracing::debug!(target: "recalc", "Recalculator started");
        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    let event = self.event_for(request);
                    self.dispatch(event);
                }
                Some(event) = done_rx.recv() => self.dispatch(event),
            }
        }
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        tracing::debug!(target: "recalc", "Recalculator stopped");
    }

    fn event_for(&mut self, request: Request) -> RecalcEvent {
        match request {
            Request::Load(files) => RecalcEvent::Load(Arc::new(files)),
            Request::Change(settings, reply) => {
                self.next_ticket += 1;
                self.tickets.insert(self.next_ticket, reply);
                RecalcEvent::DestinationChanged {
                    settings,
                    ticket: self.next_ticket,
                }
            }
            Request::ImportStarted => RecalcEvent::ImportStarted,
            Request::ImportFinished(files) => RecalcEvent::ImportFinished(Arc::new(files)),
        }
    }

    fn dispatch(&mut self, event: RecalcEvent) {
        for command in self.model.update(event) {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: RecalcCommand) {
        match command {
            RecalcCommand::CancelInFlight => {
                if let Some(token) = self.in_flight.take() {
                    tracing::debug!(target: "recalc", "Cancelling in-flight recalculation");
                    token.cancel();
                }
            }
            RecalcCommand::Start { generation, settings } => self.start(generation, settings),
            RecalcCommand::Publish(files) => {
                self.files.send_replace(files);
            }
            RecalcCommand::Resolve { tickets, outcome } => {
                for ticket in tickets {
                    if let Some(reply) = self.tickets.remove(&ticket) {
                        let _ = reply.send(outcome.clone());
                    }
                }
            }
        }
    }

    fn start(&mut self, generation: u64, settings: Settings) {
        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());

        let files = self.files.borrow().clone();
        let plan = Arc::clone(&self.plan);
        let done_tx = self.done_tx.clone();
        tracing::info!(
            target: "recalc",
            generation,
            files = files.len(),
            destination = ?settings.destination,
            "Recalculating destinations"
        );

        tokio::spawn(
            async move {
                let result =
                    tokio::task::spawn_blocking(move || plan(&files, &settings, &token)).await;
                let event = match result {
                    Ok(Some(planned)) => RecalcEvent::Finished {
                        generation,
                        files: Arc::new(planned),
                    },
                    // Cancelled: the model has already moved on
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!(target: "recalc", generation, error = %e, "Recalculation worker failed");
                        RecalcEvent::Failed {
                            generation,
                            reason: e.to_string(),
                        }
                    }
                };
                let _ = done_tx.send(event).await;
            }
            .in_current_span(),
        );
    }
}
