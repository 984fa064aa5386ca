//! Recalculation state machine as a pure reducer.
//!
//! [`RecalcModel::update`] takes one event, updates the state once and
//! returns the commands the driver must execute, in order. It performs no
//! I/O and never blocks, so every transition can be tested directly.

use std::mem;
use std::sync::Arc;

use crate::config::Settings;
use crate::model::MediaFile;

/// Identifies one destination-change request.
pub type Ticket = u64;

/// Published file set.
pub type FileSet = Arc<Vec<MediaFile>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcState {
    Idle,
    Recalculating { generation: u64 },
}

/// How a destination-change request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecalcOutcome {
    /// The recomputed set has been published
    Completed,
    /// A newer request replaced this one before it finished
    Superseded,
    /// An import is running; the change applies once it finishes
    Deferred,
    /// The run failed; the published set is unchanged
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum RecalcEvent {
    /// A freshly scanned batch replaces the working set
    Load(FileSet),
    DestinationChanged { settings: Settings, ticket: Ticket },
    Finished { generation: u64, files: FileSet },
    Failed { generation: u64, reason: String },
    ImportStarted,
    /// Import ended; carries the files with their final statuses
    ImportFinished(FileSet),
}

#[derive(Debug, Clone)]
pub enum RecalcCommand {
    /// Stop the running worker, if any
    CancelInFlight,
    /// Re-plan the published set against `settings`
    Start { generation: u64, settings: Settings },
    /// Replace the published set
    Publish(FileSet),
    Resolve {
        tickets: Vec<Ticket>,
        outcome: RecalcOutcome,
    },
}

#[derive(Debug, Clone)]
pub struct RecalcModel {
    state: RecalcState,
    /// Latest requested settings
    settings: Settings,
    /// Settings the published set was planned against
    published: Settings,
    /// Settings of the running generation
    running: Option<Settings>,
    generation: u64,
    has_files: bool,
    import_running: bool,
    deferred: Option<Settings>,
    waiting: Vec<Ticket>,
}

impl RecalcModel {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: RecalcState::Idle,
            published: settings.clone(),
            settings,
            running: None,
            generation: 0,
            has_files: false,
            import_running: false,
            deferred: None,
            waiting: Vec::new(),
        }
    }

    pub fn state(&self) -> RecalcState {
        self.state
    }

    /// Latest requested settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Settings the currently published set was planned against.
    pub fn published_settings(&self) -> &Settings {
        &self.published
    }

    pub fn update(&mut self, event: RecalcEvent) -> Vec<RecalcCommand> {
        match event {
            RecalcEvent::Load(files) => {
                let mut commands = self.supersede(RecalcOutcome::Superseded);
                self.has_files = !files.is_empty();
                self.published = self.settings.clone();
                commands.push(RecalcCommand::Publish(files));
                commands
            }

            RecalcEvent::DestinationChanged { settings, ticket } => {
                if self.import_running {
                    self.deferred = Some(settings);
                    return vec![resolve(vec![ticket], RecalcOutcome::Deferred)];
                }

                let unchanged = settings == self.published && self.state == RecalcState::Idle;
                self.settings = settings;
                if !self.has_files || unchanged {
                    self.published = self.settings.clone();
                    return vec![resolve(vec![ticket], RecalcOutcome::Completed)];
                }

                let mut commands = self.supersede(RecalcOutcome::Superseded);
                self.waiting.push(ticket);
                commands.push(self.start());
                commands
            }

            RecalcEvent::Finished { generation, files } => {
                if !self.is_current(generation) {
                    return Vec::new();
                }
                self.state = RecalcState::Idle;
                if let Some(settings) = self.running.take() {
                    self.published = settings;
                }
                vec![
                    RecalcCommand::Publish(files),
                    resolve(mem::take(&mut self.waiting), RecalcOutcome::Completed),
                ]
            }

            RecalcEvent::Failed { generation, reason } => {
                if !self.is_current(generation) {
                    return Vec::new();
                }
                self.state = RecalcState::Idle;
                self.running = None;
                vec![resolve(
                    mem::take(&mut self.waiting),
                    RecalcOutcome::Failed(reason),
                )]
            }

            RecalcEvent::ImportStarted => {
                self.import_running = true;
                // The import owns the file set now; finish this run afterwards
                if self.state != RecalcState::Idle {
                    self.deferred = Some(self.settings.clone());
                }
                self.supersede(RecalcOutcome::Deferred)
            }

            RecalcEvent::ImportFinished(files) => {
                self.import_running = false;
                self.has_files = !files.is_empty();
                let mut commands = vec![RecalcCommand::Publish(files)];
                if let Some(settings) = self.deferred.take() {
                    self.settings = settings;
                    if self.has_files {
                        commands.push(self.start());
                    }
                }
                commands
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state == RecalcState::Recalculating { generation }
    }

    fn start(&mut self) -> RecalcCommand {
        self.generation += 1;
        self.running = Some(self.settings.clone());
        self.state = RecalcState::Recalculating {
            generation: self.generation,
        };
        RecalcCommand::Start {
            generation: self.generation,
            settings: self.settings.clone(),
        }
    }

    /// Abandon the running generation and settle its waiting tickets.
    fn supersede(&mut self, outcome: RecalcOutcome) -> Vec<RecalcCommand> {
        if self.state == RecalcState::Idle {
            return Vec::new();
        }
        self.state = RecalcState::Idle;
        self.running = None;
        let mut commands = vec![RecalcCommand::CancelInFlight];
        let tickets = mem::take(&mut self.waiting);
        if !tickets.is_empty() {
            commands.push(resolve(tickets, outcome));
        }
        commands
    }
}

fn resolve(tickets: Vec<Ticket>, outcome: RecalcOutcome) -> RecalcCommand {
    RecalcCommand::Resolve { tickets, outcome }
}
