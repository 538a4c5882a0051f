//! Lifecycle of the whole twin
//!
//! Starts a simulation and a control task per plant, the shared reference
//! randomizer and optionally the telemetry bridge, all on named threads.
//! Shutdown fires the cancellation signal, joins every task and only then
//! disconnects the tag store.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use log::{error, info, warn};
use parking_lot::Mutex;

use super::cancel::{CancellationSource, CancellationToken};
use super::control_task::ControlTask;
use super::randomizer::ReferenceRandomizer;
use super::shared::SharedState;
use super::simulation::SimulationTask;
use crate::config::TwinConfig;
use crate::control::StateFeedback;
use crate::error::{TwinError, TwinResult};
use crate::plant::{PlantSnapshot, ReferenceVector};
use crate::tags::{PlantTagAdapter, TagStore};
use crate::telemetry::{Publisher, TelemetryBridge};

/// What a task does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Simulation(usize),
    Control(usize),
    Randomizer,
    Telemetry,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Simulation(p) => write!(f, "plant{p}-sim"),
            TaskKind::Control(p) => write!(f, "plant{p}-ctl"),
            TaskKind::Randomizer => write!(f, "randomizer"),
            TaskKind::Telemetry => write!(f, "telemetry"),
        }
    }
}

/// `Running` until the task observes cancellation; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Stopped,
}

/// Marks the task stopped when its thread body returns or unwinds
struct ExitGuard {
    stopped: Arc<AtomicBool>,
    stopped_at: Arc<Mutex<Option<Instant>>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        *self.stopped_at.lock() = Some(Instant::now());
        self.stopped.store(true, Ordering::Release);
    }
}

/// Handle to one spawned task
#[derive(Debug)]
pub struct TaskHandle {
    kind: TaskKind,
    stopped: Arc<AtomicBool>,
    stopped_at: Arc<Mutex<Option<Instant>>>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn spawn<F>(kind: TaskKind, body: F) -> TwinResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_at = Arc::new(Mutex::new(None));
        let guard = ExitGuard {
            stopped: Arc::clone(&stopped),
            stopped_at: Arc::clone(&stopped_at),
        };

        let join = thread::Builder::new()
            .name(kind.to_string())
            .spawn(move || {
                let _guard = guard;
                body();
            })
            .map_err(|source| TwinError::Spawn {
                name: kind.to_string(),
                source,
            })?;

        Ok(Self {
            kind,
            stopped,
            stopped_at,
            join: Some(join),
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        if self.stopped.load(Ordering::Acquire) {
            TaskState::Stopped
        } else {
            TaskState::Running
        }
    }

    /// Join and report how long after `signalled_at` the task exited
    fn join(mut self, signalled_at: Instant) -> TaskExit {
        let panicked = match self.join.take() {
            Some(handle) => handle.join().is_err(),
            None => false,
        };
        let stopped_at = *self.stopped_at.lock();
        let latency = stopped_at
            .map(|at| at.saturating_duration_since(signalled_at))
            .unwrap_or_default();
        TaskExit {
            kind: self.kind,
            latency,
            panicked,
        }
    }
}

/// Exit record of one task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskExit {
    pub kind: TaskKind,
    /// Time from the cancellation signal to the task's exit
    pub latency: Duration,
    pub panicked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub tasks: Vec<TaskExit>,
    pub disconnected: bool,
}

impl ShutdownReport {
    /// Largest exit latency among tasks matching `filter`
    pub fn max_latency(&self, filter: impl Fn(&TaskKind) -> bool) -> Duration {
        self.tasks
            .iter()
            .filter(|t| filter(&t.kind))
            .map(|t| t.latency)
            .max()
            .unwrap_or_default()
    }

    pub fn any_panicked(&self) -> bool {
        self.tasks.iter().any(|t| t.panicked)
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for task in &self.tasks {
            write!(f, "{:<12} stopped after {:>8.1?}", task.kind.to_string(), task.latency)?;
            if task.panicked {
                write!(f, " (panicked)")?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "tag store {}",
            if self.disconnected {
                "disconnected"
            } else {
                "left connected"
            }
        )
    }
}

/// Builder for a running twin
pub struct Orchestrator {
    config: TwinConfig,
    publisher: Option<Arc<dyn Publisher>>,
}

impl Orchestrator {
    /// Validates the configuration; malformed configuration never reaches a task
    pub fn new(config: TwinConfig) -> TwinResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            publisher: None,
        })
    }

    /// Destination for the telemetry bridge, used when telemetry is enabled
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    /// Connect, zero the tags and start every task
    pub fn start(self, store: Arc<dyn TagStore>) -> TwinResult<RunningTwin> {
        let config = self.config;
        let law = StateFeedback::new(config.gain_matrix()?);

        if let Err(e) = store.connect() {
            error!("Cannot connect to tag store {}: {e}", config.store.endpoint);
            return Err(e.into());
        }

        for tag in config.all_tags() {
            if let Err(e) = store.write(tag, 0.0) {
                warn!("Failed to initialise {tag}: {e}");
            }
        }

        let source = CancellationSource::new();

        let mut randomizer = config.reference.randomize.then(|| {
            ReferenceRandomizer::new(
                config.reference.band,
                config.reference.step,
                config.reference.seed,
            )
        });

        let mut twin = RunningTwin {
            source,
            tasks: Vec::new(),
            plants: Vec::with_capacity(config.plants.len()),
            store: Arc::clone(&store),
        };

        let simulation_period = Duration::from_secs_f64(config.cadence.simulation_s);
        let control_period = Duration::from_secs_f64(config.cadence.control_s);

        for (index, plant) in config.plants.iter().enumerate() {
            let reference = plant.reference();
            let references = match randomizer.as_mut() {
                Some(r) => r.add_plant(reference),
                // Sender dropped immediately: the reference never changes
                None => unbounded::<ReferenceVector>().1,
            };

            let shared = SharedState::new(reference);
            let tags = PlantTagAdapter::new(Arc::clone(&store), plant.tags.clone());

            let simulation = SimulationTask::new(
                index,
                plant.model(),
                config.integrator,
                config.cadence.simulation_s,
                reference,
                references,
                tags.clone(),
                shared.clone(),
            );
            let control = ControlTask::new(index, law, tags, shared.clone());
            twin.plants.push(shared);

            twin.spawn(TaskKind::Simulation(index), move |token| {
                simulation.run(simulation_period, token)
            })?;
            twin.spawn(TaskKind::Control(index), move |token| {
                control.run(control_period, token)
            })?;
        }

        if let Some(randomizer) = randomizer {
            let period = Duration::from_secs_f64(config.cadence.randomizer_s);
            twin.spawn(TaskKind::Randomizer, move |token| randomizer.run(period, token))?;
        }

        if config.telemetry.enabled {
            match self.publisher {
                Some(publisher) => {
                    let bridge = TelemetryBridge::new(
                        Arc::clone(&store),
                        config.plants.iter().map(|p| p.tags.clone()).collect(),
                        config.telemetry.topic_prefix.clone(),
                        publisher,
                    );
                    let period = Duration::from_secs_f64(config.telemetry.period_s);
                    twin.spawn(TaskKind::Telemetry, move |token| bridge.run(period, token))?;
                }
                None => warn!("Telemetry enabled but no publisher attached; bridge not started"),
            }
        }

        info!(
            "Twin running: {} plants, {} tasks",
            twin.plants.len(),
            twin.tasks.len()
        );
        Ok(twin)
    }
}

/// A started twin. Dropping it shuts it down.
pub struct RunningTwin {
    source: CancellationSource,
    tasks: Vec<TaskHandle>,
    plants: Vec<SharedState>,
    store: Arc<dyn TagStore>,
}

impl RunningTwin {
    /// Spawn a task; on failure everything started so far is stopped
    fn spawn<F>(&mut self, kind: TaskKind, body: F) -> TwinResult<()>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = self.source.token();
        match TaskHandle::spawn(kind, move || body(token)) {
            Ok(handle) => {
                self.tasks.push(handle);
                Ok(())
            }
            Err(e) => {
                error!("{e}");
                self.stop();
                Err(e)
            }
        }
    }

    pub fn plant_count(&self) -> usize {
        self.plants.len()
    }

    /// Latest published state and reference of a plant
    pub fn snapshot(&self, plant: usize) -> Option<PlantSnapshot> {
        self.plants.get(plant).map(SharedState::snapshot)
    }

    pub fn task_states(&self) -> Vec<(TaskKind, TaskState)> {
        self.tasks.iter().map(|t| (t.kind(), t.state())).collect()
    }

    pub fn store(&self) -> &Arc<dyn TagStore> {
        &self.store
    }

    /// Signal, join every task, then release the store
    pub fn shutdown(mut self) -> ShutdownReport {
        self.stop()
    }

    fn stop(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.tasks.is_empty() && self.source.is_cancelled() {
            return report;
        }

        info!("Shutting down {} tasks", self.tasks.len());
        let signalled_at = Instant::now();
        self.source.cancel();

        for task in self.tasks.drain(..) {
            let exit = task.join(signalled_at);
            if exit.panicked {
                error!("{} panicked", exit.kind);
            }
            report.tasks.push(exit);
        }

        report.disconnected = match self.store.disconnect() {
            Ok(()) => true,
            Err(e) => {
                warn!("Tag store disconnect failed: {e}");
                false
            }
        };
        report
    }
}

impl Drop for RunningTwin {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for RunningTwin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningTwin")
            .field("tasks", &self.tasks)
            .field("plants", &self.plants.len())
            .finish_non_exhaustive()
    }
}
