//! Interval groups: one scheduler per cadence
//!
//! Each group owns a [`Ticker`] and a loop counter. On every tick it refreshes
//! its definitions when the fetch-loop modulator says so, parses them and
//! spawns one task per probe without waiting for any of them.

pub mod tick;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::MIN_CADENCE_SECONDS;
use crate::clock::{Clock, SystemClock};
use crate::error::WatcherError;
use crate::model::CheckDefinition;
use crate::parse::CheckParser;
use crate::storage::Storage;

pub use tick::{DEFAULT_POLL_INTERVAL, TickGate, Ticker, is_aligned};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Counter value this tick ran with, starting at 0
    pub loop_counter: u64,

    /// Definitions were refetched successfully on this tick
    pub fetched: bool,

    /// Probes spawned
    pub launched: usize,

    /// Definitions that failed to parse
    pub skipped: usize,
}

pub struct IntervalGroup {
    cadence_seconds: u32,
    storage: Arc<dyn Storage>,
    parser: CheckParser,
    fetch_loop_modulator: u64,
    concurrency: Option<Arc<Semaphore>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    loop_counter: u64,
    definitions: Vec<CheckDefinition>,
}

impl IntervalGroup {
    pub fn builder(cadence_seconds: u32) -> IntervalGroupBuilder {
        IntervalGroupBuilder::new(cadence_seconds)
    }

    pub fn cadence_seconds(&self) -> u32 {
        self.cadence_seconds
    }

    pub fn loop_counter(&self) -> u64 {
        self.loop_counter
    }

    /// Definitions the next non-fetching tick will run
    pub fn definitions(&self) -> &[CheckDefinition] {
        &self.definitions
    }

    /// Body of one tick
    ///
    /// A failed fetch keeps the previous definitions. Parse failures skip
    /// the one definition. Probes are spawned and not awaited.
    pub async fn run_tick(&mut self) -> TickReport {
        let mut report = TickReport {
            loop_counter: self.loop_counter,
            ..TickReport::default()
        };
        let fetch_due = self.loop_counter % self.fetch_loop_modulator == 0;
        self.loop_counter = self.loop_counter.wrapping_add(1);

        if fetch_due {
            match self.storage.fetch_check_definitions(self.cadence_seconds).await {
                Ok(definitions) => {
                    debug!(
                        cadence = self.cadence_seconds,
                        count = definitions.len(),
                        "fetched check definitions"
                    );
                    self.definitions = definitions;
                    report.fetched = true;
                }
                Err(err) => {
                    error!(
                        cadence = self.cadence_seconds,
                        error = %err,
                        reused = self.definitions.len(),
                        "failed to fetch check definitions, reusing previous set"
                    );
                }
            }
        }

        for definition in &self.definitions {
            let probe = match self.parser.parse(definition) {
                Ok(probe) => probe,
                Err(err) => {
                    warn!(
                        cadence = self.cadence_seconds,
                        id = definition.id,
                        error = %err,
                        "skipping check definition"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let limiter = self.concurrency.clone();
            tokio::spawn(async move {
                // acquired inside the task so a saturated limit never holds up the tick
                let permit = match limiter {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    None => None,
                };
                let status = probe.execute().await;
                probe.describe_result(&status);

                // the limit bounds network work, not storage retries
                drop(permit);
                probe.persist(&status).await;
            });
            report.launched += 1;
        }

        report
    }

    /// Tick forever
    pub async fn run(mut self) {
        let cadence = self.cadence_seconds;
        if 3600 % cadence != 0 {
            warn!(
                cadence,
                "cadence does not divide an hour, ticks will bunch up at the top of each hour"
            );
        }

        let (tx, mut rx) = mpsc::channel(1);
        let ticker = Ticker::new(cadence, self.clock.clone(), self.poll_interval).spawn(tx);
        info!(cadence, modulator = self.fetch_loop_modulator, "interval group started");

        while let Some(at) = rx.recv().await {
            let report = self.run_tick().await;
            debug!(
                cadence,
                tick = %at,
                loop_counter = report.loop_counter,
                fetched = report.fetched,
                launched = report.launched,
                skipped = report.skipped,
                "tick finished"
            );
        }

        ticker.abort();
        warn!(cadence, "interval group stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

impl std::fmt::Debug for IntervalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalGroup")
            .field("cadence_seconds", &self.cadence_seconds)
            .field("fetch_loop_modulator", &self.fetch_loop_modulator)
            .field("loop_counter", &self.loop_counter)
            .field("definitions", &self.definitions.len())
            .finish()
    }
}

pub struct IntervalGroupBuilder {
    cadence_seconds: u32,
    storage: Option<Arc<dyn Storage>>,
    parser: Option<CheckParser>,
    fetch_loop_modulator: u64,
    concurrency: Option<Arc<Semaphore>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl IntervalGroupBuilder {
    fn new(cadence_seconds: u32) -> Self {
        Self {
            cadence_seconds,
            storage: None,
            parser: None,
            fetch_loop_modulator: 1,
            concurrency: None,
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Where definitions come from; usually a [`DataAccess`](crate::storage::DataAccess)
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn parser(mut self, parser: CheckParser) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Refetch every `m`-th tick; 1 refetches on every tick
    pub fn fetch_loop_modulator(mut self, m: u64) -> Self {
        self.fetch_loop_modulator = m;
        self
    }

    /// Bound on probes in flight, shared across groups if the same semaphore is passed
    pub fn concurrency(mut self, semaphore: Arc<Semaphore>) -> Self {
        self.concurrency = Some(semaphore);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn build(self) -> Result<IntervalGroup, WatcherError> {
        let cadence = self.cadence_seconds;
        if cadence == 0 {
            return Err(WatcherError::invalid("interval group cadence must not be zero"));
        }
        if cadence < MIN_CADENCE_SECONDS {
            return Err(WatcherError::invalid(format!(
                "interval group cadence {cadence}s is below the minimum of {MIN_CADENCE_SECONDS}s"
            )));
        }
        let storage = self
            .storage
            .ok_or_else(|| WatcherError::invalid(format!("interval group {cadence}s has no storage")))?;
        let parser = self
            .parser
            .ok_or_else(|| WatcherError::invalid(format!("interval group {cadence}s has no parser")))?;
        if self.poll_interval.is_zero() {
            return Err(WatcherError::invalid("tick poll interval must not be zero"));
        }

        let fetch_loop_modulator = if self.fetch_loop_modulator == 0 {
            warn!(cadence, "fetch loop modulator 0 is treated as 1");
            1
        } else {
            self.fetch_loop_modulator
        };

        Ok(IntervalGroup {
            cadence_seconds: cadence,
            storage,
            parser,
            fetch_loop_modulator,
            concurrency: self.concurrency,
            clock: self.clock,
            poll_interval: self.poll_interval,
            loop_counter: 0,
            definitions: Vec::new(),
        })
    }
}

/// Collaborators shared by every group the process runs
#[derive(Clone)]
pub struct IntervalGroupSettings {
    pub storage: Arc<dyn Storage>,
    pub parser: CheckParser,
    pub fetch_loop_modulator: u64,
    pub concurrency: Option<Arc<Semaphore>>,
    pub clock: Arc<dyn Clock>,
    pub poll_interval: Duration,
}

impl IntervalGroupSettings {
    pub fn new(storage: Arc<dyn Storage>, parser: CheckParser) -> Self {
        Self {
            storage,
            parser,
            fetch_loop_modulator: 1,
            concurrency: None,
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Start one group per distinct cadence
///
/// Invalid cadences are logged and skipped, the others still start.
pub fn spawn_interval_groups(cadences: &[u32], settings: &IntervalGroupSettings) -> Vec<JoinHandle<()>> {
    let distinct: BTreeSet<u32> = cadences.iter().copied().collect();
    let mut handles = Vec::with_capacity(distinct.len());

    for cadence in distinct {
        let mut builder = IntervalGroup::builder(cadence)
            .storage(settings.storage.clone())
            .parser(settings.parser.clone())
            .fetch_loop_modulator(settings.fetch_loop_modulator)
            .clock(settings.clock.clone())
            .poll_interval(settings.poll_interval);
        if let Some(semaphore) = &settings.concurrency {
            builder = builder.concurrency(semaphore.clone());
        }

        match builder.build() {
            Ok(group) => handles.push(group.spawn()),
            Err(err) => error!(cadence, error = %err, "skipping interval group"),
        }
    }

    handles
}
