//! Fixed interval driver of the sample and publish cycle.
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthSession, RefreshOutcome};
use crate::clock::Clock;
use crate::payload;
use crate::record::Record;
use crate::sensor::{SensorError, SensorSampler};
use crate::sync::{PublishResult, SyncClient};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters of the sampling cadence.
pub struct SamplingParameters
{
    /// Time between the start of two cycles in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Sleep between two ticks of the run loop in milliseconds.
    #[serde(default = "default_poll_resolution_ms")]
    pub poll_resolution_ms: u64,
}

fn default_interval_ms() -> u64 { 10_000 }
fn default_poll_resolution_ms() -> u64 { 100 }

impl Default for SamplingParameters {
    fn default() -> Self {
        SamplingParameters { interval_ms: default_interval_ms(), poll_resolution_ms: default_poll_resolution_ms() }
    }
}

/// Everything a cycle works with. Owned by the scheduler and handed to each component call.
pub struct NodeContext {
    pub sampler: SensorSampler,
    pub auth: AuthSession,
    pub sync: SyncClient,
}

#[derive(Debug)]
pub struct CycleReport {
    pub record: Record,
    pub identity: String,
    pub latest: PublishResult,
    pub history: PublishResult,
    pub refresh: Result<RefreshOutcome, AuthError>,
}

impl CycleReport {
    fn log(&self, cycle: u64) {
        if let Err(err) = &self.refresh {
            log::warn!(target: "gianode::scheduler", "Keeping current token: '{}'", err);
        }
        if self.latest.success && self.history.success {
            log::info!(target: "gianode::scheduler", "Cycle {} published soil {}% at {} under '{}'",
                       cycle, self.record.soil, self.record.ts, self.identity);
        } else {
            let reason = |result: &PublishResult| result.reason.clone().unwrap_or_else(|| String::from("ok"));
            log::info!(target: "gianode::scheduler", "Cycle {} under '{}' incomplete, latest: '{}', history: '{}'",
                       cycle, self.identity, reason(&self.latest), reason(&self.history));
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The interval has not elapsed yet.
    Idle,
    /// The sensors gave no usable reading, nothing was published.
    Skipped(SensorError),
    Completed(CycleReport),
}

#[derive(Debug, Default)]
struct FailureStreak {
    latest: u32,
    history: u32,
}

impl FailureStreak {
    fn track(count: &mut u32, destination: &str, result: &PublishResult) {
        if result.success {
            if *count > 0 {
                log::info!(target: "gianode::scheduler", "Publishing to {} recovered after {} failed cycles", destination, count);
            }
            *count = 0;
        } else {
            *count += 1;
            log::warn!(target: "gianode::scheduler", "Publishing to {} failed {} cycles in a row", destination, count);
        }
    }
}

/// Single threaded cooperative scheduler.
///
/// `tick` returns immediately unless an interval has passed since the start of the last cycle.
/// A cycle runs to completion inside `tick`, so a slow cycle pushes back the next one and
/// missed intervals are not made up.
pub struct Scheduler {
    clock: Rc<dyn Clock>,
    context: NodeContext,
    interval: Duration,
    last_cycle_time: Duration,
    cycles: u64,
    failures: FailureStreak,
}

impl Scheduler {
    /// Bootstraps the identity and starts the first interval.
    ///
    /// A failed bootstrap is logged and the node continues under the fallback identity.
    pub fn start(mut context: NodeContext, clock: Rc<dyn Clock>, interval: Duration) -> Self {
        if let Err(err) = context.auth.bootstrap(clock.as_ref()) {
            log::warn!(target: "gianode::scheduler", "Continuing without identity: \'{}\'", err);
        }
        let last_cycle_time = clock.monotonic();
        Scheduler { clock, context, interval, last_cycle_time, cycles: 0, failures: FailureStreak::default() }
    }

    #[cfg(test)]
    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    /// Number of cycles that were started, skipped ones included.
    #[cfg(test)]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.monotonic();
        if now.checked_sub(self.last_cycle_time).map_or(true, |elapsed| elapsed < self.interval) {
            return TickOutcome::Idle;
        }
        self.last_cycle_time = now;
        self.cycles += 1;
        self.run_cycle()
    }

    /// Ticks until `terminate` is set, sleeping `resolution` between ticks.
    pub fn run(&mut self, resolution: Duration, terminate: &AtomicBool) {
        while !terminate.load(Ordering::SeqCst) {
            match self.tick() {
                TickOutcome::Idle => {}
                TickOutcome::Skipped(err) => {
                    log::warn!(target: "gianode::scheduler", "Skipped cycle {}: '{}'", self.cycles, err);
                }
                TickOutcome::Completed(report) => report.log(self.cycles),
            }
            self.clock.sleep(resolution);
        }
        log::info!(target: "gianode::scheduler", "Stopped after {} cycles", self.cycles);
    }

    fn run_cycle(&mut self) -> TickOutcome {
        let clock = self.clock.as_ref();
        let context = &mut self.context;

        let reading = match context.sampler.sample(clock) {
            Ok(reading) => reading,
            Err(err) => {
                log::warn!(target: "gianode::scheduler", "Skipping cycle {}: \'{}\'", self.cycles, err);
                return TickOutcome::Skipped(err);
            }
        };
        log::debug!(target: "gianode::sensor", "Soil {}% ({}), raw {}, {:.1}°C / {:.1}°F, humidity {:.1}%",
                    reading.soil_pct(), reading.soil_condition(), reading.soil_raw(),
                    reading.temp_c(), reading.temp_f(), reading.humidity_pct());

        let record = payload::build(&reading);
        let node = context.auth.node_path().clone();
        let token = context.auth.access_token();
        let latest = context.sync.publish_latest(&node, token, &record);
        let history = context.sync.publish_history(&node, token, &record);

        FailureStreak::track(&mut self.failures.latest, "latest", &latest);
        FailureStreak::track(&mut self.failures.history, "history", &history);

        let refresh = context.auth.check_and_refresh(clock.utc_now());
        if let Err(err) = &refresh {
            log::warn!(target: "gianode::scheduler", "Keeping current token: \'{}\'", err);
        }

        if latest.success && history.success {
            log::info!(target: "gianode::scheduler", "Cycle {} published under \'{}\'", self.cycles, node.identity());
        }

        TickOutcome::Completed(CycleReport { record, identity: node.identity().to_string(), latest, history, refresh })
    }
}
