//! Per-tick refresh pass.
//!
//! The table lock is held only while due entries are claimed. Traces then
//! run unlocked, optionally fanned out across a rayon pool, and each one
//! writes back to its own entry alone.

use crate::cache::QueryCache;
use crate::table::RefreshJob;
use rayon::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// What happened to one dispatched refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New result written back.
    Completed,
    /// An entity in the key no longer resolves; the entry stops matching.
    Retired,
    /// The slot was reclaimed while the trace ran; the result was dropped.
    Discarded,
}

/// Summary of one [`QueryCache::run_update_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub live: usize,
    pub idle: usize,
    /// Due entries skipped because a refresh was already outstanding.
    pub skipped_in_flight: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub retired: usize,
    pub discarded: usize,
}

impl UpdateReport {
    fn record(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Completed => self.completed += 1,
            RefreshOutcome::Retired => self.retired += 1,
            RefreshOutcome::Discarded => self.discarded += 1,
        }
    }
}

impl QueryCache {
    /// Refresh every due entry and wait for the traces to finish.
    ///
    /// Call once per simulation tick. Lookups from other threads keep being
    /// served, with the previous answers, while the traces run.
    pub fn run_update_cycle(&self) -> UpdateReport {
        let now = self.services.clock.now();
        let (jobs, mut report) = self.begin_cycle(now);

        let outcomes: Vec<RefreshOutcome> = if self.config.parallel_refresh && jobs.len() > 1 {
            let run = || {
                jobs.par_iter()
                    .map(|job| self.execute(job, now))
                    .collect::<Vec<_>>()
            };
            match &self.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        } else {
            jobs.iter().map(|job| self.execute(job, now)).collect()
        };

        for outcome in outcomes {
            report.record(outcome);
        }

        tracing::debug!(
            now,
            live = report.live,
            idle = report.idle,
            dispatched = report.dispatched,
            completed = report.completed,
            retired = report.retired,
            discarded = report.discarded,
            "query cache update cycle"
        );
        report
    }

    /// Claim due entries and hand their traces to the worker pool without
    /// waiting. Returns the number dispatched.
    ///
    /// Entries stay `speculatively_in_progress` until their trace lands;
    /// a later cycle will not dispatch them again in the meantime.
    pub fn dispatch_update_cycle(self: &Arc<Self>) -> usize {
        let now = self.services.clock.now();
        let (jobs, report) = self.begin_cycle(now);

        let inline = !self.config.parallel_refresh;
        if inline {
            for job in &jobs {
                self.execute(job, now);
            }
        } else {
            for job in jobs {
                let cache = Arc::clone(self);
                let task = move || {
                    cache.execute(&job, now);
                };
                match &self.pool {
                    Some(pool) => pool.spawn(task),
                    None => rayon::spawn(task),
                }
            }
        }

        tracing::debug!(
            now,
            dispatched = report.dispatched,
            inline,
            "query cache refreshes dispatched"
        );
        report.dispatched
    }

    fn begin_cycle(&self, now: f32) -> (Vec<RefreshJob>, UpdateReport) {
        self.bypass_reported.store(false, Ordering::Relaxed);
        let (jobs, scan) = self.table.collect_refresh_jobs(now);
        let report = UpdateReport {
            live: scan.live,
            idle: scan.idle,
            skipped_in_flight: scan.in_flight,
            dispatched: jobs.len(),
            ..UpdateReport::default()
        };
        (jobs, report)
    }

    fn execute(&self, job: &RefreshJob, now: f32) -> RefreshOutcome {
        self.stats.record_refresh();

        let outcome = match job.key.resolve_trace(self.services.resolver.as_ref()) {
            Some(request) => {
                let result = self.services.tracer.is_clear(&request);
                if self.table.complete(job.handle, result, now) {
                    RefreshOutcome::Completed
                } else {
                    RefreshOutcome::Discarded
                }
            }
            None => {
                if self.table.retire(job.handle) {
                    RefreshOutcome::Retired
                } else {
                    RefreshOutcome::Discarded
                }
            }
        };

        match outcome {
            RefreshOutcome::Completed => {}
            RefreshOutcome::Retired => self.stats.record_retirement(),
            RefreshOutcome::Discarded => {
                tracing::trace!(slot = job.handle.slot(), "stale refresh discarded");
                self.stats.record_stale_discard();
            }
        }
        outcome
    }
}
