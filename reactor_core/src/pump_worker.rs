//! Background pump actuation.
//!
//! One thread owns every pump and runs dose jobs strictly in submission order,
//! so a manual dose and a cycle dose can never drive pumps at the same time.
//! Results come back as [`DoseReport`]s; the worker never touches loop state.
//!
//! Each `PumpWorker` spawns exactly one thread, joined on drop. Jobs still
//! queued at shutdown are skipped, the one in progress runs to completion
//! (it is bounded by its own `max_time`).

use crossbeam_channel as xch;
use reactor_traits::{CompartmentId, Direction, DoseOutcome, Pump};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::ReactorError;
use crate::types::DoseOrigin;

pub type PumpSet = BTreeMap<CompartmentId, Box<dyn Pump + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct DoseJob {
    pub pump_id: CompartmentId,
    pub direction: Direction,
    pub steps: u32,
    pub max_time: Duration,
    pub origin: DoseOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoseReport {
    pub job: DoseJob,
    pub outcome: DoseOutcome,
}

pub struct PumpWorker {
    jobs: Option<xch::Sender<DoseJob>>,
    reports: xch::Receiver<DoseReport>,
    pump_ids: BTreeSet<CompartmentId>,
    /// Shutdown flag, checked between jobs
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl PumpWorker {
    pub fn spawn(mut pumps: PumpSet) -> Self {
        let (job_tx, job_rx) = xch::unbounded::<DoseJob>();
        let (report_tx, report_rx) = xch::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let pump_ids = pumps.keys().copied().collect();

        let join_handle = std::thread::spawn(move || {
            // ends when the job sender is dropped
            for job in job_rx.iter() {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!(pump = job.pump_id, "skipping queued dose at shutdown");
                    continue;
                }
                let outcome = match pumps.get_mut(&job.pump_id) {
                    Some(pump) => {
                        tracing::debug!(
                            pump = job.pump_id,
                            steps = job.steps,
                            direction = %job.direction,
                            "dose start"
                        );
                        pump.dose(job.direction, job.steps, job.max_time)
                    }
                    None => DoseOutcome::HardwareFault(format!("no pump {}", job.pump_id)),
                };
                if report_tx.send(DoseReport { job, outcome }).is_err() {
                    tracing::debug!("pump worker consumer gone, exiting thread");
                    break;
                }
            }
            tracing::trace!("pump worker thread exiting cleanly");
        });

        Self {
            jobs: Some(job_tx),
            reports: report_rx,
            pump_ids,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn has_pump(&self, id: CompartmentId) -> bool {
        self.pump_ids.contains(&id)
    }

    pub fn pump_ids(&self) -> impl Iterator<Item = CompartmentId> + '_ {
        self.pump_ids.iter().copied()
    }

    pub fn submit(&self, job: DoseJob) -> Result<(), ReactorError> {
        if !self.has_pump(job.pump_id) {
            return Err(ReactorError::UnknownCompartment(job.pump_id));
        }
        self.jobs
            .as_ref()
            .ok_or_else(|| ReactorError::State("pump worker shut down".into()))?
            .send(job)
            .map_err(|_| ReactorError::State("pump worker thread is gone".into()))
    }

    /// Finished doses, for `select!` or polling.
    pub fn reports(&self) -> &xch::Receiver<DoseReport> {
        &self.reports
    }
}

impl Drop for PumpWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.jobs.take());
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("pump worker joined"),
                Err(e) => tracing::warn!(?e, "pump worker panicked during shutdown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedPump;

    fn job(pump_id: CompartmentId, steps: u32) -> DoseJob {
        DoseJob {
            pump_id,
            direction: Direction::Forward,
            steps,
            max_time: Duration::from_secs(30),
            origin: DoseOrigin::Auto,
        }
    }

    #[test]
    fn runs_jobs_in_order() {
        let p1 = ScriptedPump::new();
        let p2 = ScriptedPump::new();
        let mut pumps: PumpSet = BTreeMap::new();
        pumps.insert(1, Box::new(p1.clone()));
        pumps.insert(2, Box::new(p2.clone()));
        let worker = PumpWorker::spawn(pumps);

        worker.submit(job(2, 10)).unwrap();
        worker.submit(job(1, 20)).unwrap();
        let r1 = worker.reports().recv_timeout(Duration::from_secs(2)).unwrap();
        let r2 = worker.reports().recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((r1.job.pump_id, r2.job.pump_id), (2, 1));
        assert!(r1.outcome.is_completed());
        assert_eq!(p1.calls().len(), 1);
        assert_eq!(p2.calls()[0].1, 10);
    }

    #[test]
    fn unknown_pump_is_refused_without_queueing() {
        let worker = PumpWorker::spawn(BTreeMap::new());
        assert_eq!(
            worker.submit(job(9, 10)),
            Err(ReactorError::UnknownCompartment(9))
        );
        assert!(
            worker
                .reports()
                .recv_timeout(Duration::from_millis(50))
                .is_err()
        );
    }

    #[test]
    fn drop_joins_thread() {
        let p = ScriptedPump::new();
        let mut pumps: PumpSet = BTreeMap::new();
        pumps.insert(1, Box::new(p));
        let worker = PumpWorker::spawn(pumps);
        worker.submit(job(1, 10)).unwrap();
        drop(worker);
    }
}
