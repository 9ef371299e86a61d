use crate::{
    driver,
    tournament::{MatchJob, MatchOutcome},
};
use crossbeam_channel::unbounded;
use log::{debug, info};
use std::thread;

pub struct Runner {
    concurrency: usize,
    report_interval: Option<u64>,
}

impl Runner {
    pub fn new(concurrency: usize, report_interval: Option<u64>) -> Runner {
        Runner {
            concurrency: concurrency.max(1),
            report_interval,
        }
    }

    /// Plays every job once against real child processes.
    pub fn run(&self, jobs: Vec<MatchJob>) -> Vec<MatchOutcome> {
        self.run_with(jobs, driver::play_match)
    }

    /// Feeds `jobs` to a fixed pool of workers that each call `play`, and
    /// returns the outcomes in the order they finished.
    pub fn run_with<F>(&self, jobs: Vec<MatchJob>, play: F) -> Vec<MatchOutcome>
    where
        F: Fn(&MatchJob) -> MatchOutcome + Sync,
    {
        let total = jobs.len();
        let workers = self.concurrency.min(total);
        info!("Running {total} matches on {workers} workers");

        let (job_tx, job_rx) = unbounded::<MatchJob>();
        let (result_tx, result_rx) = unbounded::<MatchOutcome>();

        for job in jobs {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let play = &play;
        let mut outcomes = Vec::with_capacity(total);

        thread::scope(|s| {
            for worker_id in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move || {
                    for job in job_rx.iter() {
                        debug!("Worker {worker_id} starting game #{}", job.id);
                        if result_tx.send(play(&job)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for outcome in result_rx.iter() {
                outcomes.push(outcome);
                self.progress(outcomes.len() as u64, total as u64);
            }
        });

        outcomes
    }

    fn progress(&self, done: u64, total: u64) {
        match self.report_interval {
            Some(interval) if interval > 0 && done % interval == 0 && done < total => {
                info!("{done}/{total} matches complete");
            }
            _ => debug!("{done}/{total} matches complete"),
        }
    }
}
