// Batch runner: a bounded pool of scoped worker threads over a shared queue

use std::collections::VecDeque;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread;
use uuid::Uuid;

use super::core::{ConversionPipeline, FailureStage, FileJob, FileOutcome, JobStatus};
use super::process::is_interrupted;
use crate::stats::RunStats;

/// Message from worker to main thread
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// Job started converting
    JobStarted { job_id: Uuid, worker_id: usize },

    /// Job reached a terminal outcome
    JobFinished {
        index: usize,
        outcome: FileOutcome,
        input_bytes: u64,
        output_bytes: u64,
    },

    /// Worker found the queue empty and exited
    WorkerIdle { worker_id: usize },
}

/// Convert every job, at most `max_workers` at a time. Jobs already marked
/// Skipped are counted without running. Returns the jobs in their original
/// order with their final status, paired with their outcomes.
pub fn run_batch<F>(
    pipeline: &ConversionPipeline<'_>,
    jobs: Vec<FileJob>,
    max_workers: usize,
    stats: &RunStats,
    mut on_outcome: F,
) -> Vec<(FileJob, FileOutcome)>
where
    F: FnMut(&FileJob, &FileOutcome),
{
    let mut results: Vec<Option<FileOutcome>> = vec![None; jobs.len()];
    let mut queue = VecDeque::new();

    for (index, job) in jobs.iter().enumerate() {
        if job.status == JobStatus::Skipped {
            let outcome = FileOutcome::Skipped {
                reason: job
                    .skip_reason
                    .clone()
                    .unwrap_or_else(|| "skipped".to_string()),
            };
            stats.record(&outcome, 0, 0);
            on_outcome(job, &outcome);
            results[index] = Some(outcome);
        } else {
            queue.push_back(index);
        }
    }

    let worker_count = max_workers.max(1).min(queue.len());
    let queue = Mutex::new(queue);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let tx = tx.clone();
            let queue = &queue;
            let jobs = &jobs;
            scope.spawn(move || worker_loop(worker_id, pipeline, jobs, queue, tx));
        }
        // Only worker senders remain, so the loop ends when the last one exits
        drop(tx);

        for message in rx {
            match message {
                WorkerMessage::JobStarted { job_id, worker_id } => {
                    tracing::debug!(%job_id, worker_id, "job started");
                }
                WorkerMessage::JobFinished {
                    index,
                    outcome,
                    input_bytes,
                    output_bytes,
                } => {
                    stats.record(&outcome, input_bytes, output_bytes);
                    on_outcome(&jobs[index], &outcome);
                    results[index] = Some(outcome);
                }
                WorkerMessage::WorkerIdle { worker_id } => {
                    tracing::debug!(worker_id, "worker idle");
                }
            }
        }
    });

    jobs.into_iter()
        .zip(results)
        .map(|(mut job, outcome)| {
            // Every queued job reports back unless its worker died outside catch_unwind
            let outcome = outcome.unwrap_or_else(|| FileOutcome::Failed {
                stage: FailureStage::Panic,
                error: "worker exited without a result".to_string(),
            });
            job.status = outcome.status();
            (job, outcome)
        })
        .collect()
}

fn worker_loop(
    worker_id: usize,
    pipeline: &ConversionPipeline<'_>,
    jobs: &[FileJob],
    queue: &Mutex<VecDeque<usize>>,
    tx: Sender<WorkerMessage>,
) {
    loop {
        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some(index) = next else { break };
        let job = &jobs[index];

        if is_interrupted() {
            let _ = tx.send(WorkerMessage::JobFinished {
                index,
                outcome: FileOutcome::Skipped {
                    reason: "interrupted".to_string(),
                },
                input_bytes: 0,
                output_bytes: 0,
            });
            continue;
        }

        let _ = tx.send(WorkerMessage::JobStarted {
            job_id: job.id,
            worker_id,
        });

        // Measured up front: replace mode deletes the input
        let input_bytes = fs::metadata(&job.input_path).map(|m| m.len()).unwrap_or(0);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process_file(job)))
            .unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(file = %job.display_name(), %message, "conversion panicked");
                FileOutcome::Failed {
                    stage: FailureStage::Panic,
                    error: message,
                }
            });

        let output_bytes = match &outcome {
            FileOutcome::Converted { output_path, .. } => {
                fs::metadata(output_path).map(|m| m.len()).unwrap_or(0)
            }
            _ => 0,
        };

        let _ = tx.send(WorkerMessage::JobFinished {
            index,
            outcome,
            input_bytes,
            output_bytes,
        });
    }

    let _ = tx.send(WorkerMessage::WorkerIdle { worker_id });
}
