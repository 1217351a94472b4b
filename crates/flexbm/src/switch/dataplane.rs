//! Packet worker pool.
//!
//! Packets are dispatched to a worker by ingress port, so packets of one
//! port are processed in arrival order. Each worker loads the context's
//! active generation once per packet.

use super::{Generation, Switch, SwitchError};
use crate::config::DataplaneConfig;
use crate::packet::Packet;
use crate::pipeline::{PipelineError, Step};
use crate::{debug_log, info_log, warn_log};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum DataplaneError {
    #[error("Dataplane is stopped")]
    Stopped,

    #[error(transparent)]
    Switch(#[from] SwitchError),
}

/// Result of running one packet.
#[derive(Debug, Clone)]
pub struct PacketOutcome {
    pub packet: Packet,
    /// Generation the packet ran against.
    pub generation: u64,
    pub steps: Vec<Step>,
    pub error: Option<PipelineError>,
}

impl PacketOutcome {
    /// Runs `packet` through every pipeline of `generation`. A pipeline
    /// error drops the packet.
    pub(crate) fn run(generation: &Generation, mut packet: Packet) -> Self {
        match generation.objects().process(&mut packet) {
            Ok(steps) => Self {
                packet,
                generation: generation.number(),
                steps,
                error: None,
            },
            Err(e) => {
                warn_log!(
                    "Dataplane",
                    generation = generation.number(),
                    ingress_port = packet.ingress_port(),
                    error = %e,
                    "Packet dropped"
                );
                packet.mark_to_drop();
                Self {
                    packet,
                    generation: generation.number(),
                    steps: Vec::new(),
                    error: Some(e),
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DataplaneStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl DataplaneStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &PacketOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.packet.is_dropped() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.error.is_some() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct Job {
    packet: Packet,
    reply: Option<oneshot::Sender<PacketOutcome>>,
}

pub struct Dataplane {
    queues: Vec<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<DataplaneStats>,
}

impl Dataplane {
    /// Spawns the worker tasks on the current tokio runtime.
    pub fn start(
        switch: Arc<Switch>,
        cxt: usize,
        config: &DataplaneConfig,
    ) -> Result<Self, DataplaneError> {
        switch.active(cxt)?;

        let stats = Arc::new(DataplaneStats::default());
        let count = config.workers.max(1);
        let mut queues = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for worker in 0..count {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            queues.push(tx);
            workers.push(tokio::spawn(run_worker(
                worker,
                Arc::clone(&switch),
                cxt,
                rx,
                Arc::clone(&stats),
            )));
        }

        info_log!("Dataplane", context = cxt, workers = count, "Dataplane started");
        Ok(Self {
            queues,
            workers,
            stats,
        })
    }

    /// Counters shared with the workers; they stay readable after
    /// [`shutdown`](Self::shutdown).
    pub fn stats(&self) -> Arc<DataplaneStats> {
        Arc::clone(&self.stats)
    }

    fn queue_for(&self, packet: &Packet) -> &mpsc::Sender<Job> {
        &self.queues[usize::from(packet.ingress_port()) % self.queues.len()]
    }

    /// Queues a packet without waiting for its outcome.
    pub async fn inject(&self, packet: Packet) -> Result<(), DataplaneError> {
        self.queue_for(&packet)
            .send(Job {
                packet,
                reply: None,
            })
            .await
            .map_err(|_| DataplaneError::Stopped)
    }

    /// Queues a packet and waits for its outcome.
    pub async fn process(&self, packet: Packet) -> Result<PacketOutcome, DataplaneError> {
        let (reply, outcome) = oneshot::channel();
        self.queue_for(&packet)
            .send(Job {
                packet,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DataplaneError::Stopped)?;
        outcome.await.map_err(|_| DataplaneError::Stopped)
    }

    /// Closes the queues and waits for every worker to drain.
    pub async fn shutdown(self) {
        drop(self.queues);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn_log!("Dataplane", error = %e, "Worker task failed");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    switch: Arc<Switch>,
    cxt: usize,
    mut queue: mpsc::Receiver<Job>,
    stats: Arc<DataplaneStats>,
) {
    while let Some(job) = queue.recv().await {
        let outcome = match switch.process_packet(cxt, job.packet) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn_log!("Dataplane", worker = worker, error = %e, "Packet lost");
                stats.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        stats.record(&outcome);
        if let Some(reply) = job.reply {
            // The caller may have stopped waiting.
            let _ = reply.send(outcome);
        }
    }
    debug_log!("Dataplane", worker = worker, "Worker stopped");
}
