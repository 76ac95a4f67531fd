//! StreamCoordinator - Mirror the connected camera list onto StreamWorkers
//!
//! ## Responsibilities
//!
//! - Start a worker for every newly connected camera
//! - Push changed configuration into running workers
//! - Stop and forget workers whose camera disappeared
//! - Periodic reconciliation against PolicySource
//!
//! ## Design Principles
//!
//! - Workers are keyed by camera IP address
//! - Stopping happens outside the map lock, so a slow camera never stalls
//!   reconciliation of the others

use crate::capture::redact_credentials;
use crate::policy_store::{CameraConfig, PolicySource};
use crate::stream_worker::{StreamWorker, WorkerContext, WorkerState};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What one `sync` pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub updated: Vec<String>,
    pub stopped: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.updated.is_empty() && self.stopped.is_empty()
    }
}

/// Status row for one running worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub ip_address: String,
    pub label: String,
    pub stream: String,
    pub state: WorkerState,
    pub fall_detection_enabled: bool,
}

pub struct StreamCoordinator {
    ctx: WorkerContext,
    workers: Mutex<HashMap<String, Arc<StreamWorker>>>,
}

impl StreamCoordinator {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile running workers with the desired camera set
    pub async fn sync(&self, desired: Vec<CameraConfig>) -> SyncReport {
        let mut report = SyncReport::default();
        let removed: Vec<Arc<StreamWorker>>;

        {
            let mut workers = self.workers.lock().await;
            let mut seen = HashSet::new();

            for camera in desired {
                let key = camera.ip_address.clone();
                if !seen.insert(key.clone()) {
                    warn!(ip_address = %key, "Duplicate camera row ignored");
                    continue;
                }

                match workers.get(&key) {
                    None => {
                        info!(
                            ip_address = %key,
                            name = %camera.display_name(),
                            stream = %redact_credentials(&camera.stream_url()),
                            "Discovered new stream"
                        );
                        let worker = Arc::new(StreamWorker::new(camera, self.ctx.clone()));
                        worker.start();
                        workers.insert(key.clone(), worker);
                        report.started.push(key);
                    }
                    Some(worker) => {
                        if worker.camera() != camera {
                            info!(
                                ip_address = %key,
                                name = %camera.display_name(),
                                "Updating stream configuration"
                            );
                            worker.update_stream(camera);
                            report.updated.push(key);
                        }
                    }
                }
            }

            let gone: Vec<String> = workers
                .keys()
                .filter(|key| !seen.contains(*key))
                .cloned()
                .collect();
            removed = gone
                .into_iter()
                .filter_map(|key| {
                    let worker = workers.remove(&key)?;
                    info!(ip_address = %key, "Removing stream");
                    report.stopped.push(key);
                    Some(worker)
                })
                .collect();
        }

        join_all(removed.iter().map(|worker| worker.stop())).await;
        report
    }

    /// Stop every worker and clear the map. Idempotent.
    pub async fn shutdown(&self) {
        let workers: Vec<Arc<StreamWorker>> = {
            let mut map = self.workers.lock().await;
            map.drain().map(|(_, worker)| worker).collect()
        };
        if workers.is_empty() {
            return;
        }
        info!(count = workers.len(), "Stopping stream workers");
        join_all(workers.iter().map(|worker| worker.stop())).await;
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Snapshot of running workers, sorted by IP address
    pub async fn status(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.lock().await;
        let mut rows: Vec<WorkerStatus> = workers
            .iter()
            .map(|(ip, worker)| {
                let camera = worker.camera();
                WorkerStatus {
                    ip_address: ip.clone(),
                    label: camera.display_label(),
                    stream: redact_credentials(&camera.stream_url()),
                    state: worker.state(),
                    fall_detection_enabled: camera.fall_detection_enabled,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
        rows
    }

    /// Poll the camera list every `interval` until cancelled.
    ///
    /// A failed fetch leaves the running workers untouched.
    pub async fn run_reconcile_loop(
        self: Arc<Self>,
        policies: Arc<dyn PolicySource>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match policies.fetch_cameras().await {
                Ok(cameras) => {
                    let report = self.sync(cameras).await;
                    if !report.is_noop() {
                        info!(
                            started = report.started.len(),
                            updated = report.updated.len(),
                            stopped = report.stopped.len(),
                            "Streams reconciled"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to refresh streams");
                }
            }
        }

        info!("Reconcile loop stopped");
    }
}
