//! EventReporter - Persist and forward safety events
//!
//! ## Responsibilities
//!
//! - Append every reported event to `edge_events`
//! - Forward events to the remote endpoint for their kind
//! - Apply the delivery cooldown (global for falls, per camera otherwise)
//! - Attach a JPEG snapshot to fall events
//!
//! ## Design Principles
//!
//! - `report` never waits on I/O: persistence and delivery run as
//!   tracked background tasks
//! - One delivery attempt per event; failures are logged, not retried

mod types;

pub use types::*;

use crate::capture::encode_jpeg;
use crate::error::{Error, Result};
use crate::policy_store::EventSink;
use base64::Engine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const SNAPSHOT_JPEG_QUALITY: u8 = 85;
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CooldownKey {
    Global(EventKind),
    Camera(EventKind, String),
}

impl CooldownKey {
    fn for_event(event: &SafetyEvent) -> Self {
        match event.kind {
            EventKind::Fall => CooldownKey::Global(event.kind),
            kind => CooldownKey::Camera(kind, event.camera.ip_address.clone()),
        }
    }
}

/// Safety event reporter
pub struct EventReporter {
    settings: ReporterSettings,
    http: reqwest::Client,
    sink: Arc<dyn EventSink>,
    last_delivery: Mutex<HashMap<CooldownKey, Instant>>,
    tasks: TaskTracker,
}

impl EventReporter {
    pub fn new(settings: ReporterSettings, sink: Arc<dyn EventSink>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            settings,
            http,
            sink,
            last_delivery: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
        })
    }

    pub fn settings(&self) -> &ReporterSettings {
        &self.settings
    }

    /// Persist the event and, unless cooling down, dispatch remote delivery.
    /// Returns immediately.
    pub fn report(&self, event: SafetyEvent) -> ReportOutcome {
        let record = event.to_record();
        let sink = self.sink.clone();
        let kind = event.kind;
        self.tasks.spawn(async move {
            if let Err(e) = sink.log_edge_event(&record).await {
                warn!(kind = %kind, error = %e, "Failed to persist edge event");
            }
        });

        let Some(endpoint) = self.settings.endpoint_for(event.kind) else {
            return ReportOutcome::PersistedOnly;
        };

        if !self.try_begin_delivery(&event) {
            debug!(
                kind = %event.kind,
                ip_address = %event.camera.ip_address,
                "Event in cooldown, remote delivery skipped"
            );
            return ReportOutcome::Suppressed;
        }

        let http = self.http.clone();
        let endpoint = endpoint.to_string();
        let settings = self.settings.clone();
        self.tasks.spawn(async move {
            deliver(&http, &endpoint, &settings, event).await;
        });
        ReportOutcome::Dispatched
    }

    /// Claims the cooldown slot for this event. False while cooling down.
    fn try_begin_delivery(&self, event: &SafetyEvent) -> bool {
        let key = CooldownKey::for_event(event);
        let now = Instant::now();
        let mut last = self.last_delivery.lock().unwrap_or_else(|e| e.into_inner());
        match last.get(&key) {
            Some(at) if now.duration_since(*at) < self.settings.cooldown => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }

    /// Number of persistence/delivery tasks still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting work and wait for in-flight tasks, bounded by `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(pending = self.tasks.len(), "Event delivery still pending at shutdown");
        }
    }
}

async fn deliver(http: &reqwest::Client, endpoint: &str, settings: &ReporterSettings, event: SafetyEvent) {
    let kind = event.kind;
    let ip_address = event.camera.ip_address.clone();

    let payload = match build_payload(settings, event).await {
        Ok(p) => p,
        Err(e) => {
            error!(kind = %kind, ip_address = %ip_address, error = %e, "Failed to build event payload");
            return;
        }
    };

    match http.post(endpoint).json(&payload).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                info!(kind = %kind, ip_address = %ip_address, status = %status, "Event delivered");
            } else {
                let body = response.text().await.unwrap_or_default();
                let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
                error!(
                    kind = %kind,
                    ip_address = %ip_address,
                    status = %status,
                    body = %preview,
                    "Event endpoint rejected delivery"
                );
            }
        }
        Err(e) => {
            error!(kind = %kind, ip_address = %ip_address, error = %e, "Event delivery failed");
        }
    }
}

async fn build_payload(settings: &ReporterSettings, event: SafetyEvent) -> Result<RemoteEventPayload> {
    let ipc_name = event.camera.display_name();
    let location = settings
        .location
        .clone()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| ipc_name.clone());

    let mut payload = RemoteEventPayload {
        edge_id: settings.edge_id.clone(),
        ip_address: event.camera.ip_address.clone(),
        ipc_name,
        location,
        event_time: event.event_time(),
        snapshot_base64: None,
        snapshot_mime_type: None,
    };

    let attach = settings.attach_snapshot && event.kind == EventKind::Fall;
    if let (true, Some(image)) = (attach, event.snapshot) {
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&image, SNAPSHOT_JPEG_QUALITY))
            .await
            .map_err(Error::from)??;
        debug!(snapshot_size = jpeg.len(), "Snapshot attached as Base64");
        payload.snapshot_base64 = Some(base64::engine::general_purpose::STANDARD.encode(&jpeg));
        payload.snapshot_mime_type = Some("image/jpeg".to_string());
    }

    Ok(payload)
}
