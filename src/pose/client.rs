//! HTTP pose engine client
//!
//! Talks to a pose server that keeps one tracker per session:
//!
//! - `POST /v1/sessions` opens a session
//! - `POST /v1/sessions/{id}/track` runs detection + tracking on one JPEG
//! - `DELETE /v1/sessions/{id}` releases it

use super::{PoseEngine, PoseSession, TrackedPose};
use crate::capture::encode_jpeg;
use crate::error::{Error, Result};
use crate::geometry::{Point, Rect, Skeleton};
use async_trait::async_trait;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// COCO class id for "person"
const PERSON_CLASS: i64 = 0;
const UPLOAD_JPEG_QUALITY: u8 = 85;

/// Pose engine settings
#[derive(Debug, Clone)]
pub struct PoseEngineSettings {
    pub base_url: String,
    pub confidence: f64,
    pub image_size: u32,
    pub timeout: Duration,
}

/// Carries the camera address only; stream credentials stay on the edge
#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    camera: &'a str,
    conf: f64,
    imgsz: u32,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

/// Track response
#[derive(Debug, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub detections: Vec<WireDetection>,
}

/// One detection as sent by the server
#[derive(Debug, Deserialize)]
pub struct WireDetection {
    pub track_id: Option<i64>,
    pub class_id: Option<i64>,
    /// x1, y1, x2, y2 in pixels
    pub bbox: [f64; 4],
    #[serde(default)]
    pub keypoints: Vec<[f64; 2]>,
}

/// Adapt server detections to the tracked-pose contract.
///
/// Non-person classes are dropped; detections without a tracker id use
/// their index in the response.
pub fn adapt_detections(response: TrackResponse) -> Vec<TrackedPose> {
    response
        .detections
        .into_iter()
        .enumerate()
        .filter(|(_, d)| d.class_id.map_or(true, |c| c == PERSON_CLASS))
        .map(|(idx, d)| {
            let points: Vec<Point> = d.keypoints.iter().map(|[x, y]| Point::new(*x, *y)).collect();
            TrackedPose {
                track_id: d.track_id.unwrap_or(idx as i64),
                bbox: Rect {
                    x_min: d.bbox[0],
                    y_min: d.bbox[1],
                    x_max: d.bbox[2],
                    y_max: d.bbox[3],
                },
                skeleton: Skeleton::from_points(&points),
            }
        })
        .collect()
}

/// Pose engine reached over HTTP
#[derive(Clone)]
pub struct HttpPoseEngine {
    client: reqwest::Client,
    settings: PoseEngineSettings,
}

impl HttpPoseEngine {
    pub fn new(settings: PoseEngineSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, settings })
    }

    /// Check pose server health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.settings.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl PoseEngine for HttpPoseEngine {
    async fn open_session(&self, camera: &str) -> Result<Box<dyn PoseSession>> {
        let url = format!("{}/v1/sessions", self.settings.base_url);
        let request = CreateSessionRequest {
            camera,
            conf: self.settings.confidence,
            imgsz: self.settings.image_size,
        };
        let resp = self.client.post(&url).json(&request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "open session failed: {} - {}",
                status, body
            )));
        }

        let created: CreateSessionResponse = resp.json().await?;
        tracing::debug!(camera, session_id = %created.session_id, "Pose session opened");

        Ok(Box::new(HttpPoseSession {
            client: self.client.clone(),
            base_url: self.settings.base_url.clone(),
            session_id: created.session_id,
            closed: false,
        }))
    }
}

struct HttpPoseSession {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    closed: bool,
}

impl HttpPoseSession {
    fn session_url(&self) -> String {
        format!("{}/v1/sessions/{}", self.base_url, self.session_id)
    }
}

#[async_trait]
impl PoseSession for HttpPoseSession {
    async fn track(&mut self, frame: Arc<RgbImage>) -> Result<Vec<TrackedPose>> {
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame, UPLOAD_JPEG_QUALITY)).await??;
        let form = Form::new().part(
            "image",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self
            .client
            .post(format!("{}/track", self.session_url()))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Inference(format!("track failed: {} - {}", status, body)));
        }

        let response: TrackResponse = resp.json().await?;
        Ok(adapt_detections(response))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.client.delete(self.session_url()).send().await {
            tracing::debug!(session_id = %self.session_id, error = %e, "Pose session close failed");
        }
    }
}

impl Drop for HttpPoseSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Dropped without close (task aborted): release in the background
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let request = self.client.delete(self.session_url());
            handle.spawn(async move {
                let _ = request.send().await;
            });
        }
    }
}
