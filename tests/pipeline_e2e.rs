//! Camera table to remote delivery, with fake capture and pose engines

mod common;

use common::*;
use edge_vision::detectors::FallMetrics;
use edge_vision::event_reporter::{EventReporter, ReportOutcome, SafetyEvent};
use edge_vision::frame_registry::FrameRegistry;
use edge_vision::geometry::Point;
use edge_vision::stream_coordinator::StreamCoordinator;
use edge_vision::stream_worker::WorkerState;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;

fn left_half() -> Vec<Point> {
    vec![
        Point::new(0.5, 1.0),
        Point::new(0.0, 0.0),
        Point::new(0.5, 0.0),
        Point::new(0.0, 1.0),
    ]
}

#[tokio::test]
async fn test_subject_leaving_bed_zone_is_reported_once() {
    let endpoint = EventEndpoint::start().await;
    let sink = Arc::new(MemorySink::default());
    let mut settings = reporter_settings();
    settings.bed_exit_endpoint = Some(endpoint.url.clone());
    let reporter = Arc::new(EventReporter::new(settings, sink.clone()).unwrap());

    let cam = camera("192.168.1.20");
    let policies = Arc::new(StaticPolicies::default());
    *policies.zone.lock().unwrap() = Some(all_day_zone(&cam.ip_address, left_half()));

    // Box spans x 490..570: 12.5% of it overlaps the bed zone
    let pose = FixedPoseEngine { poses: vec![standing(7, 530.0, 300.0)] };
    let registry = Arc::new(FrameRegistry::new());
    let coordinator = StreamCoordinator::new(worker_context(
        policies,
        pose,
        reporter.clone(),
        registry.clone(),
    ));

    let report = coordinator.sync(vec![cam.clone()]).await;
    assert_eq!(report.started, vec![cam.ip_address.clone()]);

    assert!(eventually(Duration::from_secs(5), || endpoint.count() >= 1).await);
    // Frames keep triggering; the per-camera cooldown holds delivery at one
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(endpoint.count(), 1);

    let types = sink.event_types();
    assert!(types.len() > 1);
    assert!(types.iter().all(|t| t == "夜間離床"));

    let body = endpoint.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["edge_id"], "RED-TEST0001");
    assert_eq!(body["ip_address"], "192.168.1.20");
    assert_eq!(body["ipc_name"], "Room 101");
    assert!(body.get("snapshot_base64").is_none());

    let record = sink.records.lock().unwrap()[0].clone();
    let stream_url = record.payload["stream_url"].as_str().unwrap().to_string();
    assert!(!stream_url.contains("secret"));

    let status = coordinator.status().await;
    assert_eq!(status[0].state, WorkerState::Streaming);
    assert_eq!(status[0].label, "Room 101");
    assert!(registry.contains(&cam.stream_url()));

    coordinator.shutdown().await;
    assert!(registry.is_empty());
    reporter.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_subject_inside_bed_zone_is_quiet() {
    let sink = Arc::new(MemorySink::default());
    let reporter = Arc::new(EventReporter::new(reporter_settings(), sink.clone()).unwrap());

    let cam = camera("192.168.1.21");
    let policies = Arc::new(StaticPolicies::default());
    *policies.zone.lock().unwrap() = Some(all_day_zone(&cam.ip_address, left_half()));

    let pose = FixedPoseEngine { poses: vec![standing(1, 200.0, 300.0)] };
    let registry = Arc::new(FrameRegistry::new());
    let coordinator = StreamCoordinator::new(worker_context(
        policies,
        pose,
        reporter.clone(),
        registry.clone(),
    ));
    coordinator.sync(vec![cam.clone()]).await;

    assert!(eventually(Duration::from_secs(5), || registry.contains(&cam.stream_url())).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    coordinator.shutdown().await;
    reporter.shutdown(Duration::from_secs(2)).await;
    assert!(sink.event_types().is_empty());
}

#[tokio::test]
async fn test_two_falls_within_cooldown_deliver_once() {
    let endpoint = EventEndpoint::start().await;
    let sink = Arc::new(MemorySink::default());
    let mut settings = reporter_settings();
    settings.fall_endpoint = Some(endpoint.url.clone());
    let reporter = EventReporter::new(settings, sink.clone()).unwrap();

    let metrics = FallMetrics {
        tilt_deg: 75.0,
        height_ratio: 1.4,
        angular_velocity: 150.0,
        box_height_ratio: 0.4,
        box_height_rate: -1.2,
    };
    let snapshot = Arc::new(RgbImage::from_pixel(64, 48, image::Rgb([200, 30, 30])));
    let cam = camera("192.168.1.30");

    let first = SafetyEvent::fall(&cam, 4, &metrics, Some(snapshot.clone()));
    let second = SafetyEvent::fall(&cam, 4, &metrics, Some(snapshot));
    assert_eq!(reporter.report(first), ReportOutcome::Dispatched);
    assert_eq!(reporter.report(second), ReportOutcome::Suppressed);

    reporter.shutdown(Duration::from_secs(5)).await;
    assert_eq!(endpoint.count(), 1);
    assert_eq!(sink.event_types(), vec!["跌倒".to_string(), "跌倒".to_string()]);

    let body = endpoint.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["snapshot_mime_type"], "image/jpeg");
    assert!(body["snapshot_base64"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(body["location"], "Room 101");
}

#[tokio::test]
async fn test_remote_failure_does_not_block_persistence() {
    let sink = Arc::new(MemorySink::default());
    let mut settings = reporter_settings();
    settings.timeout = Duration::from_millis(300);
    settings.fall_endpoint = Some("http://127.0.0.1:9/unreachable".to_string());
    let reporter = EventReporter::new(settings, sink.clone()).unwrap();

    let metrics = FallMetrics {
        tilt_deg: 80.0,
        height_ratio: 1.5,
        angular_velocity: 200.0,
        box_height_ratio: 0.5,
        box_height_rate: -1.0,
    };
    let started = tokio::time::Instant::now();
    reporter.report(SafetyEvent::fall(&camera("192.168.1.31"), 1, &metrics, None));
    assert!(started.elapsed() < Duration::from_millis(100));

    reporter.shutdown(Duration::from_secs(5)).await;
    assert_eq!(sink.event_types().len(), 1);
}
