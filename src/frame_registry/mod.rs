//! FrameRegistry - Latest annotated frame per stream
//!
//! ## Responsibilities
//!
//! - Hold exactly one live frame per stream identity (last writer wins)
//! - Remove a stream's frame when its worker stops
//! - Hand out snapshots ordered by stream id for composition
//!
//! Readers get `Arc` clones of the images, never copies of pixel data.
//! Every entry remembers the worker that published it, so a worker that
//! is shutting down cannot drop a frame its successor already published.

use image::RgbImage;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// One published frame
#[derive(Debug, Clone)]
pub struct FramePayload {
    pub stream_id: String,
    pub label: String,
    pub image: Arc<RgbImage>,
    /// Capture time, unix milliseconds
    pub captured_at_ms: i64,
    /// Id of the publishing worker
    pub owner: u64,
}

/// Thread-safe latest-frame store
#[derive(Default)]
pub struct FrameRegistry {
    frames: RwLock<BTreeMap<String, FramePayload>>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the frame for `payload.stream_id`
    pub fn publish(&self, payload: FramePayload) {
        let mut frames = self.frames.write().unwrap_or_else(|e| e.into_inner());
        frames.insert(payload.stream_id.clone(), payload);
    }

    /// Drop the frame for `stream_id` if `owner` published it. Returns
    /// whether one was removed.
    pub fn remove(&self, stream_id: &str, owner: u64) -> bool {
        let mut frames = self.frames.write().unwrap_or_else(|e| e.into_inner());
        if frames.get(stream_id).is_some_and(|p| p.owner == owner) {
            frames.remove(stream_id);
            return true;
        }
        false
    }

    /// Copy of all frames, ordered by stream id
    pub fn snapshot(&self) -> Vec<FramePayload> {
        let frames = self.frames.read().unwrap_or_else(|e| e.into_inner());
        frames.values().cloned().collect()
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        let frames = self.frames.read().unwrap_or_else(|e| e.into_inner());
        frames.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.frames.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: u8) -> Arc<RgbImage> {
        Arc::new(RgbImage::from_pixel(4, 4, image::Rgb([v, v, v])))
    }

    fn payload(stream_id: &str, label: &str, v: u8) -> FramePayload {
        FramePayload {
            stream_id: stream_id.to_string(),
            label: label.to_string(),
            image: frame(v),
            captured_at_ms: 1_700_000_000_000 + v as i64,
            owner: 1,
        }
    }

    #[test]
    fn test_publish_overwrites() {
        let registry = FrameRegistry::new();
        registry.publish(payload("cam-a", "A", 1));
        registry.publish(payload("cam-a", "A2", 2));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].label, "A2");
        assert_eq!(snapshot[0].image.get_pixel(0, 0)[0], 2);
        assert_eq!(snapshot[0].captured_at_ms, 1_700_000_000_002);
    }

    #[test]
    fn test_snapshot_order_independent_of_publish_order() {
        let forward = FrameRegistry::new();
        let backward = FrameRegistry::new();
        let ids = ["rtsp://c", "rtsp://a", "rtsp://b"];

        for id in ids {
            forward.publish(payload(id, id, 0));
        }
        for id in ids.iter().rev() {
            backward.publish(payload(id, id, 0));
        }

        let f: Vec<_> = forward.snapshot().into_iter().map(|p| p.stream_id).collect();
        let b: Vec<_> = backward.snapshot().into_iter().map(|p| p.stream_id).collect();
        assert_eq!(f, vec!["rtsp://a", "rtsp://b", "rtsp://c"]);
        assert_eq!(f, b);
    }

    #[test]
    fn test_remove() {
        let registry = FrameRegistry::new();
        registry.publish(payload("cam-a", "A", 1));
        assert!(registry.remove("cam-a", 1));
        assert!(!registry.remove("cam-a", 1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_keeps_successor_frame() {
        let registry = FrameRegistry::new();
        registry.publish(payload("cam-a", "old", 1));
        registry.publish(FramePayload {
            owner: 2,
            ..payload("cam-a", "new", 2)
        });

        // The previous worker finishing its shutdown must not drop the new frame
        assert!(!registry.remove("cam-a", 1));
        assert!(registry.contains("cam-a"));
        assert_eq!(registry.snapshot()[0].label, "new");

        assert!(registry.remove("cam-a", 2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_publishers_keep_one_entry_each() {
        let registry = Arc::new(FrameRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..50u8 {
                        registry.publish(payload(&format!("cam-{}", i), "label", n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 4);
    }
}
