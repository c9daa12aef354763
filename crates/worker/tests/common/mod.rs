#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vidflow_bus::{HeartbeatEvent, MemoryBus};
use vidflow_core::backoff::BackoffConfig;
use vidflow_core::detection::Detection;
use vidflow_core::lifecycle::JobAction;
use vidflow_storage::MemoryStore;
use vidflow_worker::detection::{DetectionError, Detector};
use vidflow_worker::local_store::MemoryLocalJobStore;
use vidflow_worker::processor::{ProcessingContext, ProcessorSettings};

/// Detector double. Frames are identified by their bytes, which for
/// [`MemoryStore::add_frames`] are `jpeg-<index>`.
#[derive(Default)]
pub struct FakeDetector {
    delay: Mutex<Duration>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl FakeDetector {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Fail the next `times` calls for frame `index`.
    pub fn fail(&self, index: usize, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("jpeg-{index}"), times);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, index: usize) -> usize {
        let frame = format!("jpeg-{index}");
        self.calls().iter().filter(|c| **c == frame).count()
    }
}

#[async_trait]
impl Detector for FakeDetector {
    async fn detect(&self, frame: Vec<u8>) -> Result<Vec<Detection>, DetectionError> {
        let frame = String::from_utf8_lossy(&frame).to_string();
        self.calls.lock().unwrap().push(frame.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&frame) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if failing {
            return Err(DetectionError::Service {
                status: 500,
                body: "injected".into(),
            });
        }

        Ok(vec![Detection {
            class_name: "person".into(),
            score: 0.5,
            bbox: [0.0, 0.0, 1.0, 1.0],
        }])
    }
}

/// In-memory collaborators wired into a [`ProcessingContext`].
pub struct Harness {
    pub store: MemoryStore,
    pub bus: MemoryBus,
    pub local: MemoryLocalJobStore,
    pub detector: Arc<FakeDetector>,
    pub ctx: Arc<ProcessingContext>,
}

pub fn fast_settings() -> ProcessorSettings {
    ProcessorSettings {
        heartbeat_interval: Duration::from_millis(50),
        max_attempts: 3,
        max_in_flight: 1,
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: ProcessorSettings) -> Self {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let local = MemoryLocalJobStore::new();
        let detector = Arc::new(FakeDetector::default());
        let ctx = Arc::new(ProcessingContext {
            frames: Arc::new(store.clone()),
            results: Arc::new(store.clone()),
            detector: detector.clone(),
            heartbeats: Arc::new(bus.clone()),
            local: Arc::new(local.clone()),
            settings,
        });
        Self {
            store,
            bus,
            local,
            detector,
            ctx,
        }
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatEvent> {
        self.bus.published_as::<HeartbeatEvent>()
    }

    pub fn heartbeats_with(&self, action: JobAction) -> Vec<HeartbeatEvent> {
        self.heartbeats()
            .into_iter()
            .filter(|h| h.action == action)
            .collect()
    }
}

/// Poll `check` until it holds, failing the test after `timeout`.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
