#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use ml_core::{BoundingBox, ClassTable, Detection, Detector, DetectorError};
use video_ingest::{CaptureError, DualResolution, Frame, FrameSource, Resolution};

pub const LOW: Resolution = Resolution::new(40, 30);
pub const FULL: Resolution = Resolution::new(80, 60);

/// Ordered record of lifecycle calls across mocks.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<&'static str>>>);

impl EventLog {
    pub fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

pub struct MockSource {
    resolutions: DualResolution,
    log: EventLog,
    initialized: AtomicBool,
    fail_init: bool,
}

impl MockSource {
    pub fn new(log: EventLog) -> Self {
        Self {
            resolutions: DualResolution { full: FULL, low: LOW },
            log,
            initialized: AtomicBool::new(false),
            fail_init: false,
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail_init: true,
            ..Self::new(log)
        }
    }
}

impl FrameSource for MockSource {
    fn name(&self) -> &str {
        "mock-source"
    }

    fn resolutions(&self) -> DualResolution {
        self.resolutions
    }

    fn initialize(&self) -> Result<(), CaptureError> {
        self.log.push("source.initialize");
        if self.fail_init {
            return Err(CaptureError::Open {
                uri: "mock://broken".into(),
            });
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn capture_low_res(&self) -> Result<Option<Frame>, CaptureError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(CaptureError::NotInitialised);
        }
        thread::sleep(Duration::from_millis(1));
        Ok(Some(Frame::filled(LOW.width, LOW.height, [0, 0, 0])))
    }

    fn capture_full_res(&self) -> Result<Option<Frame>, CaptureError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(CaptureError::NotInitialised);
        }
        thread::sleep(Duration::from_millis(2));
        Ok(Some(Frame::filled(FULL.width, FULL.height, [0, 0, 0])))
    }

    fn release(&self) {
        self.log.push("source.release");
        self.initialized.store(false, Ordering::SeqCst);
    }
}

type Script = Box<dyn FnMut(usize) -> Result<Vec<Detection>, DetectorError> + Send>;

pub struct MockDetector {
    log: EventLog,
    calls: Arc<AtomicUsize>,
    delay: Duration,
    script: Script,
}

impl MockDetector {
    pub fn new(
        log: EventLog,
        script: impl FnMut(usize) -> Result<Vec<Detection>, DetectorError> + Send + 'static,
    ) -> Self {
        Self {
            log,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            script: Box::new(script),
        }
    }

    pub fn empty(log: EventLog) -> Self {
        Self::new(log, |_| Ok(Vec::new()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Detector for MockDetector {
    fn name(&self) -> &str {
        "mock-detector"
    }

    fn input_size(&self) -> (i32, i32) {
        (LOW.width, LOW.height)
    }

    fn run(&mut self, _rgb: &[u8], _w: i32, _h: i32) -> Result<Vec<Detection>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        (self.script)(call)
    }

    fn release(&mut self) {
        self.log.push("detector.release");
    }
}

pub fn detection(class_id: usize, confidence: f32, bbox: BoundingBox) -> Detection {
    Detection::new(class_id, confidence, bbox, &ClassTable::default())
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
