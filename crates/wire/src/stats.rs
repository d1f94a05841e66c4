use std::sync::atomic::{AtomicU64, Ordering};

/// Stream counters with atomic fields for lock-free updates.
///
/// Shared via `Arc<WireStats>` between the inbound and outbound tasks of one
/// session.
#[derive(Debug, Default)]
pub struct WireStats {
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    audio_gaps: AtomicU64,
    duplicate_frames: AtomicU64,
    control_received: AtomicU64,
    malformed_control: AtomicU64,
    stale_control: AtomicU64,
    reorder_overflows: AtomicU64,
    frames_sent: AtomicU64,
    control_sent: AtomicU64,
    batches_sent: AtomicU64,
}

impl WireStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    pub fn audio_gaps(&self) -> u64 {
        self.audio_gaps.load(Ordering::Relaxed)
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new total, for rate-limited logging.
    pub(crate) fn record_malformed_frame(&self) -> u64 {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_audio_gap(&self, missing: u32) {
        self.audio_gaps.fetch_add(missing as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate_frame(&self) {
        self.duplicate_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_control_received(&self) {
        self.control_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_control(&self) -> u64 {
        self.malformed_control.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_stale_control(&self) {
        self.stale_control.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reorder_overflow(&self) {
        self.reorder_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_envelope_sent(&self, messages: usize, batched: bool) {
        self.control_sent.fetch_add(messages as u64, Ordering::Relaxed);
        if batched {
            self.batches_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> WireStatsSnapshot {
        WireStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames(),
            audio_gaps: self.audio_gaps(),
            duplicate_frames: self.duplicate_frames.load(Ordering::Relaxed),
            control_received: self.control_received.load(Ordering::Relaxed),
            malformed_control: self.malformed_control.load(Ordering::Relaxed),
            stale_control: self.stale_control.load(Ordering::Relaxed),
            reorder_overflows: self.reorder_overflows.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            control_sent: self.control_sent.load(Ordering::Relaxed),
            batches_sent: self.batches_sent(),
        }
    }
}

/// Snapshot of stream counters for serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WireStatsSnapshot {
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub audio_gaps: u64,
    pub duplicate_frames: u64,
    pub control_received: u64,
    pub malformed_control: u64,
    pub stale_control: u64,
    pub reorder_overflows: u64,
    pub frames_sent: u64,
    pub control_sent: u64,
    pub batches_sent: u64,
}
