//! Process-wide counters for the error taxonomy of spec.md §7 that isn't
//! already tracked inside `m1090-table::table::Stats` (CPR/suppression
//! outcomes live there, since they need the table's lock anyway). Frame
//! decode failures and publisher ring-full drops are counted here with
//! relaxed atomics, readable by other threads without a lock (§5).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DecodeStats {
    pub bad_crc: AtomicU64,
    pub ambiguous_correction: AtomicU64,
    pub unknown_df: AtomicU64,
    pub bad_altitude: AtomicU64,
    pub bad_squawk: AtomicU64,
    pub short_frame: AtomicU64,
    pub corrected: AtomicU64,
    pub feeder_ring_full: AtomicU64,
    pub source_buffer_dropped: AtomicU64,
}

impl DecodeStats {
    pub fn record_frame_error(&self, error: &m1090_decode::frame::FrameError) {
        use m1090_decode::frame::FrameError;
        let counter = match error {
            FrameError::ShortFrame => &self.short_frame,
            FrameError::BadCrc(_) => &self.bad_crc,
            FrameError::UnknownDf(_) => &self.unknown_df,
            FrameError::BadAltitude => &self.bad_altitude,
            FrameError::BadSquawk => &self.bad_squawk,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%error, "dropped frame");
    }

    pub fn record_ambiguous(&self) {
        self.ambiguous_correction.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrected(&self) {
        self.corrected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feeder_ring_full(&self) {
        self.feeder_ring_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_buffer_dropped(&self) {
        self.source_buffer_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.bad_crc.store(0, Ordering::Relaxed);
        self.ambiguous_correction.store(0, Ordering::Relaxed);
        self.unknown_df.store(0, Ordering::Relaxed);
        self.bad_altitude.store(0, Ordering::Relaxed);
        self.bad_squawk.store(0, Ordering::Relaxed);
        self.short_frame.store(0, Ordering::Relaxed);
        self.corrected.store(0, Ordering::Relaxed);
        self.feeder_ring_full.store(0, Ordering::Relaxed);
        self.source_buffer_dropped.store(0, Ordering::Relaxed);
    }
}
