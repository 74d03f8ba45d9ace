use crate::stage3::Placements;
use crate::stage4::Batches;

use indicatif::HumanBytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Compilation statistics. Shared between the capture thread and the compiler.
pub struct Stats {
    pub start_time: Instant,
    pub read_frames: AtomicU64,
    pub skipped_frames: AtomicU64,
    pub packets_counter: AtomicU64,
    pub bytes_counter: AtomicU64,
    pub flows_counter: AtomicU64,
    pub batches_counter: AtomicU64,
    pub small_packets: AtomicU64,
    pub large_packets: AtomicU64,
    pub image_bytes: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            start_time: Instant::now(),
            read_frames: AtomicU64::new(0),
            skipped_frames: AtomicU64::new(0),
            packets_counter: AtomicU64::new(0),
            bytes_counter: AtomicU64::new(0),
            flows_counter: AtomicU64::new(0),
            batches_counter: AtomicU64::new(0),
            small_packets: AtomicU64::new(0),
            large_packets: AtomicU64::new(0),
            image_bytes: AtomicU64::new(0),
        }
    }
}

impl Stats {
    pub fn frame_read(&self) {
        self.read_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped(&self) {
        self.skipped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_admitted(&self, len: usize) {
        self.packets_counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_counter.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn set_flows(&self, count: usize) {
        self.flows_counter.store(count as u64, Ordering::Relaxed);
    }

    pub fn set_placements(&self, placements: &Placements) {
        self.small_packets
            .store(placements.small_count() as u64, Ordering::Relaxed);
        self.large_packets
            .store(placements.large_count() as u64, Ordering::Relaxed);
        self.image_bytes
            .store(placements.image_len(), Ordering::Relaxed);
    }

    pub fn set_batches(&self, batches: &Batches) {
        self.batches_counter
            .store(batches.len() as u64, Ordering::Relaxed);
    }

    fn memory_summary(&self) -> String {
        let bc = self.bytes_counter.load(Ordering::Relaxed);
        let btc = self.batches_counter.load(Ordering::Relaxed);
        let sp = self.small_packets.load(Ordering::Relaxed);
        let lp = self.large_packets.load(Ordering::Relaxed);
        let ib = self.image_bytes.load(Ordering::Relaxed);
        format!(
            "{btc} batches, {sp} small and {lp} large packets, {} of packets in a {} image",
            HumanBytes(bc),
            HumanBytes(ib)
        )
    }

    /// Log a summary of the compilation
    pub fn report(&self) {
        let rf = self.read_frames.load(Ordering::Relaxed);
        let sf = self.skipped_frames.load(Ordering::Relaxed);
        let pc = self.packets_counter.load(Ordering::Relaxed);
        let fc = self.flows_counter.load(Ordering::Relaxed);
        log::info!("{rf} frames read ({sf} skipped), {pc} packets in {fc} flows");
        log::info!("{}", self.memory_summary());
        log::info!(
            "Compilation done in {:.2}s",
            self.start_time.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::default();
        stats.frame_read();
        stats.frame_read();
        stats.frame_skipped();
        stats.packet_admitted(60);
        assert_eq!(stats.read_frames.load(Ordering::Relaxed), 2);
        assert_eq!(stats.skipped_frames.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_counter.load(Ordering::Relaxed), 60);
    }

    #[test]
    fn test_memory_summary() {
        let stats = Stats::default();
        stats.packet_admitted(2048);
        stats.image_bytes.store(3 * 1024 * 1024, Ordering::Relaxed);
        let summary = stats.memory_summary();
        assert!(summary.contains(&HumanBytes(2048).to_string()));
        assert!(summary.contains(&HumanBytes(3 * 1024 * 1024).to_string()));
        assert!(summary.starts_with("0 batches, 0 small and 0 large packets"));
    }
}
