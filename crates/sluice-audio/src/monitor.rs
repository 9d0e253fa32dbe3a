//! Real-time monitor feed
//!
//! Frontends never read live graph buffers (they are mutated every
//! cycle); metering goes through copied snapshots instead. The audio loop
//! pushes one [`CycleSnapshot`] per cycle into a wait-free `rtrb` ring -
//! a full ring drops the snapshot rather than stalling the cycle, which
//! is the right trade for metering data that goes stale immediately.

use crate::types::Sample;

/// Strand peaks carried per snapshot
///
/// A fixed array keeps the snapshot `Copy` and allocation-free on the
/// ring; masters wider than this report their first eight strands.
pub const MAX_MONITOR_STRANDS: usize = 8;

/// Capacity of the monitor ring
///
/// At typical cycle rates (~100-400 cycles/s) this buffers a second or
/// two of snapshots for a UI that polls at frame rate.
pub const MONITOR_RING_CAPACITY: usize = 512;

/// One cycle's worth of metering data
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSnapshot {
    /// Cycle counter at capture time
    pub cycle: u64,
    /// Live playback runs this cycle
    pub active_runs: u32,
    /// Valid entries in `master_peaks`
    pub strand_count: u8,
    /// Peak amplitude per master output strand this cycle
    pub master_peaks: [Sample; MAX_MONITOR_STRANDS],
}

/// Create the monitor ring (producer for the audio loop, consumer for the
/// frontend)
pub fn monitor_channel() -> (
    rtrb::Producer<CycleSnapshot>,
    rtrb::Consumer<CycleSnapshot>,
) {
    rtrb::RingBuffer::new(MONITOR_RING_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let (mut tx, mut rx) = monitor_channel();
        let mut snapshot = CycleSnapshot {
            cycle: 42,
            active_runs: 2,
            strand_count: 2,
            ..Default::default()
        };
        snapshot.master_peaks[0] = 0.5;
        tx.push(snapshot).unwrap();

        let read = rx.pop().unwrap();
        assert_eq!(read.cycle, 42);
        assert_eq!(read.active_runs, 2);
        assert_eq!(read.master_peaks[0], 0.5);
    }

    #[test]
    fn test_snapshot_is_small() {
        // One cache line: snapshots are pushed every cycle on the audio
        // thread, so they must stay cheap to copy through the ring
        assert!(std::mem::size_of::<CycleSnapshot>() <= 64);
    }

    #[test]
    fn test_full_ring_rejects_without_blocking() {
        let (mut tx, _rx) = monitor_channel();
        for _ in 0..MONITOR_RING_CAPACITY {
            tx.push(CycleSnapshot::default()).unwrap();
        }
        assert!(tx.push(CycleSnapshot::default()).is_err());
    }
}
