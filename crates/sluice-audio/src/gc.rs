//! RT-safe deferred release of frame buffers
//!
//! Runtime audio signals are released at cycle boundaries on the audio
//! loop thread. Freeing a large frame buffer there would run the
//! allocator (and possibly munmap) inside the real-time cycle, so signal
//! buffers are `basedrop` allocations instead: dropping one on the audio
//! thread only enqueues a pointer, and the actual deallocation happens on
//! a dedicated collector thread where latency does not matter.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Interval between collection sweeps on the GC thread
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Global handle for creating deferred-drop allocations
///
/// Initialized once; the owning Collector lives on the GC thread.
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Initialize the global collector and return a handle
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("signal-gc".to_string())
        .spawn(move || {
            // The Collector is !Sync, so it is created on its own thread
            let mut collector = Collector::new();

            let handle = collector.handle();
            if tx.send(handle).is_err() {
                log::error!("signal-gc: handle receiver vanished before startup");
                return;
            }

            log::info!("signal-gc thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("failed to spawn signal-gc thread");

    rx.recv().expect("failed to receive gc handle")
}

/// Get a handle for creating deferred-drop allocations
///
/// The handle is lightweight and can be cloned freely; the first call
/// starts the collector thread.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Owned;

    #[test]
    fn test_deferred_drop_does_not_block() {
        let handle = gc_handle();
        let buffer = Owned::new(&handle, vec![0.0f32; 4096]);
        assert_eq!(buffer.len(), 4096);
        // Dropping here only enqueues; the collector thread reclaims later
        drop(buffer);
    }
}
