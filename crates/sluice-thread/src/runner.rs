//! Per-node OS thread loop
//!
//! Two cadence modes exist:
//!
//! - [`TickRate::Hz`]: the node owns its clock and ticks on a deadline
//!   schedule. This is the mode for loops that stand in for an external
//!   clock (the audio loop runs at `sample_rate / buffer_size` cycles per
//!   second, the cadence a device callback would impose).
//! - [`TickRate::SyncToParent`]: the node blocks until its parent
//!   publishes a new tick generation and then runs its own tick - the
//!   "parent ticks its children in insertion order" composition. The wait
//!   carries a timeout so a stop request is observed even when the parent
//!   has already gone quiet.
//!
//! Overruns never double-tick: when a tick takes longer than the period
//! the next deadline is re-anchored to now instead of burning CPU to
//! catch up.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use crate::event::ThreadEvent;
use crate::runnable::Runnable;
use crate::state::{StateCell, ThreadState};
use crate::tree::ThreadId;

/// Slowest tick rate accepted for self-timed nodes
const MIN_HZ: f64 = 0.01;

/// Stop requests are checked at least this often while sleeping or waiting
const STOP_POLL: Duration = Duration::from_millis(50);

/// Cadence of one tree node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickRate {
    /// Self-timed: tick this many times per second
    Hz(f64),
    /// Tick on every `divisor`-th completed parent tick
    SyncToParent { divisor: u32 },
}

/// Monotonic tick counter with wakeup for parent-synced children
pub(crate) struct TickSignal {
    generation: Mutex<u64>,
    advanced: Condvar,
}

impl TickSignal {
    pub(crate) fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            advanced: Condvar::new(),
        }
    }

    /// Current generation
    pub(crate) fn current(&self) -> u64 {
        *lock_recovering(&self.generation)
    }

    /// Publish completion of one tick and wake waiting children
    pub(crate) fn publish(&self) {
        let mut generation = lock_recovering(&self.generation);
        *generation += 1;
        self.advanced.notify_all();
    }

    /// Wait until the generation moves past `last_seen`
    ///
    /// Returns the new generation, or `None` on timeout so the caller can
    /// re-check its stop flag.
    pub(crate) fn wait_past(&self, last_seen: u64, timeout: Duration) -> Option<u64> {
        let guard = lock_recovering(&self.generation);
        let result = self
            .advanced
            .wait_timeout_while(guard, timeout, |generation| *generation <= last_seen);
        match result {
            Ok((guard, _)) if *guard > last_seen => Some(*guard),
            _ => None,
        }
    }
}

/// Recover the inner guard even if a holder panicked
fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State shared between the supervisor and one node's OS thread
pub(crate) struct ThreadControl {
    pub(crate) name: String,
    pub(crate) state: StateCell,
    pub(crate) signal: TickSignal,
}

impl ThreadControl {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            state: StateCell::new(),
            signal: TickSignal::new(),
        }
    }
}

/// Resolved cadence handed to the spawned thread
pub(crate) enum RunMode {
    Hz(f64),
    Sync {
        parent: Arc<ThreadControl>,
        divisor: u32,
    },
}

/// Body of every tree-node OS thread
pub(crate) fn run(
    id: ThreadId,
    control: Arc<ThreadControl>,
    mode: RunMode,
    mut runnable: Box<dyn Runnable>,
    events: Sender<ThreadEvent>,
) {
    log::debug!("thread '{}' entering run loop", control.name);

    let faulted = match runnable.setup() {
        Ok(()) => match mode {
            RunMode::Hz(hz) => run_timed(&control, hz, runnable.as_mut(), &events, id),
            RunMode::Sync { parent, divisor } => {
                run_synced(&control, &parent, divisor, runnable.as_mut(), &events, id)
            }
        },
        Err(err) => {
            report_fault(&control, &events, id, &err.to_string());
            true
        }
    };

    runnable.teardown();
    control.state.force_stopped();

    if !faulted {
        let _ = events.try_send(ThreadEvent::Stopped {
            thread: id,
            name: control.name.clone(),
        });
        log::info!("thread '{}' stopped", control.name);
    }
}

/// Self-timed loop; returns whether the node faulted
fn run_timed(
    control: &ThreadControl,
    hz: f64,
    runnable: &mut dyn Runnable,
    events: &Sender<ThreadEvent>,
    id: ThreadId,
) -> bool {
    let period = Duration::from_secs_f64(1.0 / hz.max(MIN_HZ));
    let mut deadline = Instant::now() + period;

    while control.state.is_running() {
        if let Err(err) = runnable.tick() {
            report_fault(control, events, id, &err.to_string());
            return true;
        }
        control.signal.publish();

        let now = Instant::now();
        if deadline > now {
            sleep_observing_stop(control, deadline - now);
            deadline += period;
        } else {
            // Overrun: re-anchor instead of ticking back-to-back
            deadline = now + period;
        }
    }
    false
}

/// Parent-synced loop; returns whether the node faulted
fn run_synced(
    control: &ThreadControl,
    parent: &ThreadControl,
    divisor: u32,
    runnable: &mut dyn Runnable,
    events: &Sender<ThreadEvent>,
    id: ThreadId,
) -> bool {
    let divisor = u64::from(divisor.max(1));
    let mut last_seen = parent.signal.current();

    while control.state.is_running() {
        let Some(generation) = parent.signal.wait_past(last_seen, STOP_POLL) else {
            continue;
        };
        last_seen = generation;

        if generation % divisor != 0 {
            continue;
        }
        if let Err(err) = runnable.tick() {
            report_fault(control, events, id, &err.to_string());
            return true;
        }
        control.signal.publish();
    }
    false
}

/// Sleep in short slices so a stop request never waits a full period
fn sleep_observing_stop(control: &ThreadControl, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !control.state.is_running() {
            return;
        }
        let slice = remaining.min(STOP_POLL);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

fn report_fault(control: &ThreadControl, events: &Sender<ThreadEvent>, id: ThreadId, message: &str) {
    log::error!("thread '{}' faulted: {}", control.name, message);
    let _ = events.try_send(ThreadEvent::Fault {
        thread: id,
        name: control.name.clone(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_signal_publish_and_wait() {
        let signal = Arc::new(TickSignal::new());
        assert_eq!(signal.current(), 0);

        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || waiter.wait_past(0, Duration::from_secs(2)));

        // Give the waiter a moment to park, then publish
        thread::sleep(Duration::from_millis(20));
        signal.publish();

        assert_eq!(handle.join().unwrap(), Some(1));
    }

    #[test]
    fn test_tick_signal_wait_times_out() {
        let signal = TickSignal::new();
        assert_eq!(signal.wait_past(0, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wait_past_returns_immediately_when_already_past() {
        let signal = TickSignal::new();
        signal.publish();
        signal.publish();
        assert_eq!(signal.wait_past(0, Duration::from_millis(10)), Some(2));
    }
}
