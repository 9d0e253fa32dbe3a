//! Supervised tree of scheduler threads
//!
//! The tree owns every node: a parent holds an ordered list of child ids,
//! a child holds a non-owning id back to its parent. One OS thread backs
//! each started node. Ordering rules:
//!
//! - a node starts only after its parent is running (top-down start),
//! - a node stops only after all of its children stopped (bottom-up stop),
//!   so no child ever ticks against a parent that already tore down shared
//!   state,
//! - a node that faulted is stopped and detached together with its
//!   subtree; the rest of the tree keeps running.
//!
//! Lifecycle changes are reported as [`ThreadEvent`]s; call
//! [`ThreadTree::supervise`] periodically to drain them and reap faulted
//! subtrees.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::ThreadError;
use crate::event::ThreadEvent;
use crate::runnable::Runnable;
use crate::runner::{self, RunMode, ThreadControl, TickRate};
use crate::state::ThreadState;

/// Capacity of the lifecycle event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Stable identifier of one tree node
///
/// Ids are minted monotonically and never reused, so a stale id held by a
/// caller can only miss, never alias a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ThreadNode {
    name: String,
    rate: TickRate,
    parent: Option<ThreadId>,
    children: Vec<ThreadId>,
    control: Arc<ThreadControl>,
    /// Taken by the OS thread on start
    runnable: Option<Box<dyn Runnable>>,
    join: Option<thread::JoinHandle<()>>,
}

/// The supervised thread tree
pub struct ThreadTree {
    nodes: BTreeMap<ThreadId, ThreadNode>,
    next_id: u64,
    event_tx: Sender<ThreadEvent>,
    event_rx: Receiver<ThreadEvent>,
}

impl ThreadTree {
    /// Create an empty tree
    pub fn new() -> Self {
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            nodes: BTreeMap::new(),
            next_id: 0,
            event_tx,
            event_rx,
        }
    }

    /// Insert an unparented node; attach it with [`ThreadTree::add_child`]
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        rate: TickRate,
        runnable: Box<dyn Runnable>,
    ) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        self.nodes.insert(
            id,
            ThreadNode {
                control: Arc::new(ThreadControl::new(name.clone())),
                name,
                rate,
                parent: None,
                children: Vec::new(),
                runnable: Some(runnable),
                join: None,
            },
        );
        id
    }

    /// Number of nodes currently in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the node exists (it may have been pruned after a fault)
    pub fn contains(&self, id: ThreadId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Current state of a node
    pub fn state(&self, id: ThreadId) -> Option<ThreadState> {
        self.nodes.get(&id).map(|node| node.control.state.get())
    }

    /// Name of a node
    pub fn name(&self, id: ThreadId) -> Option<&str> {
        self.nodes.get(&id).map(|node| node.name.as_str())
    }

    /// Children of a node, in insertion order
    pub fn children(&self, id: ThreadId) -> Option<&[ThreadId]> {
        self.nodes.get(&id).map(|node| node.children.as_slice())
    }

    /// Parent of a node, if attached
    pub fn parent_of(&self, id: ThreadId) -> Option<ThreadId> {
        self.nodes.get(&id).and_then(|node| node.parent)
    }

    /// Attach `child` beneath `parent`
    ///
    /// Fails if the child is already parented elsewhere or the attachment
    /// would make a node its own ancestor.
    pub fn add_child(&mut self, parent: ThreadId, child: ThreadId) -> Result<(), ThreadError> {
        if !self.nodes.contains_key(&parent) {
            return Err(ThreadError::NotFound(parent));
        }
        let current_parent = self
            .nodes
            .get(&child)
            .ok_or(ThreadError::NotFound(child))?
            .parent;
        if let Some(existing) = current_parent {
            if existing == parent {
                return Ok(());
            }
            return Err(ThreadError::AlreadyParented {
                child,
                parent: existing,
            });
        }

        // Walk up from the parent; reaching `child` means a cycle
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(ThreadError::WouldCycle { parent, child });
            }
            cursor = self.nodes.get(&id).and_then(|node| node.parent);
        }

        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        Ok(())
    }

    /// Detach `child` from `parent`
    ///
    /// The child must not be running; stop it first.
    pub fn remove_child(&mut self, parent: ThreadId, child: ThreadId) -> Result<(), ThreadError> {
        if !self.nodes.contains_key(&parent) {
            return Err(ThreadError::NotFound(parent));
        }
        let child_node = self.nodes.get(&child).ok_or(ThreadError::NotFound(child))?;
        if child_node.parent != Some(parent) {
            return Err(ThreadError::NotAChild { parent, child });
        }
        match child_node.control.state.get() {
            ThreadState::Running | ThreadState::Stopping => {
                return Err(ThreadError::StillRunning(child));
            }
            ThreadState::Initial | ThreadState::Stopped => {}
        }

        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|id| *id != child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = None;
        }
        Ok(())
    }

    /// Start a node, then all of its not-yet-started descendants (top-down)
    pub fn start(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let node = self.nodes.get(&id).ok_or(ThreadError::NotFound(id))?;
        if let Some(parent_id) = node.parent {
            let parent_running = self
                .nodes
                .get(&parent_id)
                .map(|parent| parent.control.state.is_running())
                .unwrap_or(false);
            if !parent_running {
                return Err(ThreadError::ParentNotRunning(parent_id));
            }
        }

        match node.control.state.get() {
            ThreadState::Initial => self.spawn_node(id)?,
            ThreadState::Running => {}
            state @ (ThreadState::Stopping | ThreadState::Stopped) => {
                return Err(ThreadError::InvalidState {
                    thread: id,
                    state: state.name(),
                    operation: "start",
                });
            }
        }

        let children = self
            .nodes
            .get(&id)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        for child in children {
            self.start(child)?;
        }
        Ok(())
    }

    /// Stop a node after stopping its children (bottom-up), joining each
    /// backing OS thread
    pub fn stop(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        if !self.nodes.contains_key(&id) {
            return Err(ThreadError::NotFound(id));
        }
        let children = self
            .nodes
            .get(&id)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        for child in children.iter().rev() {
            self.stop(*child)?;
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            match node.control.state.get() {
                ThreadState::Initial => {
                    // Never spawned; mark it done so it cannot start later
                    node.control.state.force_stopped();
                    let _ = self.event_tx.try_send(ThreadEvent::Stopped {
                        thread: id,
                        name: node.name.clone(),
                    });
                }
                ThreadState::Running => {
                    node.control
                        .state
                        .try_advance(ThreadState::Running, ThreadState::Stopping);
                    Self::join_node(node);
                }
                ThreadState::Stopping | ThreadState::Stopped => {
                    Self::join_node(node);
                }
            }
        }
        Ok(())
    }

    /// Drain lifecycle events and reap faulted subtrees
    ///
    /// A faulted node is stopped together with its descendants, detached
    /// from its parent, and pruned from the tree; a
    /// [`ThreadEvent::Detached`] is appended for each. The returned events
    /// include everything drained since the last call.
    pub fn supervise(&mut self) -> Vec<ThreadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }

        let faulted: Vec<ThreadId> = events
            .iter()
            .filter_map(|event| match event {
                ThreadEvent::Fault { thread, .. } => Some(*thread),
                _ => None,
            })
            .collect();

        for id in faulted {
            let Some(name) = self.nodes.get(&id).map(|node| node.name.clone()) else {
                continue;
            };
            log::warn!("detaching faulted thread '{}' and its subtree", name);
            // The faulted thread already exited; this reaps its handle and
            // stops any children still running beneath it.
            let _ = self.stop(id);
            if let Some(parent_id) = self.nodes.get(&id).and_then(|node| node.parent) {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|child| *child != id);
                }
            }
            self.prune(id);
            events.push(ThreadEvent::Detached { thread: id, name });
        }
        events
    }

    fn spawn_node(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let (rate, parent_id) = {
            let node = self.nodes.get(&id).ok_or(ThreadError::NotFound(id))?;
            (node.rate, node.parent)
        };
        let mode = match rate {
            TickRate::Hz(hz) => RunMode::Hz(hz),
            TickRate::SyncToParent { divisor } => {
                let parent_id = parent_id.ok_or(ThreadError::SyncWithoutParent(id))?;
                let parent = self
                    .nodes
                    .get(&parent_id)
                    .ok_or(ThreadError::NotFound(parent_id))?;
                RunMode::Sync {
                    parent: Arc::clone(&parent.control),
                    divisor,
                }
            }
        };

        let events = self.event_tx.clone();
        let node = self.nodes.get_mut(&id).ok_or(ThreadError::NotFound(id))?;
        let runnable = node.runnable.take().ok_or(ThreadError::InvalidState {
            thread: id,
            state: node.control.state.get().name(),
            operation: "start",
        })?;
        if !node
            .control
            .state
            .try_advance(ThreadState::Initial, ThreadState::Running)
        {
            node.runnable = Some(runnable);
            return Err(ThreadError::InvalidState {
                thread: id,
                state: node.control.state.get().name(),
                operation: "start",
            });
        }

        let control = Arc::clone(&node.control);
        let name = node.name.clone();
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || runner::run(id, control, mode, runnable, events));
        match spawned {
            Ok(handle) => {
                node.join = Some(handle);
                let _ = self.event_tx.try_send(ThreadEvent::Started {
                    thread: id,
                    name: name.clone(),
                });
                log::info!("thread '{}' started", name);
                Ok(())
            }
            Err(err) => {
                node.control.state.force_stopped();
                Err(ThreadError::Spawn(err.to_string()))
            }
        }
    }

    fn join_node(node: &mut ThreadNode) {
        if let Some(handle) = node.join.take() {
            if handle.join().is_err() {
                log::error!("thread '{}' panicked", node.name);
                node.control.state.force_stopped();
            }
        }
    }

    fn prune(&mut self, id: ThreadId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.prune(child);
            }
        }
    }
}

impl Default for ThreadTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadTree {
    fn drop(&mut self) {
        let roots: Vec<ThreadId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        for id in roots {
            let _ = self.stop(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::FatalThreadError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct Counting {
        ticks: Arc<AtomicU64>,
    }

    impl Runnable for Counting {
        fn tick(&mut self) -> Result<(), FatalThreadError> {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct FailsAfter {
        remaining: u64,
    }

    impl Runnable for FailsAfter {
        fn tick(&mut self) -> Result<(), FatalThreadError> {
            if self.remaining == 0 {
                return Err(FatalThreadError::new("simulated fault"));
            }
            self.remaining -= 1;
            Ok(())
        }
    }

    fn counting(ticks: &Arc<AtomicU64>) -> Box<dyn Runnable> {
        Box::new(Counting {
            ticks: Arc::clone(ticks),
        })
    }

    #[test]
    fn test_add_child_rejects_second_parent() {
        let mut tree = ThreadTree::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let a = tree.insert("a", TickRate::Hz(100.0), counting(&ticks));
        let b = tree.insert("b", TickRate::Hz(100.0), counting(&ticks));
        let c = tree.insert("c", TickRate::Hz(100.0), counting(&ticks));

        tree.add_child(a, c).unwrap();
        let err = tree.add_child(b, c).unwrap_err();
        assert!(matches!(err, ThreadError::AlreadyParented { child, .. } if child == c));

        // Re-adding under the same parent is a no-op
        tree.add_child(a, c).unwrap();
        assert_eq!(tree.children(a).unwrap(), &[c]);
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let mut tree = ThreadTree::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let a = tree.insert("a", TickRate::Hz(100.0), counting(&ticks));
        let b = tree.insert("b", TickRate::Hz(100.0), counting(&ticks));

        tree.add_child(a, b).unwrap();
        let err = tree.add_child(b, a).unwrap_err();
        assert!(matches!(err, ThreadError::WouldCycle { .. }));
    }

    #[test]
    fn test_remove_child_requires_stopped() {
        let mut tree = ThreadTree::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let root = tree.insert("root", TickRate::Hz(200.0), counting(&ticks));
        let child = tree.insert("child", TickRate::SyncToParent { divisor: 1 }, counting(&ticks));
        tree.add_child(root, child).unwrap();
        tree.start(root).unwrap();

        let err = tree.remove_child(root, child).unwrap_err();
        assert!(matches!(err, ThreadError::StillRunning(id) if id == child));

        tree.stop(child).unwrap();
        tree.remove_child(root, child).unwrap();
        assert!(tree.children(root).unwrap().is_empty());

        tree.stop(root).unwrap();
    }

    #[test]
    fn test_child_cannot_start_before_parent() {
        let mut tree = ThreadTree::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let root = tree.insert("root", TickRate::Hz(100.0), counting(&ticks));
        let child = tree.insert("child", TickRate::SyncToParent { divisor: 1 }, counting(&ticks));
        tree.add_child(root, child).unwrap();

        let err = tree.start(child).unwrap_err();
        assert!(matches!(err, ThreadError::ParentNotRunning(id) if id == root));
    }

    #[test]
    fn test_start_ticks_parent_and_synced_child() {
        let mut tree = ThreadTree::new();
        let root_ticks = Arc::new(AtomicU64::new(0));
        let child_ticks = Arc::new(AtomicU64::new(0));
        let root = tree.insert("root", TickRate::Hz(500.0), counting(&root_ticks));
        let child = tree.insert("child", TickRate::SyncToParent { divisor: 1 }, counting(&child_ticks));
        tree.add_child(root, child).unwrap();

        tree.start(root).unwrap();
        assert_eq!(tree.state(root), Some(ThreadState::Running));
        assert_eq!(tree.state(child), Some(ThreadState::Running));

        std::thread::sleep(Duration::from_millis(200));
        tree.stop(root).unwrap();

        assert_eq!(tree.state(root), Some(ThreadState::Stopped));
        assert_eq!(tree.state(child), Some(ThreadState::Stopped));
        assert!(root_ticks.load(Ordering::Relaxed) > 0);
        assert!(child_ticks.load(Ordering::Relaxed) > 0);
        // The synced child never ticks more often than its parent
        assert!(child_ticks.load(Ordering::Relaxed) <= root_ticks.load(Ordering::Relaxed) + 1);
    }

    #[test]
    fn test_no_restart_after_stop() {
        let mut tree = ThreadTree::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let root = tree.insert("root", TickRate::Hz(500.0), counting(&ticks));
        tree.start(root).unwrap();
        tree.stop(root).unwrap();

        let err = tree.start(root).unwrap_err();
        assert!(matches!(err, ThreadError::InvalidState { .. }));
    }

    #[test]
    fn test_fault_detaches_subtree_and_parent_survives() {
        let mut tree = ThreadTree::new();
        let root_ticks = Arc::new(AtomicU64::new(0));
        let root = tree.insert("root", TickRate::Hz(500.0), counting(&root_ticks));
        let flaky = tree.insert("flaky", TickRate::Hz(500.0), Box::new(FailsAfter { remaining: 2 }));
        let leaf_ticks = Arc::new(AtomicU64::new(0));
        let leaf = tree.insert("leaf", TickRate::SyncToParent { divisor: 1 }, counting(&leaf_ticks));
        tree.add_child(root, flaky).unwrap();
        tree.add_child(flaky, leaf).unwrap();

        tree.start(root).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let events = tree.supervise();
        let faulted = events
            .iter()
            .any(|event| matches!(event, ThreadEvent::Fault { thread, .. } if *thread == flaky));
        let detached = events
            .iter()
            .any(|event| matches!(event, ThreadEvent::Detached { thread, .. } if *thread == flaky));
        assert!(faulted, "expected a fault event, got {:?}", events);
        assert!(detached, "expected a detach event, got {:?}", events);

        // The faulted subtree is gone, the root keeps running
        assert!(!tree.contains(flaky));
        assert!(!tree.contains(leaf));
        assert_eq!(tree.state(root), Some(ThreadState::Running));
        assert!(tree.children(root).unwrap().is_empty());

        tree.stop(root).unwrap();
    }
}
