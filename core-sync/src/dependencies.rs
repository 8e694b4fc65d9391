//! # Items Dependencies
//!
//! Ordering graph for one pass: a folder must exist before its children are
//! created, and a folder may only be deleted after its children are gone.
//!
//! ## Protocol
//!
//! 1. Producers [`register`](ItemsDependencies::register) every triplet
//!    they emit and record its parent with
//!    [`add_item_dependence`](ItemsDependencies::add_item_dependence).
//! 2. A worker calls [`try_acquire`](ItemsDependencies::try_acquire) with
//!    the ordering its action needs. A deferred item is parked by the
//!    caller and handed back later through a `woken` list.
//! 3. After the operation (success or failure) the worker calls
//!    [`complete`](ItemsDependencies::complete) and runs whatever it wakes.
//!
//! Every item is handed out exactly once: whoever flips a node from
//! deferred to running owns it.
//!
//! ## Synchronization
//!
//! Nodes live in a [`DashMap`], so unrelated folders never contend on one
//! lock. No map reference is held across an access to another key.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::{debug, error};

/// What an item must wait for before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyOrder {
    /// Creates, updates and moves wait for their parent folder.
    ParentFirst,
    /// Folder deletes wait for all their children.
    ChildrenFirst,
    Unordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum NodeState {
    /// Known only as someone's parent or child; not part of this pass.
    #[default]
    Idle,
    Pending,
    Deferred(DependencyOrder),
    Running,
    Done,
}

#[derive(Debug, Default)]
struct Node {
    state: NodeState,
    parents: HashSet<String>,
    children: HashSet<String>,
}

/// Result of [`ItemsDependencies::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// The caller owns the item and may run it now.
    pub ready: bool,
    /// Other deferred items released as a side effect; the caller owns them.
    pub woken: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ItemsDependencies {
    nodes: DashMap<String, Node>,
}

impl ItemsDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as an item that will be processed in this pass.
    pub fn register(&self, name: &str) {
        let mut node = self.nodes.entry(name.to_string()).or_default();
        if matches!(node.state, NodeState::Idle | NodeState::Done) {
            node.state = NodeState::Pending;
        }
    }

    /// Record that `child` lives in the folder `parent`.
    pub fn add_item_dependence(&self, child: &str, parent: &str) {
        self.nodes
            .entry(child.to_string())
            .or_default()
            .parents
            .insert(parent.to_string());
        self.nodes
            .entry(parent.to_string())
            .or_default()
            .children
            .insert(child.to_string());
    }

    /// Try to take ownership of `name` for running.
    pub fn try_acquire(&self, name: &str, order: DependencyOrder) -> Acquisition {
        if self.blockers(name, order).is_empty() {
            self.nodes.entry(name.to_string()).or_default().state = NodeState::Running;
            return Acquisition {
                ready: true,
                woken: Vec::new(),
            };
        }

        self.nodes.entry(name.to_string()).or_default().state = NodeState::Deferred(order);

        // A neighbour waiting on us may be released by our deferral: a
        // create waiting on a folder that now waits for its children.
        let woken = self.wake_neighbours(name);

        let blockers = self.blockers(name, order);
        let ready = blockers.is_empty()
            && self.transition(name, NodeState::Deferred(order), NodeState::Running);
        if !ready {
            debug!(item = name, ?order, ?blockers, "Deferred until dependencies complete");
        }

        Acquisition { ready, woken }
    }

    /// Mark `name` finished and return the deferred items it releases.
    pub fn complete(&self, name: &str) -> Vec<String> {
        if let Some(mut node) = self.nodes.get_mut(name) {
            node.state = NodeState::Done;
        }
        self.wake_neighbours(name)
    }

    /// Drop `name` from the pass without running it.
    pub fn forget(&self, name: &str) -> Vec<String> {
        if let Some(mut node) = self.nodes.get_mut(name) {
            node.state = NodeState::Idle;
        }
        self.wake_neighbours(name)
    }

    /// Release every item still deferred. Only called once producers and
    /// workers are done; anything left here waited on an item that never
    /// ran.
    pub fn release_deferred(&self) -> Vec<String> {
        let deferred: Vec<(String, NodeState)> = self
            .nodes
            .iter()
            .filter(|entry| matches!(entry.value().state, NodeState::Deferred(_)))
            .map(|entry| (entry.key().clone(), entry.value().state))
            .collect();

        let mut released = Vec::with_capacity(deferred.len());
        for (name, state) in deferred {
            if self.transition(&name, state, NodeState::Running) {
                error!(item = %name, "Dependency never completed; releasing deferred item");
                released.push(name);
            }
        }
        released
    }

    pub fn is_deferred(&self, name: &str) -> bool {
        matches!(self.state_of(name), NodeState::Deferred(_))
    }

    pub fn is_done(&self, name: &str) -> bool {
        self.state_of(name) == NodeState::Done
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }

    // ------------------------------------------------------------------------

    fn state_of(&self, name: &str) -> NodeState {
        self.nodes
            .get(name)
            .map(|node| node.state)
            .unwrap_or_default()
    }

    fn neighbours(&self, name: &str) -> (Vec<String>, Vec<String>) {
        self.nodes
            .get(name)
            .map(|node| {
                (
                    node.parents.iter().cloned().collect(),
                    node.children.iter().cloned().collect(),
                )
            })
            .unwrap_or_default()
    }

    fn blockers(&self, name: &str, order: DependencyOrder) -> Vec<String> {
        let (parents, children) = self.neighbours(name);
        match order {
            DependencyOrder::ParentFirst => parents
                .into_iter()
                .filter(|parent| {
                    matches!(
                        self.state_of(parent),
                        NodeState::Pending
                            | NodeState::Running
                            | NodeState::Deferred(DependencyOrder::ParentFirst)
                    )
                })
                .collect(),
            DependencyOrder::ChildrenFirst => children
                .into_iter()
                .filter(|child| {
                    matches!(
                        self.state_of(child),
                        NodeState::Pending | NodeState::Running | NodeState::Deferred(_)
                    )
                })
                .collect(),
            DependencyOrder::Unordered => Vec::new(),
        }
    }

    fn wake_neighbours(&self, name: &str) -> Vec<String> {
        let (parents, children) = self.neighbours(name);
        let mut woken = Vec::new();
        for neighbour in parents.into_iter().chain(children) {
            if let NodeState::Deferred(order) = self.state_of(&neighbour) {
                if self.blockers(&neighbour, order).is_empty()
                    && self.transition(&neighbour, NodeState::Deferred(order), NodeState::Running)
                {
                    woken.push(neighbour);
                }
            }
        }
        woken
    }

    /// Compare-and-set on one node's state.
    fn transition(&self, name: &str, from: NodeState, to: NodeState) -> bool {
        match self.nodes.get_mut(name) {
            Some(mut node) if node.state == from => {
                node.state = to;
                true
            }
            _ => false,
        }
    }
}
