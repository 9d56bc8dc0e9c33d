//! Tracker trees built by the factory.
//!
//! Nodes live in an index-addressed arena; composites refer to their children
//! by `NodeId`, so the tree has a single owner and no reference cycles.

use crate::tracking::frame::View;
use crate::tracking::state::{TrackingQuality, TrackingState};
use crate::tracking::tracker::Tracker;

/// Index of a node in a `TrackerTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// How a composite combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositePolicy {
    /// Try children in order and keep the first result that did not fail.
    SequentialFallback,
    /// Run children in order, each refining the pose of its predecessor.
    Refine,
}

pub enum TrackerNode {
    Primitive {
        name: String,
        tracker: Box<dyn Tracker>,
    },
    Composite {
        policy: CompositePolicy,
        children: Vec<NodeId>,
    },
}

/// Immutable tree of trackers; the tree itself behaves as a single tracker.
pub struct TrackerTree {
    nodes: Vec<TrackerNode>,
    root: NodeId,
}

impl TrackerTree {
    /// Assemble a tree. Children must be pushed before their parent.
    pub(crate) fn from_nodes(nodes: Vec<TrackerNode>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    /// Tree with a single primitive tracker.
    pub fn single(name: impl Into<String>, tracker: Box<dyn Tracker>) -> Self {
        Self {
            nodes: vec![TrackerNode::Primitive {
                name: name.into(),
                tracker,
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TrackerNode {
        &self.nodes[id.0]
    }

    /// Registered names of the primitive trackers, in depth-first order.
    pub fn primitive_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match &self.nodes[id.0] {
                TrackerNode::Primitive { name, .. } => names.push(name.as_str()),
                TrackerNode::Composite { children, .. } => stack.extend(children.iter().rev().copied()),
            }
        }
        names
    }

    /// Primitive trackers reachable from the root that can report tracking
    /// loss, in depth-first order.
    pub fn fallible_descendants(&self) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match &self.nodes[id.0] {
                TrackerNode::Primitive { tracker, .. } => {
                    if tracker.as_fallible().is_some() {
                        found.push(id);
                    }
                }
                TrackerNode::Composite { children, .. } => {
                    stack.extend(children.iter().rev().copied());
                }
            }
        }
        found
    }

    /// Whether the fallible tracker at `id` currently reports lost tracking.
    ///
    /// Nodes that are not fallible never report loss.
    pub fn lost_tracking(&self, id: NodeId) -> bool {
        match self.nodes.get(id.0) {
            Some(TrackerNode::Primitive { tracker, .. }) => tracker
                .as_fallible()
                .is_some_and(|fallible| fallible.lost_tracking()),
            _ => false,
        }
    }

    fn track_node(&mut self, id: NodeId, state: &mut TrackingState, view: &View) {
        let (policy, children) = match &mut self.nodes[id.0] {
            TrackerNode::Primitive { tracker, .. } => {
                tracker.track(state, view);
                return;
            }
            TrackerNode::Composite { policy, children } => (*policy, children.clone()),
        };

        match policy {
            CompositePolicy::SequentialFallback => {
                let start_pose = state.pose.clone();
                for child in children {
                    state.pose = start_pose.clone();
                    self.track_node(child, state, view);
                    if state.quality != TrackingQuality::Failed {
                        return;
                    }
                }
                state.pose = start_pose;
                state.quality = TrackingQuality::Failed;
            }
            CompositePolicy::Refine => {
                for (i, child) in children.into_iter().enumerate() {
                    let before = state.clone();
                    self.track_node(child, state, view);
                    if state.quality == TrackingQuality::Failed {
                        if i > 0 {
                            *state = before;
                        }
                        return;
                    }
                }
            }
        }
    }

    fn node_requires_point_cloud(&self, id: NodeId) -> bool {
        match &self.nodes[id.0] {
            TrackerNode::Primitive { tracker, .. } => tracker.requires_point_cloud_rendering(),
            TrackerNode::Composite { children, .. } => children
                .iter()
                .any(|&child| self.node_requires_point_cloud(child)),
        }
    }
}

impl Tracker for TrackerTree {
    fn track(&mut self, state: &mut TrackingState, view: &View) {
        self.track_node(self.root, state, view);
    }

    fn requires_point_cloud_rendering(&self) -> bool {
        self.node_requires_point_cloud(self.root)
    }

    fn update_initial_pose(&mut self, state: &mut TrackingState) {
        for node in &mut self.nodes {
            if let TrackerNode::Primitive { tracker, .. } = node {
                tracker.update_initial_pose(state);
            }
        }
    }
}
