//! Declarative construction of tracker trees.
//!
//! A tracker configuration is a YAML document describing a tree of nodes:
//!
//! ```yaml
//! type: composite
//! policy: sequential        # or "refine"
//! trackers:
//!   - type: icp             # any registered primitive tracker
//!     params: "levels=rrbb,minstep=1e-4"
//!   - type: import          # splice in another document
//!     name: relocalising_backup.yaml
//! ```
//!
//! Primitive tracker kinds are registered with the factory at startup; the
//! names `composite` and `import` are reserved.

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::system::settings::SlamSettings;
use crate::tracking::composite::{CompositePolicy, NodeId, TrackerNode, TrackerTree};
use crate::tracking::frame::ImageSize;
use crate::tracking::tracker::Tracker;

const COMPOSITE_TYPE: &str = "composite";
const IMPORT_TYPE: &str = "import";

/// Errors raised while building a tracker from its configuration.
#[derive(Error, Debug)]
pub enum TrackerConfigError {
    #[error("malformed tracker configuration '{document}': {source}")]
    Malformed {
        document: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown tracker type '{0}'")]
    UnknownTrackerType(String),
    #[error("unknown composite policy '{0}' (expected 'sequential' or 'refine')")]
    UnknownPolicy(String),
    #[error("composite tracker has no children")]
    EmptyComposite,
    #[error("import node is missing the 'name' attribute")]
    MissingImportName,
    #[error("cannot load tracker configuration '{name}': {reason}")]
    Import { name: String, reason: String },
    #[error("cannot construct tracker of type '{kind}': {reason}")]
    Construction { kind: String, reason: String },
    #[error("configuration contains {count} trackers that can report tracking loss; at most one is supported")]
    MultipleFallibleTrackers { count: usize },
}

/// One node of a tracker configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trackers: Vec<TrackerSpec>,
}

impl TrackerSpec {
    pub fn parse(document: &str, text: &str) -> Result<Self, TrackerConfigError> {
        serde_yaml::from_str(text).map_err(|source| TrackerConfigError::Malformed {
            document: document.to_string(),
            source,
        })
    }
}

/// Shared low-level services handed to primitive tracker builders.
///
/// The handles are opaque to the factory; builders downcast the ones they use.
#[derive(Clone, Default)]
pub struct TrackerServices {
    pub low_level_engine: Option<Arc<dyn Any + Send + Sync>>,
    pub imu_calibrator: Option<Arc<dyn Any + Send + Sync>>,
    pub settings: Arc<SlamSettings>,
    pub mapping_server: Option<Arc<dyn Any + Send + Sync>>,
}

/// Everything that is fixed for one scene while its tracker is built.
#[derive(Clone)]
pub struct TrackerBuildContext {
    pub scene_id: String,
    pub track_surfels: bool,
    pub rgb_image_size: ImageSize,
    pub depth_image_size: ImageSize,
    pub services: TrackerServices,
}

/// Arguments passed to a primitive tracker builder.
pub struct PrimitiveTrackerArgs<'a> {
    /// Opaque parameter string from the `params` attribute.
    pub params: &'a str,
    /// True if the tracker will end up inside a composite.
    pub nested: bool,
    pub context: &'a TrackerBuildContext,
}

pub type TrackerBuilder =
    Box<dyn Fn(&PrimitiveTrackerArgs<'_>) -> Result<Box<dyn Tracker>> + Send + Sync>;

/// Source of tracker configuration documents for `import` nodes.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<String>;
}

/// Loads documents from files below a root directory.
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentLoader for DirectoryLoader {
    fn load(&self, name: &str) -> Result<String> {
        let path = self.root.join(name);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

impl DocumentLoader for HashMap<String, String> {
    fn load(&self, name: &str) -> Result<String> {
        self.get(name)
            .cloned()
            .with_context(|| format!("No document named '{}'", name))
    }
}

/// A built tracker tree and its (unique) fallible descendant, if any.
pub struct BuiltTracker {
    pub tree: TrackerTree,
    pub fallible: Option<NodeId>,
}

/// Builds tracker trees from configuration documents.
#[derive(Default)]
pub struct TrackerFactory {
    builders: HashMap<String, TrackerBuilder>,
    loader: Option<Box<dyn DocumentLoader>>,
}

impl TrackerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loader used to resolve `import` nodes.
    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Register a primitive tracker kind. Re-registering replaces the builder.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&PrimitiveTrackerArgs<'_>) -> Result<Box<dyn Tracker>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Box::new(builder));
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Build a tracker from a configuration document given as a string.
    pub fn make_tracker_from_string(
        &self,
        config: &str,
        context: &TrackerBuildContext,
    ) -> Result<BuiltTracker, TrackerConfigError> {
        let spec = TrackerSpec::parse("<inline>", config)?;
        self.make_tracker_from_spec(&spec, context)
    }

    /// Build a tracker from a named document resolved through the loader.
    pub fn make_tracker_from_document(
        &self,
        name: &str,
        context: &TrackerBuildContext,
    ) -> Result<BuiltTracker, TrackerConfigError> {
        let spec = self.load_spec(name)?;
        self.make_tracker_from_spec(&spec, context)
    }

    pub fn make_tracker_from_spec(
        &self,
        spec: &TrackerSpec,
        context: &TrackerBuildContext,
    ) -> Result<BuiltTracker, TrackerConfigError> {
        let mut nodes = Vec::new();
        let root = self.make_node(spec, context, false, &mut nodes)?;
        let tree = TrackerTree::from_nodes(nodes, root);

        let fallible = tree.fallible_descendants();
        if fallible.len() > 1 {
            return Err(TrackerConfigError::MultipleFallibleTrackers {
                count: fallible.len(),
            });
        }

        debug!(
            scene = %context.scene_id,
            nodes = tree.len(),
            fallible = fallible.len(),
            "Built tracker tree"
        );

        Ok(BuiltTracker {
            tree,
            fallible: fallible.first().copied(),
        })
    }

    fn load_spec(&self, name: &str) -> Result<TrackerSpec, TrackerConfigError> {
        let loader = self.loader.as_ref().ok_or_else(|| TrackerConfigError::Import {
            name: name.to_string(),
            reason: "no document loader configured".to_string(),
        })?;
        let text = loader.load(name).map_err(|err| TrackerConfigError::Import {
            name: name.to_string(),
            reason: format!("{err:#}"),
        })?;
        TrackerSpec::parse(name, &text)
    }

    /// Build `spec` bottom-up into `nodes`, returning the index of its node.
    fn make_node(
        &self,
        spec: &TrackerSpec,
        context: &TrackerBuildContext,
        nested: bool,
        nodes: &mut Vec<TrackerNode>,
    ) -> Result<NodeId, TrackerConfigError> {
        match spec.kind.as_str() {
            COMPOSITE_TYPE => {
                let policy = parse_policy(spec.policy.as_deref())?;
                if spec.trackers.is_empty() {
                    return Err(TrackerConfigError::EmptyComposite);
                }
                let children = spec
                    .trackers
                    .iter()
                    .map(|child| self.make_node(child, context, true, nodes))
                    .collect::<Result<Vec<_>, _>>()?;
                nodes.push(TrackerNode::Composite { policy, children });
                Ok(NodeId(nodes.len() - 1))
            }
            IMPORT_TYPE => {
                let name = spec
                    .name
                    .as_deref()
                    .ok_or(TrackerConfigError::MissingImportName)?;
                let imported = self.load_spec(name)?;
                self.make_node(&imported, context, nested, nodes)
            }
            kind => {
                let builder = self
                    .builders
                    .get(kind)
                    .ok_or_else(|| TrackerConfigError::UnknownTrackerType(kind.to_string()))?;
                let args = PrimitiveTrackerArgs {
                    params: spec.params.as_deref().unwrap_or(""),
                    nested,
                    context,
                };
                let tracker = builder(&args).map_err(|err| TrackerConfigError::Construction {
                    kind: kind.to_string(),
                    reason: format!("{err:#}"),
                })?;
                nodes.push(TrackerNode::Primitive {
                    name: kind.to_string(),
                    tracker,
                });
                Ok(NodeId(nodes.len() - 1))
            }
        }
    }
}

fn parse_policy(policy: Option<&str>) -> Result<CompositePolicy, TrackerConfigError> {
    match policy.unwrap_or("sequential") {
        "sequential" => Ok(CompositePolicy::SequentialFallback),
        "refine" => Ok(CompositePolicy::Refine),
        other => Err(TrackerConfigError::UnknownPolicy(other.to_string())),
    }
}
