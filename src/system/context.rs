//! Process-wide registry of scenes and shared services.
//!
//! Every scene registers its `SlamState` here together with its optional
//! relocaliser, mapping client and fiducial detector. Components share the
//! context through an `Arc` and look scenes up by id.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::geometry::SE3;
use crate::relocalisation::Relocaliser;
use crate::system::engine::{FiducialDetector, MappingClient, MotionCaptureLink};
use crate::system::settings::SlamSettings;
use crate::system::slam_state::SlamState;
use crate::tracking::factory::TrackerFactory;

pub type SharedRelocaliser = Arc<Mutex<Box<dyn Relocaliser>>>;

/// Handles registered for one scene.
#[derive(Clone)]
struct SceneHandles {
    state: Arc<RwLock<SlamState>>,
    relocaliser: Option<SharedRelocaliser>,
    mapping_client: Option<Arc<dyn MappingClient>>,
    fiducial_detector: Option<Arc<dyn FiducialDetector>>,
}

pub struct SlamContext {
    settings: Arc<SlamSettings>,
    tracker_factory: TrackerFactory,
    mapping_server: Option<Arc<dyn Any + Send + Sync>>,
    motion_capture: Option<Arc<dyn MotionCaptureLink>>,
    scenes: RwLock<HashMap<String, SceneHandles>>,
    /// Registration order.
    scene_ids: RwLock<Vec<String>>,
}

impl SlamContext {
    pub fn new(settings: SlamSettings, tracker_factory: TrackerFactory) -> Self {
        Self {
            settings: Arc::new(settings),
            tracker_factory,
            mapping_server: None,
            motion_capture: None,
            scenes: RwLock::new(HashMap::new()),
            scene_ids: RwLock::new(Vec::new()),
        }
    }

    pub fn with_mapping_server(mut self, server: Arc<dyn Any + Send + Sync>) -> Self {
        self.mapping_server = Some(server);
        self
    }

    pub fn with_motion_capture(mut self, link: Arc<dyn MotionCaptureLink>) -> Self {
        self.motion_capture = Some(link);
        self
    }

    pub fn settings(&self) -> &SlamSettings {
        &self.settings
    }

    pub fn shared_settings(&self) -> Arc<SlamSettings> {
        Arc::clone(&self.settings)
    }

    pub fn tracker_factory(&self) -> &TrackerFactory {
        &self.tracker_factory
    }

    pub fn mapping_server(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.mapping_server.clone()
    }

    pub fn motion_capture(&self) -> Option<Arc<dyn MotionCaptureLink>> {
        self.motion_capture.clone()
    }

    /// Register a scene, replacing any previous scene with the same id.
    pub fn add_scene(&self, scene_id: &str, state: SlamState) -> Arc<RwLock<SlamState>> {
        let state = Arc::new(RwLock::new(state));
        self.scenes.write().insert(
            scene_id.to_string(),
            SceneHandles {
                state: Arc::clone(&state),
                relocaliser: None,
                mapping_client: None,
                fiducial_detector: None,
            },
        );

        let mut ids = self.scene_ids.write();
        if !ids.iter().any(|id| id == scene_id) {
            ids.push(scene_id.to_string());
        }
        state
    }

    /// Scene ids in registration order.
    pub fn scene_ids(&self) -> Vec<String> {
        self.scene_ids.read().clone()
    }

    pub fn slam_state(&self, scene_id: &str) -> Option<Arc<RwLock<SlamState>>> {
        self.scenes.read().get(scene_id).map(|h| Arc::clone(&h.state))
    }

    /// Current pose of a scene.
    pub fn pose_of(&self, scene_id: &str) -> Option<SE3> {
        self.slam_state(scene_id).map(|state| state.read().pose().clone())
    }

    pub fn relocaliser(&self, scene_id: &str) -> Option<SharedRelocaliser> {
        self.scenes.read().get(scene_id).and_then(|h| h.relocaliser.clone())
    }

    pub fn set_relocaliser(&self, scene_id: &str, relocaliser: Option<Box<dyn Relocaliser>>) {
        self.update_scene(scene_id, |h| {
            h.relocaliser = relocaliser.map(|r| Arc::new(Mutex::new(r)));
        });
    }

    pub fn mapping_client(&self, scene_id: &str) -> Option<Arc<dyn MappingClient>> {
        self.scenes.read().get(scene_id).and_then(|h| h.mapping_client.clone())
    }

    pub fn set_mapping_client(&self, scene_id: &str, client: Option<Arc<dyn MappingClient>>) {
        self.update_scene(scene_id, |h| h.mapping_client = client);
    }

    pub fn fiducial_detector(&self, scene_id: &str) -> Option<Arc<dyn FiducialDetector>> {
        self.scenes.read().get(scene_id).and_then(|h| h.fiducial_detector.clone())
    }

    pub fn set_fiducial_detector(&self, scene_id: &str, detector: Option<Arc<dyn FiducialDetector>>) {
        self.update_scene(scene_id, |h| h.fiducial_detector = detector);
    }

    /// Apply `f` to a registered scene; unknown ids are ignored.
    fn update_scene(&self, scene_id: &str, f: impl FnOnce(&mut SceneHandles)) {
        if let Some(handles) = self.scenes.write().get_mut(scene_id) {
            f(handles);
        }
    }
}
