//! Per-scene tracking, relocalisation and fusion loop.
//!
//! Each call to `SlamComponent::process_frame` handles one frame:
//! 1. Read the frame and build the view (optionally masking depth for tracking)
//! 2. Track, or copy the pose of a mirrored scene
//! 3. Apply the failure mode (relocalise, downgrade, or ignore)
//! 4. Fuse, refresh visibility, or roll the pose back
//! 5. Prepare rendering for the next frame and run the fiducial hooks

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::relocalisation::{RelocalisationQuality, Relocaliser};
use crate::system::context::SlamContext;
use crate::system::engine::{
    DenseMapper, ImageSource, MappingClient, MappingMode, RgbdCalibrationMessage, RgbdFrameMessage,
    SurfelMapper, TrackingMode, ViewBuilder,
};
use crate::system::fusion_gate::FusionGate;
use crate::system::persistence::{self, CALIBRATION_FILE, SETTINGS_FILE};
use crate::system::settings::{FailureMode, SlamComponentSettings};
use crate::system::slam_state::{InputStatus, SlamState};
use crate::tracking::composite::{NodeId, TrackerTree};
use crate::tracking::factory::{TrackerBuildContext, TrackerServices};
use crate::tracking::frame::View;
use crate::tracking::state::{TrackingQuality, TrackingState};
use crate::tracking::tracker::Tracker;

/// Scene-specific construction parameters.
#[derive(Debug, Clone)]
pub struct SlamComponentConfig {
    pub scene_id: String,
    /// YAML tracker configuration document.
    pub tracker_config: String,
    pub mapping_mode: MappingMode,
    pub tracking_mode: TrackingMode,
    pub detect_fiducials: bool,
}

impl SlamComponentConfig {
    pub fn new(scene_id: impl Into<String>, tracker_config: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            tracker_config: tracker_config.into(),
            mapping_mode: MappingMode::default(),
            tracking_mode: TrackingMode::default(),
            detect_fiducials: false,
        }
    }
}

/// Engines owned by one scene.
pub struct SlamEngines {
    pub view_builder: Box<dyn ViewBuilder>,
    pub voxel_mapper: Box<dyn DenseMapper>,
    /// Required when mapping or tracking surfels.
    pub surfel_mapper: Option<Box<dyn SurfelMapper>>,
}

pub struct SlamComponent {
    context: Arc<SlamContext>,
    scene_id: String,
    state: Arc<RwLock<SlamState>>,
    image_source: Box<dyn ImageSource>,
    view_builder: Box<dyn ViewBuilder>,
    voxel_mapper: Box<dyn DenseMapper>,
    surfel_mapper: Option<Box<dyn SurfelMapper>>,
    tracker: TrackerTree,
    fallible_tracker: Option<NodeId>,
    mapping_mode: MappingMode,
    tracking_mode: TrackingMode,
    detect_fiducials: bool,
    mirror_scene_id: Option<String>,
    gate: FusionGate,
    failure_mode: FailureMode,
    options: SlamComponentSettings,
}

impl SlamComponent {
    /// Set up a scene: build its tracker, register it with the context and
    /// reset it.
    pub fn new(
        context: Arc<SlamContext>,
        config: SlamComponentConfig,
        image_source: Box<dyn ImageSource>,
        engines: SlamEngines,
        relocaliser: Option<Box<dyn Relocaliser>>,
    ) -> Result<Self> {
        let SlamComponentConfig {
            scene_id,
            tracker_config,
            mapping_mode,
            tracking_mode,
            detect_fiducials,
        } = config;

        let needs_surfels = mapping_mode == MappingMode::VoxelsAndSurfels || tracking_mode == TrackingMode::Surfels;
        if needs_surfels && engines.surfel_mapper.is_none() {
            bail!("Scene '{}' maps or tracks surfels but has no surfel mapper", scene_id);
        }
        if tracking_mode == TrackingMode::Surfels && mapping_mode == MappingMode::VoxelsOnly {
            bail!("Scene '{}' tracks surfels but does not map them", scene_id);
        }

        let rgb_size = image_source.rgb_image_size();
        let depth_size = image_source.depth_image_size().unwrap_or(rgb_size);

        let build_context = TrackerBuildContext {
            scene_id: scene_id.clone(),
            track_surfels: tracking_mode == TrackingMode::Surfels,
            rgb_image_size: rgb_size,
            depth_image_size: depth_size,
            services: TrackerServices {
                settings: context.shared_settings(),
                mapping_server: context.mapping_server(),
                ..Default::default()
            },
        };
        let built = context
            .tracker_factory()
            .make_tracker_from_string(&tracker_config, &build_context)
            .with_context(|| format!("Failed to build tracker for scene '{}'", scene_id))?;

        let state = context.add_scene(&scene_id, SlamState::new(rgb_size, depth_size));
        context.set_relocaliser(&scene_id, relocaliser);

        let settings = context.settings();
        let gate = FusionGate::new(settings.initial_frames_to_fuse);
        let failure_mode = settings.failure_mode;
        let options = settings.slam_component.clone();

        let mut component = Self {
            context,
            scene_id,
            state,
            image_source,
            view_builder: engines.view_builder,
            voxel_mapper: engines.voxel_mapper,
            surfel_mapper: engines.surfel_mapper,
            tracker: built.tree,
            fallible_tracker: built.fallible,
            mapping_mode,
            tracking_mode,
            detect_fiducials,
            mirror_scene_id: None,
            gate,
            failure_mode,
            options,
        };

        component.reset_scene();
        component
            .tracker
            .update_initial_pose(&mut component.state.write().tracking_state);

        info!(
            scene = %component.scene_id,
            trackers = ?component.tracker.primitive_names(),
            rgb = ?rgb_size,
            depth = ?depth_size,
            ?failure_mode,
            "SLAM component ready"
        );
        Ok(component)
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn state(&self) -> Arc<RwLock<SlamState>> {
        Arc::clone(&self.state)
    }

    pub fn fusion_enabled(&self) -> bool {
        self.gate.enabled()
    }

    pub fn set_fusion_enabled(&mut self, enabled: bool) {
        self.gate.set_enabled(enabled);
    }

    pub fn fused_frames(&self) -> usize {
        self.gate.fused_frames()
    }

    pub fn set_detect_fiducials(&mut self, detect: bool) {
        self.detect_fiducials = detect;
    }

    /// Copy the pose of another scene every frame instead of tracking.
    pub fn mirror_pose_of(&mut self, scene_id: impl Into<String>) {
        self.mirror_scene_id = Some(scene_id.into());
    }

    /// Attach (or detach) a remote mapping client. A newly attached client is
    /// sent the camera calibration straight away.
    pub fn set_mapping_client(&self, client: Option<Arc<dyn MappingClient>>) -> Result<()> {
        self.context.set_mapping_client(&self.scene_id, client.clone());
        if let Some(client) = client {
            info!(scene = %self.scene_id, "Sending calibration message");
            client.send_calibration(&RgbdCalibrationMessage {
                calib: self.image_source.calibration(),
            })?;
        }
        Ok(())
    }

    /// Process the next frame, if any. Returns true iff a frame was processed.
    pub fn process_frame(&mut self) -> Result<bool> {
        if !self.image_source.has_images_now() {
            self.update_input_status_without_frame();
            return Ok(false);
        }

        let mirrored_pose = match &self.mirror_scene_id {
            Some(id) => Some(
                self.context
                    .pose_of(id)
                    .with_context(|| format!("Mirrored scene '{}' is not registered", id))?,
            ),
            None => None,
        };

        let state_handle = Arc::clone(&self.state);
        let mut guard = state_handle.write();
        let state = &mut *guard;
        state.input_status = InputStatus::Active;

        self.image_source
            .get_images(&mut state.input_rgb, &mut state.input_raw_depth)?;
        let use_bilateral_filter = self.tracking_mode == TrackingMode::Surfels;
        let mut view = self
            .view_builder
            .update_view(&state.input_rgb, &state.input_raw_depth, use_bilateral_filter)?;

        let unmasked_depth = match &state.input_mask {
            Some(mask) => {
                let original = view.apply_depth_mask(mask);
                if original.is_none() {
                    warn!(scene = %self.scene_id, "Input mask size does not match depth image; ignoring it");
                }
                original
            }
            None => None,
        };

        let frame_start_pose = state.tracking_state.pose.clone();
        match mirrored_pose {
            Some(pose) => {
                state.tracking_state.pose = pose;
                state.tracking_state.quality = TrackingQuality::Good;
            }
            None => self.tracker.track(&mut state.tracking_state, &view),
        }

        if let Some(depth) = unmasked_depth {
            view.restore_depth(depth);
        }

        let raw_quality = state.tracking_state.quality;
        match self.failure_mode {
            FailureMode::Relocalise => self.process_relocalisation(&mut state.tracking_state, &view)?,
            FailureMode::StopIntegration => {
                if state.tracking_state.quality == TrackingQuality::Failed {
                    state.tracking_state.quality = TrackingQuality::Poor;
                }
            }
            FailureMode::Ignore => state.tracking_state.quality = TrackingQuality::Good,
        }
        let quality = state.tracking_state.quality;

        let tracker_lost = self
            .fallible_tracker
            .is_some_and(|id| self.tracker.lost_tracking(id));
        let run_fusion = self.gate.should_fuse(quality, tracker_lost);
        let reset_visible_list = !self.tracker.requires_point_cloud_rendering();

        debug!(
            scene = %self.scene_id,
            ?raw_quality,
            ?quality,
            tracker_lost,
            run_fusion,
            "Frame tracked"
        );

        if run_fusion {
            self.voxel_mapper
                .process_frame(&view, &state.tracking_state, reset_visible_list)?;
            if let Some(surfels) = self.surfel_mapper.as_mut() {
                if self.mapping_mode == MappingMode::VoxelsAndSurfels {
                    surfels.process_frame(&view, &state.tracking_state)?;
                }
            }
            self.stream_frame(state);
            self.gate.record_fused();
        } else if quality != TrackingQuality::Failed {
            self.voxel_mapper
                .update_visible_list(&view, &state.tracking_state, reset_visible_list)?;
        } else {
            state.tracking_state.pose = frame_start_pose;
        }

        self.prepare_for_tracking(&view, &state.tracking_state)?;

        if self.image_source.current_sequence_exhausted() && !self.context.settings().uses_global_poses() {
            info!(scene = %self.scene_id, "Input sequence exhausted; disabling fusion");
            self.gate.set_enabled(false);
        }

        if state.tracking_state.quality == TrackingQuality::Good {
            self.run_fiducial_hooks(state, &view);
        }

        state.view = Some(view);
        Ok(true)
    }

    /// Reset the maps, tracking state, relocaliser and counters.
    pub fn reset_scene(&mut self) {
        self.voxel_mapper.reset_scene();
        if let Some(surfels) = self.surfel_mapper.as_mut() {
            surfels.reset_scene();
        }
        {
            let mut state = self.state.write();
            state.tracking_state.reset();
            state.clear_fiducials();
        }
        if let Some(relocaliser) = self.context.relocaliser(&self.scene_id) {
            relocaliser.lock().reset();
        }
        self.gate.reset();
        info!(scene = %self.scene_id, "Scene reset");
    }

    /// Load a map and relocaliser saved with `save_models`.
    ///
    /// Tracking is marked failed and fusion disabled afterwards, since the
    /// camera's position in the loaded map is unknown.
    pub fn load_models(&mut self, dir: &Path) -> Result<()> {
        self.reset_scene();

        self.voxel_mapper.load_from_directory(dir)?;
        if let Some(relocaliser) = self.context.relocaliser(&self.scene_id) {
            relocaliser.lock().load_from_disk(dir)?;
        }

        {
            let mut state = self.state.write();
            state.clear_input_images();
            let view = self
                .view_builder
                .update_view(&state.input_rgb, &state.input_raw_depth, false)?;
            state.view = Some(view);
            state.tracking_state.quality = TrackingQuality::Failed;
        }
        self.gate.set_enabled(false);

        info!(scene = %self.scene_id, dir = ?dir, "Loaded models");
        Ok(())
    }

    /// Save calibration, settings, map and relocaliser below `dir`.
    /// Does nothing before the first frame has been processed.
    pub fn save_models(&self, dir: &Path) -> Result<()> {
        let state = self.state.read();
        let Some(view) = state.view.as_ref() else {
            debug!(scene = %self.scene_id, "Nothing to save yet");
            return Ok(());
        };

        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        persistence::write_rgbd_calibration(&dir.join(CALIBRATION_FILE), &view.calib)?;

        let settings = self.context.settings();
        persistence::write_settings_ini(
            &dir.join(SETTINGS_FILE),
            &settings.relocaliser_type,
            &settings.scene_params,
        )?;

        self.voxel_mapper.save_to_directory(dir)?;
        if let Some(relocaliser) = self.context.relocaliser(&self.scene_id) {
            relocaliser.lock().save_to_disk(dir)?;
        }

        info!(scene = %self.scene_id, dir = ?dir, "Saved models");
        Ok(())
    }

    fn update_input_status_without_frame(&mut self) {
        let status = if self.image_source.has_more_images() {
            InputStatus::Idle
        } else {
            InputStatus::Terminated
        };

        let mut state = self.state.write();
        if self.options.finish_training_enabled
            && status == InputStatus::Terminated
            && state.input_status != InputStatus::Terminated
        {
            if let Some(relocaliser) = self.context.relocaliser(&self.scene_id) {
                relocaliser.lock().finish_training();
            }
        }
        state.input_status = status;
    }

    /// Train, update and (when needed) query the relocaliser for this frame.
    fn process_relocalisation(&mut self, tracking: &mut TrackingState, view: &View) -> Result<()> {
        let Some(relocaliser) = self.context.relocaliser(&self.scene_id) else {
            return Ok(());
        };
        let mut relocaliser = relocaliser.lock();

        let observed_pose = tracking.pose.clone();
        let every_frame = self.options.relocalise_every_frame;
        let intrinsics = view.depth_intrinsics();

        let perform_training = every_frame
            || (tracking.quality == TrackingQuality::Good
                && self.gate.take_training_turn(self.options.relocaliser_training_skip));

        if !perform_training {
            relocaliser.update()?;
        }

        if every_frame || tracking.quality == TrackingQuality::Failed {
            let results = relocaliser.relocalise(&view.rgb, &view.depth, intrinsics)?;
            match results.first() {
                Some(best) => {
                    tracking.pose = best.pose.clone();
                    tracking.quality = match best.quality {
                        RelocalisationQuality::Good => TrackingQuality::Good,
                        RelocalisationQuality::Poor => TrackingQuality::Poor,
                    };
                    info!(scene = %self.scene_id, quality = ?best.quality, "Relocalised");
                }
                None => debug!(scene = %self.scene_id, "Relocalisation found no candidates"),
            }
        }

        if perform_training {
            relocaliser.train(&view.rgb, &view.depth, intrinsics, &observed_pose)?;
        }

        if every_frame {
            tracking.pose = observed_pose;
            tracking.quality = TrackingQuality::Good;
        }
        Ok(())
    }

    /// Queue the fused frame for the remote mapping server, if one is attached.
    fn stream_frame(&self, state: &SlamState) {
        let Some(client) = self.context.mapping_client(&self.scene_id) else {
            return;
        };
        let message = RgbdFrameMessage {
            frame_index: self.gate.fused_frames(),
            pose: state.tracking_state.pose.clone(),
            rgb: state.input_rgb.clone(),
            raw_depth: state.input_raw_depth.clone(),
        };
        if !client.push_frame(message) {
            warn!(scene = %self.scene_id, frame = self.gate.fused_frames(), "Mapping client dropped frame");
        }
    }

    fn prepare_for_tracking(&mut self, view: &View, tracking: &TrackingState) -> Result<()> {
        match (self.tracking_mode, self.surfel_mapper.as_mut()) {
            (TrackingMode::Surfels, Some(surfels)) => surfels.prepare_for_tracking(view, tracking)?,
            _ => self.voxel_mapper.prepare_for_tracking(view, tracking)?,
        }

        if self.mapping_mode == MappingMode::VoxelsAndSurfels {
            if let Some(surfels) = self.surfel_mapper.as_mut() {
                surfels.find_surface(view, tracking)?;
            }
        }
        Ok(())
    }

    /// Fiducial detection and motion-capture anchoring for a well-tracked frame.
    fn run_fiducial_hooks(&self, state: &mut SlamState, view: &View) {
        let Some(detector) = self.context.fiducial_detector(&self.scene_id) else {
            return;
        };

        if self.detect_fiducials {
            let measurements = detector.detect_fiducials(view, &state.tracking_state.pose);
            state.update_fiducials(measurements);
        }

        let Some(link) = self.context.motion_capture() else {
            return;
        };
        if !detector.anchors_motion_capture() || link.world_to_mocap_transform(&self.scene_id).is_some() {
            return;
        }
        if let Some(fiducial) = state.fiducials().values().next() {
            if fiducial.is_stable() {
                info!(scene = %self.scene_id, fiducial = %fiducial.id, "Anchored motion capture to fiducial");
                link.set_world_to_mocap_transform(&self.scene_id, fiducial.pose.clone());
            }
        }
    }
}
