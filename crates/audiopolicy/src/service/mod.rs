//! The policy service: one object owning every piece of policy state.
//!
//! Public operations mutate state under the ordered locks and enqueue the
//! side effects. A single consumer drains the command queue, either as a
//! tokio task (`run`) or synchronously (`process_pending`, `advance`).
//!
//! Lock order is `devices`/`sco`/`safe_volume` < `modes` < `ringer` <
//! `streams`. The three registry-level locks are never held together.

mod devices;
mod handler;
mod ringer;
mod sco;
mod volume;

pub use devices::DeviceRegistry;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use policyconf::{PlatformKind, PolicyConfig, SafeVolumeConfig};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::alias::StreamAliasResolver;
use crate::boundary::{
    AudioRouting, BroadcastSink, CallStateQuery, ForceConfig, HeadsetProxy, NeverInCall,
    NoHeadset, NoOpController, TracingSink, VolumeController,
};
use crate::locks::{LockLevel, OrderedMutex};
use crate::mode::{AudioMode, ModeChange, ModeOwners};
use crate::pipeline::{Command, CommandQueue};
use crate::ringer::{
    RingerMode, RingerModeDelegate, RingerSettings, VolumePolicy, DEFAULT_MUTE_AFFECTED,
    DEFAULT_RINGER_AFFECTED,
};
use crate::safe_volume::SafeVolumeGuard;
use crate::sco::ScoConnectionManager;
use crate::session::SessionId;
use crate::store::{
    SettingsStore, LINK_NOTIFICATION_KEY, MODE_RINGER_KEY, MUTE_AFFECTED_KEY,
};
use crate::stream::{StreamCatalog, StreamKind, StreamSet};
use crate::volume::StreamTable;

/// Static service parameters, resolved once from the loaded config.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub platform: PlatformKind,
    pub has_vibrator: bool,
    pub use_fixed_volume: bool,
    pub camera_sound_forced: bool,
    pub volume_keys_control_ring_stream: bool,
    pub voice_call_steps: u32,
    pub media_steps: u32,
    pub link_notification: bool,
    pub stream_override_delay: Duration,
    pub volume_policy: VolumePolicy,
    pub safe_volume: SafeVolumeConfig,
    pub sco_connect_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

impl From<&PolicyConfig> for ServiceConfig {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            platform: config.platform.kind,
            has_vibrator: config.platform.has_vibrator,
            use_fixed_volume: config.platform.use_fixed_volume,
            camera_sound_forced: config.platform.camera_sound_forced,
            volume_keys_control_ring_stream: config.platform.volume_keys_control_ring_stream,
            voice_call_steps: config.volume.voice_call_steps,
            media_steps: config.volume.media_steps,
            link_notification: config.volume.link_notification,
            stream_override_delay: Duration::from_millis(config.volume.stream_override_delay_ms),
            volume_policy: VolumePolicy::from(&config.ringer),
            safe_volume: config.safe_volume.clone(),
            sco_connect_timeout: Duration::from_millis(config.sco.connect_timeout_ms),
        }
    }
}

/// Everything the service talks to outside itself.
#[derive(Clone)]
pub struct Collaborators {
    pub routing: Arc<dyn AudioRouting>,
    pub settings: Arc<dyn SettingsStore>,
    pub headset: Arc<dyn HeadsetProxy>,
    pub events: Arc<dyn BroadcastSink>,
    pub controller: Arc<dyn VolumeController>,
    pub call_state: Arc<dyn CallStateQuery>,
    pub ringer_delegate: Option<Arc<dyn RingerModeDelegate>>,
}

impl Collaborators {
    /// Routing and settings are required; the rest default to inert
    /// implementations.
    pub fn new(routing: Arc<dyn AudioRouting>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            routing,
            settings,
            headset: Arc::new(NoHeadset),
            events: Arc::new(TracingSink),
            controller: Arc::new(NoOpController),
            call_state: Arc::new(NeverInCall),
            ringer_delegate: None,
        }
    }

    pub fn with_headset(mut self, headset: Arc<dyn HeadsetProxy>) -> Self {
        self.headset = headset;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn BroadcastSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_controller(mut self, controller: Arc<dyn VolumeController>) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_call_state(mut self, call_state: Arc<dyn CallStateQuery>) -> Self {
        self.call_state = call_state;
        self
    }

    pub fn with_ringer_delegate(mut self, delegate: Arc<dyn RingerModeDelegate>) -> Self {
        self.ringer_delegate = Some(delegate);
        self
    }
}

pub struct AudioPolicyService {
    config: ServiceConfig,

    // Collaborators
    routing: Arc<dyn AudioRouting>,
    settings: Arc<dyn SettingsStore>,
    events: Arc<dyn BroadcastSink>,
    controller: Arc<dyn VolumeController>,
    call_state: Arc<dyn CallStateQuery>,
    ringer_delegate: Option<Arc<dyn RingerModeDelegate>>,

    // Policy state, in lock order
    devices: OrderedMutex<DeviceRegistry>,
    sco: OrderedMutex<ScoConnectionManager>,
    safe_volume: OrderedMutex<SafeVolumeGuard>,
    modes: OrderedMutex<ModeOwners>,
    ringer: OrderedMutex<RingerSettings>,
    streams: OrderedMutex<StreamTable>,

    queue: CommandQueue,
    camera_sound_forced: Arc<AtomicBool>,
    system_ready: AtomicBool,
    jurisdiction: AtomicU32,
}

impl AudioPolicyService {
    /// Build the service and load persisted state. Nothing is delivered
    /// until the queue is drained.
    pub fn new(config: ServiceConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            routing,
            settings,
            headset,
            events,
            controller,
            call_state,
            ringer_delegate,
        } = collaborators;

        let queue = CommandQueue::new();
        let camera_sound_forced = Arc::new(AtomicBool::new(config.camera_sound_forced));
        let is_television = config.platform == PlatformKind::Television;

        let link_notification = settings
            .get_int(LINK_NOTIFICATION_KEY)
            .map(|v| v == 1)
            .unwrap_or(config.link_notification);
        let aliases = StreamAliasResolver::new(config.platform, link_notification);
        let catalog = StreamCatalog::with_overrides(config.voice_call_steps, config.media_steps);

        let mut streams = StreamTable::new(
            catalog,
            aliases,
            config.use_fixed_volume,
            Arc::clone(&camera_sound_forced),
            Arc::clone(&routing),
            Arc::clone(&events),
            queue.clone(),
        );
        for stream in StreamKind::ALL {
            streams.read_settings(stream, settings.as_ref());
            let catalog = streams.catalog();
            if let Err(e) = routing.init_stream_volume(
                stream,
                catalog.min_steps(stream),
                catalog.max_steps(stream),
            ) {
                warn!(%stream, "init stream volume failed: {}", e);
            }
        }
        streams.check_fixed_volume_devices();

        // === Ringer ===

        let stored = settings.get_int_or(MODE_RINGER_KEY, RingerMode::Normal.as_i32());
        let mut ringer_mode = RingerMode::try_from(stored).unwrap_or_else(|_| {
            warn!(stored, "invalid persisted ringer mode");
            RingerMode::Normal
        });
        if ringer_mode == RingerMode::Vibrate && !config.has_vibrator {
            ringer_mode = RingerMode::Silent;
        }
        if ringer_mode.as_i32() != stored {
            queue.send_now(Command::PersistSetting {
                key: MODE_RINGER_KEY.to_string(),
                value: ringer_mode.as_i32(),
            });
        }
        if config.use_fixed_volume || is_television {
            ringer_mode = RingerMode::Normal;
        }

        let mut mute_affected = StreamSet::from_bits(
            settings.get_int_or(MUTE_AFFECTED_KEY, StreamSet::of(&DEFAULT_MUTE_AFFECTED).bits()),
        );
        for stream in StreamKind::ALL {
            if streams.state(stream).min_index() > 0 {
                mute_affected.remove(stream);
            }
        }
        let ringer = RingerSettings::new(
            ringer_mode,
            StreamSet::of(&DEFAULT_RINGER_AFFECTED),
            mute_affected,
        );

        let mut guard = SafeVolumeGuard::new(config.safe_volume.clone(), queue.clone());
        guard.load(settings.as_ref());

        let sco = ScoConnectionManager::new(
            headset,
            Arc::clone(&settings),
            queue.clone(),
            config.sco_connect_timeout,
        );

        let service = Self {
            config,
            routing,
            settings,
            events,
            controller,
            call_state,
            ringer_delegate,
            devices: OrderedMutex::new(LockLevel::Registry, "devices", DeviceRegistry::default()),
            sco: OrderedMutex::new(LockLevel::Registry, "sco", sco),
            safe_volume: OrderedMutex::new(LockLevel::Registry, "safe_volume", guard),
            modes: OrderedMutex::new(LockLevel::ModeOwners, "modes", ModeOwners::default()),
            ringer: OrderedMutex::new(LockLevel::Ringer, "ringer", ringer),
            streams: OrderedMutex::new(LockLevel::Streams, "streams", streams),
            queue,
            camera_sound_forced,
            system_ready: AtomicBool::new(false),
            jurisdiction: AtomicU32::new(0),
        };

        {
            let mut ringer = service.ringer.lock();
            let mut streams = service.streams.lock();
            service.update_ringer_mode_affected_streams(&mut ringer, &streams);
            service.set_ringer_mode_int(&mut ringer, &mut streams, ringer_mode, false);
        }

        info!(
            platform = service.config.platform.as_str(),
            ringer = %ringer_mode,
            "audio policy service created"
        );
        service
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn is_television(&self) -> bool {
        self.config.platform == PlatformKind::Television
    }

    fn camera_forced(&self) -> bool {
        self.camera_sound_forced.load(Ordering::SeqCst)
    }

    fn delegate(&self) -> Option<&dyn RingerModeDelegate> {
        self.ringer_delegate.as_deref()
    }

    // === Command consumer ===

    /// Drain the queue until it is closed.
    pub async fn run(self: Arc<Self>) {
        info!("command consumer started");
        while let Some(command) = self.queue.recv().await {
            self.process_command(command);
        }
        info!("command consumer stopped");
    }

    /// Close the queue; `run` returns once it notices.
    pub fn shutdown(&self) {
        self.queue.close();
    }

    /// Run every command already due.
    pub fn process_pending(&self) -> usize {
        self.process_until(Instant::now())
    }

    /// Run every command that would become due within `by`, without
    /// waiting. Commands enqueued along the way are included when they
    /// fall inside the window.
    pub fn advance(&self, by: Duration) -> usize {
        self.process_until(Instant::now() + by)
    }

    fn process_until(&self, deadline: Instant) -> usize {
        let mut processed = 0;
        while let Some(command) = self.queue.pop_due(deadline) {
            self.process_command(command);
            processed += 1;
        }
        processed
    }

    // === Lifecycle ===

    /// Boot finished: SCO starts from a clean slate and the safe volume
    /// profile gets a forced configure after the timeout.
    pub fn system_ready(&self) {
        self.system_ready.store(true, Ordering::SeqCst);
        self.sco.lock().mark_broadcast_error();
        self.reset_bluetooth_sco();
        self.sco.lock().bind_headset();

        let timeout = self.safe_volume.lock().configure_timeout();
        self.queue.send(Command::ConfigureSafeVolumeForced, timeout);
        info!("system ready");
    }

    pub fn is_system_ready(&self) -> bool {
        self.system_ready.load(Ordering::SeqCst)
    }

    /// A client went away: release its SCO count and any mode it owned.
    pub fn on_session_died(&self, session: SessionId) {
        self.sco.lock().on_session_died(session);

        let change = {
            let mut modes = self.modes.lock();
            modes.on_session_died(session, self.routing.as_ref())
        };
        if let Some(change) = change {
            self.after_mode_change(change);
        }
    }

    /// Follow-up once the audio mode stack has moved: re-apply the volume
    /// of whatever stream the keys now drive, rebuild aliases and tear
    /// down SCO held by anyone but the new owner.
    fn after_mode_change(&self, change: ModeChange) {
        if change.applied {
            let active = self.active_stream_type(None);
            let in_communication = self.is_in_communication();
            let mut ringer = self.ringer.lock();
            let mut streams = self.streams.lock();
            let alias = streams.alias(active);
            let device = streams.device_for_stream(active);
            let index = streams.get_index(alias, device);
            self.set_stream_volume_int(&mut streams, alias, index, device, true);
            self.update_stream_volume_alias(&mut ringer, &mut streams, in_communication, true);
        }

        if let Some(pid) = change.owner_pid {
            self.sco.lock().disconnect_all(Some(pid));
        }
    }

    fn is_in_communication(&self) -> bool {
        self.call_state.is_in_call() || self.modes.lock().mode() == AudioMode::InCommunication
    }

    fn forced_for_communication(&self) -> ForceConfig {
        self.modes.lock().forced_for_comm()
    }
}
