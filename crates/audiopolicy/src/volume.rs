//! Per-stream volume state and the table that keeps aliased streams in step.
//!
//! The whole table sits behind one lock: a change on an alias stream is
//! copied to every follower before anyone else can read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::alias::StreamAliasResolver;
use crate::boundary::{AudioRouting, BroadcastSink, PolicyEvent};
use crate::device::Device;
use crate::pipeline::{Command, CommandQueue};
use crate::store::SettingsStore;
use crate::stream::{to_ui, StreamCatalog, StreamKind};

/// Volume record of one stream kind. Indices are internal units.
#[derive(Debug, Clone)]
pub struct VolumeStreamState {
    kind: StreamKind,
    setting_name: &'static str,
    index_min: i32,
    index_max: i32,
    index_by_device: BTreeMap<Device, i32>,
    muted: bool,
}

impl VolumeStreamState {
    fn new(kind: StreamKind, setting_name: &'static str, catalog: &StreamCatalog) -> Self {
        let mut index_by_device = BTreeMap::new();
        index_by_device.insert(Device::DEFAULT, catalog.default_index(kind));
        Self {
            kind,
            setting_name,
            index_min: catalog.min_index(kind),
            index_max: catalog.max_index(kind),
            index_by_device,
            muted: false,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn min_index(&self) -> i32 {
        self.index_min
    }

    pub fn max_index(&self) -> i32 {
        self.index_max
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Index for `device`, falling back to the `DEFAULT` entry.
    pub fn get_index(&self, device: Device) -> i32 {
        self.index_by_device
            .get(&device)
            .or_else(|| self.index_by_device.get(&Device::DEFAULT))
            .copied()
            .unwrap_or(self.index_max)
    }

    pub fn devices(&self) -> impl Iterator<Item = (Device, i32)> + '_ {
        self.index_by_device.iter().map(|(d, i)| (*d, *i))
    }

    /// Settings key holding this stream's index for `device`.
    pub fn settings_key(&self, device: Device) -> String {
        device.settings_key(self.setting_name)
    }

    fn valid_index(&self, index: i32, fixed_volume: bool) -> i32 {
        if fixed_volume || index > self.index_max {
            self.index_max
        } else if index < self.index_min {
            self.index_min
        } else {
            index
        }
    }
}

/// All stream states plus what they need to resolve devices and aliases.
pub struct StreamTable {
    catalog: StreamCatalog,
    aliases: StreamAliasResolver,
    states: Vec<VolumeStreamState>,
    fixed_volume_devices: Device,
    full_volume_devices: Device,
    use_fixed_volume: bool,
    camera_sound_forced: Arc<AtomicBool>,
    routing: Arc<dyn AudioRouting>,
    events: Arc<dyn BroadcastSink>,
    queue: CommandQueue,
}

impl StreamTable {
    /// Build the table with catalog defaults. Setting names follow the
    /// aliases in effect at construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: StreamCatalog,
        aliases: StreamAliasResolver,
        use_fixed_volume: bool,
        camera_sound_forced: Arc<AtomicBool>,
        routing: Arc<dyn AudioRouting>,
        events: Arc<dyn BroadcastSink>,
        queue: CommandQueue,
    ) -> Self {
        let states = StreamKind::ALL
            .iter()
            .map(|kind| {
                let name = aliases.resolve(*kind).settings_name();
                VolumeStreamState::new(*kind, name, &catalog)
            })
            .collect();
        Self {
            catalog,
            aliases,
            states,
            fixed_volume_devices: Device::FIXED_VOLUME_DEFAULT,
            full_volume_devices: Device::NONE,
            use_fixed_volume,
            camera_sound_forced,
            routing,
            events,
            queue,
        }
    }

    pub fn catalog(&self) -> &StreamCatalog {
        &self.catalog
    }

    pub fn aliases(&self) -> &StreamAliasResolver {
        &self.aliases
    }

    pub fn aliases_mut(&mut self) -> &mut StreamAliasResolver {
        &mut self.aliases
    }

    pub fn alias(&self, stream: StreamKind) -> StreamKind {
        self.aliases.resolve(stream)
    }

    pub fn state(&self, stream: StreamKind) -> &VolumeStreamState {
        &self.states[stream.index()]
    }

    pub fn fixed_volume_devices(&self) -> Device {
        self.fixed_volume_devices
    }

    pub fn add_fixed_volume_devices(&mut self, devices: Device) {
        self.fixed_volume_devices |= devices;
    }

    pub fn full_volume_devices(&self) -> Device {
        self.full_volume_devices
    }

    pub fn set_full_volume_devices(&mut self, devices: Device) {
        self.full_volume_devices = devices;
    }

    pub fn uses_fixed_volume(&self) -> bool {
        self.use_fixed_volume
    }

    fn camera_forced(&self) -> bool {
        self.camera_sound_forced.load(Ordering::SeqCst)
    }

    /// Device whose index drives `stream` right now.
    pub fn device_for_stream(&self, stream: StreamKind) -> Device {
        self.routing.devices_for_stream(stream).select_for_volume()
    }

    pub fn get_index(&self, stream: StreamKind, device: Device) -> i32 {
        self.state(stream).get_index(device)
    }

    pub fn rescale(&self, value: i32, from: StreamKind, to: StreamKind) -> i32 {
        self.catalog.rescale(value, from, to)
    }

    /// Clamp and store an index, then copy the rescaled value to every
    /// stream following this one. Returns whether the index changed.
    pub fn set_index(&mut self, stream: StreamKind, index: i32, device: Device) -> bool {
        let fixed = self.use_fixed_volume;
        let camera = self.camera_forced();
        let state = &mut self.states[stream.index()];
        let old_index = state.get_index(device);
        let mut index = state.valid_index(index, fixed);
        if stream == StreamKind::SystemEnforced && camera {
            index = state.index_max;
        }
        state.index_by_device.insert(device, index);

        let changed = old_index != index;
        if changed {
            let current_device = device == self.device_for_stream(stream);
            let followers: Vec<StreamKind> = self.aliases.followers(stream).collect();
            for follower in followers {
                let scaled = self.rescale(index, stream, follower);
                self.set_index(follower, scaled, device);
                if current_device {
                    let follower_device = self.device_for_stream(follower);
                    self.set_index(follower, scaled, follower_device);
                }
            }

            self.events.publish(PolicyEvent::VolumeChanged {
                stream,
                device,
                old_index,
                new_index: index,
            });
        }
        changed
    }

    pub fn adjust_index(&mut self, stream: StreamKind, delta: i32, device: Device) -> bool {
        let current = self.get_index(stream, device);
        self.set_index(stream, current.saturating_add(delta), device)
    }

    /// Copy every device index of `src` onto `stream`, rescaled. Entries
    /// `src` lacks take its rescaled default.
    pub fn set_all_indexes(&mut self, stream: StreamKind, src: StreamKind) {
        let source = self.state(src).clone();
        let default = self.rescale(source.get_index(Device::DEFAULT), src, stream);
        let devices: Vec<Device> = self.state(stream).index_by_device.keys().copied().collect();
        for device in devices {
            self.states[stream.index()]
                .index_by_device
                .insert(device, default);
        }
        for (device, index) in source.devices() {
            let scaled = self.rescale(index, src, stream);
            self.set_index(stream, scaled, device);
        }
    }

    /// Set the mute flag; a change schedules a full volume re-apply and
    /// notifies listeners.
    pub fn mute(&mut self, stream: StreamKind, muted: bool) -> bool {
        let state = &mut self.states[stream.index()];
        if state.muted == muted {
            return false;
        }
        state.muted = muted;
        self.queue.send_now(Command::SetAllVolumes { stream });
        self.events
            .publish(PolicyEvent::StreamMuteChanged { stream, muted });
        true
    }

    /// Index actually sent to the routing boundary, in UI steps.
    pub fn effective_ui_index(&self, stream: StreamKind, device: Device) -> i32 {
        let state = self.state(stream);
        if state.muted {
            0
        } else if device.intersects(self.full_volume_devices) {
            to_ui(state.index_max)
        } else {
            to_ui(state.get_index(device))
        }
    }

    pub fn apply_device_volume(&self, stream: StreamKind, device: Device) {
        let index = self.effective_ui_index(stream, device);
        if let Err(e) = self.routing.set_stream_volume_index(stream, index, device) {
            warn!(%stream, %device, "set volume failed: {}", e);
        }
    }

    /// Push every stored device index, `DEFAULT` first.
    pub fn apply_all_volumes(&self, stream: StreamKind) {
        self.apply_device_volume(stream, Device::DEFAULT);
        let devices: Vec<Device> = self
            .state(stream)
            .index_by_device
            .keys()
            .copied()
            .filter(|d| *d != Device::DEFAULT)
            .collect();
        for device in devices {
            self.apply_device_volume(stream, device);
        }
    }

    /// Pin full-volume devices, and non-zero fixed-volume devices, to max
    /// for the music family, then re-apply every entry.
    pub fn check_fixed_volume_devices(&mut self) {
        for stream in StreamKind::ALL {
            let music_family = self.alias(stream) == StreamKind::Music;
            let fixed = self.fixed_volume_devices;
            let full = self.full_volume_devices;
            let state = &mut self.states[stream.index()];
            let max = state.index_max;
            let devices: Vec<Device> = state.index_by_device.keys().copied().collect();
            for device in devices {
                if music_family {
                    if let Some(index) = state.index_by_device.get_mut(&device) {
                        if device.intersects(full) || (device.intersects(fixed) && *index != 0) {
                            *index = max;
                        }
                    }
                }
            }
            self.apply_all_volumes(stream);
        }
    }

    /// Load persisted indices for `stream`.
    pub fn read_settings(&mut self, stream: StreamKind, store: &dyn SettingsStore) {
        let fixed = self.use_fixed_volume;
        let camera = self.camera_forced();
        let default_steps = self.catalog.default_steps(stream);
        let state = &mut self.states[stream.index()];

        if fixed {
            state.index_by_device.insert(Device::DEFAULT, state.index_max);
            return;
        }

        if matches!(stream, StreamKind::System | StreamKind::SystemEnforced) {
            let index = if camera {
                state.index_max
            } else {
                default_steps.saturating_mul(10)
            };
            state.index_by_device.insert(Device::DEFAULT, index);
            return;
        }

        for device in Device::OUT_ALL.split() {
            let key = state.settings_key(device);
            let stored = match store.get_int(&key) {
                Some(v) => v,
                None if device == Device::DEFAULT => default_steps,
                None => continue,
            };
            let index = state.valid_index(stored.saturating_mul(10), fixed);
            debug!(%stream, %device, index, "loaded volume");
            state.index_by_device.insert(device, index);
        }
    }

    /// Re-declare a stream's range to a restarted native side and push
    /// all of its indices again.
    pub fn reinit_stream(&self, stream: StreamKind) {
        let max_steps = to_ui(self.state(stream).index_max);
        if let Err(e) = self.routing.init_stream_volume(stream, 0, max_steps) {
            warn!(%stream, "init stream volume failed: {}", e);
        }
        self.apply_all_volumes(stream);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::recorder::{RecordingRouting, RecordingSink};
    use crate::store::MemorySettings;
    use policyconf::PlatformKind;

    pub(crate) fn table_with(
        platform: PlatformKind,
        routing: Arc<RecordingRouting>,
        sink: Arc<RecordingSink>,
    ) -> (StreamTable, CommandQueue) {
        let queue = CommandQueue::new();
        let table = StreamTable::new(
            StreamCatalog::default(),
            StreamAliasResolver::new(platform, true),
            false,
            Arc::new(AtomicBool::new(false)),
            routing,
            sink,
            queue.clone(),
        );
        (table, queue)
    }

    fn voice_table() -> (StreamTable, Arc<RecordingRouting>, Arc<RecordingSink>) {
        let routing = Arc::new(RecordingRouting::new());
        let sink = Arc::new(RecordingSink::new());
        let (table, _) = table_with(PlatformKind::Voice, routing.clone(), sink.clone());
        (table, routing, sink)
    }

    #[test]
    fn test_defaults_present() {
        let (table, _, _) = voice_table();
        for stream in StreamKind::ALL {
            let state = table.state(stream);
            assert_eq!(
                state.get_index(Device::DEFAULT),
                table.catalog().default_index(stream)
            );
            assert_eq!(state.get_index(Device::WIRED_HEADSET), state.get_index(Device::DEFAULT));
        }
    }

    #[test]
    fn test_set_index_clamps() {
        let (mut table, _, _) = voice_table();
        table.set_index(StreamKind::Music, 999, Device::SPEAKER);
        assert_eq!(table.get_index(StreamKind::Music, Device::SPEAKER), 150);
        table.set_index(StreamKind::VoiceCall, -5, Device::SPEAKER);
        assert_eq!(table.get_index(StreamKind::VoiceCall, Device::SPEAKER), 10);
    }

    #[test]
    fn test_global_fixed_volume_pins_every_index_to_max() {
        let mut table = StreamTable::new(
            StreamCatalog::default(),
            StreamAliasResolver::new(PlatformKind::Voice, true),
            true,
            Arc::new(AtomicBool::new(false)),
            Arc::new(RecordingRouting::new()),
            Arc::new(RecordingSink::new()),
            CommandQueue::new(),
        );
        table.set_index(StreamKind::VoiceCall, -50, Device::SPEAKER);
        assert_eq!(table.get_index(StreamKind::VoiceCall, Device::SPEAKER), 50);
        table.set_index(StreamKind::Music, 0, Device::SPEAKER);
        assert_eq!(table.get_index(StreamKind::Music, Device::SPEAKER), 150);
    }

    #[test]
    fn test_adjust_index_saturates() {
        let (mut table, _, _) = voice_table();
        table.set_index(StreamKind::Music, 150, Device::SPEAKER);
        table.adjust_index(StreamKind::Music, i32::MAX, Device::SPEAKER);
        assert_eq!(table.get_index(StreamKind::Music, Device::SPEAKER), 150);
        table.adjust_index(StreamKind::Music, i32::MIN, Device::SPEAKER);
        assert_eq!(table.get_index(StreamKind::Music, Device::SPEAKER), 0);
    }

    #[test]
    fn test_set_index_propagates_to_followers() {
        let (mut table, routing, _) = voice_table();
        routing.route(StreamKind::Ring, Device::SPEAKER);
        routing.route(StreamKind::Notification, Device::SPEAKER);

        table.set_index(StreamKind::Ring, 30, Device::SPEAKER);

        // NOTIFICATION, SYSTEM, DTMF follow RING
        assert_eq!(table.get_index(StreamKind::Notification, Device::SPEAKER), 30);
        assert_eq!(table.get_index(StreamKind::Dtmf, Device::SPEAKER), 64);
        assert_eq!(table.get_index(StreamKind::System, Device::SPEAKER), 30);
    }

    #[test]
    fn test_set_index_emits_event_once_per_stream() {
        let (mut table, _, sink) = voice_table();
        assert!(table.set_index(StreamKind::Alarm, 30, Device::DEFAULT));
        assert!(!table.set_index(StreamKind::Alarm, 30, Device::DEFAULT));
        let events = sink.events();
        assert_eq!(
            events,
            vec![PolicyEvent::VolumeChanged {
                stream: StreamKind::Alarm,
                device: Device::DEFAULT,
                old_index: 60,
                new_index: 30,
            }]
        );
    }

    #[test]
    fn test_camera_forced_pins_system_enforced() {
        let routing = Arc::new(RecordingRouting::new());
        let sink = Arc::new(RecordingSink::new());
        let (mut table, _) = table_with(PlatformKind::Voice, routing, sink);
        table.camera_sound_forced.store(true, Ordering::SeqCst);
        table.set_index(StreamKind::SystemEnforced, 0, Device::DEFAULT);
        assert_eq!(table.get_index(StreamKind::SystemEnforced, Device::DEFAULT), 70);
    }

    #[test]
    fn test_mute_queues_reapply() {
        let routing = Arc::new(RecordingRouting::new());
        let sink = Arc::new(RecordingSink::new());
        let (mut table, queue) = table_with(PlatformKind::Voice, routing, sink.clone());
        assert!(table.mute(StreamKind::Music, true));
        assert!(!table.mute(StreamKind::Music, true));
        assert_eq!(
            queue.snapshot(),
            vec![Command::SetAllVolumes {
                stream: StreamKind::Music
            }]
        );
        assert_eq!(table.effective_ui_index(StreamKind::Music, Device::DEFAULT), 0);
        assert!(sink.events().contains(&PolicyEvent::StreamMuteChanged {
            stream: StreamKind::Music,
            muted: true
        }));
    }

    #[test]
    fn test_apply_all_volumes_default_first() {
        let (mut table, routing, _) = voice_table();
        table.set_index(StreamKind::Music, 80, Device::WIRED_HEADSET);
        routing.clear();
        table.apply_all_volumes(StreamKind::Music);
        assert_eq!(
            routing.volume_calls(),
            vec![
                (StreamKind::Music, 11, Device::DEFAULT),
                (StreamKind::Music, 8, Device::WIRED_HEADSET),
            ]
        );
    }

    #[test]
    fn test_full_volume_device_applies_max() {
        let (mut table, routing, _) = voice_table();
        table.set_full_volume_devices(Device::HDMI);
        table.set_index(StreamKind::Music, 30, Device::HDMI);
        routing.clear();
        table.apply_device_volume(StreamKind::Music, Device::HDMI);
        assert_eq!(routing.volume_calls(), vec![(StreamKind::Music, 15, Device::HDMI)]);
    }

    #[test]
    fn test_check_fixed_volume_devices_pins_music() {
        let (mut table, _, _) = voice_table();
        table.set_index(StreamKind::Music, 40, Device::HDMI);
        table.set_index(StreamKind::Music, 0, Device::SPDIF);
        table.set_index(StreamKind::Ring, 20, Device::HDMI);
        table.check_fixed_volume_devices();
        assert_eq!(table.get_index(StreamKind::Music, Device::HDMI), 150);
        assert_eq!(table.get_index(StreamKind::Music, Device::SPDIF), 0);
        assert_eq!(table.get_index(StreamKind::Ring, Device::HDMI), 20);
    }

    #[test]
    fn test_set_all_indexes_copies_rescaled() {
        let (mut table, _, _) = voice_table();
        table.set_index(StreamKind::Ring, 70, Device::WIRED_HEADSET);
        table.set_all_indexes(StreamKind::Dtmf, StreamKind::VoiceCall);
        let expected = table.rescale(
            table.get_index(StreamKind::VoiceCall, Device::DEFAULT),
            StreamKind::VoiceCall,
            StreamKind::Dtmf,
        );
        assert_eq!(table.get_index(StreamKind::Dtmf, Device::DEFAULT), expected);
        assert_eq!(table.get_index(StreamKind::Dtmf, Device::WIRED_HEADSET), expected);
    }

    #[test]
    fn test_read_settings() {
        let (mut table, _, _) = voice_table();
        let store = MemorySettings::with_values([
            ("volume_music", 9),
            ("volume_music_headset", 4),
            ("volume_music_speaker", 99),
            ("volume_system", 1),
        ]);
        table.read_settings(StreamKind::Music, &store);
        table.read_settings(StreamKind::System, &store);
        table.read_settings(StreamKind::Tts, &store);

        assert_eq!(table.get_index(StreamKind::Music, Device::DEFAULT), 90);
        assert_eq!(table.get_index(StreamKind::Music, Device::WIRED_HEADSET), 40);
        assert_eq!(table.get_index(StreamKind::Music, Device::SPEAKER), 150);
        // SYSTEM ignores the store
        assert_eq!(table.get_index(StreamKind::System, Device::DEFAULT), 70);
        // TTS shares the music keys
        assert_eq!(table.get_index(StreamKind::Tts, Device::WIRED_HEADSET), 40);
        assert_eq!(table.state(StreamKind::Tts).settings_key(Device::SPEAKER), "volume_music_speaker");
    }

    #[test]
    fn test_index_always_within_range() {
        let (mut table, _, _) = voice_table();
        let deltas = [-500, 37, 12, -3, 900, -1, -10_000, 45, 0, 3];
        for stream in StreamKind::ALL {
            for delta in deltas {
                table.adjust_index(stream, delta, Device::WIRED_HEADSET);
                let state = table.state(stream);
                let v = state.get_index(Device::WIRED_HEADSET);
                assert!(v >= state.min_index() && v <= state.max_index());
            }
        }
    }
}
