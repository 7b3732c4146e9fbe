//! Recording collaborators.
//!
//! In-memory implementations of the boundary traits that remember every
//! call. Used by the test suites and handy for dry runs of the daemon.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::boundary::{
    AudioRouting, BroadcastSink, CallStateQuery, ForceConfig, ForceUsage, HeadsetAudioState,
    HeadsetDevice, HeadsetProxy, PolicyEvent, VolumeController,
};
use crate::device::Device;
use crate::error::RoutingError;
use crate::mode::AudioMode;
use crate::ringer::{AdjustFlags, RingerMode, RingerModeDelegate, VolumePolicy};
use crate::stream::StreamKind;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCall {
    pub device: Device,
    pub available: bool,
    pub address: String,
    pub name: String,
}

#[derive(Debug, Default)]
struct RoutingLog {
    volume_calls: Vec<(StreamKind, i32, Device)>,
    init_calls: Vec<(StreamKind, i32, i32)>,
    connections: Vec<ConnectionCall>,
    force_uses: Vec<(ForceUsage, ForceConfig)>,
    phone_states: Vec<AudioMode>,
    routes: HashMap<StreamKind, Device>,
    active: HashSet<StreamKind>,
    refused_modes: HashSet<AudioMode>,
    refuse_connections: bool,
    unavailable_checks: u32,
}

/// Routing backend that records every call. Streams are on the speaker
/// unless routed elsewhere.
#[derive(Debug, Default)]
pub struct RecordingRouting {
    log: Mutex<RoutingLog>,
}

impl RecordingRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, stream: StreamKind, device: Device) {
        lock(&self.log).routes.insert(stream, device);
    }

    pub fn set_active(&self, stream: StreamKind, active: bool) {
        let mut log = lock(&self.log);
        if active {
            log.active.insert(stream);
        } else {
            log.active.remove(&stream);
        }
    }

    pub fn refuse_phone_state(&self, mode: AudioMode) {
        lock(&self.log).refused_modes.insert(mode);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.log).refuse_connections = refuse;
    }

    /// The next `count` availability checks fail.
    pub fn set_unavailable_checks(&self, count: u32) {
        lock(&self.log).unavailable_checks = count;
    }

    /// Forget recorded calls; routes and scripted failures stay.
    pub fn clear(&self) {
        let mut log = lock(&self.log);
        log.volume_calls.clear();
        log.init_calls.clear();
        log.connections.clear();
        log.force_uses.clear();
        log.phone_states.clear();
    }

    pub fn volume_calls(&self) -> Vec<(StreamKind, i32, Device)> {
        lock(&self.log).volume_calls.clone()
    }

    pub fn init_calls(&self) -> Vec<(StreamKind, i32, i32)> {
        lock(&self.log).init_calls.clone()
    }

    pub fn connections(&self) -> Vec<ConnectionCall> {
        lock(&self.log).connections.clone()
    }

    pub fn force_uses(&self) -> Vec<(ForceUsage, ForceConfig)> {
        lock(&self.log).force_uses.clone()
    }

    pub fn phone_states(&self) -> Vec<AudioMode> {
        lock(&self.log).phone_states.clone()
    }
}

impl AudioRouting for RecordingRouting {
    fn check_available(&self) -> Result<(), RoutingError> {
        let mut log = lock(&self.log);
        if log.unavailable_checks > 0 {
            log.unavailable_checks -= 1;
            return Err(RoutingError::Unavailable);
        }
        Ok(())
    }

    fn init_stream_volume(
        &self,
        stream: StreamKind,
        min_steps: i32,
        max_steps: i32,
    ) -> Result<(), RoutingError> {
        lock(&self.log).init_calls.push((stream, min_steps, max_steps));
        Ok(())
    }

    fn set_stream_volume_index(
        &self,
        stream: StreamKind,
        index: i32,
        device: Device,
    ) -> Result<(), RoutingError> {
        lock(&self.log).volume_calls.push((stream, index, device));
        Ok(())
    }

    fn set_device_connection_state(
        &self,
        device: Device,
        available: bool,
        address: &str,
        name: &str,
    ) -> Result<(), RoutingError> {
        let mut log = lock(&self.log);
        log.connections.push(ConnectionCall {
            device,
            available,
            address: address.to_string(),
            name: name.to_string(),
        });
        if log.refuse_connections {
            return Err(RoutingError::Status {
                operation: "set_device_connection_state",
                status: -1,
            });
        }
        Ok(())
    }

    fn devices_for_stream(&self, stream: StreamKind) -> Device {
        lock(&self.log)
            .routes
            .get(&stream)
            .copied()
            .unwrap_or(Device::SPEAKER)
    }

    fn set_force_use(&self, usage: ForceUsage, config: ForceConfig) -> Result<(), RoutingError> {
        lock(&self.log).force_uses.push((usage, config));
        Ok(())
    }

    fn set_phone_state(&self, mode: AudioMode) -> Result<(), RoutingError> {
        let mut log = lock(&self.log);
        if log.refused_modes.contains(&mode) {
            return Err(RoutingError::Status {
                operation: "set_phone_state",
                status: -22,
            });
        }
        log.phone_states.push(mode);
        Ok(())
    }

    fn is_stream_active(&self, stream: StreamKind, _within: Duration) -> bool {
        lock(&self.log).active.contains(&stream)
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PolicyEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl BroadcastSink for RecordingSink {
    fn publish(&self, event: PolicyEvent) {
        lock(&self.events).push(event);
    }
}

/// Headset proxy driven by the test: binding succeeds or not, and every
/// primitive is counted by name.
#[derive(Debug)]
pub struct ScriptedHeadset {
    bindable: bool,
    devices: Mutex<Vec<HeadsetDevice>>,
    audio_state: Mutex<HeadsetAudioState>,
    fail_starts: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedHeadset {
    pub fn with_device(device: HeadsetDevice) -> Self {
        Self {
            bindable: true,
            devices: Mutex::new(vec![device]),
            audio_state: Mutex::new(HeadsetAudioState::Disconnected),
            fail_starts: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Bluetooth present but no device paired.
    pub fn empty() -> Self {
        Self {
            bindable: true,
            ..Self::unbindable()
        }
    }

    pub fn unbindable() -> Self {
        Self {
            bindable: false,
            devices: Mutex::new(Vec::new()),
            audio_state: Mutex::new(HeadsetAudioState::Disconnected),
            fail_starts: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_devices(&self, devices: Vec<HeadsetDevice>) {
        *lock(&self.devices) = devices;
    }

    pub fn set_audio_state(&self, state: HeadsetAudioState) {
        *lock(&self.audio_state) = state;
    }

    /// Every start primitive reports failure from now on.
    pub fn fail_starts(&self) {
        self.fail_starts.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| **c == name).count()
    }

    pub fn all_calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn record(&self, name: &'static str) {
        lock(&self.calls).push(name);
    }

    fn start(&self, name: &'static str) -> bool {
        self.record(name);
        !self.fail_starts.load(Ordering::SeqCst)
    }
}

impl HeadsetProxy for ScriptedHeadset {
    fn bind(&self) -> bool {
        self.record("bind");
        self.bindable
    }

    fn connected_devices(&self) -> Vec<HeadsetDevice> {
        lock(&self.devices).clone()
    }

    fn audio_state(&self, _device: &HeadsetDevice) -> HeadsetAudioState {
        *lock(&self.audio_state)
    }

    fn connect_audio(&self) -> bool {
        self.start("connect_audio")
    }

    fn disconnect_audio(&self) -> bool {
        self.record("disconnect_audio");
        true
    }

    fn start_virtual_voice_call(&self, _device: &HeadsetDevice) -> bool {
        self.start("start_virtual_voice_call")
    }

    fn stop_virtual_voice_call(&self, _device: &HeadsetDevice) -> bool {
        self.record("stop_virtual_voice_call");
        true
    }

    fn start_voice_recognition(&self, _device: &HeadsetDevice) -> bool {
        self.start("start_voice_recognition")
    }

    fn stop_voice_recognition(&self, _device: &HeadsetDevice) -> bool {
        self.record("stop_voice_recognition");
        true
    }
}

#[derive(Debug, Default)]
pub struct RecordingController {
    volume_changes: Mutex<Vec<(StreamKind, AdjustFlags)>>,
    warnings: Mutex<Vec<AdjustFlags>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume_changes(&self) -> Vec<(StreamKind, AdjustFlags)> {
        lock(&self.volume_changes).clone()
    }

    pub fn warnings(&self) -> usize {
        lock(&self.warnings).len()
    }
}

impl VolumeController for RecordingController {
    fn volume_changed(&self, stream: StreamKind, flags: AdjustFlags) {
        lock(&self.volume_changes).push((stream, flags));
    }

    fn display_safe_volume_warning(&self, flags: AdjustFlags) {
        lock(&self.warnings).push(flags);
    }
}

/// Ringer delegate that mirrors one view onto the other, optionally
/// pinning the internal mode, and records what it was asked.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    pinned_internal: Mutex<Option<RingerMode>>,
    calls: Mutex<Vec<(bool, RingerMode, RingerMode, String)>>,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// External sets resolve to `mode` internally.
    pub fn pin_internal(&self, mode: RingerMode) {
        *lock(&self.pinned_internal) = Some(mode);
    }

    /// `(external, old, new, caller)` per call.
    pub fn calls(&self) -> Vec<(bool, RingerMode, RingerMode, String)> {
        lock(&self.calls).clone()
    }
}

impl RingerModeDelegate for RecordingDelegate {
    fn on_set_ringer_mode_external(
        &self,
        old_external: RingerMode,
        new_external: RingerMode,
        caller: &str,
        _internal: RingerMode,
        _policy: &VolumePolicy,
    ) -> RingerMode {
        lock(&self.calls).push((true, old_external, new_external, caller.to_string()));
        lock(&self.pinned_internal).unwrap_or(new_external)
    }

    fn on_set_ringer_mode_internal(
        &self,
        old_internal: RingerMode,
        new_internal: RingerMode,
        caller: &str,
        _external: RingerMode,
        _policy: &VolumePolicy,
    ) -> RingerMode {
        lock(&self.calls).push((false, old_internal, new_internal, caller.to_string()));
        new_internal
    }
}

/// Call state fixed by the test.
#[derive(Debug, Default)]
pub struct StaticCallState(AtomicBool);

impl StaticCallState {
    pub fn new(in_call: bool) -> Self {
        Self(AtomicBool::new(in_call))
    }

    pub fn set(&self, in_call: bool) {
        self.0.store(in_call, Ordering::SeqCst);
    }
}

impl CallStateQuery for StaticCallState {
    fn is_in_call(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
