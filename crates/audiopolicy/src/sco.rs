//! Bluetooth SCO arbitration.
//!
//! Requesters each hold a start count; the link itself is driven by a
//! single shared `ScoAudioState`. The first start and the last stop are the
//! only points where the headset is asked to do anything.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::boundary::{HeadsetAudioState, HeadsetDevice, HeadsetProxy};
use crate::mode::AudioMode;
use crate::pipeline::{Command, CommandKind, CommandQueue};
use crate::session::SessionId;
use crate::store::SettingsStore;

/// Connection state reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoConnectionState {
    Error,
    Disconnected,
    Connected,
    Connecting,
}

impl ScoConnectionState {
    pub fn as_i32(self) -> i32 {
        match self {
            ScoConnectionState::Error => -1,
            ScoConnectionState::Disconnected => 0,
            ScoConnectionState::Connected => 1,
            ScoConnectionState::Connecting => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoAudioState {
    Inactive,
    /// Start wanted, waiting for the headset service to bind.
    ActivateRequested,
    ActiveInternal,
    /// Link brought up by the headset itself.
    ActiveExternal,
    DeactivateRequested,
    DeactivateExternalRequested,
}

/// How the link is opened on the headset side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoMode {
    VirtualCall = 0,
    Raw = 1,
    VoiceRecognition = 2,
}

impl ScoMode {
    /// Persisted values outside the known range fall back to a virtual call.
    pub fn from_setting(value: i32) -> Self {
        match value {
            1 => ScoMode::Raw,
            2 => ScoMode::VoiceRecognition,
            _ => ScoMode::VirtualCall,
        }
    }
}

pub fn channel_setting_key(address: &str) -> String {
    format!("bluetooth_sco_channel_{}", address)
}

/// Who currently owns the audio mode, sampled when a start is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeGate {
    pub owner_pid: Option<u32>,
    pub mode: AudioMode,
}

impl ModeGate {
    pub fn idle() -> Self {
        Self {
            owner_pid: None,
            mode: AudioMode::Normal,
        }
    }

    fn admits(&self, pid: u32) -> bool {
        self.mode == AudioMode::Normal || self.owner_pid.map_or(true, |owner| owner == pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoClient {
    pub session: SessionId,
    pub creator_pid: u32,
    pub start_count: u32,
}

pub struct ScoConnectionManager {
    headset: Arc<dyn HeadsetProxy>,
    settings: Arc<dyn SettingsStore>,
    queue: CommandQueue,
    connect_timeout: Duration,
    clients: Vec<ScoClient>,
    audio_state: ScoAudioState,
    sco_mode: ScoMode,
    bound: bool,
    device: Option<HeadsetDevice>,
    /// Last state actually delivered to listeners.
    broadcast_state: ScoConnectionState,
}

impl ScoConnectionManager {
    pub fn new(
        headset: Arc<dyn HeadsetProxy>,
        settings: Arc<dyn SettingsStore>,
        queue: CommandQueue,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            headset,
            settings,
            queue,
            connect_timeout,
            clients: Vec::new(),
            audio_state: ScoAudioState::Inactive,
            sco_mode: ScoMode::VirtualCall,
            bound: false,
            device: None,
            broadcast_state: ScoConnectionState::Disconnected,
        }
    }

    pub fn audio_state(&self) -> ScoAudioState {
        self.audio_state
    }

    pub fn sco_mode(&self) -> ScoMode {
        self.sco_mode
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn device(&self) -> Option<&HeadsetDevice> {
        self.device.as_ref()
    }

    pub fn clients(&self) -> &[ScoClient] {
        &self.clients
    }

    pub fn total_count(&self) -> u32 {
        self.clients.iter().map(|c| c.start_count).sum()
    }

    pub fn connection_state(&self) -> ScoConnectionState {
        self.broadcast_state
    }

    /// One more start from `session`. `requested` of `None` lets the
    /// manager pick the sub-mode from the persisted device preference.
    pub fn inc(&mut self, session: SessionId, pid: u32, requested: Option<ScoMode>, gate: ModeGate) {
        let slot = self.client_slot(session, pid);
        self.request_state(HeadsetAudioState::Connected, requested, pid, gate);
        self.clients[slot].start_count += 1;
        debug!(%session, count = self.clients[slot].start_count, "sco start");
    }

    pub fn dec(&mut self, session: SessionId) {
        let Some(slot) = self.clients.iter().position(|c| c.session == session) else {
            debug!(%session, "sco stop from unknown requester");
            return;
        };
        let client = &mut self.clients[slot];
        if client.start_count == 0 {
            warn!(%session, "sco stop with count already 0");
            return;
        }
        client.start_count -= 1;
        let pid = client.creator_pid;
        self.request_state(HeadsetAudioState::Disconnected, None, pid, ModeGate::idle());
    }

    /// Requester went away: drop its count and forget it.
    pub fn on_session_died(&mut self, session: SessionId) {
        let Some(slot) = self.clients.iter().position(|c| c.session == session) else {
            return;
        };
        warn!(%session, "sco requester died");
        self.clear_count(slot, true);
        self.clients.remove(slot);
    }

    /// Clear every requester not created by `except_pid`.
    pub fn clear_all_clients(&mut self, except_pid: Option<u32>, stop: bool) {
        let mut kept = None;
        for slot in 0..self.clients.len() {
            if Some(self.clients[slot].creator_pid) == except_pid {
                kept = Some(self.clients[slot].clone());
            } else {
                self.clear_count(slot, stop);
            }
        }
        self.clients.clear();
        self.clients.extend(kept);
    }

    /// Tear down everything not owned by `except_pid`, including a link the
    /// headset brought up on its own.
    pub fn disconnect_all(&mut self, except_pid: Option<u32>) {
        self.check_audio_state();
        match self.audio_state {
            ScoAudioState::ActiveExternal | ScoAudioState::DeactivateExternalRequested => {
                let Some(device) = self.device.clone() else {
                    return;
                };
                if self.bound {
                    if self.headset.stop_voice_recognition(&device) {
                        self.set_audio_state(ScoAudioState::DeactivateExternalRequested);
                    } else {
                        self.queue.send_now(Command::HeadsetConnectFailed);
                    }
                } else if self.audio_state == ScoAudioState::ActiveExternal && self.bind_headset() {
                    self.set_audio_state(ScoAudioState::DeactivateExternalRequested);
                }
            }
            _ => self.clear_all_clients(except_pid, true),
        }
    }

    /// Forget every requester and report the link down. The caller drops
    /// any forced SCO route.
    pub fn reset(&mut self) {
        self.clear_all_clients(None, false);
        self.set_audio_state(ScoAudioState::Inactive);
        self.broadcast(ScoConnectionState::Disconnected);
    }

    /// Start binding the headset service. A timeout reset is scheduled
    /// either way; it is cancelled when binding completes.
    pub fn bind_headset(&mut self) -> bool {
        let started = self.headset.bind();
        let delay = if started {
            self.connect_timeout
        } else {
            Duration::ZERO
        };
        self.queue.send(Command::HeadsetConnectFailed, delay);
        started
    }

    pub fn on_headset_service_connected(&mut self) {
        self.queue.remove(CommandKind::HeadsetConnectFailed);
        self.bound = true;
        self.device = self.headset.connected_devices().into_iter().next();
        info!(device = ?self.device.as_ref().map(|d| d.address.as_str()), "headset service bound");

        self.check_audio_state();
        let pending = matches!(
            self.audio_state,
            ScoAudioState::ActivateRequested
                | ScoAudioState::DeactivateRequested
                | ScoAudioState::DeactivateExternalRequested
        );
        if !pending {
            return;
        }

        let status = match self.device.clone() {
            Some(device) => match self.audio_state {
                ScoAudioState::ActivateRequested => {
                    self.set_audio_state(ScoAudioState::ActiveInternal);
                    self.start_link(&device)
                }
                ScoAudioState::DeactivateRequested => self.stop_link(&device),
                _ => self.headset.stop_voice_recognition(&device),
            },
            None => false,
        };
        if !status {
            self.queue.send_now(Command::HeadsetConnectFailed);
        }
    }

    /// Binding lost: every requester is dropped. Returns the device that
    /// was attached so its endpoints can be reported gone.
    pub fn on_headset_service_disconnected(&mut self) -> Option<HeadsetDevice> {
        info!("headset service unbound");
        self.bound = false;
        let device = self.device.take();
        self.reset();
        device
    }

    /// A hands-free device came or went. Disconnection resets the link.
    pub fn set_device(&mut self, device: HeadsetDevice, connected: bool) {
        if connected {
            self.device = Some(device);
        } else {
            self.device = None;
            self.reset();
        }
    }

    /// Audio link report from the headset.
    pub fn on_audio_state_changed(&mut self, state: HeadsetAudioState) {
        let initiated_here = !self.clients.is_empty()
            && matches!(
                self.audio_state,
                ScoAudioState::ActiveInternal
                    | ScoAudioState::ActivateRequested
                    | ScoAudioState::DeactivateRequested
            );

        let report = match state {
            HeadsetAudioState::Connected => {
                self.adopt_external();
                Some(ScoConnectionState::Connected)
            }
            HeadsetAudioState::Disconnected => {
                self.set_audio_state(ScoAudioState::Inactive);
                self.clear_all_clients(None, false);
                Some(ScoConnectionState::Disconnected)
            }
            HeadsetAudioState::Connecting => {
                self.adopt_external();
                None
            }
        };

        if let (true, Some(report)) = (initiated_here, report) {
            self.broadcast(report);
        }
    }

    /// Consumer side of a queued state broadcast. Returns `(state,
    /// previous)` when the state actually changed.
    pub fn deliver_broadcast(
        &mut self,
        state: ScoConnectionState,
    ) -> Option<(ScoConnectionState, ScoConnectionState)> {
        if state == self.broadcast_state {
            return None;
        }
        let previous = self.broadcast_state;
        self.broadcast_state = state;
        Some((state, previous))
    }

    /// Force the next broadcast through, whatever it carries.
    pub fn mark_broadcast_error(&mut self) {
        self.broadcast_state = ScoConnectionState::Error;
    }

    fn client_slot(&mut self, session: SessionId, pid: u32) -> usize {
        if let Some(slot) = self.clients.iter().position(|c| c.session == session) {
            return slot;
        }
        self.clients.push(ScoClient {
            session,
            creator_pid: pid,
            start_count: 0,
        });
        self.clients.len() - 1
    }

    fn clear_count(&mut self, slot: usize, stop: bool) {
        self.clients[slot].start_count = 0;
        if stop {
            let pid = self.clients[slot].creator_pid;
            self.request_state(HeadsetAudioState::Disconnected, None, pid, ModeGate::idle());
        }
    }

    fn request_state(
        &mut self,
        target: HeadsetAudioState,
        requested: Option<ScoMode>,
        creator_pid: u32,
        gate: ModeGate,
    ) {
        self.check_audio_state();
        if self.total_count() != 0 {
            return;
        }

        match target {
            HeadsetAudioState::Connected => {
                self.broadcast(ScoConnectionState::Connecting);
                let idle = matches!(
                    self.audio_state,
                    ScoAudioState::Inactive | ScoAudioState::DeactivateRequested
                );
                if !gate.admits(creator_pid) || !idle {
                    info!(
                        pid = creator_pid,
                        owner = ?gate.owner_pid,
                        state = ?self.audio_state,
                        "sco start refused"
                    );
                    self.broadcast(ScoConnectionState::Disconnected);
                    return;
                }

                if self.audio_state == ScoAudioState::DeactivateRequested {
                    self.set_audio_state(ScoAudioState::ActiveInternal);
                    self.broadcast(ScoConnectionState::Connected);
                    return;
                }

                self.sco_mode = match requested {
                    Some(mode) => mode,
                    None => self.preferred_mode(),
                };
                match (self.bound, self.device.clone()) {
                    (true, Some(device)) => {
                        if self.start_link(&device) {
                            self.set_audio_state(ScoAudioState::ActiveInternal);
                        } else {
                            warn!(address = %device.address, mode = ?self.sco_mode, "sco start failed");
                            self.broadcast(ScoConnectionState::Disconnected);
                        }
                    }
                    _ => {
                        if self.bind_headset() {
                            self.set_audio_state(ScoAudioState::ActivateRequested);
                        }
                    }
                }
            }
            HeadsetAudioState::Disconnected => match self.audio_state {
                ScoAudioState::ActiveInternal => match (self.bound, self.device.clone()) {
                    (true, Some(device)) => {
                        if !self.stop_link(&device) {
                            warn!(address = %device.address, "sco stop failed");
                        }
                        self.set_audio_state(ScoAudioState::Inactive);
                        self.broadcast(ScoConnectionState::Disconnected);
                    }
                    _ => {
                        if self.bind_headset() {
                            self.set_audio_state(ScoAudioState::DeactivateRequested);
                        }
                    }
                },
                ScoAudioState::ActivateRequested => {
                    self.set_audio_state(ScoAudioState::Inactive);
                    self.broadcast(ScoConnectionState::Disconnected);
                }
                _ => {}
            },
            HeadsetAudioState::Connecting => {}
        }
    }

    /// A link the headset opened while nothing was requested here.
    fn check_audio_state(&mut self) {
        if !self.bound || self.audio_state != ScoAudioState::Inactive {
            return;
        }
        if let Some(device) = &self.device {
            if self.headset.audio_state(device) != HeadsetAudioState::Disconnected {
                self.set_audio_state(ScoAudioState::ActiveExternal);
            }
        }
    }

    fn adopt_external(&mut self) {
        if !matches!(
            self.audio_state,
            ScoAudioState::ActiveInternal
                | ScoAudioState::DeactivateRequested
                | ScoAudioState::DeactivateExternalRequested
        ) {
            self.set_audio_state(ScoAudioState::ActiveExternal);
        }
    }

    fn preferred_mode(&self) -> ScoMode {
        match &self.device {
            Some(device) => {
                let key = channel_setting_key(&device.address);
                ScoMode::from_setting(self.settings.get_int_or(&key, ScoMode::VirtualCall as i32))
            }
            None => ScoMode::Raw,
        }
    }

    fn start_link(&self, device: &HeadsetDevice) -> bool {
        match self.sco_mode {
            ScoMode::Raw => self.headset.connect_audio(),
            ScoMode::VirtualCall => self.headset.start_virtual_voice_call(device),
            ScoMode::VoiceRecognition => self.headset.start_voice_recognition(device),
        }
    }

    fn stop_link(&self, device: &HeadsetDevice) -> bool {
        match self.sco_mode {
            ScoMode::Raw => self.headset.disconnect_audio(),
            ScoMode::VirtualCall => self.headset.stop_virtual_voice_call(device),
            ScoMode::VoiceRecognition => self.headset.stop_voice_recognition(device),
        }
    }

    fn set_audio_state(&mut self, state: ScoAudioState) {
        if self.audio_state != state {
            info!(from = ?self.audio_state, to = ?state, "sco audio state");
            self.audio_state = state;
        }
    }

    fn broadcast(&self, state: ScoConnectionState) {
        self.queue.send_now(Command::BroadcastScoState { state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::ScoDeviceClass;
    use crate::recorder::ScriptedHeadset;
    use crate::store::MemorySettings;

    fn headset_device() -> HeadsetDevice {
        HeadsetDevice {
            address: "00:11:22:33:44:55".to_string(),
            name: "Headset".to_string(),
            class: ScoDeviceClass::Headset,
        }
    }

    fn manager_with(headset: Arc<ScriptedHeadset>) -> (ScoConnectionManager, CommandQueue) {
        let queue = CommandQueue::new();
        let manager = ScoConnectionManager::new(
            headset,
            Arc::new(MemorySettings::new()),
            queue.clone(),
            Duration::from_millis(3000),
        );
        (manager, queue)
    }

    fn bound_manager() -> (ScoConnectionManager, Arc<ScriptedHeadset>, CommandQueue) {
        let headset = Arc::new(ScriptedHeadset::with_device(headset_device()));
        let (mut manager, queue) = manager_with(headset.clone());
        manager.on_headset_service_connected();
        (manager, headset, queue)
    }

    fn broadcasts(queue: &CommandQueue) -> Vec<ScoConnectionState> {
        queue
            .snapshot()
            .into_iter()
            .filter_map(|c| match c {
                Command::BroadcastScoState { state } => Some(state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_two_requesters_share_one_link() {
        let (mut manager, headset, _queue) = bound_manager();
        let a = SessionId::new();
        let b = SessionId::new();

        manager.inc(a, 100, Some(ScoMode::VirtualCall), ModeGate::idle());
        manager.inc(b, 200, Some(ScoMode::VirtualCall), ModeGate::idle());
        assert_eq!(manager.total_count(), 2);
        assert_eq!(manager.audio_state(), ScoAudioState::ActiveInternal);

        manager.dec(a);
        manager.dec(b);
        assert_eq!(manager.total_count(), 0);

        assert_eq!(headset.calls("start_virtual_voice_call"), 1);
        assert_eq!(headset.calls("stop_virtual_voice_call"), 1);
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
    }

    #[test]
    fn test_start_refused_when_other_process_owns_mode() {
        let (mut manager, headset, queue) = bound_manager();
        let gate = ModeGate {
            owner_pid: Some(42),
            mode: AudioMode::InCommunication,
        };
        manager.inc(SessionId::new(), 7, None, gate);

        assert_eq!(headset.calls("start_virtual_voice_call"), 0);
        assert_eq!(
            broadcasts(&queue),
            vec![ScoConnectionState::Connecting, ScoConnectionState::Disconnected]
        );
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
    }

    #[test]
    fn test_start_allowed_for_mode_owner() {
        let (mut manager, headset, _queue) = bound_manager();
        let gate = ModeGate {
            owner_pid: Some(7),
            mode: AudioMode::InCommunication,
        };
        manager.inc(SessionId::new(), 7, Some(ScoMode::Raw), gate);
        assert_eq!(headset.calls("connect_audio"), 1);
        assert_eq!(manager.audio_state(), ScoAudioState::ActiveInternal);
    }

    #[test]
    fn test_unbound_start_waits_for_binding() {
        let headset = Arc::new(ScriptedHeadset::with_device(headset_device()));
        let (mut manager, queue) = manager_with(headset.clone());

        manager.inc(SessionId::new(), 1, Some(ScoMode::VirtualCall), ModeGate::idle());
        assert_eq!(manager.audio_state(), ScoAudioState::ActivateRequested);
        assert!(queue.contains(CommandKind::HeadsetConnectFailed));
        assert_eq!(headset.calls("start_virtual_voice_call"), 0);

        manager.on_headset_service_connected();
        assert!(!queue.contains(CommandKind::HeadsetConnectFailed));
        assert_eq!(manager.audio_state(), ScoAudioState::ActiveInternal);
        assert_eq!(headset.calls("start_virtual_voice_call"), 1);
    }

    #[test]
    fn test_bind_failure_schedules_immediate_reset() {
        let headset = Arc::new(ScriptedHeadset::unbindable());
        let (mut manager, queue) = manager_with(headset);

        manager.inc(SessionId::new(), 1, None, ModeGate::idle());
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
        assert_eq!(queue.pop_next(), Some(Command::BroadcastScoState {
            state: ScoConnectionState::Connecting
        }));
        assert_eq!(queue.pop_next(), Some(Command::HeadsetConnectFailed));
    }

    #[test]
    fn test_failed_start_reports_disconnected() {
        let (mut manager, headset, queue) = bound_manager();
        headset.fail_starts();
        manager.inc(SessionId::new(), 1, Some(ScoMode::VoiceRecognition), ModeGate::idle());
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
        assert_eq!(broadcasts(&queue).last(), Some(&ScoConnectionState::Disconnected));
    }

    #[test]
    fn test_requester_death_stops_link() {
        let (mut manager, headset, _queue) = bound_manager();
        let session = SessionId::new();
        manager.inc(session, 1, Some(ScoMode::VirtualCall), ModeGate::idle());
        manager.inc(session, 1, Some(ScoMode::VirtualCall), ModeGate::idle());

        manager.on_session_died(session);
        assert!(manager.clients().is_empty());
        assert_eq!(headset.calls("stop_virtual_voice_call"), 1);
    }

    #[test]
    fn test_preferred_mode_from_settings() {
        let headset = Arc::new(ScriptedHeadset::with_device(headset_device()));
        let settings = Arc::new(MemorySettings::with_values([(
            channel_setting_key("00:11:22:33:44:55"),
            2,
        )]));
        let queue = CommandQueue::new();
        let mut manager =
            ScoConnectionManager::new(headset.clone(), settings, queue, Duration::from_secs(3));
        manager.on_headset_service_connected();

        manager.inc(SessionId::new(), 1, None, ModeGate::idle());
        assert_eq!(manager.sco_mode(), ScoMode::VoiceRecognition);
        assert_eq!(headset.calls("start_voice_recognition"), 1);
    }

    #[test]
    fn test_out_of_range_channel_setting_falls_back() {
        assert_eq!(ScoMode::from_setting(9), ScoMode::VirtualCall);
        assert_eq!(ScoMode::from_setting(-1), ScoMode::VirtualCall);
        assert_eq!(ScoMode::from_setting(1), ScoMode::Raw);
    }

    #[test]
    fn test_external_link_tracked_and_stopped() {
        let (mut manager, headset, _queue) = bound_manager();
        manager.on_audio_state_changed(HeadsetAudioState::Connected);
        assert_eq!(manager.audio_state(), ScoAudioState::ActiveExternal);

        manager.disconnect_all(None);
        assert_eq!(headset.calls("stop_voice_recognition"), 1);
        assert_eq!(manager.audio_state(), ScoAudioState::DeactivateExternalRequested);

        manager.on_audio_state_changed(HeadsetAudioState::Disconnected);
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
    }

    #[test]
    fn test_disconnect_all_keeps_mode_owner() {
        let (mut manager, headset, _queue) = bound_manager();
        let owner = SessionId::new();
        let other = SessionId::new();
        manager.inc(owner, 10, Some(ScoMode::VirtualCall), ModeGate::idle());
        manager.inc(other, 20, Some(ScoMode::VirtualCall), ModeGate::idle());

        manager.disconnect_all(Some(10));
        assert_eq!(manager.clients().len(), 1);
        assert_eq!(manager.clients()[0].session, owner);
        assert_eq!(headset.calls("stop_virtual_voice_call"), 0);
    }

    #[test]
    fn test_broadcast_dedup() {
        let (mut manager, _headset, _queue) = bound_manager();
        assert_eq!(
            manager.deliver_broadcast(ScoConnectionState::Connecting),
            Some((ScoConnectionState::Connecting, ScoConnectionState::Disconnected))
        );
        assert_eq!(manager.deliver_broadcast(ScoConnectionState::Connecting), None);
        manager.mark_broadcast_error();
        assert!(manager
            .deliver_broadcast(ScoConnectionState::Disconnected)
            .is_some());
    }

    #[test]
    fn test_device_disconnect_resets() {
        let (mut manager, _headset, queue) = bound_manager();
        manager.inc(SessionId::new(), 1, Some(ScoMode::VirtualCall), ModeGate::idle());
        manager.set_device(headset_device(), false);
        assert!(manager.device().is_none());
        assert!(manager.clients().is_empty());
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
        assert_eq!(broadcasts(&queue).last(), Some(&ScoConnectionState::Disconnected));
    }

    #[test]
    fn test_unbind_drops_every_requester() {
        let (mut manager, _headset, _queue) = bound_manager();
        manager.inc(SessionId::new(), 1, Some(ScoMode::VirtualCall), ModeGate::idle());
        manager.inc(SessionId::new(), 2, Some(ScoMode::VirtualCall), ModeGate::idle());

        let device = manager.on_headset_service_disconnected();
        assert!(device.is_some());
        assert_eq!(manager.total_count(), 0);
        assert_eq!(manager.audio_state(), ScoAudioState::Inactive);
    }
}
