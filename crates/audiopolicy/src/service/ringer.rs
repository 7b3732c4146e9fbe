//! Ringer mode operations.

use tokio::time::Instant;
use tracing::{debug, info};

use super::AudioPolicyService;
use crate::boundary::PolicyEvent;
use crate::error::PolicyError;
use crate::pipeline::{Command, PERSIST_DELAY};
use crate::ringer::{
    ringer_affected_streams, AdjustDirection, RingerInput, RingerMode, RingerSettings,
    RingerTransition, DEFAULT_RINGER_AFFECTED,
};
use crate::store::RINGER_AFFECTED_KEY;
use crate::stream::{StreamKind, StreamSet};
use crate::volume::StreamTable;

/// Index a ringer-unmuted stream gets back when it was left at zero.
const UNMUTE_MIN_INDEX: i32 = 10;

impl AudioPolicyService {
    pub fn ringer_mode_external(&self) -> RingerMode {
        self.ringer.lock().external
    }

    pub fn ringer_mode_internal(&self) -> RingerMode {
        self.ringer.lock().internal
    }

    /// Mode as seen by apps. The delegate decides what that means for the
    /// internal mode.
    pub fn set_ringer_mode_external(&self, mode: i32, caller: &str) -> Result<(), PolicyError> {
        self.set_ringer_mode(mode, caller, true)
    }

    pub fn set_ringer_mode_internal(&self, mode: i32, caller: &str) -> Result<(), PolicyError> {
        self.set_ringer_mode(mode, caller, false)
    }

    pub fn is_stream_affected_by_ringer_mode(&self, stream: i32) -> Result<bool, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        Ok(self.ringer.lock().is_affected(stream))
    }

    pub fn is_stream_affected_by_mute(&self, stream: i32) -> Result<bool, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        Ok(self.ringer.lock().mute_affected.contains(stream))
    }

    fn set_ringer_mode(&self, mode: i32, caller: &str, external: bool) -> Result<(), PolicyError> {
        if self.config.use_fixed_volume || self.is_television() {
            return Ok(());
        }
        if caller.is_empty() {
            return Err(PolicyError::EmptyCaller);
        }
        let mode = RingerMode::try_from(mode)?;

        let mut ringer = self.ringer.lock();
        let mut streams = self.streams.lock();
        self.apply_ringer_mode(&mut ringer, &mut streams, mode, caller, external);
        Ok(())
    }

    /// Route a ringer change through the delegate so both views stay
    /// consistent. Callers have already filtered fixed volume and TV.
    pub(super) fn apply_ringer_mode(
        &self,
        ringer: &mut RingerSettings,
        streams: &mut StreamTable,
        mut mode: RingerMode,
        caller: &str,
        external: bool,
    ) {
        if mode == RingerMode::Vibrate && !self.config.has_vibrator {
            mode = RingerMode::Silent;
        }
        let old_internal = ringer.internal;
        let old_external = ringer.external;
        let policy = &self.config.volume_policy;
        debug!(%mode, caller, external, "set ringer mode");

        if external {
            self.set_ringer_mode_ext(ringer, mode);
            let internal = match self.delegate() {
                Some(delegate) => delegate.on_set_ringer_mode_external(
                    old_external,
                    mode,
                    caller,
                    old_internal,
                    policy,
                ),
                None => mode,
            };
            if internal != old_internal {
                self.set_ringer_mode_int(ringer, streams, internal, true);
            }
        } else {
            if mode != old_internal {
                self.set_ringer_mode_int(ringer, streams, mode, true);
            }
            let external = match self.delegate() {
                Some(delegate) => delegate.on_set_ringer_mode_internal(
                    old_internal,
                    mode,
                    caller,
                    old_external,
                    policy,
                ),
                None => mode,
            };
            self.set_ringer_mode_ext(ringer, external);
        }
    }

    fn set_ringer_mode_ext(&self, ringer: &mut RingerSettings, mode: RingerMode) {
        if ringer.external == mode {
            return;
        }
        ringer.external = mode;
        self.events.publish(PolicyEvent::RingerModeChanged {
            mode,
            internal: false,
        });
    }

    pub(super) fn set_ringer_mode_int(
        &self,
        ringer: &mut RingerSettings,
        streams: &mut StreamTable,
        mode: RingerMode,
        persist: bool,
    ) {
        let changed = ringer.internal != mode;
        ringer.internal = mode;
        self.mute_ringer_mode_streams(ringer, streams);

        if persist {
            self.queue.send(Command::PersistRingerMode, PERSIST_DELAY);
        }
        if changed {
            info!(%mode, "ringer mode");
            self.events.publish(PolicyEvent::RingerModeChanged {
                mode,
                internal: true,
            });
        }
    }

    /// Bring the ringer mute of every stream in line with the current mode.
    fn mute_ringer_mode_streams(&self, ringer: &mut RingerSettings, streams: &mut StreamTable) {
        let mode_mutes = ringer.internal.mutes_streams();
        for stream in StreamKind::descending() {
            let should_mute = mode_mutes && ringer.is_affected(stream);
            if ringer.is_muted_by_ringer(stream) == should_mute {
                continue;
            }

            if should_mute {
                streams.mute(stream, true);
                ringer.muted_by_ringer.insert(stream);
                continue;
            }

            // coming back from silent must be audible
            if streams.alias(stream) == StreamKind::Ring {
                let silent: Vec<_> = streams
                    .state(stream)
                    .devices()
                    .filter(|(_, index)| *index == 0)
                    .map(|(device, _)| device)
                    .collect();
                for device in silent {
                    streams.set_index(stream, UNMUTE_MIN_INDEX, device);
                }
                let device = streams.device_for_stream(stream);
                self.queue
                    .send(Command::PersistVolume { stream, device }, PERSIST_DELAY);
            }
            streams.mute(stream, false);
            ringer.muted_by_ringer.remove(stream);
        }
    }

    /// Recompute which streams the ringer mode mutes. Returns whether the
    /// set changed.
    pub(super) fn update_ringer_mode_affected_streams(
        &self,
        ringer: &mut RingerSettings,
        streams: &StreamTable,
    ) -> bool {
        let base = StreamSet::from_bits(self.settings.get_int_or(
            RINGER_AFFECTED_KEY,
            StreamSet::of(&DEFAULT_RINGER_AFFECTED).bits(),
        ));
        let affected = ringer_affected_streams(
            base,
            self.is_television(),
            self.camera_forced(),
            streams.alias(StreamKind::Dtmf),
            self.delegate(),
        );
        if affected == ringer.affected {
            return false;
        }
        ringer.affected = affected;
        self.queue.send_now(Command::PersistSetting {
            key: RINGER_AFFECTED_KEY.to_string(),
            value: affected.bits(),
        });
        true
    }

    /// Feed a volume key to the ringer state machine and apply the mode it
    /// picks.
    pub(super) fn check_for_ringer_mode_change(
        &self,
        ringer: &mut RingerSettings,
        streams: &mut StreamTable,
        old_index: i32,
        direction: AdjustDirection,
        step: i32,
        was_muted: bool,
    ) -> RingerTransition {
        let input = RingerInput {
            mode: ringer.internal,
            direction,
            has_vibrator: self.config.has_vibrator,
            is_television: self.is_television(),
            step,
            old_index,
            was_muted,
            policy: &self.config.volume_policy,
            previous_direction: AdjustDirection::Same,
            since_vibrate: None,
            can_enter_silent: self
                .delegate()
                .map_or(true, |d| d.can_volume_down_enter_silent()),
        };
        let transition = ringer.machine.step(input, Instant::now());

        if !self.config.use_fixed_volume && !self.is_television() {
            self.apply_ringer_mode(ringer, streams, transition.mode, "volume_keys", false);
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::super::tests::{harness, harness_with};
    use super::super::{AudioPolicyService, Collaborators, ServiceConfig};
    use crate::boundary::PolicyEvent;
    use crate::device::Device;
    use crate::error::PolicyError;
    use crate::recorder::{RecordingDelegate, RecordingRouting};
    use crate::ringer::RingerMode;
    use crate::store::{MemorySettings, SettingsStore, MODE_RINGER_KEY};
    use crate::stream::StreamKind;
    use policyconf::PlatformKind;

    #[test]
    fn test_empty_caller_rejected() {
        let h = harness(PlatformKind::Voice);
        assert_eq!(
            h.service.set_ringer_mode_external(RingerMode::Silent.as_i32(), ""),
            Err(PolicyError::EmptyCaller)
        );
        assert_eq!(
            h.service.set_ringer_mode_internal(7, "settings"),
            Err(PolicyError::InvalidRingerMode(7))
        );
    }

    #[test]
    fn test_silent_mutes_and_normal_restores() {
        let h = harness(PlatformKind::Voice);
        h.service
            .set_ringer_mode_external(RingerMode::Silent.as_i32(), "settings")
            .unwrap();
        assert_eq!(h.service.ringer_mode_internal(), RingerMode::Silent);
        assert!(h.service.is_stream_mute(StreamKind::Ring as i32).unwrap());
        assert!(h.service.is_stream_mute(StreamKind::Notification as i32).unwrap());
        assert!(!h.service.is_stream_mute(StreamKind::Music as i32).unwrap());

        h.service
            .set_ringer_mode_external(RingerMode::Normal.as_i32(), "settings")
            .unwrap();
        assert!(!h.service.is_stream_mute(StreamKind::Ring as i32).unwrap());
    }

    #[test]
    fn test_ringer_mode_persisted_after_delay() {
        let h = harness(PlatformKind::Voice);
        h.service
            .set_ringer_mode_internal(RingerMode::Vibrate.as_i32(), "settings")
            .unwrap();
        h.service.process_pending();
        assert_eq!(h.settings.get_int(MODE_RINGER_KEY), None);

        h.service.advance(std::time::Duration::from_secs(1));
        assert_eq!(
            h.settings.get_int(MODE_RINGER_KEY),
            Some(RingerMode::Vibrate.as_i32())
        );
    }

    #[test]
    fn test_unmute_lifts_zero_ring_index() {
        let h = harness(PlatformKind::Voice);
        h.service
            .set_ringer_mode_internal(RingerMode::Silent.as_i32(), "settings")
            .unwrap();
        {
            let mut streams = h.service.streams.lock();
            streams.set_index(StreamKind::Ring, 0, Device::SPEAKER);
        }
        h.service
            .set_ringer_mode_internal(RingerMode::Normal.as_i32(), "settings")
            .unwrap();
        let streams = h.service.streams.lock();
        assert_eq!(streams.get_index(StreamKind::Ring, Device::SPEAKER), 10);
    }

    #[test]
    fn test_events_for_both_views() {
        let h = harness(PlatformKind::Voice);
        h.service
            .set_ringer_mode_external(RingerMode::Vibrate.as_i32(), "settings")
            .unwrap();
        let ringer_events: Vec<_> = h
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, PolicyEvent::RingerModeChanged { .. }))
            .collect();
        assert_eq!(
            ringer_events,
            vec![
                PolicyEvent::RingerModeChanged {
                    mode: RingerMode::Vibrate,
                    internal: false
                },
                PolicyEvent::RingerModeChanged {
                    mode: RingerMode::Vibrate,
                    internal: true
                },
            ]
        );
    }

    #[test]
    fn test_television_ignores_ringer_writes() {
        let h = harness(PlatformKind::Television);
        h.service
            .set_ringer_mode_external(RingerMode::Silent.as_i32(), "settings")
            .unwrap();
        assert_eq!(h.service.ringer_mode_external(), RingerMode::Normal);
    }

    #[test]
    fn test_delegate_keeps_internal_mode() {
        let routing = Arc::new(RecordingRouting::new());
        let delegate = Arc::new(RecordingDelegate::new());
        delegate.pin_internal(RingerMode::Normal);
        let collaborators = Collaborators::new(routing, Arc::new(MemorySettings::new()))
            .with_ringer_delegate(delegate.clone());
        let service = AudioPolicyService::new(ServiceConfig::default(), collaborators);

        service
            .set_ringer_mode_external(RingerMode::Silent.as_i32(), "dnd")
            .unwrap();
        assert_eq!(service.ringer_mode_external(), RingerMode::Silent);
        assert_eq!(service.ringer_mode_internal(), RingerMode::Normal);
        assert_eq!(delegate.calls().len(), 1);
        assert!(delegate.calls()[0].0);
    }

    #[test]
    fn test_dtmf_follows_ring_when_idle() {
        let h = harness_with(ServiceConfig::default(), MemorySettings::new());
        assert!(h
            .service
            .is_stream_affected_by_ringer_mode(StreamKind::Dtmf as i32)
            .unwrap());
        assert!(h
            .service
            .is_stream_affected_by_ringer_mode(StreamKind::SystemEnforced as i32)
            .unwrap());
    }
}
