//! Volume operations: key adjustments, absolute sets, queries and the
//! safe media volume controls.

use std::sync::atomic::Ordering;

use tracing::{debug, info};

use super::AudioPolicyService;
use crate::boundary::ForceConfig;
use crate::device::Device;
use crate::error::PolicyError;
use crate::pipeline::{Command, CommandKind, UNMUTE_STREAM_DELAY};
use crate::ringer::{AdjustDirection, AdjustFlags, RingerMode, RingerSettings};
use crate::safe_volume::{PendingVolumeCommand, SafeVolumeState};
use crate::store::LINK_NOTIFICATION_KEY;
use crate::stream::{to_ui, StreamKind};
use crate::volume::StreamTable;

/// Controller calls deferred until every lock is released.
#[derive(Default)]
struct ControllerNotice {
    warning: Option<AdjustFlags>,
    changed: Option<(StreamKind, AdjustFlags)>,
}

impl AudioPolicyService {
    // === Adjustments ===

    /// Volume key on an explicit stream.
    pub fn adjust_stream_volume(
        &self,
        stream: i32,
        direction: i32,
        flags: AdjustFlags,
        caller: &str,
    ) -> Result<(), PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        let direction = AdjustDirection::try_from(direction)?;
        debug!(%stream, ?direction, flags = flags.bits(), caller, "adjust stream volume");
        self.adjust_stream_volume_int(stream, direction, flags);
        Ok(())
    }

    /// Volume key with no explicit stream: the active stream type decides.
    pub fn adjust_suggested_stream_volume(
        &self,
        direction: i32,
        suggested: Option<i32>,
        mut flags: AdjustFlags,
        caller: &str,
    ) -> Result<(), PolicyError> {
        let direction = AdjustDirection::try_from(direction)?;
        let suggested = suggested.map(StreamKind::try_from).transpose()?;
        let stream = self.active_stream_type(suggested);

        let alias = self.streams.lock().alias(stream);
        // key click only for the ringer
        if alias != StreamKind::Ring {
            flags.remove(AdjustFlags::PLAY_SOUND);
        }
        debug!(%stream, ?direction, caller, "adjust suggested stream volume");
        self.adjust_stream_volume_int(stream, direction, flags);
        Ok(())
    }

    fn adjust_stream_volume_int(
        &self,
        stream: StreamKind,
        direction: AdjustDirection,
        mut flags: AdjustFlags,
    ) {
        if self.config.use_fixed_volume {
            return;
        }
        let is_mute_adjust = direction.is_mute_adjust();
        let camera_forced = self.camera_forced();
        let is_television = self.is_television();
        let mut notice = ControllerNotice::default();

        {
            let mut guard = self.safe_volume.lock();
            let mut ringer = self.ringer.lock();
            let mut streams = self.streams.lock();

            if is_mute_adjust && !ringer.mute_affected.contains(stream) {
                return;
            }

            let alias = streams.alias(stream);
            let device = streams.device_for_stream(alias);
            let mut alias_index = streams.get_index(alias, device);
            let mut adjust_volume = true;

            guard.clear_pending();

            flags.remove(AdjustFlags::FIXED_VOLUME);
            let step = if alias == StreamKind::Music
                && device.intersects(streams.fixed_volume_devices())
            {
                flags.insert(AdjustFlags::FIXED_VOLUME);
                let step = guard
                    .active_cap(device)
                    .unwrap_or_else(|| streams.state(alias).max_index());
                if alias_index != 0 {
                    alias_index = step;
                }
                step
            } else {
                streams.rescale(10, stream, alias)
            };

            if flags.contains(AdjustFlags::ALLOW_RINGER_MODES)
                || alias == streams.aliases().ui_sounds_stream()
            {
                if ringer.internal == RingerMode::Vibrate {
                    flags.remove(AdjustFlags::VIBRATE);
                }
                let was_muted = streams.state(alias).is_muted();
                let transition = self.check_for_ringer_mode_change(
                    &mut ringer,
                    &mut streams,
                    alias_index,
                    direction,
                    step,
                    was_muted,
                );
                adjust_volume = transition.apply_volume;
                if transition.show_silent_hint {
                    flags.insert(AdjustFlags::SHOW_SILENT_HINT);
                }
                if transition.show_vibrate_hint {
                    flags.insert(AdjustFlags::SHOW_VIBRATE_HINT);
                }
            }

            if alias == StreamKind::Music && ringer.is_muted_by_ringer(StreamKind::Music) {
                adjust_volume = false;
            }

            let old_index = streams.get_index(stream, device);

            if adjust_volume && direction != AdjustDirection::Same {
                self.queue.remove(CommandKind::UnmuteStream);

                if is_mute_adjust {
                    let state = if direction == AdjustDirection::ToggleMute {
                        !streams.state(alias).is_muted()
                    } else {
                        direction == AdjustDirection::Mute
                    };
                    for other in StreamKind::ALL {
                        if streams.alias(other) != alias {
                            continue;
                        }
                        if other == StreamKind::SystemEnforced && camera_forced {
                            continue;
                        }
                        streams.mute(other, state);
                    }
                } else if direction == AdjustDirection::Raise
                    && !guard.check(alias, alias_index + step, device)
                {
                    info!(%stream, index = alias_index + step, "raise blocked by safe volume");
                    notice.warning = Some(flags);
                } else if streams.adjust_index(alias, direction.sign() * step, device)
                    || streams.state(alias).is_muted()
                {
                    if streams.state(alias).is_muted() {
                        if direction == AdjustDirection::Raise {
                            streams.mute(alias, false);
                        } else if direction == AdjustDirection::Lower && is_television {
                            self.queue.send(
                                Command::UnmuteStream {
                                    stream: alias,
                                    flags,
                                },
                                UNMUTE_STREAM_DELAY,
                            );
                        }
                    }
                    self.queue.send_now(Command::SetDeviceVolume {
                        stream: alias,
                        device,
                    });
                }
            }

            let new_index = streams.get_index(stream, device);
            debug!(%stream, old_index, new_index, "adjusted");
            notice.changed = Some((alias, flags));
        }

        self.notify_controller(notice);
    }

    // === Absolute sets ===

    /// Set a stream's volume in UI steps for its current device.
    pub fn set_stream_volume(
        &self,
        stream: i32,
        index: i32,
        mut flags: AdjustFlags,
        caller: &str,
    ) -> Result<(), PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        if self.config.use_fixed_volume {
            return Ok(());
        }
        debug!(%stream, index, caller, "set stream volume");
        let mut notice = ControllerNotice::default();

        {
            let mut guard = self.safe_volume.lock();
            let mut ringer = self.ringer.lock();
            let mut streams = self.streams.lock();

            let alias = streams.alias(stream);
            let device = streams.device_for_stream(stream);
            guard.clear_pending();

            let mut index = streams.rescale(index.saturating_mul(10), stream, alias);

            flags.remove(AdjustFlags::FIXED_VOLUME);
            if alias == StreamKind::Music && device.intersects(streams.fixed_volume_devices()) {
                flags.insert(AdjustFlags::FIXED_VOLUME);
                if index != 0 {
                    index = guard
                        .active_cap(device)
                        .unwrap_or_else(|| streams.state(alias).max_index());
                }
            }

            if guard.check(alias, index, device) {
                self.on_set_stream_volume(&mut ringer, &mut streams, stream, index, flags, device);
            } else {
                info!(%stream, index, "set held back by safe volume");
                notice.warning = Some(flags);
                guard.stash(PendingVolumeCommand {
                    stream,
                    index,
                    flags,
                    device,
                });
            }
            notice.changed = Some((alias, flags));
        }

        self.notify_controller(notice);
        Ok(())
    }

    fn on_set_stream_volume(
        &self,
        ringer: &mut RingerSettings,
        streams: &mut StreamTable,
        stream: StreamKind,
        index: i32,
        flags: AdjustFlags,
        device: Device,
    ) {
        let alias = streams.alias(stream);
        self.set_stream_volume_int(streams, alias, index, device, false);

        if (flags.contains(AdjustFlags::ALLOW_RINGER_MODES)
            || alias == streams.aliases().ui_sounds_stream())
            && !self.config.use_fixed_volume
            && !self.is_television()
        {
            let mode = if index != 0 {
                RingerMode::Normal
            } else if self.config.has_vibrator {
                RingerMode::Vibrate
            } else if self.config.volume_policy.volume_down_to_enter_silent {
                RingerMode::Silent
            } else {
                RingerMode::Normal
            };
            self.apply_ringer_mode(ringer, streams, mode, "set_stream_volume", false);
        }

        streams.mute(alias, index == 0);
    }

    /// Store an index and schedule it to be applied. `force` applies even
    /// when nothing changed.
    pub(super) fn set_stream_volume_int(
        &self,
        streams: &mut StreamTable,
        stream: StreamKind,
        index: i32,
        device: Device,
        force: bool,
    ) {
        if streams.set_index(stream, index, device) || force {
            self.queue
                .send_now(Command::SetDeviceVolume { stream, device });
        }
    }

    fn notify_controller(&self, notice: ControllerNotice) {
        if let Some(flags) = notice.warning {
            self.controller.display_safe_volume_warning(flags);
        }
        if let Some((stream, flags)) = notice.changed {
            self.controller.volume_changed(stream, flags);
        }
    }

    // === Queries ===

    /// Current volume in UI steps. Muted reads as 0; fixed-volume music
    /// reads as max.
    pub fn get_stream_volume(&self, stream: i32) -> Result<i32, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        let streams = self.streams.lock();
        let device = streams.device_for_stream(stream);
        let state = streams.state(stream);
        let mut index = if state.is_muted() {
            0
        } else {
            state.get_index(device)
        };
        if index != 0
            && streams.alias(stream) == StreamKind::Music
            && device.intersects(streams.fixed_volume_devices())
        {
            index = state.max_index();
        }
        Ok(to_ui(index))
    }

    pub fn get_stream_max_volume(&self, stream: i32) -> Result<i32, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        Ok(to_ui(self.streams.lock().state(stream).max_index()))
    }

    pub fn get_stream_min_volume(&self, stream: i32) -> Result<i32, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        Ok(to_ui(self.streams.lock().state(stream).min_index()))
    }

    /// Volume the stream would play at once unmuted.
    pub fn get_last_audible_stream_volume(&self, stream: i32) -> Result<i32, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        let streams = self.streams.lock();
        let device = streams.device_for_stream(stream);
        Ok(to_ui(streams.get_index(stream, device)))
    }

    pub fn is_stream_mute(&self, stream: i32) -> Result<bool, PolicyError> {
        let stream = StreamKind::try_from(stream)?;
        Ok(self.streams.lock().state(stream).is_muted())
    }

    pub fn get_ui_sounds_stream(&self) -> StreamKind {
        self.streams.lock().aliases().ui_sounds_stream()
    }

    // === Safe media volume ===

    pub fn safe_volume_state(&self) -> SafeVolumeState {
        self.safe_volume.lock().state()
    }

    /// The user confirmed the warning: lift the cap and replay the held
    /// back set, once.
    pub fn disable_safe_media_volume(&self) {
        let mut guard = self.safe_volume.lock();
        let mut ringer = self.ringer.lock();
        let mut streams = self.streams.lock();
        guard.set_enabled(false, &mut streams);
        if let Some(pending) = guard.take_pending() {
            info!(stream = %pending.stream, index = pending.index, "replaying held back volume");
            self.on_set_stream_volume(
                &mut ringer,
                &mut streams,
                pending.stream,
                pending.index,
                pending.flags,
                pending.device,
            );
        }
    }

    /// A new jurisdiction code is known; the profile is re-evaluated on
    /// the command consumer.
    pub fn on_jurisdiction_changed(&self, code: u32) {
        self.jurisdiction.store(code, Ordering::SeqCst);
        self.queue.send_now(Command::ConfigureSafeVolume);
    }

    // === Alias and camera policy ===

    /// Rebuild the alias table for the current call state.
    pub(super) fn update_stream_volume_alias(
        &self,
        ringer: &mut RingerSettings,
        streams: &mut StreamTable,
        in_communication: bool,
        update_volumes: bool,
    ) {
        streams.aliases_mut().set_in_communication(in_communication);
        self.update_ringer_mode_affected_streams(ringer, streams);
        if update_volumes {
            let dtmf_alias = streams.alias(StreamKind::Dtmf);
            streams.set_all_indexes(StreamKind::Dtmf, dtmf_alias);
            let mode = ringer.internal;
            self.set_ringer_mode_int(ringer, streams, mode, false);
            self.queue.send_now(Command::SetAllVolumes {
                stream: StreamKind::Dtmf,
            });
        }
    }

    /// Toggle whether notification volume follows the ringer.
    pub fn set_link_notification(&self, link: bool) {
        {
            let mut ringer = self.ringer.lock();
            let mut streams = self.streams.lock();
            if streams.aliases_mut().set_link_notification(link) {
                let alias = streams.alias(StreamKind::Notification);
                streams.set_all_indexes(StreamKind::Notification, alias);
                self.update_ringer_mode_affected_streams(&mut ringer, &streams);
                let mode = ringer.internal;
                self.set_ringer_mode_int(&mut ringer, &mut streams, mode, false);
                self.queue.send_now(Command::SetAllVolumes {
                    stream: StreamKind::Notification,
                });
            }
        }
        self.queue.send_now(Command::PersistSetting {
            key: LINK_NOTIFICATION_KEY.to_string(),
            value: i32::from(link),
        });
    }

    /// Camera shutter sound forced on or off. A forced sound leaves the
    /// ringer-affected set and plays at max.
    pub fn set_camera_sound_forced(&self, forced: bool) {
        let changed = self.camera_sound_forced.swap(forced, Ordering::SeqCst) != forced;
        if changed && !self.is_television() {
            let mut ringer = self.ringer.lock();
            let mut streams = self.streams.lock();
            if forced {
                let max = streams.state(StreamKind::SystemEnforced).max_index();
                let devices: Vec<Device> = streams
                    .state(StreamKind::SystemEnforced)
                    .devices()
                    .map(|(device, _)| device)
                    .collect();
                for device in devices {
                    streams.set_index(StreamKind::SystemEnforced, max, device);
                }
            } else {
                streams.set_all_indexes(StreamKind::SystemEnforced, StreamKind::System);
            }
            self.update_ringer_mode_affected_streams(&mut ringer, &streams);
            let mode = ringer.internal;
            self.set_ringer_mode_int(&mut ringer, &mut streams, mode, false);
        }

        let config = if forced {
            ForceConfig::SystemEnforced
        } else {
            ForceConfig::None
        };
        self.queue.send_now(Command::SetForceUse {
            usage: crate::boundary::ForceUsage::System,
            config,
        });
        self.queue.send_now(Command::SetAllVolumes {
            stream: StreamKind::SystemEnforced,
        });
    }
}
