//! Ringer mode state machine.
//!
//! Volume keys on the ringer stream walk NORMAL, VIBRATE and SILENT. The
//! transition itself is a pure function of the current mode, the key, and
//! the platform; `RingerModeMachine` adds the two bits of history it needs
//! (previous direction and when vibrate was entered).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use policyconf::RingerConfig;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::error;

use crate::error::PolicyError;
use crate::stream::{StreamKind, StreamSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RingerMode {
    Silent = 0,
    Vibrate = 1,
    Normal = 2,
}

impl RingerMode {
    /// Whether ringer-affected streams are muted in this mode.
    pub fn mutes_streams(self) -> bool {
        matches!(self, RingerMode::Silent | RingerMode::Vibrate)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for RingerMode {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RingerMode::Silent),
            1 => Ok(RingerMode::Vibrate),
            2 => Ok(RingerMode::Normal),
            other => Err(PolicyError::InvalidRingerMode(other)),
        }
    }
}

impl fmt::Display for RingerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RingerMode::Silent => "SILENT",
            RingerMode::Vibrate => "VIBRATE",
            RingerMode::Normal => "NORMAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustDirection {
    Lower,
    Same,
    Raise,
    Mute,
    Unmute,
    ToggleMute,
}

impl AdjustDirection {
    pub fn is_mute_adjust(self) -> bool {
        matches!(
            self,
            AdjustDirection::Mute | AdjustDirection::Unmute | AdjustDirection::ToggleMute
        )
    }

    pub fn as_i32(self) -> i32 {
        match self {
            AdjustDirection::Lower => -1,
            AdjustDirection::Same => 0,
            AdjustDirection::Raise => 1,
            AdjustDirection::Mute => -100,
            AdjustDirection::Unmute => 100,
            AdjustDirection::ToggleMute => 101,
        }
    }

    /// -1, 0 or +1 for index steps; mute adjusts do not step.
    pub fn sign(self) -> i32 {
        match self {
            AdjustDirection::Lower => -1,
            AdjustDirection::Raise => 1,
            _ => 0,
        }
    }
}

impl TryFrom<i32> for AdjustDirection {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(AdjustDirection::Lower),
            0 => Ok(AdjustDirection::Same),
            1 => Ok(AdjustDirection::Raise),
            -100 => Ok(AdjustDirection::Mute),
            100 => Ok(AdjustDirection::Unmute),
            101 => Ok(AdjustDirection::ToggleMute),
            other => Err(PolicyError::InvalidDirection(other)),
        }
    }
}

/// Flags accompanying a volume request and forwarded to the volume UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AdjustFlags(u32);

impl AdjustFlags {
    pub const SHOW_UI: AdjustFlags = AdjustFlags(1 << 0);
    pub const ALLOW_RINGER_MODES: AdjustFlags = AdjustFlags(1 << 1);
    pub const PLAY_SOUND: AdjustFlags = AdjustFlags(1 << 2);
    pub const VIBRATE: AdjustFlags = AdjustFlags(1 << 4);
    pub const FIXED_VOLUME: AdjustFlags = AdjustFlags(1 << 5);
    pub const SHOW_SILENT_HINT: AdjustFlags = AdjustFlags(1 << 7);
    pub const SHOW_VIBRATE_HINT: AdjustFlags = AdjustFlags(1 << 11);

    pub const fn empty() -> Self {
        AdjustFlags(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        AdjustFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: AdjustFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AdjustFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AdjustFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for AdjustFlags {
    type Output = AdjustFlags;

    fn bitor(self, rhs: AdjustFlags) -> AdjustFlags {
        AdjustFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for AdjustFlags {
    fn bitor_assign(&mut self, rhs: AdjustFlags) {
        self.0 |= rhs.0;
    }
}

/// How volume keys may move between ringer modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePolicy {
    pub volume_down_to_enter_silent: bool,
    pub volume_up_to_exit_silent: bool,
    pub do_not_disturb_when_silent: bool,
    pub vibrate_to_silent_debounce: Duration,
}

impl Default for VolumePolicy {
    fn default() -> Self {
        Self::from(&RingerConfig::default())
    }
}

impl From<&RingerConfig> for VolumePolicy {
    fn from(config: &RingerConfig) -> Self {
        Self {
            volume_down_to_enter_silent: config.volume_down_to_enter_silent,
            volume_up_to_exit_silent: config.volume_up_to_exit_silent,
            do_not_disturb_when_silent: config.do_not_disturb_when_silent,
            vibrate_to_silent_debounce: Duration::from_millis(config.vibrate_to_silent_debounce_ms),
        }
    }
}

/// Everything the transition looks at.
#[derive(Debug, Clone)]
pub struct RingerInput<'a> {
    pub mode: RingerMode,
    pub direction: AdjustDirection,
    pub has_vibrator: bool,
    pub is_television: bool,
    /// One UI step in internal units of the stream being adjusted.
    pub step: i32,
    pub old_index: i32,
    pub was_muted: bool,
    pub policy: &'a VolumePolicy,
    pub previous_direction: AdjustDirection,
    /// Time spent in vibrate since the last NORMAL to VIBRATE step, `None`
    /// if that never happened.
    pub since_vibrate: Option<Duration>,
    /// Ringer delegate veto on reaching silent by volume-down.
    pub can_enter_silent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingerTransition {
    pub mode: RingerMode,
    pub apply_volume: bool,
    pub show_silent_hint: bool,
    pub show_vibrate_hint: bool,
    /// NORMAL to VIBRATE happened; the caller records the time.
    pub entered_vibrate: bool,
}

/// Decide the ringer mode after a volume key.
pub fn next_ringer_mode(input: &RingerInput<'_>) -> RingerTransition {
    let mut out = RingerTransition {
        mode: input.mode,
        apply_volume: true,
        show_silent_hint: false,
        show_vibrate_hint: false,
        entered_vibrate: false,
    };
    let step = input.step;
    let old = input.old_index;
    let muted_but_loud = input.is_television && old >= 2 * step && input.was_muted;
    let raising = matches!(
        input.direction,
        AdjustDirection::Raise | AdjustDirection::ToggleMute | AdjustDirection::Unmute
    );

    match input.mode {
        RingerMode::Normal => {
            if input.direction == AdjustDirection::Lower {
                if input.has_vibrator {
                    // step <= old < 2*step is "old UI index is 1" under rounding
                    if step <= old && old < 2 * step {
                        out.mode = RingerMode::Vibrate;
                        out.entered_vibrate = true;
                    }
                } else if old == step && input.policy.volume_down_to_enter_silent {
                    out.mode = RingerMode::Silent;
                    out.apply_volume = false;
                }
            } else if input.is_television
                && matches!(
                    input.direction,
                    AdjustDirection::ToggleMute | AdjustDirection::Mute
                )
            {
                out.mode = if input.has_vibrator {
                    RingerMode::Vibrate
                } else {
                    RingerMode::Silent
                };
                out.apply_volume = false;
            }
        }
        RingerMode::Vibrate => {
            if !input.has_vibrator {
                error!("ringer mode is vibrate but no vibrator is present");
                return out;
            }
            if input.direction == AdjustDirection::Lower {
                if muted_but_loud {
                    out.mode = RingerMode::Normal;
                } else if input.previous_direction != AdjustDirection::Lower {
                    if input.policy.volume_down_to_enter_silent {
                        let debounced = input
                            .since_vibrate
                            .map_or(true, |d| d > input.policy.vibrate_to_silent_debounce);
                        if debounced && input.can_enter_silent {
                            out.mode = RingerMode::Silent;
                        }
                    } else {
                        out.show_vibrate_hint = true;
                    }
                }
            } else if raising {
                out.mode = RingerMode::Normal;
            }
            out.apply_volume = false;
        }
        RingerMode::Silent => {
            if input.direction == AdjustDirection::Lower && muted_but_loud {
                out.mode = RingerMode::Normal;
            } else if raising {
                if !input.policy.volume_up_to_exit_silent {
                    out.show_silent_hint = true;
                } else if input.has_vibrator && input.direction == AdjustDirection::Raise {
                    out.mode = RingerMode::Vibrate;
                } else {
                    out.mode = RingerMode::Normal;
                }
            }
            out.apply_volume = false;
        }
    }

    out
}

/// Key history the transition depends on.
#[derive(Debug, Clone)]
pub struct RingerModeMachine {
    previous_direction: AdjustDirection,
    lowered_to_vibrate_at: Option<Instant>,
}

impl Default for RingerModeMachine {
    fn default() -> Self {
        Self {
            previous_direction: AdjustDirection::Same,
            lowered_to_vibrate_at: None,
        }
    }
}

impl RingerModeMachine {
    /// Run one transition and update history. `input.previous_direction`
    /// and `input.since_vibrate` are overwritten from the machine's own
    /// record.
    pub fn step(&mut self, mut input: RingerInput<'_>, now: Instant) -> RingerTransition {
        input.previous_direction = self.previous_direction;
        input.since_vibrate = self
            .lowered_to_vibrate_at
            .map(|at| now.saturating_duration_since(at));

        let transition = next_ringer_mode(&input);
        if transition.entered_vibrate {
            self.lowered_to_vibrate_at = Some(now);
        }
        self.previous_direction = input.direction;
        transition
    }

    pub fn previous_direction(&self) -> AdjustDirection {
        self.previous_direction
    }
}

/// Hook letting another component (do-not-disturb, typically) reconcile
/// the internal and external ringer mode views.
pub trait RingerModeDelegate: Send + Sync {
    /// A caller set the external mode; returns the internal mode to apply.
    fn on_set_ringer_mode_external(
        &self,
        old_external: RingerMode,
        new_external: RingerMode,
        caller: &str,
        internal: RingerMode,
        policy: &VolumePolicy,
    ) -> RingerMode;

    /// The internal mode changed; returns the external mode to report.
    fn on_set_ringer_mode_internal(
        &self,
        old_internal: RingerMode,
        new_internal: RingerMode,
        caller: &str,
        external: RingerMode,
        policy: &VolumePolicy,
    ) -> RingerMode;

    fn can_volume_down_enter_silent(&self) -> bool {
        true
    }

    fn ringer_affected_streams(&self, streams: StreamSet) -> StreamSet {
        streams
    }
}

pub const DEFAULT_RINGER_AFFECTED: [StreamKind; 4] = [
    StreamKind::Ring,
    StreamKind::Notification,
    StreamKind::System,
    StreamKind::SystemEnforced,
];

pub const DEFAULT_MUTE_AFFECTED: [StreamKind; 4] = [
    StreamKind::Music,
    StreamKind::Ring,
    StreamKind::Notification,
    StreamKind::System,
];

/// Derive the ringer-affected set from its stored base value.
pub fn ringer_affected_streams(
    base: StreamSet,
    is_television: bool,
    camera_sound_forced: bool,
    dtmf_alias: StreamKind,
    delegate: Option<&dyn RingerModeDelegate>,
) -> StreamSet {
    let mut streams = if is_television {
        StreamSet::EMPTY
    } else if let Some(delegate) = delegate {
        delegate.ringer_affected_streams(base)
    } else {
        base
    };

    if camera_sound_forced {
        streams.remove(StreamKind::SystemEnforced);
    } else {
        streams.insert(StreamKind::SystemEnforced);
    }

    if dtmf_alias == StreamKind::Ring {
        streams.insert(StreamKind::Dtmf);
    } else {
        streams.remove(StreamKind::Dtmf);
    }
    streams
}

/// Ringer state guarded by the ringer settings lock.
#[derive(Debug, Clone)]
pub struct RingerSettings {
    pub internal: RingerMode,
    pub external: RingerMode,
    pub affected: StreamSet,
    pub mute_affected: StreamSet,
    pub muted_by_ringer: StreamSet,
    pub machine: RingerModeMachine,
}

impl RingerSettings {
    pub fn new(mode: RingerMode, affected: StreamSet, mute_affected: StreamSet) -> Self {
        Self {
            internal: mode,
            external: mode,
            affected,
            mute_affected,
            muted_by_ringer: StreamSet::EMPTY,
            machine: RingerModeMachine::default(),
        }
    }

    pub fn is_affected(&self, stream: StreamKind) -> bool {
        self.affected.contains(stream)
    }

    pub fn is_muted_by_ringer(&self, stream: StreamKind) -> bool {
        self.muted_by_ringer.contains(stream)
    }
}
