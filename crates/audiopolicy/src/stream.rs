//! Stream kinds and their static volume ranges.
//!
//! Indices are kept internally in tenths of a UI step so that rescaling
//! between streams with different step counts keeps precision.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PolicyError;

/// Logical audio use-case, each with independent volume state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    VoiceCall = 0,
    System = 1,
    Ring = 2,
    Music = 3,
    Alarm = 4,
    Notification = 5,
    BluetoothSco = 6,
    SystemEnforced = 7,
    Dtmf = 8,
    Tts = 9,
}

impl StreamKind {
    pub const COUNT: usize = 10;

    pub const ALL: [StreamKind; StreamKind::COUNT] = [
        StreamKind::VoiceCall,
        StreamKind::System,
        StreamKind::Ring,
        StreamKind::Music,
        StreamKind::Alarm,
        StreamKind::Notification,
        StreamKind::BluetoothSco,
        StreamKind::SystemEnforced,
        StreamKind::Dtmf,
        StreamKind::Tts,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::VoiceCall => "VOICE_CALL",
            StreamKind::System => "SYSTEM",
            StreamKind::Ring => "RING",
            StreamKind::Music => "MUSIC",
            StreamKind::Alarm => "ALARM",
            StreamKind::Notification => "NOTIFICATION",
            StreamKind::BluetoothSco => "BLUETOOTH_SCO",
            StreamKind::SystemEnforced => "SYSTEM_ENFORCED",
            StreamKind::Dtmf => "DTMF",
            StreamKind::Tts => "TTS",
        }
    }

    /// Settings key prefix for a stream that is its own alias.
    pub fn settings_name(self) -> &'static str {
        match self {
            StreamKind::VoiceCall => "volume_voice",
            StreamKind::System | StreamKind::SystemEnforced => "volume_system",
            StreamKind::Ring | StreamKind::Dtmf => "volume_ring",
            StreamKind::Music | StreamKind::Tts => "volume_music",
            StreamKind::Alarm => "volume_alarm",
            StreamKind::Notification => "volume_notification",
            StreamKind::BluetoothSco => "volume_bluetooth_sco",
        }
    }

    /// Iterate from the highest stream kind down, the order alias
    /// propagation and ringer muting walk the table in.
    pub fn descending() -> impl Iterator<Item = StreamKind> {
        Self::ALL.into_iter().rev()
    }
}

impl TryFrom<i32> for StreamKind {
    type Error = PolicyError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(PolicyError::InvalidStream(value))
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set of stream kinds, persisted as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamSet(u32);

impl StreamSet {
    pub const EMPTY: StreamSet = StreamSet(0);

    pub fn of(streams: &[StreamKind]) -> Self {
        streams.iter().fold(Self::EMPTY, |set, s| set.with(*s))
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits as u32 & ((1 << StreamKind::COUNT) - 1))
    }

    pub fn bits(self) -> i32 {
        self.0 as i32
    }

    pub fn contains(self, stream: StreamKind) -> bool {
        self.0 & (1 << stream.index()) != 0
    }

    pub fn with(self, stream: StreamKind) -> Self {
        Self(self.0 | (1 << stream.index()))
    }

    pub fn without(self, stream: StreamKind) -> Self {
        Self(self.0 & !(1 << stream.index()))
    }

    pub fn insert(&mut self, stream: StreamKind) {
        *self = self.with(stream);
    }

    pub fn remove(&mut self, stream: StreamKind) {
        *self = self.without(stream);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = StreamKind> {
        StreamKind::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

const MAX_STEPS: [i32; StreamKind::COUNT] = [5, 7, 7, 15, 7, 7, 15, 7, 15, 15];
const MIN_STEPS: [i32; StreamKind::COUNT] = [1, 0, 0, 0, 0, 0, 1, 0, 0, 0];
const DEFAULT_STEPS: [i32; StreamKind::COUNT] = [4, 7, 5, 11, 6, 5, 7, 7, 11, 11];

/// Largest step count an override may set.
pub const MAX_OVERRIDE_STEPS: i32 = 1000;

/// Convert an internal index to UI steps, rounding to nearest.
pub fn to_ui(index: i32) -> i32 {
    index.saturating_add(5) / 10
}

/// Static min/max/default table, in UI steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCatalog {
    max: [i32; StreamKind::COUNT],
    min: [i32; StreamKind::COUNT],
    default: [i32; StreamKind::COUNT],
}

impl Default for StreamCatalog {
    fn default() -> Self {
        Self {
            max: MAX_STEPS,
            min: MIN_STEPS,
            default: DEFAULT_STEPS,
        }
    }
}

impl StreamCatalog {
    /// Catalog with optional step overrides for the voice call and music
    /// streams. An override of 0 keeps the stock range; any other value also
    /// moves that stream's default to three quarters of the new range.
    pub fn with_overrides(voice_call_steps: u32, media_steps: u32) -> Self {
        let mut catalog = Self::default();
        for (stream, steps) in [
            (StreamKind::VoiceCall, voice_call_steps),
            (StreamKind::Music, media_steps),
        ] {
            if steps == 0 {
                continue;
            }
            let requested = i32::try_from(steps).unwrap_or(i32::MAX);
            let steps = requested.min(MAX_OVERRIDE_STEPS);
            if steps != requested {
                warn!(%stream, requested, steps, "step override capped");
            }
            catalog.max[stream.index()] = steps;
            catalog.default[stream.index()] = steps * 3 / 4;
        }
        catalog
    }

    pub fn max_steps(&self, stream: StreamKind) -> i32 {
        self.max[stream.index()]
    }

    pub fn min_steps(&self, stream: StreamKind) -> i32 {
        self.min[stream.index()]
    }

    pub fn default_steps(&self, stream: StreamKind) -> i32 {
        self.default[stream.index()]
    }

    /// Internal-unit max (UI steps x 10).
    pub fn max_index(&self, stream: StreamKind) -> i32 {
        self.max_steps(stream).saturating_mul(10)
    }

    pub fn min_index(&self, stream: StreamKind) -> i32 {
        self.min_steps(stream).saturating_mul(10)
    }

    pub fn default_index(&self, stream: StreamKind) -> i32 {
        self.default_steps(stream).saturating_mul(10)
    }

    /// Proportional rescale between two streams' ranges, rounding to nearest.
    /// Out-of-range values saturate instead of wrapping.
    pub fn rescale(&self, value: i32, from: StreamKind, to: StreamKind) -> i32 {
        let max_from = i64::from(self.max_index(from));
        let max_to = i64::from(self.max_index(to));
        let scaled = (i64::from(value) * max_to + max_from / 2) / max_from;
        i32::try_from(scaled).unwrap_or(if scaled < 0 { i32::MIN } else { i32::MAX })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_kind_try_from() {
        assert_eq!(StreamKind::try_from(3), Ok(StreamKind::Music));
        assert_eq!(StreamKind::try_from(9), Ok(StreamKind::Tts));
        assert_eq!(
            StreamKind::try_from(10),
            Err(PolicyError::InvalidStream(10))
        );
        assert_eq!(
            StreamKind::try_from(-1),
            Err(PolicyError::InvalidStream(-1))
        );
    }

    #[test]
    fn test_stream_set_ops() {
        let mut set = StreamSet::of(&[StreamKind::Ring, StreamKind::Music]);
        assert!(set.contains(StreamKind::Ring));
        assert!(!set.contains(StreamKind::Alarm));
        set.remove(StreamKind::Ring);
        set.insert(StreamKind::Alarm);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![StreamKind::Music, StreamKind::Alarm]
        );
        assert_eq!(StreamSet::from_bits(set.bits()), set);
    }

    #[test]
    fn test_catalog_ranges() {
        let catalog = StreamCatalog::default();
        assert_eq!(catalog.max_index(StreamKind::Music), 150);
        assert_eq!(catalog.min_index(StreamKind::VoiceCall), 10);
        assert_eq!(catalog.default_index(StreamKind::Ring), 50);
    }

    #[test]
    fn test_catalog_overrides_move_default() {
        let catalog = StreamCatalog::with_overrides(0, 25);
        assert_eq!(catalog.max_steps(StreamKind::Music), 25);
        assert_eq!(catalog.default_steps(StreamKind::Music), 18);
        assert_eq!(catalog.max_steps(StreamKind::VoiceCall), 5);
    }

    #[test]
    fn test_oversized_override_is_capped() {
        let catalog = StreamCatalog::with_overrides(u32::MAX, 400_000_000);
        assert_eq!(catalog.max_steps(StreamKind::VoiceCall), MAX_OVERRIDE_STEPS);
        assert_eq!(catalog.max_steps(StreamKind::Music), MAX_OVERRIDE_STEPS);
        assert_eq!(catalog.max_index(StreamKind::Music), MAX_OVERRIDE_STEPS * 10);
        assert_eq!(
            catalog.default_steps(StreamKind::Music),
            MAX_OVERRIDE_STEPS * 3 / 4
        );
    }

    #[test]
    fn test_rescale_saturates_extremes() {
        let catalog = StreamCatalog::default();
        assert_eq!(
            catalog.rescale(i32::MAX, StreamKind::Ring, StreamKind::Music),
            i32::MAX
        );
        assert_eq!(
            catalog.rescale(i32::MIN, StreamKind::Ring, StreamKind::Music),
            i32::MIN
        );
        assert_eq!(
            catalog.rescale(i32::MAX, StreamKind::Music, StreamKind::Ring),
            1_002_159_035
        );
    }

    #[test]
    fn test_rescale_rounds_to_nearest() {
        let catalog = StreamCatalog::default();
        // 100/150 of RING's 70 is 46.67
        assert_eq!(catalog.rescale(100, StreamKind::Music, StreamKind::Ring), 47);
        // one UI step of RING in MUSIC units: 10 * 150 / 70 = 21.4
        assert_eq!(catalog.rescale(10, StreamKind::Ring, StreamKind::Music), 21);
        assert_eq!(catalog.rescale(150, StreamKind::Music, StreamKind::Music), 150);
    }

    #[test]
    fn test_rescale_round_trip_within_one() {
        let catalog = StreamCatalog::default();
        for a in StreamKind::ALL {
            for b in StreamKind::ALL {
                for x in catalog.min_index(a)..=catalog.max_index(a) {
                    let there = catalog.rescale(x, a, b);
                    let back = catalog.rescale(there, b, a);
                    assert!(
                        (back - x).abs() <= 1,
                        "{a} -> {b} -> {a}: {x} became {back}"
                    );
                    assert_eq!(catalog.rescale(x, a, b), there);
                }
            }
        }
    }
}
