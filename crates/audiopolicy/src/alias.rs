//! Stream alias resolution.
//!
//! The table is stored already collapsed: every entry points at a stream
//! that is its own alias, so a lookup never chains.

use policyconf::PlatformKind;

use crate::stream::StreamKind;

use StreamKind::*;

const VOICE_ALIASES: [StreamKind; StreamKind::COUNT] = [
    VoiceCall, Ring, Ring, Music, Alarm, Ring, BluetoothSco, Ring, Ring, Music,
];

const TELEVISION_ALIASES: [StreamKind; StreamKind::COUNT] = [Music; StreamKind::COUNT];

const DEFAULT_ALIASES: [StreamKind; StreamKind::COUNT] = VOICE_ALIASES;

#[derive(Debug, Clone)]
pub struct StreamAliasResolver {
    platform: PlatformKind,
    link_notification: bool,
    in_communication: bool,
    table: [StreamKind; StreamKind::COUNT],
}

impl StreamAliasResolver {
    pub fn new(platform: PlatformKind, link_notification: bool) -> Self {
        let mut resolver = Self {
            platform,
            link_notification,
            in_communication: false,
            table: VOICE_ALIASES,
        };
        resolver.rebuild();
        resolver
    }

    pub fn platform(&self) -> PlatformKind {
        self.platform
    }

    pub fn is_television(&self) -> bool {
        self.platform == PlatformKind::Television
    }

    pub fn is_voice_capable(&self) -> bool {
        self.platform == PlatformKind::Voice
    }

    pub fn resolve(&self, stream: StreamKind) -> StreamKind {
        self.table[stream.index()]
    }

    /// Stream whose volume drives UI sounds (and ringer mode).
    pub fn ui_sounds_stream(&self) -> StreamKind {
        self.resolve(System)
    }

    /// Streams other than `alias` itself that resolve to it, highest first.
    pub fn followers(&self, alias: StreamKind) -> impl Iterator<Item = StreamKind> + '_ {
        StreamKind::descending().filter(move |s| *s != alias && self.resolve(*s) == alias)
    }

    /// Streams sharing `alias`, itself included, lowest first.
    pub fn group(&self, alias: StreamKind) -> impl Iterator<Item = StreamKind> + '_ {
        StreamKind::ALL
            .into_iter()
            .filter(move |s| self.resolve(*s) == alias)
    }

    /// Recompute for a new in-communication status. Returns true when the
    /// table changed.
    pub fn set_in_communication(&mut self, in_communication: bool) -> bool {
        self.in_communication = in_communication;
        self.rebuild()
    }

    pub fn set_link_notification(&mut self, link: bool) -> bool {
        self.link_notification = link;
        self.rebuild()
    }

    fn rebuild(&mut self) -> bool {
        let (mut table, platform_dtmf) = match self.platform {
            PlatformKind::Voice => (VOICE_ALIASES, Ring),
            PlatformKind::Television => (TELEVISION_ALIASES, Music),
            PlatformKind::Default => (DEFAULT_ALIASES, Music),
        };

        table[Dtmf.index()] = if self.in_communication && !self.is_television() {
            VoiceCall
        } else {
            platform_dtmf
        };

        table[Notification.index()] = if self.link_notification && self.is_voice_capable() {
            Ring
        } else {
            Notification
        };

        let changed = table != self.table;
        self.table = table;
        changed
    }
}
