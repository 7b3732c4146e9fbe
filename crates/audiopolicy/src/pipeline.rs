//! Serialized command pipeline.
//!
//! Producers enqueue typed commands with an optional delay; one consumer
//! drains them in due-time order (ties in send order). Each command kind
//! carries its own enqueue policy:
//!
//! - `Replace`: drop every pending command of the same kind first
//! - `Noop`: drop the new command if one of its kind is already pending
//! - `Queue`: always append

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::boundary::{ForceConfig, ForceUsage};
use crate::device::Device;
use crate::ringer::AdjustFlags;
use crate::safe_volume::SafeVolumeState;
use crate::sco::ScoConnectionState;
use crate::stream::StreamKind;

/// Settle time before volume and ringer writes hit the store.
pub const PERSIST_DELAY: Duration = Duration::from_millis(500);
/// Delay before a muted stream is unmuted after a volume-down on television.
pub const UNMUTE_STREAM_DELAY: Duration = Duration::from_millis(350);
/// Retry interval while the native audio service is restarting.
pub const MEDIA_SERVER_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Hold-off before routing changes after the last noisy output disconnects.
pub const BECOMING_NOISY_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetDeviceVolume {
        stream: StreamKind,
        device: Device,
    },
    SetAllVolumes {
        stream: StreamKind,
    },
    PersistVolume {
        stream: StreamKind,
        device: Device,
    },
    PersistRingerMode,
    PersistSetting {
        key: String,
        value: i32,
    },
    SetForceUse {
        usage: ForceUsage,
        config: ForceConfig,
    },
    MediaServerDied,
    SetWiredDeviceConnectionState {
        device: Device,
        connected: bool,
        address: String,
        name: String,
    },
    BroadcastBecomingNoisy,
    UnmuteStream {
        stream: StreamKind,
        flags: AdjustFlags,
    },
    CheckMusicActive,
    ConfigureSafeVolume,
    ConfigureSafeVolumeForced,
    PersistSafeVolumeState {
        state: SafeVolumeState,
    },
    PersistMusicActiveMs {
        ms: u64,
    },
    BroadcastScoState {
        state: ScoConnectionState,
    },
    HeadsetConnectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetDeviceVolume,
    SetAllVolumes,
    PersistVolume,
    PersistRingerMode,
    PersistSetting,
    SetForceUse,
    MediaServerDied,
    SetWiredDeviceConnectionState,
    BroadcastBecomingNoisy,
    UnmuteStream,
    CheckMusicActive,
    ConfigureSafeVolume,
    ConfigureSafeVolumeForced,
    PersistSafeVolumeState,
    PersistMusicActiveMs,
    BroadcastScoState,
    HeadsetConnectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    Replace,
    Noop,
    Queue,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetDeviceVolume { .. } => CommandKind::SetDeviceVolume,
            Command::SetAllVolumes { .. } => CommandKind::SetAllVolumes,
            Command::PersistVolume { .. } => CommandKind::PersistVolume,
            Command::PersistRingerMode => CommandKind::PersistRingerMode,
            Command::PersistSetting { .. } => CommandKind::PersistSetting,
            Command::SetForceUse { .. } => CommandKind::SetForceUse,
            Command::MediaServerDied => CommandKind::MediaServerDied,
            Command::SetWiredDeviceConnectionState { .. } => {
                CommandKind::SetWiredDeviceConnectionState
            }
            Command::BroadcastBecomingNoisy => CommandKind::BroadcastBecomingNoisy,
            Command::UnmuteStream { .. } => CommandKind::UnmuteStream,
            Command::CheckMusicActive => CommandKind::CheckMusicActive,
            Command::ConfigureSafeVolume => CommandKind::ConfigureSafeVolume,
            Command::ConfigureSafeVolumeForced => CommandKind::ConfigureSafeVolumeForced,
            Command::PersistSafeVolumeState { .. } => CommandKind::PersistSafeVolumeState,
            Command::PersistMusicActiveMs { .. } => CommandKind::PersistMusicActiveMs,
            Command::BroadcastScoState { .. } => CommandKind::BroadcastScoState,
            Command::HeadsetConnectFailed => CommandKind::HeadsetConnectFailed,
        }
    }

    pub fn policy(&self) -> EnqueuePolicy {
        self.kind().policy()
    }
}

impl CommandKind {
    pub fn policy(self) -> EnqueuePolicy {
        match self {
            CommandKind::PersistRingerMode
            | CommandKind::BroadcastBecomingNoisy
            | CommandKind::CheckMusicActive
            | CommandKind::ConfigureSafeVolume
            | CommandKind::ConfigureSafeVolumeForced
            | CommandKind::HeadsetConnectFailed => EnqueuePolicy::Replace,
            CommandKind::MediaServerDied => EnqueuePolicy::Noop,
            _ => EnqueuePolicy::Queue,
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    command: Command,
}

#[derive(Debug, Default)]
struct QueueState {
    items: Vec<Scheduled>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn earliest(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| (s.due, s.seq))
            .map(|(i, _)| i)
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Cloneable handle to the shared pipeline.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue `command` to become due after `delay`, honouring its policy.
    pub fn send(&self, command: Command, delay: Duration) {
        let kind = command.kind();
        {
            let mut state = self.state();
            if state.closed {
                return;
            }
            match kind.policy() {
                EnqueuePolicy::Replace => state.items.retain(|s| s.command.kind() != kind),
                EnqueuePolicy::Noop => {
                    if state.items.iter().any(|s| s.command.kind() == kind) {
                        trace!(?kind, "dropping duplicate command");
                        return;
                    }
                }
                EnqueuePolicy::Queue => {}
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.items.push(Scheduled {
                due: Instant::now() + delay,
                seq,
                command,
            });
        }
        self.inner.notify.notify_one();
    }

    pub fn send_now(&self, command: Command) {
        self.send(command, Duration::ZERO);
    }

    /// Drop every pending command of `kind`.
    pub fn remove(&self, kind: CommandKind) {
        self.state().items.retain(|s| s.command.kind() != kind);
    }

    pub fn contains(&self, kind: CommandKind) -> bool {
        self.state().items.iter().any(|s| s.command.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending commands in the order they would run.
    pub fn snapshot(&self) -> Vec<Command> {
        let state = self.state();
        let mut items: Vec<&Scheduled> = state.items.iter().collect();
        items.sort_by_key(|s| (s.due, s.seq));
        items.into_iter().map(|s| s.command.clone()).collect()
    }

    /// Take the next command that is due at `now`.
    pub fn pop_due(&self, now: Instant) -> Option<Command> {
        let mut state = self.state();
        let idx = state.earliest()?;
        if state.items[idx].due > now {
            return None;
        }
        Some(state.items.remove(idx).command)
    }

    /// Take the next command regardless of its delay.
    pub fn pop_next(&self) -> Option<Command> {
        let mut state = self.state();
        let idx = state.earliest()?;
        Some(state.items.remove(idx).command)
    }

    /// Stop accepting commands and wake the consumer.
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.notify.notify_one();
    }

    /// Wait for the next due command. Returns `None` once closed.
    pub async fn recv(&self) -> Option<Command> {
        loop {
            let next_due = {
                let mut state = self.state();
                if state.closed {
                    return None;
                }
                match state.earliest() {
                    Some(idx) if state.items[idx].due <= Instant::now() => {
                        return Some(state.items.remove(idx).command);
                    }
                    Some(idx) => Some(state.items[idx].due),
                    None => None,
                }
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(due) => {}
                        _ = self.inner.notify.notified() => {}
                    }
                }
                None => self.inner.notify.notified().await,
            }
        }
    }
}
