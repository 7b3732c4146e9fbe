//! Audio policy core
//!
//! Decides stream volumes, ringer mode, audio mode ownership, the safe
//! media volume cap and Bluetooth SCO arbitration. Native routing,
//! settings storage, the headset profile and listeners sit behind the
//! traits in `boundary` and `store`.
//!
//! Public operations on [`AudioPolicyService`] update in-memory state
//! immediately and enqueue their side effects on a [`CommandQueue`]. One
//! consumer drains the queue in due-time order:
//!
//! - **Volume**: apply per-device indices, persist them after a delay
//! - **Ringer**: persist the mode, re-apply muted streams
//! - **Safe volume**: configure per jurisdiction, poll loud exposure
//! - **SCO**: deliver connection state, recover from a silent headset
//! - **Devices**: report connections, replay everything after a native restart

pub mod alias;
pub mod boundary;
pub mod device;
pub mod error;
pub mod locks;
pub mod mode;
pub mod pipeline;
pub mod recorder;
pub mod ringer;
pub mod safe_volume;
pub mod sco;
pub mod service;
pub mod session;
pub mod store;
pub mod stream;
pub mod volume;

pub use alias::StreamAliasResolver;
pub use boundary::{
    AudioRouting, BroadcastSink, CallStateQuery, ForceConfig, ForceUsage, HeadsetAudioState,
    HeadsetDevice, HeadsetProxy, LoggingRouting, NeverInCall, NoHeadset, NoOpController,
    PolicyEvent, ScoDeviceClass, TracingSink, VolumeController,
};
pub use device::Device;
pub use error::{PolicyError, RoutingError, StoreError};
pub use mode::{AudioMode, ModeOwners};
pub use pipeline::{Command, CommandKind, CommandQueue, EnqueuePolicy};
pub use ringer::{
    AdjustDirection, AdjustFlags, RingerMode, RingerModeDelegate, RingerModeMachine, VolumePolicy,
};
pub use safe_volume::{SafeVolumeGuard, SafeVolumeState};
pub use sco::{ScoAudioState, ScoConnectionManager, ScoConnectionState, ScoMode};
pub use service::{AudioPolicyService, Collaborators, DeviceRegistry, ServiceConfig};
pub use session::{Session, SessionId};
pub use store::{FileSettings, MemorySettings, SettingsStore};
pub use stream::{StreamCatalog, StreamKind, StreamSet};
pub use volume::{StreamTable, VolumeStreamState};
