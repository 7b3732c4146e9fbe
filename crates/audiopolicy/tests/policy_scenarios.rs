//! End-to-end behaviour of the policy service through its public API.
//!
//! Every collaborator is a recorder; time is advanced by draining the
//! command queue up to a deadline instead of sleeping.

use std::sync::Arc;
use std::time::Duration;

use audiopolicy::recorder::{
    RecordingController, RecordingRouting, RecordingSink, ScriptedHeadset,
};
use audiopolicy::{
    AdjustDirection, AdjustFlags, AudioMode, AudioPolicyService, Collaborators, Device,
    FileSettings, HeadsetDevice, MemorySettings, PolicyEvent, RingerMode, SafeVolumeState,
    ScoAudioState, ScoDeviceClass, ServiceConfig, Session, SettingsStore, StreamKind,
};
use pretty_assertions::assert_eq;

const MUSIC: i32 = StreamKind::Music as i32;
const RING: i32 = StreamKind::Ring as i32;

struct Rig {
    service: AudioPolicyService,
    routing: Arc<RecordingRouting>,
    events: Arc<RecordingSink>,
    controller: Arc<RecordingController>,
    headset: Arc<ScriptedHeadset>,
}

fn rig_with(config: ServiceConfig, settings: Arc<dyn SettingsStore>, headset: ScriptedHeadset) -> Rig {
    let routing = Arc::new(RecordingRouting::new());
    let events = Arc::new(RecordingSink::new());
    let controller = Arc::new(RecordingController::new());
    let headset = Arc::new(headset);
    let collaborators = Collaborators::new(routing.clone(), settings)
        .with_events(events.clone())
        .with_controller(controller.clone())
        .with_headset(headset.clone());
    Rig {
        service: AudioPolicyService::new(config, collaborators),
        routing,
        events,
        controller,
        headset,
    }
}

fn rig() -> Rig {
    rig_with(
        ServiceConfig::default(),
        Arc::new(MemorySettings::new()),
        ScriptedHeadset::empty(),
    )
}

fn headset() -> HeadsetDevice {
    HeadsetDevice {
        address: "00:1A:7D:DA:71:13".to_string(),
        name: "Headset".to_string(),
        class: ScoDeviceClass::Headset,
    }
}

fn volume_changes(events: &[PolicyEvent], stream: StreamKind) -> Vec<(i32, i32)> {
    events
        .iter()
        .filter_map(|e| match e {
            PolicyEvent::VolumeChanged {
                stream: s,
                old_index,
                new_index,
                ..
            } if *s == stream => Some((*old_index, *new_index)),
            _ => None,
        })
        .collect()
}

#[test]
fn lower_key_steps_music_and_its_followers() {
    let rig = rig();
    rig.routing.route(StreamKind::Music, Device::DEFAULT);
    rig.routing.route(StreamKind::Tts, Device::DEFAULT);
    rig.service
        .set_stream_volume(MUSIC, 10, AdjustFlags::empty(), "test")
        .unwrap();
    rig.service.process_pending();
    rig.events.clear();

    rig.service
        .adjust_stream_volume(MUSIC, AdjustDirection::Lower.as_i32(), AdjustFlags::SHOW_UI, "test")
        .unwrap();

    let events = rig.events.events();
    assert_eq!(volume_changes(&events, StreamKind::Music), vec![(100, 90)]);
    assert_eq!(volume_changes(&events, StreamKind::Tts), vec![(100, 90)]);
    assert_eq!(rig.service.get_stream_volume(MUSIC).unwrap(), 9);
    assert_eq!(
        rig.controller.volume_changes().last(),
        Some(&(StreamKind::Music, AdjustFlags::SHOW_UI))
    );
}

#[test]
fn lowering_last_ring_step_without_vibrator_goes_silent() {
    let mut config = ServiceConfig {
        has_vibrator: false,
        ..ServiceConfig::default()
    };
    config.volume_policy.volume_down_to_enter_silent = true;
    let rig = rig_with(config, Arc::new(MemorySettings::new()), ScriptedHeadset::empty());

    rig.service
        .set_stream_volume(RING, 1, AdjustFlags::empty(), "test")
        .unwrap();
    rig.service.process_pending();
    rig.events.clear();

    rig.service
        .adjust_stream_volume(
            RING,
            AdjustDirection::Lower.as_i32(),
            AdjustFlags::ALLOW_RINGER_MODES,
            "test",
        )
        .unwrap();

    assert_eq!(rig.service.ringer_mode_internal(), RingerMode::Silent);
    assert_eq!(rig.service.ringer_mode_external(), RingerMode::Silent);
    assert!(rig.service.is_stream_mute(RING).unwrap());
    // the index itself was not stepped
    assert_eq!(rig.service.get_last_audible_stream_volume(RING).unwrap(), 1);
    assert!(volume_changes(&rig.events.events(), StreamKind::Ring).is_empty());
}

#[test]
fn first_jurisdiction_activates_the_cap() {
    let rig = rig();
    let cap = ServiceConfig::default().safe_volume.index as i32;
    rig.routing.route(StreamKind::Music, Device::WIRED_HEADSET);
    rig.service
        .set_stream_volume(MUSIC, cap + 4, AdjustFlags::empty(), "test")
        .unwrap();
    assert_eq!(rig.service.safe_volume_state(), SafeVolumeState::NotConfigured);
    assert_eq!(rig.service.get_stream_volume(MUSIC).unwrap(), cap + 4);

    rig.service.on_jurisdiction_changed(310);
    rig.service.process_pending();

    assert_eq!(rig.service.safe_volume_state(), SafeVolumeState::Active);
    assert_eq!(rig.service.get_stream_volume(MUSIC).unwrap(), cap);
    assert!(rig
        .routing
        .volume_calls()
        .contains(&(StreamKind::Music, cap, Device::WIRED_HEADSET)));
}

#[test]
fn confirmed_warning_replays_the_held_back_set() {
    let rig = rig();
    let cap = ServiceConfig::default().safe_volume.index as i32;
    rig.routing.route(StreamKind::Music, Device::WIRED_HEADSET);
    rig.service
        .set_stream_volume(MUSIC, cap, AdjustFlags::empty(), "test")
        .unwrap();
    rig.service.on_jurisdiction_changed(310);
    rig.service.process_pending();

    rig.service
        .adjust_stream_volume(MUSIC, AdjustDirection::Raise.as_i32(), AdjustFlags::empty(), "test")
        .unwrap();
    rig.service
        .set_stream_volume(MUSIC, cap + 2, AdjustFlags::empty(), "test")
        .unwrap();
    assert_eq!(rig.controller.warnings(), 2);
    assert_eq!(rig.service.get_stream_volume(MUSIC).unwrap(), cap);

    rig.service.disable_safe_media_volume();
    assert_eq!(rig.service.get_stream_volume(MUSIC).unwrap(), cap + 2);
    assert_eq!(rig.service.safe_volume_state(), SafeVolumeState::Inactive);
}

#[test]
fn two_requesters_share_one_sco_link() {
    let rig = rig_with(
        ServiceConfig::default(),
        Arc::new(MemorySettings::new()),
        ScriptedHeadset::with_device(headset()),
    );
    rig.service.system_ready();
    rig.service.on_headset_service_connected();
    rig.service.set_bt_sco_device_connection_state(headset(), true);

    let first = Session::new(100);
    let second = Session::new(200);
    rig.service.start_bluetooth_sco(&first);
    rig.service.start_bluetooth_sco(&second);
    assert_eq!(rig.service.sco_audio_state(), ScoAudioState::ActiveInternal);
    assert_eq!(rig.headset.calls("start_virtual_voice_call"), 1);

    rig.service.stop_bluetooth_sco(&first);
    assert_eq!(rig.headset.calls("stop_virtual_voice_call"), 0);
    rig.service.stop_bluetooth_sco(&second);
    assert_eq!(rig.headset.calls("stop_virtual_voice_call"), 1);
}

#[test]
fn new_mode_owner_tears_down_other_sco_clients() {
    let rig = rig_with(
        ServiceConfig::default(),
        Arc::new(MemorySettings::new()),
        ScriptedHeadset::with_device(headset()),
    );
    rig.service.system_ready();
    rig.service.on_headset_service_connected();

    let listener = Session::new(100);
    rig.service.start_bluetooth_sco(&listener);
    assert_eq!(rig.service.sco_audio_state(), ScoAudioState::ActiveInternal);

    let caller = Session::new(200);
    rig.service
        .set_mode(AudioMode::InCommunication.as_i32(), &caller)
        .unwrap();
    assert_eq!(rig.service.get_mode(), AudioMode::InCommunication);
    assert_eq!(rig.headset.calls("stop_virtual_voice_call"), 1);
    assert_eq!(rig.service.sco_audio_state(), ScoAudioState::Inactive);

    // the listener may not start again while someone else owns the mode
    rig.service.start_bluetooth_sco(&listener);
    assert_eq!(rig.headset.calls("start_virtual_voice_call"), 1);
}

#[test]
fn unplugging_headphones_warns_apps_before_routing_moves() {
    let rig = rig();
    rig.service
        .set_wired_device_connection_state(Device::WIRED_HEADPHONE, true, "", "jack");
    rig.service.process_pending();
    rig.events.clear();

    rig.service
        .set_wired_device_connection_state(Device::WIRED_HEADPHONE, false, "", "jack");
    rig.service.advance(Duration::from_secs(2));

    let events = rig.events.events();
    let noisy = events
        .iter()
        .position(|e| *e == PolicyEvent::BecomingNoisy)
        .unwrap();
    let gone = events
        .iter()
        .position(|e| {
            matches!(
                e,
                PolicyEvent::DeviceConnectionChanged {
                    device: Device::WIRED_HEADPHONE,
                    connected: false,
                    ..
                }
            )
        })
        .unwrap();
    assert!(noisy < gone);
}

#[test]
fn volumes_and_ringer_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let settings = Arc::new(FileSettings::open(dir.path()).unwrap());
        let rig = rig_with(ServiceConfig::default(), settings, ScriptedHeadset::empty());
        rig.service
            .set_stream_volume(StreamKind::Alarm as i32, 2, AdjustFlags::empty(), "test")
            .unwrap();
        rig.service
            .set_ringer_mode_external(RingerMode::Vibrate.as_i32(), "test")
            .unwrap();
        rig.service.advance(Duration::from_secs(1));
    }

    let settings = Arc::new(FileSettings::open(dir.path()).unwrap());
    let rig = rig_with(ServiceConfig::default(), settings, ScriptedHeadset::empty());
    assert_eq!(
        rig.service
            .get_stream_volume(StreamKind::Alarm as i32)
            .unwrap(),
        2
    );
    assert_eq!(rig.service.ringer_mode_internal(), RingerMode::Vibrate);
}

#[test]
fn out_of_range_sets_are_clamped() {
    let rig = rig();
    rig.routing.route(StreamKind::Music, Device::SPEAKER);
    rig.routing.route(StreamKind::VoiceCall, Device::EARPIECE);
    let voice = StreamKind::VoiceCall as i32;

    rig.service
        .set_stream_volume(MUSIC, i32::MAX, AdjustFlags::empty(), "test")
        .unwrap();
    assert_eq!(
        rig.service.get_stream_volume(MUSIC).unwrap(),
        rig.service.get_stream_max_volume(MUSIC).unwrap()
    );

    rig.service
        .set_stream_volume(MUSIC, -20_000_000, AdjustFlags::empty(), "test")
        .unwrap();
    assert_eq!(rig.service.get_last_audible_stream_volume(MUSIC).unwrap(), 0);

    rig.service
        .set_stream_volume(voice, i32::MIN, AdjustFlags::empty(), "test")
        .unwrap();
    assert_eq!(
        rig.service.get_stream_volume(voice).unwrap(),
        rig.service.get_stream_min_volume(voice).unwrap()
    );
}

#[test]
fn television_notification_keeps_its_own_volume() {
    let config = ServiceConfig {
        platform: policyconf::PlatformKind::Television,
        ..ServiceConfig::default()
    };
    let rig = rig_with(config, Arc::new(MemorySettings::new()), ScriptedHeadset::empty());
    let notification = StreamKind::Notification as i32;
    let before = rig.service.get_stream_volume(notification).unwrap();

    rig.service
        .set_stream_volume(MUSIC, 2, AdjustFlags::empty(), "test")
        .unwrap();

    assert_eq!(rig.service.get_stream_volume(MUSIC).unwrap(), 2);
    assert_eq!(rig.service.get_stream_volume(notification).unwrap(), before);
    assert!(volume_changes(&rig.events.events(), StreamKind::Notification).is_empty());
}
