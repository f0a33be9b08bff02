// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! LE Audio client profile as exposed by the native stack.

use crate::btif::{BtStatus, RawAddress, Uuid};

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};

/// Published Audio Capabilities based LE Audio service signature.
pub const LE_AUDIO_UUID: Uuid = Uuid::from_16bit(0x184e);

/// Group id used by the native stack to mean "no group".
pub const LE_AUDIO_GROUP_ID_INVALID: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum BtLeAudioConnectionState {
    Disconnected = 0,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum BtLeAudioGroupStatus {
    Inactive = 0,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum BtLeAudioGroupNodeStatus {
    Added = 1,
    Removed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum BtLeAudioCodecType {
    #[default]
    Lc3 = 0,
    Invalid = 1_000_000,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AudioDirection: u8 {
        const SINK = 0x01;
        const SOURCE = 0x02;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AudioContexts: u16 {
        const UNSPECIFIED = 0x0001;
        const CONVERSATIONAL = 0x0002;
        const MEDIA = 0x0004;
        const GAME = 0x0008;
        const INSTRUCTIONAL = 0x0010;
        const VOICE_ASSISTANTS = 0x0020;
        const LIVE = 0x0040;
        const SOUND_EFFECTS = 0x0080;
        const NOTIFICATIONS = 0x0100;
        const RINGTONE = 0x0200;
        const ALERTS = 0x0400;
        const EMERGENCY_ALARM = 0x0800;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AudioLocations: u32 {
        const FRONT_LEFT = 0x0000_0001;
        const FRONT_RIGHT = 0x0000_0002;
        const FRONT_CENTER = 0x0000_0004;
        const LOW_FREQ_EFFECTS_1 = 0x0000_0008;
        const BACK_LEFT = 0x0000_0010;
        const BACK_RIGHT = 0x0000_0020;
        const SIDE_LEFT = 0x0000_0400;
        const SIDE_RIGHT = 0x0000_0800;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LeAudioSampleRate: u32 {
        const RATE_8000 = 0x01;
        const RATE_11025 = 0x02;
        const RATE_16000 = 0x04;
        const RATE_22050 = 0x08;
        const RATE_24000 = 0x10;
        const RATE_32000 = 0x20;
        const RATE_44100 = 0x40;
        const RATE_48000 = 0x80;
    }
}

/// One codec configuration, either a capability (several bits set per field) or a negotiated
/// configuration (a single bit per field).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeAudioCodecConfig {
    pub codec_type: BtLeAudioCodecType,
    pub codec_priority: i32,
    pub sample_rate: LeAudioSampleRate,
    pub bits_per_sample: u32,
    pub channel_count: u32,
    pub frame_duration: u32,
    pub octets_per_frame: u32,
}

impl Default for LeAudioCodecConfig {
    fn default() -> Self {
        Self {
            codec_type: BtLeAudioCodecType::Lc3,
            codec_priority: 0,
            sample_rate: LeAudioSampleRate::empty(),
            bits_per_sample: 0,
            channel_count: 0,
            frame_duration: 0,
            octets_per_frame: 0,
        }
    }
}

/// Events coming up from the native LE Audio client.
#[derive(Clone, Debug)]
pub enum LeAudioCallbacks {
    Initialized,
    ConnectionState(BtLeAudioConnectionState, RawAddress),
    GroupStatus(i32, BtLeAudioGroupStatus),
    GroupNodeStatus(RawAddress, i32, BtLeAudioGroupNodeStatus),
    GroupRemoved(i32),
    /// device, direction, group id, sink locations, source locations, available contexts
    AudioConf(
        Option<RawAddress>,
        AudioDirection,
        i32,
        AudioLocations,
        AudioLocations,
        AudioContexts,
    ),
    /// input capabilities, output capabilities
    LocalCodecCapabilities(Vec<LeAudioCodecConfig>, Vec<LeAudioCodecConfig>),
    /// group id, input config, output config, input selectable, output selectable
    GroupCodecConfig(
        i32,
        LeAudioCodecConfig,
        LeAudioCodecConfig,
        Vec<LeAudioCodecConfig>,
        Vec<LeAudioCodecConfig>,
    ),
}

pub struct LeAudioCallbacksDispatcher {
    pub dispatch: Box<dyn Fn(LeAudioCallbacks) + Send>,
}

impl LeAudioCallbacksDispatcher {
    pub fn dispatch(&self, cb: LeAudioCallbacks) {
        (self.dispatch)(cb);
    }
}

/// Requests going down to the native LE Audio client.
///
/// None of these are synchronous: a `BtStatus::Success` only means the request was queued, the
/// outcome arrives later as a [`LeAudioCallbacks`] event.
pub trait LeAudioInterface: Send {
    /// Hands the native stack the dispatcher it posts every event through.
    fn initialize(&mut self, dispatcher: LeAudioCallbacksDispatcher);

    fn cleanup(&mut self);

    fn connect(&mut self, addr: RawAddress) -> BtStatus;

    fn disconnect(&mut self, addr: RawAddress) -> BtStatus;

    fn group_add_node(&mut self, group_id: i32, addr: RawAddress) -> BtStatus;

    fn group_remove_node(&mut self, group_id: i32, addr: RawAddress) -> BtStatus;

    /// Activates `group_id`, or deactivates everything with [`LE_AUDIO_GROUP_ID_INVALID`].
    fn group_set_active(&mut self, group_id: i32) -> BtStatus;
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;
    use std::sync::{Arc, Mutex};

    #[test]
    fn connection_state_from_raw() {
        assert_eq!(
            BtLeAudioConnectionState::from_u32(2),
            Some(BtLeAudioConnectionState::Connected)
        );
        assert_eq!(BtLeAudioConnectionState::from_u32(4), None);
        assert_eq!(BtLeAudioGroupNodeStatus::from_u32(0), None);
    }

    #[test]
    fn dispatcher_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = {
            let seen = seen.clone();
            LeAudioCallbacksDispatcher {
                dispatch: Box::new(move |cb| seen.lock().unwrap().push(cb)),
            }
        };

        dispatcher.dispatch(LeAudioCallbacks::Initialized);
        dispatcher.dispatch(LeAudioCallbacks::GroupRemoved(3));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], LeAudioCallbacks::GroupRemoved(3)));
    }

    #[test]
    fn codec_configs_compare_by_value() {
        let a = LeAudioCodecConfig {
            sample_rate: LeAudioSampleRate::RATE_16000 | LeAudioSampleRate::RATE_48000,
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.sample_rate = LeAudioSampleRate::RATE_48000;
        assert_ne!(a, b);
    }
}
