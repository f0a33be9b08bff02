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

//! Codec capability and negotiated configuration bookkeeping.

use std::collections::HashMap;

use leaudio_topshim::profiles::le_audio::LeAudioCodecConfig;

/// Codec state of one group as reported to listeners. Two snapshots compare equal exactly when
/// every selected and selectable configuration matches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeAudioCodecStatus {
    pub input_codec_config: LeAudioCodecConfig,
    pub output_codec_config: LeAudioCodecConfig,
    pub input_codecs_local_capabilities: Vec<LeAudioCodecConfig>,
    pub output_codecs_local_capabilities: Vec<LeAudioCodecConfig>,
    pub input_codecs_selectable_capabilities: Vec<LeAudioCodecConfig>,
    pub output_codecs_selectable_capabilities: Vec<LeAudioCodecConfig>,
}

fn is_selectable(config: &LeAudioCodecConfig, selectable: &[LeAudioCodecConfig]) -> bool {
    let matches = |wanted: u32, offered: u32| wanted == 0 || offered == 0 || wanted == offered;
    selectable.iter().any(|s| {
        s.codec_type == config.codec_type
            && s.sample_rate.contains(config.sample_rate)
            && matches(config.bits_per_sample, s.bits_per_sample)
            && matches(config.channel_count, s.channel_count)
            && matches(config.frame_duration, s.frame_duration)
            && matches(config.octets_per_frame, s.octets_per_frame)
    })
}

impl LeAudioCodecStatus {
    /// Whether `config` could be picked for input given the selectable list.
    pub fn is_input_codec_config_selectable(&self, config: &LeAudioCodecConfig) -> bool {
        is_selectable(config, &self.input_codecs_selectable_capabilities)
    }

    /// Whether `config` could be picked for output given the selectable list.
    pub fn is_output_codec_config_selectable(&self, config: &LeAudioCodecConfig) -> bool {
        is_selectable(config, &self.output_codecs_selectable_capabilities)
    }
}

#[derive(Clone, Debug, Default)]
struct GroupCodecState {
    input_config: LeAudioCodecConfig,
    output_config: LeAudioCodecConfig,
    input_selectable: Vec<LeAudioCodecConfig>,
    output_selectable: Vec<LeAudioCodecConfig>,
}

#[derive(Default)]
pub(crate) struct CodecNegotiationTracker {
    input_local: Vec<LeAudioCodecConfig>,
    output_local: Vec<LeAudioCodecConfig>,
    groups: HashMap<i32, GroupCodecState>,
}

impl CodecNegotiationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the local capability lists.
    pub fn update_local_capabilities(
        &mut self,
        input: Vec<LeAudioCodecConfig>,
        output: Vec<LeAudioCodecConfig>,
    ) {
        self.input_local = input;
        self.output_local = output;
    }

    /// Replaces the negotiated state of `group_id` and returns the snapshot to report.
    pub fn update_group_config(
        &mut self,
        group_id: i32,
        input_config: LeAudioCodecConfig,
        output_config: LeAudioCodecConfig,
        input_selectable: Vec<LeAudioCodecConfig>,
        output_selectable: Vec<LeAudioCodecConfig>,
    ) -> LeAudioCodecStatus {
        self.groups.insert(
            group_id,
            GroupCodecState { input_config, output_config, input_selectable, output_selectable },
        );
        self.snapshot(&self.groups[&group_id])
    }

    pub fn codec_status(&self, group_id: i32) -> Option<LeAudioCodecStatus> {
        self.groups.get(&group_id).map(|state| self.snapshot(state))
    }

    pub fn remove_group(&mut self, group_id: i32) {
        self.groups.remove(&group_id);
    }

    fn snapshot(&self, state: &GroupCodecState) -> LeAudioCodecStatus {
        LeAudioCodecStatus {
            input_codec_config: state.input_config.clone(),
            output_codec_config: state.output_config.clone(),
            input_codecs_local_capabilities: self.input_local.clone(),
            output_codecs_local_capabilities: self.output_local.clone(),
            input_codecs_selectable_capabilities: state.input_selectable.clone(),
            output_codecs_selectable_capabilities: state.output_selectable.clone(),
        }
    }
}
