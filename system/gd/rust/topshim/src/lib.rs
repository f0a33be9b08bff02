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

//! Shim between the LE Audio manager and the native radio stack.
//!
//! The native stack lives on the other side of this crate: requests go out through
//! [`profiles::le_audio::LeAudioInterface`] and events come back as
//! [`profiles::le_audio::LeAudioCallbacks`] through a dispatcher registered at initialization.

pub mod btif;
pub mod profiles;
