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

//! LE Audio group connection manager.
//!
//! Every event that can change state, whether it is a native stack event, an API command or a
//! timer expiration, is turned into a [`Message`] and processed to completion by the single
//! [`Stack::dispatch`] loop. API callers only validate and enqueue; getters take a copy.

pub mod callbacks;
pub mod config;
pub mod le_audio;
pub mod utils;

use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::le_audio::{BluetoothLeAudio, LeAudioActions};
use leaudio_topshim::profiles::le_audio::LeAudioCallbacks;

/// Message types that are sent to the stack main dispatch loop.
pub enum Message {
    /// Events coming up from the native LE Audio client.
    LeAudio(LeAudioCallbacks),
    /// Commands and timer expirations addressed to the LE Audio manager.
    LeAudioActions(LeAudioActions),
    /// A registered LE Audio observer went away.
    LeAudioCallbackDisconnected(u32),
}

/// Signifies that the object may be a proxy to a remote RPC object.
///
/// An object that implements RPCProxy trait signifies that the object may be a proxy to a remote
/// RPC object. Therefore the object may be disconnected and thus should implement
/// `register_disconnect` to let others observe the disconnection event.
pub trait RPCProxy {
    /// Registers disconnect observer that will be notified when the remote object is disconnected.
    fn register_disconnect(&mut self, _f: Box<dyn Fn(u32) + Send>) -> u32 {
        0
    }

    /// Returns the ID of the object. For example this would be an object path in D-Bus RPC.
    fn get_object_id(&self) -> String {
        String::new()
    }

    /// Unregisters callback with this ID.
    fn unregister(&mut self, _id: u32) -> bool {
        false
    }
}

/// Umbrella class for the LE Audio manager's main loop.
pub struct Stack {}

impl Stack {
    /// Creates the serialized queue every producer posts into.
    pub fn create_channel() -> (UnboundedSender<Message>, UnboundedReceiver<Message>) {
        unbounded_channel::<Message>()
    }

    /// Runs the main dispatch loop until every sender is gone.
    pub async fn dispatch(
        mut rx: UnboundedReceiver<Message>,
        le_audio: Arc<Mutex<Box<BluetoothLeAudio>>>,
    ) {
        while let Some(m) = rx.recv().await {
            Self::handle_message(&mut le_audio.lock().unwrap(), m);
        }
        warn!("Message dispatch loop quit");
    }

    /// Processes a single message to completion.
    pub fn handle_message(le_audio: &mut BluetoothLeAudio, message: Message) {
        match message {
            Message::LeAudio(cb) => {
                le_audio.dispatch_le_audio_callbacks(cb);
            }
            Message::LeAudioActions(action) => {
                le_audio.dispatch_le_audio_actions(action);
            }
            Message::LeAudioCallbackDisconnected(id) => {
                debug!("LE Audio callback {} disconnected", id);
                le_audio.remove_callback(id);
            }
        }
    }
}
