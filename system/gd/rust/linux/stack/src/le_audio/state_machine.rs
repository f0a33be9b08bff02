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

//! Per-device LE Audio connection state machine.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::le_audio::LeAudioActions;
use crate::Message;
use leaudio_topshim::btif::{BtStatus, RawAddress};
use leaudio_topshim::profiles::le_audio::{BtLeAudioConnectionState, LeAudioInterface};

pub(crate) type StateMachines = HashMap<RawAddress, LeAudioStateMachine>;

/// Whether `addr` has a state machine that is in Connected.
pub(crate) fn is_connected(machines: &StateMachines, addr: &RawAddress) -> bool {
    machines.get(addr).map_or(false, |sm| sm.state() == BtLeAudioConnectionState::Connected)
}

/// An executed transition. Every one of these is reported to listeners exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StateTransition {
    pub prev: BtLeAudioConnectionState,
    pub new: BtLeAudioConnectionState,
}

/// Arms the Connecting/Disconnecting timeouts. Expiry is posted back to the dispatch loop.
pub(crate) struct StateTimeout {
    tx: UnboundedSender<Message>,
    duration: Duration,
}

impl StateTimeout {
    pub fn new(tx: UnboundedSender<Message>, duration: Duration) -> Self {
        StateTimeout { tx, duration }
    }

    fn arm(&self, addr: RawAddress, attempt: u64) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(Message::LeAudioActions(LeAudioActions::StateTimeout(addr, attempt)));
        })
    }
}

pub(crate) struct LeAudioStateMachine {
    addr: RawAddress,
    state: BtLeAudioConnectionState,
    prev_state: BtLeAudioConnectionState,
    /// Order in which the device first became known. Lowest connected member leads its group.
    discovery_seq: u64,
    /// Bumped every time a timeout is armed so a stale expiry can be told apart.
    attempt: u64,
    timeout: Option<JoinHandle<()>>,
}

impl LeAudioStateMachine {
    pub fn new(addr: RawAddress, discovery_seq: u64) -> Self {
        LeAudioStateMachine {
            addr,
            state: BtLeAudioConnectionState::Disconnected,
            prev_state: BtLeAudioConnectionState::Disconnected,
            discovery_seq,
            attempt: 0,
            timeout: None,
        }
    }

    pub fn state(&self) -> BtLeAudioConnectionState {
        self.state
    }

    pub fn discovery_seq(&self) -> u64 {
        self.discovery_seq
    }

    /// Outgoing connect. The caller has already run the admission check.
    pub fn connect(
        &mut self,
        intf: &mut dyn LeAudioInterface,
        timer: &StateTimeout,
    ) -> Option<StateTransition> {
        if self.state != BtLeAudioConnectionState::Disconnected {
            debug!("[{}]: Connect ignored in {:?}", self.addr, self.state);
            return None;
        }

        let status = intf.connect(self.addr);
        if status != BtStatus::Success {
            warn!("[{}]: Native connect failed: {:?}", self.addr, status);
        }
        Some(self.transition_to(BtLeAudioConnectionState::Connecting, timer))
    }

    /// Outgoing disconnect, from Connecting or Connected.
    pub fn disconnect(
        &mut self,
        intf: &mut dyn LeAudioInterface,
        timer: &StateTimeout,
    ) -> Option<StateTransition> {
        match self.state {
            BtLeAudioConnectionState::Connecting | BtLeAudioConnectionState::Connected => {
                let status = intf.disconnect(self.addr);
                if status != BtStatus::Success {
                    warn!("[{}]: Native disconnect failed: {:?}", self.addr, status);
                }
                Some(self.transition_to(BtLeAudioConnectionState::Disconnecting, timer))
            }
            _ => {
                debug!("[{}]: Disconnect ignored in {:?}", self.addr, self.state);
                None
            }
        }
    }

    /// Applies a connection state reported by the native stack.
    ///
    /// `admitted` is the admission check result. It only matters when the event would bring the
    /// device up from Disconnected or Disconnecting; a rejected bring-up gets a best-effort native
    /// disconnect and leaves the state alone.
    pub fn on_native_state(
        &mut self,
        event: BtLeAudioConnectionState,
        admitted: bool,
        intf: &mut dyn LeAudioInterface,
        timer: &StateTimeout,
    ) -> Option<StateTransition> {
        use BtLeAudioConnectionState::*;

        let next = match (self.state, event) {
            (Disconnected, Connecting) | (Disconnected, Connected) => Some(event),
            (Connecting, Connected) | (Connecting, Disconnected) | (Connecting, Disconnecting) => {
                Some(event)
            }
            (Connected, Disconnected) | (Connected, Disconnecting) => Some(event),
            (Disconnecting, Disconnected)
            | (Disconnecting, Connected)
            | (Disconnecting, Connecting) => Some(event),
            _ => None,
        };

        let Some(next) = next else {
            debug!("[{}]: Ignoring native {:?} in {:?}", self.addr, event, self.state);
            return None;
        };

        let bring_up = matches!(self.state, Disconnected | Disconnecting)
            && matches!(next, Connecting | Connected);
        if bring_up && !admitted {
            warn!("[{}]: Incoming connection not allowed, rejecting", self.addr);
            let status = intf.disconnect(self.addr);
            if status != BtStatus::Success {
                warn!("[{}]: Native disconnect failed: {:?}", self.addr, status);
            }
            return None;
        }

        Some(self.transition_to(next, timer))
    }

    /// Handles an expired Connecting/Disconnecting timer. Stale expiries are ignored.
    pub fn on_timeout(
        &mut self,
        attempt: u64,
        intf: &mut dyn LeAudioInterface,
        timer: &StateTimeout,
    ) -> Option<StateTransition> {
        if attempt != self.attempt {
            debug!("[{}]: Stale timeout {} (current {})", self.addr, attempt, self.attempt);
            return None;
        }

        match self.state {
            BtLeAudioConnectionState::Connecting => {
                warn!("[{}]: Connection timeout", self.addr);
                let status = intf.disconnect(self.addr);
                if status != BtStatus::Success {
                    debug!("[{}]: Cleanup disconnect failed: {:?}", self.addr, status);
                }
            }
            BtLeAudioConnectionState::Disconnecting => {
                warn!("[{}]: Disconnection timeout", self.addr);
            }
            _ => return None,
        }

        self.timeout = None;
        Some(self.transition_to(BtLeAudioConnectionState::Disconnected, timer))
    }

    fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }

    fn transition_to(
        &mut self,
        next: BtLeAudioConnectionState,
        timer: &StateTimeout,
    ) -> StateTransition {
        self.cancel_timeout();

        self.prev_state = self.state;
        self.state = next;

        if matches!(
            next,
            BtLeAudioConnectionState::Connecting | BtLeAudioConnectionState::Disconnecting
        ) {
            self.attempt += 1;
            self.timeout = Some(timer.arm(self.addr, self.attempt));
        }

        info!("[{}]: Connection state {:?} -> {:?}", self.addr, self.prev_state, self.state);
        StateTransition { prev: self.prev_state, new: self.state }
    }
}

impl Drop for LeAudioStateMachine {
    fn drop(&mut self) {
        self.cancel_timeout();
    }
}
