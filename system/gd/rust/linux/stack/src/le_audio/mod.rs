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

mod arbiter;
mod codec;
mod group;
mod state_machine;


pub use arbiter::ActiveRoute;
pub use codec::LeAudioCodecStatus;
pub use group::LeAudioGroup;

use log::{debug, error, info, warn};
use num_derive::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::callbacks::Callbacks;
use crate::config::LeAudioConfig;
use crate::{Message, RPCProxy};
use arbiter::{ActiveDeviceArbiter, RouteChange};
use codec::CodecNegotiationTracker;
use group::GroupRegistry;
use leaudio_topshim::btif::{BtBondState, BtStatus, RawAddress, Uuid};
use leaudio_topshim::profiles::le_audio::{
    AudioDirection, BtLeAudioConnectionState, BtLeAudioGroupNodeStatus, BtLeAudioGroupStatus,
    LeAudioCallbacks, LeAudioCallbacksDispatcher, LeAudioInterface, LE_AUDIO_GROUP_ID_INVALID,
    LE_AUDIO_UUID,
};
use state_machine::{
    is_connected, LeAudioStateMachine, StateMachines, StateTimeout, StateTransition,
};

/// Connection policy persisted per device by the profile storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum ConnectionPolicy {
    Unknown = -1,
    Forbidden = 0,
    Allowed = 100,
}

/// Extra information handed to the audio router on every active device change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeAudioRoutingInfo {
    pub group_id: i32,
    pub direction: AudioDirection,
    /// Set when audio moves to another device, so that playback is not paused.
    pub suppress_noisy_intent: bool,
}

/// Bonding and per-profile policy store.
pub trait IProfileStorage: Send {
    fn get_bond_state(&self, addr: RawAddress) -> BtBondState;

    fn get_remote_uuids(&self, addr: RawAddress) -> Vec<Uuid>;

    fn get_connection_policy(&self, addr: RawAddress) -> ConnectionPolicy;

    /// Persists the policy. Returns false if the store refused it.
    fn set_connection_policy(&mut self, addr: RawAddress, policy: ConnectionPolicy) -> bool;
}

/// The platform audio framework.
pub trait IAudioRouting: Send {
    fn active_device_changed(
        &mut self,
        new_device: Option<RawAddress>,
        prev_device: Option<RawAddress>,
        info: LeAudioRoutingInfo,
    );
}

/// LE Audio manager API.
pub trait IBluetoothLeAudio {
    fn register_callback(&mut self, callback: Box<dyn IBluetoothLeAudioCallback + Send>) -> u32;

    fn unregister_callback(&mut self, callback_id: u32) -> bool;

    /// Starts connecting. Returns the admission check result; the outcome is reported through
    /// `on_connection_state_changed`.
    fn connect(&mut self, addr: RawAddress) -> bool;

    fn disconnect(&mut self, addr: RawAddress) -> bool;

    fn set_connection_policy(&mut self, addr: RawAddress, policy: ConnectionPolicy) -> bool;

    fn get_connection_policy(&self, addr: RawAddress) -> ConnectionPolicy;

    /// Routes audio to `addr`, or to nothing with `None`.
    fn set_active_device(&mut self, addr: Option<RawAddress>) -> bool;

    fn get_active_devices(&self) -> Vec<RawAddress>;

    fn group_add_node(&mut self, group_id: i32, addr: RawAddress) -> bool;

    fn group_remove_node(&mut self, group_id: i32, addr: RawAddress) -> bool;

    /// Returns [`LE_AUDIO_GROUP_ID_INVALID`] for a device outside any group.
    fn get_group_id(&self, addr: RawAddress) -> i32;

    fn get_group_devices(&self, group_id: i32) -> Vec<RawAddress>;

    fn get_connected_group_lead_device(&self, group_id: i32) -> Option<RawAddress>;

    fn get_connection_state(&self, addr: RawAddress) -> BtLeAudioConnectionState;

    fn get_connected_devices(&self) -> Vec<RawAddress>;

    fn get_devices_matching_connection_states(
        &self,
        states: &[BtLeAudioConnectionState],
    ) -> Vec<RawAddress>;

    fn get_codec_status(&self, group_id: i32) -> Option<LeAudioCodecStatus>;

    /// Notification from the bonding layer.
    fn bond_state_changed(&mut self, addr: RawAddress, state: BtBondState);
}

/// LE Audio manager callbacks.
pub trait IBluetoothLeAudioCallback: RPCProxy {
    fn on_connection_state_changed(
        &mut self,
        addr: RawAddress,
        new_state: BtLeAudioConnectionState,
        prev_state: BtLeAudioConnectionState,
    );

    fn on_active_device_changed(&mut self, addr: Option<RawAddress>);

    fn on_group_status_changed(&mut self, group_id: i32, status: BtLeAudioGroupStatus);

    fn on_codec_config_changed(&mut self, group_id: i32, status: LeAudioCodecStatus);

    fn on_group_node_added(&mut self, addr: RawAddress, group_id: i32);

    fn on_group_node_removed(&mut self, addr: RawAddress, group_id: i32);
}

/// Work posted to the dispatch loop by API calls and timers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeAudioActions {
    Connect(RawAddress),
    Disconnect(RawAddress),
    SetActiveDevice(Option<RawAddress>),
    GroupAddNode(i32, RawAddress),
    GroupRemoveNode(i32, RawAddress),
    BondStateChanged(RawAddress, BtBondState),
    /// Connecting or Disconnecting took too long. Carries the attempt it was armed for.
    StateTimeout(RawAddress, u64),
    /// An absorbed dropout was not followed by a reconnect in time.
    GraceExpired(RawAddress, u64),
    /// Applies the disconnect of an absorbed dropout.
    CommitDisconnect(RawAddress),
}

/// Builds the dispatcher the native interface posts its events through.
pub fn get_le_audio_dispatcher(tx: UnboundedSender<Message>) -> LeAudioCallbacksDispatcher {
    LeAudioCallbacksDispatcher {
        dispatch: Box::new(move |cb| {
            let _ = tx.send(Message::LeAudio(cb));
        }),
    }
}

pub struct BluetoothLeAudio {
    tx: UnboundedSender<Message>,
    config: LeAudioConfig,
    intf: Box<dyn LeAudioInterface>,
    storage: Box<dyn IProfileStorage>,
    router: Box<dyn IAudioRouting>,
    callbacks: Callbacks<dyn IBluetoothLeAudioCallback + Send>,

    initialized: bool,
    native_initialized: bool,

    state_machines: StateMachines,
    next_discovery_seq: u64,
    timeout: StateTimeout,
    groups: GroupRegistry,
    arbiter: ActiveDeviceArbiter,
    codecs: CodecNegotiationTracker,
}

impl BluetoothLeAudio {
    pub fn new(
        tx: UnboundedSender<Message>,
        config: LeAudioConfig,
        intf: Box<dyn LeAudioInterface>,
        storage: Box<dyn IProfileStorage>,
        router: Box<dyn IAudioRouting>,
    ) -> BluetoothLeAudio {
        BluetoothLeAudio {
            callbacks: Callbacks::new(tx.clone(), Message::LeAudioCallbackDisconnected),
            timeout: StateTimeout::new(tx.clone(), config.connect_timeout),
            arbiter: ActiveDeviceArbiter::new(
                tx.clone(),
                config.grace_scope,
                config.lead_dropout_grace,
            ),
            tx,
            config,
            intf,
            storage,
            router,
            initialized: false,
            native_initialized: false,
            state_machines: HashMap::new(),
            next_discovery_seq: 0,
            groups: GroupRegistry::new(),
            codecs: CodecNegotiationTracker::new(),
        }
    }

    /// Hooks up the native interface. Returns false if already initialized.
    pub fn initialize(&mut self) -> bool {
        if self.initialized {
            warn!("LE Audio already initialized");
            return false;
        }
        self.initialized = true;
        self.intf.initialize(get_le_audio_dispatcher(self.tx.clone()));
        true
    }

    /// Drops all tracked state and shuts the native interface down.
    pub fn cleanup(&mut self) {
        if !self.initialized {
            return;
        }
        info!("LE Audio cleanup");
        self.state_machines.clear();
        self.groups = GroupRegistry::new();
        self.codecs = CodecNegotiationTracker::new();
        self.arbiter.reset();
        self.intf.cleanup();
        self.initialized = false;
        self.native_initialized = false;
    }

    pub fn is_native_initialized(&self) -> bool {
        self.native_initialized
    }

    pub fn get_group(&self, group_id: i32) -> Option<LeAudioGroup> {
        self.groups.group(group_id).cloned()
    }

    pub fn get_active_route(&self) -> ActiveRoute {
        self.arbiter.route()
    }

    pub fn remove_callback(&mut self, id: u32) -> bool {
        self.callbacks.remove_callback(id)
    }

    fn post(&self, action: LeAudioActions) {
        if let Err(e) = self.tx.send(Message::LeAudioActions(action)) {
            error!("Failed to post LE Audio action: {}", e);
        }
    }

    /// The admission check: bonded, not forbidden, and advertising LE Audio.
    fn ok_to_connect(&self, addr: RawAddress) -> bool {
        let bond_state = self.storage.get_bond_state(addr);
        if bond_state != BtBondState::Bonded {
            warn!("[{}]: Not bonded ({:?})", addr, bond_state);
            return false;
        }

        if self.storage.get_connection_policy(addr) == ConnectionPolicy::Forbidden {
            warn!("[{}]: LE Audio connection policy is forbidden", addr);
            return false;
        }

        if !self.storage.get_remote_uuids(addr).contains(&LE_AUDIO_UUID) {
            warn!("[{}]: Does not support LE Audio", addr);
            return false;
        }

        true
    }

    fn has_room_for(&self, addr: &RawAddress) -> bool {
        if self.state_machines.contains_key(addr)
            || self.state_machines.len() < self.config.max_state_machines
        {
            return true;
        }
        error!(
            "[{}]: Maximum number of LE Audio state machines reached: {}",
            addr, self.config.max_state_machines
        );
        false
    }

    fn ensure_state_machine(&mut self, addr: RawAddress) -> bool {
        if self.state_machines.contains_key(&addr) {
            return true;
        }
        if !self.has_room_for(&addr) {
            return false;
        }
        debug!("[{}]: Creating LE Audio state machine", addr);
        self.state_machines.insert(addr, LeAudioStateMachine::new(addr, self.next_discovery_seq));
        self.next_discovery_seq += 1;
        true
    }

    fn remove_state_machine(&mut self, addr: RawAddress) {
        if self.state_machines.remove(&addr).is_none() {
            return;
        }
        info!("[{}]: Removing LE Audio state machine", addr);
        self.arbiter.release(&addr);
        self.groups.remove_device(&addr);
    }

    pub fn dispatch_le_audio_callbacks(&mut self, cb: LeAudioCallbacks) {
        match cb {
            LeAudioCallbacks::Initialized => {
                info!("LE Audio native stack initialized");
                self.native_initialized = true;
            }
            LeAudioCallbacks::ConnectionState(state, addr) => {
                self.on_native_connection_state(addr, state);
            }
            LeAudioCallbacks::GroupStatus(group_id, status) => {
                self.on_group_status(group_id, status);
            }
            LeAudioCallbacks::GroupNodeStatus(addr, group_id, status) => {
                self.on_group_node_status(addr, group_id, status);
            }
            LeAudioCallbacks::GroupRemoved(group_id) => {
                self.on_group_removed(group_id);
            }
            LeAudioCallbacks::AudioConf(addr, direction, group_id, snk, src, contexts) => {
                let Some(group) = self.groups.group_mut(group_id) else {
                    warn!("Audio configuration for unknown group {}", group_id);
                    return;
                };
                debug!(
                    "Group {} audio conf from {:?}: direction={:?} sink={:?} source={:?} \
                     contexts={:?}",
                    group_id, addr, direction, snk, src, contexts
                );
                group.set_audio_conf(direction, snk, src, contexts);

                if group.is_active() && (direction.is_empty() || contexts.is_empty()) {
                    info!("Group {} lost its audio configuration, deactivating", group_id);
                    let change = self.arbiter.on_group_status(
                        &mut self.groups,
                        &self.state_machines,
                        group_id,
                        BtLeAudioGroupStatus::Inactive,
                    );
                    self.settle_route(change);
                    self.callbacks.for_all_callbacks(|callback| {
                        callback.on_group_status_changed(group_id, BtLeAudioGroupStatus::Inactive);
                    });
                }
            }
            LeAudioCallbacks::LocalCodecCapabilities(input, output) => {
                debug!("Local codec capabilities: {} input, {} output", input.len(), output.len());
                self.codecs.update_local_capabilities(input, output);
            }
            LeAudioCallbacks::GroupCodecConfig(
                group_id,
                input,
                output,
                input_selectable,
                output_selectable,
            ) => {
                if self.groups.group(group_id).is_none() {
                    warn!("Codec configuration for unknown group {}", group_id);
                    return;
                }
                let status = self.codecs.update_group_config(
                    group_id,
                    input,
                    output,
                    input_selectable,
                    output_selectable,
                );
                self.callbacks.for_all_callbacks(|callback| {
                    callback.on_codec_config_changed(group_id, status.clone());
                });
            }
        }
    }

    pub fn dispatch_le_audio_actions(&mut self, action: LeAudioActions) {
        match action {
            LeAudioActions::Connect(addr) => self.connect_device(addr),
            LeAudioActions::Disconnect(addr) => {
                let Some(sm) = self.state_machines.get_mut(&addr) else {
                    debug!("[{}]: Disconnect for untracked device", addr);
                    return;
                };
                if let Some(t) = sm.disconnect(self.intf.as_mut(), &self.timeout) {
                    self.on_transition(addr, t);
                }
            }
            LeAudioActions::SetActiveDevice(addr) => self.apply_active_device(addr),
            LeAudioActions::GroupAddNode(group_id, addr) => {
                self.groups.request_add_node(self.intf.as_mut(), group_id, addr);
            }
            LeAudioActions::GroupRemoveNode(group_id, addr) => {
                self.groups.request_remove_node(self.intf.as_mut(), group_id, addr);
            }
            LeAudioActions::BondStateChanged(addr, state) => {
                self.on_bond_state_changed(addr, state);
            }
            LeAudioActions::StateTimeout(addr, attempt) => {
                let Some(sm) = self.state_machines.get_mut(&addr) else {
                    return;
                };
                if let Some(t) = sm.on_timeout(attempt, self.intf.as_mut(), &self.timeout) {
                    self.on_transition(addr, t);
                }
            }
            LeAudioActions::GraceExpired(addr, seq) => {
                if self.arbiter.is_current_grace(&addr, seq) {
                    info!("[{}]: Did not come back within the grace period", addr);
                    self.commit_absorbed_disconnect(addr);
                }
            }
            LeAudioActions::CommitDisconnect(addr) => self.commit_absorbed_disconnect(addr),
        }
    }

    fn connect_device(&mut self, addr: RawAddress) {
        // Things may have changed since the request was accepted.
        if !self.ok_to_connect(addr) || !self.ensure_state_machine(addr) {
            return;
        }
        let Some(sm) = self.state_machines.get_mut(&addr) else {
            return;
        };
        if let Some(t) = sm.connect(self.intf.as_mut(), &self.timeout) {
            self.on_transition(addr, t);
        }
    }

    fn on_native_connection_state(&mut self, addr: RawAddress, state: BtLeAudioConnectionState) {
        let current = match self.state_machines.get(&addr) {
            Some(sm) => sm.state(),
            None => {
                if !matches!(
                    state,
                    BtLeAudioConnectionState::Connecting | BtLeAudioConnectionState::Connected
                ) {
                    debug!("[{}]: Ignoring {:?} for untracked device", addr, state);
                    return;
                }
                if !self.ok_to_connect(addr) || !self.has_room_for(&addr) {
                    warn!("[{}]: Rejecting incoming LE Audio connection", addr);
                    let status = self.intf.disconnect(addr);
                    if status != BtStatus::Success {
                        debug!("[{}]: Reject disconnect failed: {:?}", addr, status);
                    }
                    return;
                }
                if !self.ensure_state_machine(addr) {
                    return;
                }
                BtLeAudioConnectionState::Disconnected
            }
        };

        if current == BtLeAudioConnectionState::Connected {
            match state {
                BtLeAudioConnectionState::Disconnected if self.arbiter.is_absorbed(&addr) => {
                    debug!("[{}]: Repeated dropout while absorbed", addr);
                    return;
                }
                BtLeAudioConnectionState::Disconnected
                    if self.arbiter.should_absorb(&self.groups, &self.state_machines, &addr) =>
                {
                    self.arbiter.absorb(addr);
                    return;
                }
                BtLeAudioConnectionState::Connected if self.arbiter.release(&addr) => {
                    info!("[{}]: Reconnected within the grace period", addr);
                    return;
                }
                _ => {}
            }
        }

        let bring_up = matches!(
            current,
            BtLeAudioConnectionState::Disconnected | BtLeAudioConnectionState::Disconnecting
        ) && matches!(
            state,
            BtLeAudioConnectionState::Connecting | BtLeAudioConnectionState::Connected
        );
        let admitted = !bring_up || self.ok_to_connect(addr);

        let Some(sm) = self.state_machines.get_mut(&addr) else {
            return;
        };
        if let Some(t) = sm.on_native_state(state, admitted, self.intf.as_mut(), &self.timeout) {
            self.on_transition(addr, t);
        }
    }

    /// Reports an executed transition and lets groups and routing catch up.
    fn on_transition(&mut self, addr: RawAddress, t: StateTransition) {
        self.callbacks.for_all_callbacks(|callback| {
            callback.on_connection_state_changed(addr, t.new, t.prev);
        });

        if t.new != BtLeAudioConnectionState::Connected {
            self.arbiter.release(&addr);
        }

        if t.prev == BtLeAudioConnectionState::Connected {
            let group_id = self.groups.group_id(&addr);
            let change = self.arbiter.on_member_down(
                &mut self.groups,
                &self.state_machines,
                &addr,
                group_id,
            );
            self.settle_route(change);
        }

        if t.new == BtLeAudioConnectionState::Disconnected
            && self.storage.get_bond_state(addr) == BtBondState::NotBonded
        {
            self.remove_state_machine(addr);
        }
    }

    fn commit_absorbed_disconnect(&mut self, addr: RawAddress) {
        if !self.arbiter.release(&addr) {
            debug!("[{}]: Nothing to commit, device came back", addr);
            return;
        }
        info!("[{}]: Committing absorbed disconnect", addr);
        let Some(sm) = self.state_machines.get_mut(&addr) else {
            return;
        };
        if let Some(t) = sm.on_native_state(
            BtLeAudioConnectionState::Disconnected,
            true,
            self.intf.as_mut(),
            &self.timeout,
        ) {
            self.on_transition(addr, t);
        }
    }

    /// Reports a route change and schedules commits for dropouts that can no longer be hidden.
    fn settle_route(&mut self, change: Option<RouteChange>) {
        if let Some(change) = change {
            let group_id = change.new.group_id.or(change.old.group_id);
            let direction = group_id
                .and_then(|id| self.groups.group(id))
                .map_or(AudioDirection::empty(), |group| group.direction());
            let info = LeAudioRoutingInfo {
                group_id: group_id.unwrap_or(LE_AUDIO_GROUP_ID_INVALID),
                direction,
                suppress_noisy_intent: change.new.device.is_some(),
            };

            info!("Active LE Audio device: {:?} -> {:?}", change.old.device, change.new.device);
            self.router.active_device_changed(change.new.device, change.old.device, info);
            self.callbacks.for_all_callbacks(|callback| {
                callback.on_active_device_changed(change.new.device);
            });
        }

        for addr in self.arbiter.stale_absorbed(&self.groups) {
            self.post(LeAudioActions::CommitDisconnect(addr));
        }
    }

    fn apply_active_device(&mut self, addr: Option<RawAddress>) {
        let (change, native_group) = match addr {
            Some(addr) => {
                let group_id = match self.groups.group_id(&addr) {
                    Some(group_id)
                        if is_connected(&self.state_machines, &addr)
                            && !self.arbiter.is_absorbed(&addr) =>
                    {
                        group_id
                    }
                    _ => {
                        warn!("[{}]: No longer eligible to become active", addr);
                        return;
                    }
                };
                (self.arbiter.activate(&mut self.groups, addr, group_id), group_id)
            }
            None => (self.arbiter.deactivate(&mut self.groups), LE_AUDIO_GROUP_ID_INVALID),
        };

        let status = self.intf.group_set_active(native_group);
        if status != BtStatus::Success {
            warn!("Failed to set group {} active: {:?}", native_group, status);
        }
        self.settle_route(change);
    }

    fn on_group_status(&mut self, group_id: i32, status: BtLeAudioGroupStatus) {
        if self.groups.group(group_id).is_none() {
            warn!("Status {:?} for unknown group {}", status, group_id);
            return;
        }
        if status == BtLeAudioGroupStatus::Active {
            if !self.groups.is_group_connected(group_id, &self.state_machines) {
                warn!("Group {} reported active without a connected member, ignoring", group_id);
                return;
            }
            if !self.arbiter.has_live_member(&self.groups, &self.state_machines, group_id) {
                warn!("Group {} reported active while every member is down, ignoring", group_id);
                return;
            }
        }

        info!("Group {} status {:?}", group_id, status);
        let change =
            self.arbiter.on_group_status(&mut self.groups, &self.state_machines, group_id, status);
        self.settle_route(change);
        self.callbacks.for_all_callbacks(|callback| {
            callback.on_group_status_changed(group_id, status);
        });
    }

    fn on_group_node_status(
        &mut self,
        addr: RawAddress,
        group_id: i32,
        status: BtLeAudioGroupNodeStatus,
    ) {
        let membership = match status {
            BtLeAudioGroupNodeStatus::Added => self.groups.on_node_added(addr, group_id),
            BtLeAudioGroupNodeStatus::Removed => self.groups.on_node_removed(addr, group_id),
        };

        if let Some(left) = membership.left {
            info!("[{}]: Left group {}", addr, left);
            self.callbacks.for_all_callbacks(|callback| {
                callback.on_group_node_removed(addr, left);
            });
            let change = self.arbiter.on_member_down(
                &mut self.groups,
                &self.state_machines,
                &addr,
                Some(left),
            );
            self.settle_route(change);
        }

        if let Some(joined) = membership.joined {
            info!("[{}]: Joined group {}", addr, joined);
            self.callbacks.for_all_callbacks(|callback| {
                callback.on_group_node_added(addr, joined);
            });
        }
    }

    fn on_group_removed(&mut self, group_id: i32) {
        let Some(group) = self.groups.remove_group(group_id) else {
            debug!("Removal of unknown group {}", group_id);
            return;
        };
        info!("Group {} removed", group_id);
        self.codecs.remove_group(group_id);

        for addr in group.members().iter() {
            let addr = *addr;
            self.callbacks.for_all_callbacks(|callback| {
                callback.on_group_node_removed(addr, group_id);
            });
        }

        let change = if self.arbiter.route().group_id == Some(group_id) {
            self.arbiter.deactivate(&mut self.groups)
        } else {
            None
        };
        self.settle_route(change);
    }

    fn on_bond_state_changed(&mut self, addr: RawAddress, state: BtBondState) {
        debug!("[{}]: Bond state changed to {:?}", addr, state);
        if state != BtBondState::NotBonded {
            return;
        }
        match self.state_machines.get(&addr).map(|sm| sm.state()) {
            None => {}
            Some(BtLeAudioConnectionState::Disconnected) => self.remove_state_machine(addr),
            Some(state) => {
                info!("[{}]: Unbonded while {:?}, removing once disconnected", addr, state);
            }
        }
    }
}

impl IBluetoothLeAudio for BluetoothLeAudio {
    fn register_callback(&mut self, callback: Box<dyn IBluetoothLeAudioCallback + Send>) -> u32 {
        self.callbacks.add_callback(callback)
    }

    fn unregister_callback(&mut self, callback_id: u32) -> bool {
        self.callbacks.remove_callback(callback_id)
    }

    fn connect(&mut self, addr: RawAddress) -> bool {
        if !self.native_initialized {
            warn!("[{}]: LE Audio is not initialized", addr);
            return false;
        }
        let state = self.get_connection_state(addr);
        if state != BtLeAudioConnectionState::Disconnected {
            warn!("[{}]: Cannot connect in {:?}", addr, state);
            return false;
        }
        if !self.ok_to_connect(addr) || !self.has_room_for(&addr) {
            return false;
        }
        self.post(LeAudioActions::Connect(addr));
        true
    }

    fn disconnect(&mut self, addr: RawAddress) -> bool {
        if !self.native_initialized {
            warn!("[{}]: LE Audio is not initialized", addr);
            return false;
        }
        if !self.state_machines.contains_key(&addr) {
            debug!("[{}]: Disconnect for untracked device", addr);
            return false;
        }
        self.post(LeAudioActions::Disconnect(addr));
        true
    }

    fn set_connection_policy(&mut self, addr: RawAddress, policy: ConnectionPolicy) -> bool {
        if !self.storage.set_connection_policy(addr, policy) {
            warn!("[{}]: Failed to store connection policy {:?}", addr, policy);
            return false;
        }
        match policy {
            ConnectionPolicy::Allowed => {
                self.connect(addr);
            }
            ConnectionPolicy::Forbidden => {
                self.disconnect(addr);
            }
            ConnectionPolicy::Unknown => {}
        }
        true
    }

    fn get_connection_policy(&self, addr: RawAddress) -> ConnectionPolicy {
        self.storage.get_connection_policy(addr)
    }

    fn set_active_device(&mut self, addr: Option<RawAddress>) -> bool {
        if !self.native_initialized {
            warn!("LE Audio is not initialized");
            return false;
        }
        if let Some(addr) = addr {
            if !is_connected(&self.state_machines, &addr) {
                warn!("[{}]: Cannot become active, not connected", addr);
                return false;
            }
            if self.arbiter.is_absorbed(&addr) {
                warn!("[{}]: Cannot become active, link is down", addr);
                return false;
            }
            if self.groups.group_id(&addr).is_none() {
                warn!("[{}]: Cannot become active, not in a group", addr);
                return false;
            }
        }
        self.post(LeAudioActions::SetActiveDevice(addr));
        true
    }

    fn get_active_devices(&self) -> Vec<RawAddress> {
        self.arbiter.route().device.into_iter().collect()
    }

    fn group_add_node(&mut self, group_id: i32, addr: RawAddress) -> bool {
        if !self.native_initialized {
            warn!("[{}]: LE Audio is not initialized", addr);
            return false;
        }
        self.post(LeAudioActions::GroupAddNode(group_id, addr));
        true
    }

    fn group_remove_node(&mut self, group_id: i32, addr: RawAddress) -> bool {
        if !self.native_initialized {
            warn!("[{}]: LE Audio is not initialized", addr);
            return false;
        }
        if self.groups.group_id(&addr) != Some(group_id) {
            warn!("[{}]: Not a member of group {}", addr, group_id);
            return false;
        }
        self.post(LeAudioActions::GroupRemoveNode(group_id, addr));
        true
    }

    fn get_group_id(&self, addr: RawAddress) -> i32 {
        self.groups.group_id(&addr).unwrap_or(LE_AUDIO_GROUP_ID_INVALID)
    }

    fn get_group_devices(&self, group_id: i32) -> Vec<RawAddress> {
        self.groups.members(group_id, &self.state_machines)
    }

    fn get_connected_group_lead_device(&self, group_id: i32) -> Option<RawAddress> {
        self.groups.lead_device(group_id, &self.state_machines)
    }

    fn get_connection_state(&self, addr: RawAddress) -> BtLeAudioConnectionState {
        self.state_machines
            .get(&addr)
            .map_or(BtLeAudioConnectionState::Disconnected, |sm| sm.state())
    }

    fn get_connected_devices(&self) -> Vec<RawAddress> {
        self.get_devices_matching_connection_states(&[BtLeAudioConnectionState::Connected])
    }

    fn get_devices_matching_connection_states(
        &self,
        states: &[BtLeAudioConnectionState],
    ) -> Vec<RawAddress> {
        let mut devices: Vec<(u64, RawAddress)> = self
            .state_machines
            .iter()
            .filter(|(_, sm)| states.contains(&sm.state()))
            .map(|(addr, sm)| (sm.discovery_seq(), *addr))
            .collect();
        devices.sort();
        devices.into_iter().map(|(_, addr)| addr).collect()
    }

    fn get_codec_status(&self, group_id: i32) -> Option<LeAudioCodecStatus> {
        self.codecs.codec_status(group_id)
    }

    fn bond_state_changed(&mut self, addr: RawAddress, state: BtBondState) {
        self.post(LeAudioActions::BondStateChanged(addr, state));
    }
}
