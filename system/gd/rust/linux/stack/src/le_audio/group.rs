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

//! Device to group bookkeeping.

use itertools::Itertools;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::le_audio::state_machine::{is_connected, StateMachines};
use leaudio_topshim::btif::{BtStatus, RawAddress};
use leaudio_topshim::profiles::le_audio::{
    AudioContexts, AudioDirection, AudioLocations, LeAudioInterface,
};

/// A coordinated set of devices rendering one audio stream.
#[derive(Clone, Debug)]
pub struct LeAudioGroup {
    group_id: i32,
    members: HashSet<RawAddress>,
    is_active: bool,
    direction: AudioDirection,
    sink_locations: AudioLocations,
    source_locations: AudioLocations,
    available_contexts: AudioContexts,
}

impl LeAudioGroup {
    fn new(group_id: i32) -> Self {
        LeAudioGroup {
            group_id,
            members: HashSet::new(),
            is_active: false,
            direction: AudioDirection::empty(),
            sink_locations: AudioLocations::empty(),
            source_locations: AudioLocations::empty(),
            available_contexts: AudioContexts::empty(),
        }
    }

    pub fn group_id(&self) -> i32 {
        self.group_id
    }

    pub fn members(&self) -> &HashSet<RawAddress> {
        &self.members
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn direction(&self) -> AudioDirection {
        self.direction
    }

    pub fn sink_locations(&self) -> AudioLocations {
        self.sink_locations
    }

    pub fn source_locations(&self) -> AudioLocations {
        self.source_locations
    }

    pub fn available_contexts(&self) -> AudioContexts {
        self.available_contexts
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }

    pub(crate) fn set_audio_conf(
        &mut self,
        direction: AudioDirection,
        sink_locations: AudioLocations,
        source_locations: AudioLocations,
        available_contexts: AudioContexts,
    ) {
        self.direction = direction;
        self.sink_locations = sink_locations;
        self.source_locations = source_locations;
        self.available_contexts = available_contexts;
    }
}

/// Result of applying a node status event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Membership {
    pub joined: Option<i32>,
    pub left: Option<i32>,
}

#[derive(Default)]
pub(crate) struct GroupRegistry {
    groups: HashMap<i32, LeAudioGroup>,
    device_group: HashMap<RawAddress, i32>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the native stack to add the node. The mapping changes on the node status event.
    pub fn request_add_node(
        &self,
        intf: &mut dyn LeAudioInterface,
        group_id: i32,
        addr: RawAddress,
    ) -> bool {
        if self.device_group.get(&addr) == Some(&group_id) {
            debug!("[{}]: Already in group {}", addr, group_id);
            return true;
        }
        let status = intf.group_add_node(group_id, addr);
        if status != BtStatus::Success {
            warn!("[{}]: Failed to add to group {}: {:?}", addr, group_id, status);
        }
        status == BtStatus::Success
    }

    /// Asks the native stack to remove the node. The mapping changes on the node status event.
    pub fn request_remove_node(
        &self,
        intf: &mut dyn LeAudioInterface,
        group_id: i32,
        addr: RawAddress,
    ) -> bool {
        if self.device_group.get(&addr) != Some(&group_id) {
            debug!("[{}]: Not in group {}", addr, group_id);
            return false;
        }
        let status = intf.group_remove_node(group_id, addr);
        if status != BtStatus::Success {
            warn!("[{}]: Failed to remove from group {}: {:?}", addr, group_id, status);
        }
        status == BtStatus::Success
    }

    /// Commits an added node. A device in another group is moved out of it.
    pub fn on_node_added(&mut self, addr: RawAddress, group_id: i32) -> Membership {
        if self.device_group.get(&addr) == Some(&group_id) {
            return Membership::default();
        }

        let left = self.device_group.insert(addr, group_id);
        if let Some(old) = left {
            if let Some(group) = self.groups.get_mut(&old) {
                group.members.remove(&addr);
            }
        }
        self.groups
            .entry(group_id)
            .or_insert_with(|| LeAudioGroup::new(group_id))
            .members
            .insert(addr);

        Membership { joined: Some(group_id), left }
    }

    /// Commits a removed node. A device that is not in `group_id` is left alone.
    pub fn on_node_removed(&mut self, addr: RawAddress, group_id: i32) -> Membership {
        if self.device_group.get(&addr) != Some(&group_id) {
            debug!("[{}]: Node removed from group {} it is not in", addr, group_id);
            return Membership::default();
        }

        self.device_group.remove(&addr);
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.members.remove(&addr);
        }
        Membership { joined: None, left: Some(group_id) }
    }

    /// Drops a device that is no longer tracked. Its group stays, possibly empty.
    pub fn remove_device(&mut self, addr: &RawAddress) -> Option<i32> {
        let group_id = self.device_group.remove(addr)?;
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.members.remove(addr);
        }
        Some(group_id)
    }

    /// Tears a group down, returning it with the members it still had.
    pub fn remove_group(&mut self, group_id: i32) -> Option<LeAudioGroup> {
        let group = self.groups.remove(&group_id)?;
        for addr in group.members.iter() {
            self.device_group.remove(addr);
        }
        Some(group)
    }

    pub fn group_id(&self, addr: &RawAddress) -> Option<i32> {
        self.device_group.get(addr).copied()
    }

    pub fn group(&self, group_id: i32) -> Option<&LeAudioGroup> {
        self.groups.get(&group_id)
    }

    pub fn group_mut(&mut self, group_id: i32) -> Option<&mut LeAudioGroup> {
        self.groups.get_mut(&group_id)
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut LeAudioGroup> {
        self.groups.values_mut()
    }

    /// Members of a group, in discovery order. Untracked members go last.
    pub fn members(&self, group_id: i32, machines: &StateMachines) -> Vec<RawAddress> {
        match self.groups.get(&group_id) {
            Some(group) => group
                .members
                .iter()
                .copied()
                .sorted_by_key(|addr| {
                    (machines.get(addr).map_or(u64::MAX, |sm| sm.discovery_seq()), *addr)
                })
                .collect(),
            None => vec![],
        }
    }

    pub fn is_group_connected(&self, group_id: i32, machines: &StateMachines) -> bool {
        self.groups
            .get(&group_id)
            .map_or(false, |group| group.members.iter().any(|addr| is_connected(machines, addr)))
    }

    /// The first discovered connected member of the group.
    pub fn lead_device(&self, group_id: i32, machines: &StateMachines) -> Option<RawAddress> {
        self.lead_device_where(group_id, machines, |_| true)
    }

    /// Like [`Self::lead_device`], restricted to members accepted by `filter`.
    pub fn lead_device_where<F: Fn(&RawAddress) -> bool>(
        &self,
        group_id: i32,
        machines: &StateMachines,
        filter: F,
    ) -> Option<RawAddress> {
        let group = self.groups.get(&group_id)?;
        group
            .members
            .iter()
            .filter(|addr| is_connected(machines, addr) && filter(addr))
            .filter_map(|addr| machines.get(addr).map(|sm| (sm.discovery_seq(), *addr)))
            .min()
            .map(|(_, addr)| addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::le_audio::state_machine::{LeAudioStateMachine, StateTimeout};
    use leaudio_topshim::profiles::le_audio::{
        BtLeAudioConnectionState, LeAudioCallbacksDispatcher,
    };
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    struct NoopIntf;

    impl LeAudioInterface for NoopIntf {
        fn initialize(&mut self, _dispatcher: LeAudioCallbacksDispatcher) {}
        fn cleanup(&mut self) {}
        fn connect(&mut self, _addr: RawAddress) -> BtStatus {
            BtStatus::Success
        }
        fn disconnect(&mut self, _addr: RawAddress) -> BtStatus {
            BtStatus::Success
        }
        fn group_add_node(&mut self, _group_id: i32, _addr: RawAddress) -> BtStatus {
            BtStatus::Success
        }
        fn group_remove_node(&mut self, _group_id: i32, _addr: RawAddress) -> BtStatus {
            BtStatus::Fail
        }
        fn group_set_active(&mut self, _group_id: i32) -> BtStatus {
            BtStatus::Success
        }
    }

    fn addr(last: u8) -> RawAddress {
        RawAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, last])
    }

    fn connected_machines(addrs: &[(RawAddress, u64)]) -> StateMachines {
        let (tx, _rx) = unbounded_channel();
        let timer = StateTimeout::new(tx, Duration::from_secs(30));
        let mut machines = StateMachines::new();
        for (addr, seq) in addrs {
            let mut sm = LeAudioStateMachine::new(*addr, *seq);
            sm.on_native_state(BtLeAudioConnectionState::Connected, true, &mut NoopIntf, &timer);
            machines.insert(*addr, sm);
        }
        machines
    }

    #[test]
    fn move_between_groups() {
        let mut registry = GroupRegistry::new();
        let a = addr(1);

        assert_eq!(registry.on_node_added(a, 1), Membership { joined: Some(1), left: None });
        assert_eq!(registry.on_node_added(a, 1), Membership::default());
        assert_eq!(registry.on_node_added(a, 2), Membership { joined: Some(2), left: Some(1) });

        assert_eq!(registry.group_id(&a), Some(2));
        assert!(registry.group(1).unwrap().members().is_empty());
        assert!(registry.group(2).unwrap().members().contains(&a));
    }

    #[test]
    fn remove_only_from_own_group() {
        let mut registry = GroupRegistry::new();
        let a = addr(1);
        registry.on_node_added(a, 1);

        assert_eq!(registry.on_node_removed(a, 2), Membership::default());
        assert_eq!(registry.group_id(&a), Some(1));
        assert_eq!(registry.on_node_removed(a, 1), Membership { joined: None, left: Some(1) });
        assert_eq!(registry.group_id(&a), None);
        // The group record outlives its last member.
        assert!(registry.group(1).is_some());
    }

    #[test]
    fn remove_device_keeps_group() {
        let mut registry = GroupRegistry::new();
        let a = addr(1);
        registry.on_node_added(a, 7);

        assert_eq!(registry.remove_device(&a), Some(7));
        assert_eq!(registry.remove_device(&a), None);
        assert!(registry.group(7).unwrap().members().is_empty());

        registry.on_node_added(a, 7);
        let removed = registry.remove_group(7).unwrap();
        assert!(removed.members().contains(&a));
        assert_eq!(registry.group_id(&a), None);
        assert!(registry.group(7).is_none());
    }

    #[tokio::test]
    async fn lead_is_first_discovered_connected_member() {
        let mut registry = GroupRegistry::new();
        let (a, b, c) = (addr(1), addr(2), addr(3));
        for d in [c, a, b] {
            registry.on_node_added(d, 1);
        }

        let machines = connected_machines(&[(b, 5), (c, 9)]);
        assert!(registry.is_group_connected(1, &machines));
        assert_eq!(registry.lead_device(1, &machines), Some(b));
        assert_eq!(registry.lead_device_where(1, &machines, |d| *d != b), Some(c));
        assert_eq!(registry.members(1, &machines), vec![b, c, a]);

        let empty = StateMachines::new();
        assert!(!registry.is_group_connected(1, &empty));
        assert_eq!(registry.lead_device(1, &empty), None);
        assert_eq!(registry.lead_device(42, &machines), None);
    }

    #[test]
    fn native_requests() {
        let mut registry = GroupRegistry::new();
        let a = addr(1);

        assert!(registry.request_add_node(&mut NoopIntf, 1, a));
        // Nothing committed until the node status event.
        assert_eq!(registry.group_id(&a), None);
        assert!(!registry.request_remove_node(&mut NoopIntf, 1, a));

        registry.on_node_added(a, 1);
        // The native side refuses removals in this fake.
        assert!(!registry.request_remove_node(&mut NoopIntf, 1, a));
    }
}
