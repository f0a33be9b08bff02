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

//! Chooses the active LE Audio device and hides short link losses of group members.

use log::{debug, info};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::GraceScope;
use crate::le_audio::group::GroupRegistry;
use crate::le_audio::state_machine::{is_connected, StateMachines};
use crate::le_audio::LeAudioActions;
use crate::Message;
use leaudio_topshim::btif::RawAddress;
use leaudio_topshim::profiles::le_audio::BtLeAudioGroupStatus;

/// The device audio is currently routed to and the group it belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveRoute {
    pub device: Option<RawAddress>,
    pub group_id: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RouteChange {
    pub old: ActiveRoute,
    pub new: ActiveRoute,
}

/// A dropout that was absorbed. The device is still recorded Connected.
struct Absorbed {
    seq: u64,
    grace: Option<JoinHandle<()>>,
}

impl Drop for Absorbed {
    fn drop(&mut self) {
        if let Some(handle) = self.grace.take() {
            handle.abort();
        }
    }
}

pub(crate) struct ActiveDeviceArbiter {
    route: ActiveRoute,
    grace_scope: GraceScope,
    grace_period: Option<Duration>,
    tx: UnboundedSender<Message>,
    absorbed: HashMap<RawAddress, Absorbed>,
    next_seq: u64,
}

impl ActiveDeviceArbiter {
    pub fn new(
        tx: UnboundedSender<Message>,
        grace_scope: GraceScope,
        grace_period: Option<Duration>,
    ) -> Self {
        ActiveDeviceArbiter {
            route: ActiveRoute::default(),
            grace_scope,
            grace_period,
            tx,
            absorbed: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn route(&self) -> ActiveRoute {
        self.route
    }

    pub fn is_absorbed(&self, addr: &RawAddress) -> bool {
        self.absorbed.contains_key(addr)
    }

    /// Drops the route and every absorbed dropout without committing anything.
    pub fn reset(&mut self) {
        self.route = ActiveRoute::default();
        self.absorbed.clear();
    }

    fn set_route(&mut self, new: ActiveRoute) -> Option<RouteChange> {
        if new == self.route {
            return None;
        }
        let old = std::mem::replace(&mut self.route, new);
        Some(RouteChange { old, new })
    }

    fn mark_active_group(groups: &mut GroupRegistry, active: Option<i32>) {
        for group in groups.groups_mut() {
            group.set_active(Some(group.group_id()) == active);
        }
    }

    /// Routes audio to `addr`. The caller has checked that it is a connected member of
    /// `group_id`.
    pub fn activate(
        &mut self,
        groups: &mut GroupRegistry,
        addr: RawAddress,
        group_id: i32,
    ) -> Option<RouteChange> {
        Self::mark_active_group(groups, Some(group_id));
        self.set_route(ActiveRoute { device: Some(addr), group_id: Some(group_id) })
    }

    pub fn deactivate(&mut self, groups: &mut GroupRegistry) -> Option<RouteChange> {
        Self::mark_active_group(groups, None);
        self.set_route(ActiveRoute::default())
    }

    /// Applies a native group status. An Active status for a group without a live member is
    /// ignored.
    pub fn on_group_status(
        &mut self,
        groups: &mut GroupRegistry,
        machines: &StateMachines,
        group_id: i32,
        status: BtLeAudioGroupStatus,
    ) -> Option<RouteChange> {
        match status {
            BtLeAudioGroupStatus::Active => {
                // Keep a device that was picked explicitly for this group.
                let device = match self.route.device {
                    Some(current)
                        if self.route.group_id == Some(group_id)
                            && is_connected(machines, &current)
                            && !self.is_absorbed(&current) =>
                    {
                        Some(current)
                    }
                    _ => groups
                        .lead_device_where(group_id, machines, |d| !self.absorbed.contains_key(d)),
                };
                match device {
                    Some(device) => self.activate(groups, device, group_id),
                    None => {
                        debug!("Group {} active without a connected member", group_id);
                        None
                    }
                }
            }
            BtLeAudioGroupStatus::Inactive => {
                if let Some(group) = groups.group_mut(group_id) {
                    group.set_active(false);
                }
                if self.route.group_id == Some(group_id) {
                    self.set_route(ActiveRoute::default())
                } else {
                    None
                }
            }
        }
    }

    /// Whether a native Disconnected for `addr` should be absorbed instead of applied.
    pub fn should_absorb(
        &self,
        groups: &GroupRegistry,
        machines: &StateMachines,
        addr: &RawAddress,
    ) -> bool {
        let Some(group_id) = self.route.group_id else {
            return false;
        };
        if self.is_absorbed(addr) || groups.group_id(addr) != Some(group_id) {
            return false;
        }
        if !groups.group(group_id).map_or(false, |group| group.is_active()) {
            return false;
        }

        let eligible = match self.grace_scope {
            GraceScope::LeadOnly => self.route.device == Some(*addr),
            GraceScope::AnyMember => true,
        };
        eligible && self.next_live_lead(groups, machines, group_id, addr).is_some()
    }

    /// Whether `group_id` has a connected member whose dropout is not being absorbed.
    pub fn has_live_member(
        &self,
        groups: &GroupRegistry,
        machines: &StateMachines,
        group_id: i32,
    ) -> bool {
        groups.lead_device_where(group_id, machines, |d| !self.absorbed.contains_key(d)).is_some()
    }

    fn next_live_lead(
        &self,
        groups: &GroupRegistry,
        machines: &StateMachines,
        group_id: i32,
        except: &RawAddress,
    ) -> Option<RawAddress> {
        groups.lead_device_where(group_id, machines, |d| {
            d != except && !self.absorbed.contains_key(d)
        })
    }

    /// Records an absorbed dropout and starts its grace timer if one is configured.
    pub fn absorb(&mut self, addr: RawAddress) {
        self.next_seq += 1;
        let seq = self.next_seq;

        let grace = self.grace_period.map(|period| {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(period).await;
                let _ = tx.send(Message::LeAudioActions(LeAudioActions::GraceExpired(addr, seq)));
            })
        });

        info!("[{}]: Absorbing dropout, group still has a live member", addr);
        self.absorbed.insert(addr, Absorbed { seq, grace });
    }

    /// Forgets an absorbed dropout. Returns false if `addr` was not absorbed.
    pub fn release(&mut self, addr: &RawAddress) -> bool {
        self.absorbed.remove(addr).is_some()
    }

    /// Whether `seq` is the grace timer of the dropout currently absorbed for `addr`.
    pub fn is_current_grace(&self, addr: &RawAddress, seq: u64) -> bool {
        self.absorbed.get(addr).map_or(false, |absorbed| absorbed.seq == seq)
    }

    /// Absorbed devices outside the active group. Their dropout can no longer be hidden.
    pub fn stale_absorbed(&self, groups: &GroupRegistry) -> Vec<RawAddress> {
        let mut stale: Vec<RawAddress> = self
            .absorbed
            .keys()
            .filter(|addr| {
                self.route.group_id.is_none() || groups.group_id(addr) != self.route.group_id
            })
            .copied()
            .collect();
        stale.sort();
        stale
    }

    /// Re-evaluates the route after `addr` stopped being a live member of `group_id`, either by
    /// leaving Connected or by leaving the group.
    pub fn on_member_down(
        &mut self,
        groups: &mut GroupRegistry,
        machines: &StateMachines,
        addr: &RawAddress,
        group_id: Option<i32>,
    ) -> Option<RouteChange> {
        let active_group = self.route.group_id?;
        if group_id != Some(active_group) && self.route.device != Some(*addr) {
            return None;
        }

        match self.next_live_lead(groups, machines, active_group, addr) {
            Some(lead) if self.route.device == Some(*addr) => {
                self.set_route(ActiveRoute { device: Some(lead), group_id: Some(active_group) })
            }
            Some(_) => None,
            None => {
                if let Some(group) = groups.group_mut(active_group) {
                    group.set_active(false);
                }
                self.set_route(ActiveRoute::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::le_audio::state_machine::{LeAudioStateMachine, StateTimeout};
    use leaudio_topshim::btif::BtStatus;
    use leaudio_topshim::profiles::le_audio::{
        BtLeAudioConnectionState, LeAudioCallbacksDispatcher, LeAudioInterface,
    };
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

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
            BtStatus::Success
        }
        fn group_set_active(&mut self, _group_id: i32) -> BtStatus {
            BtStatus::Success
        }
    }

    const GROUP: i32 = 3;

    fn addr(last: u8) -> RawAddress {
        RawAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    struct Fixture {
        groups: GroupRegistry,
        machines: StateMachines,
        arbiter: ActiveDeviceArbiter,
        rx: UnboundedReceiver<Message>,
    }

    /// Connected members in discovery order, all in `GROUP`.
    fn fixture(members: &[RawAddress], scope: GraceScope, grace: Option<Duration>) -> Fixture {
        let (tx, rx) = unbounded_channel();
        let timer = StateTimeout::new(tx.clone(), Duration::from_secs(30));
        let mut groups = GroupRegistry::new();
        let mut machines = StateMachines::new();
        for (seq, d) in members.iter().enumerate() {
            let mut sm = LeAudioStateMachine::new(*d, seq as u64);
            sm.on_native_state(BtLeAudioConnectionState::Connected, true, &mut NoopIntf, &timer);
            machines.insert(*d, sm);
            groups.on_node_added(*d, GROUP);
        }
        Fixture { groups, machines, arbiter: ActiveDeviceArbiter::new(tx, scope, grace), rx }
    }

    fn drop_link(f: &mut Fixture, d: RawAddress) {
        let (tx, _rx) = unbounded_channel();
        let timer = StateTimeout::new(tx, Duration::from_secs(30));
        f.machines.get_mut(&d).unwrap().on_native_state(
            BtLeAudioConnectionState::Disconnected,
            true,
            &mut NoopIntf,
            &timer,
        );
    }

    #[tokio::test]
    async fn group_active_picks_lead() {
        let (a, b) = (addr(1), addr(2));
        let mut f = fixture(&[a, b], GraceScope::LeadOnly, None);

        let change = f
            .arbiter
            .on_group_status(&mut f.groups, &f.machines, GROUP, BtLeAudioGroupStatus::Active)
            .unwrap();
        assert_eq!(change.old, ActiveRoute::default());
        assert_eq!(change.new, ActiveRoute { device: Some(a), group_id: Some(GROUP) });
        assert!(f.groups.group(GROUP).unwrap().is_active());

        // Repeated status is not a change.
        assert!(f
            .arbiter
            .on_group_status(&mut f.groups, &f.machines, GROUP, BtLeAudioGroupStatus::Active)
            .is_none());

        let change = f
            .arbiter
            .on_group_status(&mut f.groups, &f.machines, GROUP, BtLeAudioGroupStatus::Inactive)
            .unwrap();
        assert_eq!(change.new, ActiveRoute::default());
        assert!(!f.groups.group(GROUP).unwrap().is_active());
    }

    #[tokio::test]
    async fn explicit_choice_survives_group_active() {
        let (a, b) = (addr(1), addr(2));
        let mut f = fixture(&[a, b], GraceScope::LeadOnly, None);

        assert!(f.arbiter.activate(&mut f.groups, b, GROUP).is_some());
        assert!(f
            .arbiter
            .on_group_status(&mut f.groups, &f.machines, GROUP, BtLeAudioGroupStatus::Active)
            .is_none());
        assert_eq!(f.arbiter.route().device, Some(b));
    }

    #[tokio::test]
    async fn lead_only_absorbs_lead() {
        let (a, b) = (addr(1), addr(2));
        let mut f = fixture(&[a, b], GraceScope::LeadOnly, None);
        f.arbiter.activate(&mut f.groups, a, GROUP);

        assert!(!f.arbiter.should_absorb(&f.groups, &f.machines, &b));
        assert!(f.arbiter.should_absorb(&f.groups, &f.machines, &a));
        f.arbiter.absorb(a);
        assert!(f.arbiter.is_absorbed(&a));
        assert!(!f.arbiter.should_absorb(&f.groups, &f.machines, &a));

        // The last live member goes down: route cleared, absorbed lead becomes stale.
        drop_link(&mut f, b);
        let change = f.arbiter.on_member_down(&mut f.groups, &f.machines, &b, Some(GROUP)).unwrap();
        assert_eq!(change.old.device, Some(a));
        assert_eq!(change.new, ActiveRoute::default());
        assert_eq!(f.arbiter.stale_absorbed(&f.groups), vec![a]);
        assert!(f.arbiter.release(&a));
        assert!(!f.arbiter.release(&a));
    }

    #[tokio::test]
    async fn no_absorb_without_live_sibling() {
        let a = addr(1);
        let mut f = fixture(&[a], GraceScope::AnyMember, None);
        f.arbiter.activate(&mut f.groups, a, GROUP);
        assert!(!f.arbiter.should_absorb(&f.groups, &f.machines, &a));
    }

    #[tokio::test]
    async fn any_member_absorbs_sibling_once() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut f = fixture(&[a, b, c], GraceScope::AnyMember, None);
        f.arbiter.activate(&mut f.groups, a, GROUP);

        assert!(f.arbiter.should_absorb(&f.groups, &f.machines, &b));
        f.arbiter.absorb(b);
        assert!(f.arbiter.should_absorb(&f.groups, &f.machines, &c));
        f.arbiter.absorb(c);
        // a is the only live member left.
        assert!(!f.arbiter.should_absorb(&f.groups, &f.machines, &a));
    }

    #[tokio::test]
    async fn lead_leaving_moves_route() {
        let (a, b) = (addr(1), addr(2));
        let mut f = fixture(&[a, b], GraceScope::LeadOnly, None);
        f.arbiter.activate(&mut f.groups, a, GROUP);

        drop_link(&mut f, a);
        let change = f.arbiter.on_member_down(&mut f.groups, &f.machines, &a, Some(GROUP)).unwrap();
        assert_eq!(change.new, ActiveRoute { device: Some(b), group_id: Some(GROUP) });
        assert!(f.groups.group(GROUP).unwrap().is_active());
    }

    #[tokio::test]
    async fn other_group_does_not_touch_route() {
        let (a, x) = (addr(1), addr(9));
        let mut f = fixture(&[a], GraceScope::LeadOnly, None);
        f.arbiter.activate(&mut f.groups, a, GROUP);
        assert!(f.arbiter.on_member_down(&mut f.groups, &f.machines, &x, Some(GROUP + 1)).is_none());
        assert_eq!(f.arbiter.route().device, Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_timer_posts_expiry() {
        let (a, b) = (addr(1), addr(2));
        let mut f = fixture(&[a, b], GraceScope::LeadOnly, Some(Duration::from_millis(500)));
        f.arbiter.activate(&mut f.groups, a, GROUP);
        f.arbiter.absorb(a);

        match f.rx.recv().await {
            Some(Message::LeAudioActions(LeAudioActions::GraceExpired(d, seq))) => {
                assert_eq!(d, a);
                assert!(f.arbiter.is_current_grace(&a, seq));
                assert!(!f.arbiter.is_current_grace(&a, seq + 1));
            }
            _ => panic!("expected a grace expiry"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn release_cancels_grace_timer() {
        let (a, b) = (addr(1), addr(2));
        let mut f = fixture(&[a, b], GraceScope::LeadOnly, Some(Duration::from_millis(500)));
        f.arbiter.activate(&mut f.groups, a, GROUP);
        f.arbiter.absorb(a);
        assert!(f.arbiter.release(&a));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.rx.try_recv().is_err());
    }
}
