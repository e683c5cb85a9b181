// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The controller adapter: entry points for the platform's notifications,
//! and the owner of every switch's manager.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use packet::frame::{self, FrameKind};
use packet::IgmpMessage;
use parking_lot::Mutex;
use slog::{debug, error, info, o, warn};

use crate::config::Config;
use crate::platform::{FlowProgrammer, IdGenerator, Inventory};
use crate::reception::MulticastGroupEvent;
use crate::routing::RoutingListener;
use crate::switch_manager::SwitchManager;
use crate::types::{McastError, McastResult, PortId, SwitchId};

// How much of an unrecognized frame to log.
const UNKNOWN_FRAME_DUMP_LEN: usize = 26;

pub struct Controller {
    log: slog::Logger,
    gmi: f64,
    capture_table_id: u8,
    capture_flow_priority: u16,
    flows: Arc<dyn FlowProgrammer>,
    inventory: Arc<dyn Inventory>,
    routing: Arc<dyn RoutingListener>,
    flow_ids: Arc<IdGenerator>,
    flow_cookies: Arc<IdGenerator>,
    /// Each switch's state has its own lock, so reports for one switch are
    /// applied in order while other switches proceed independently.
    switches: Mutex<BTreeMap<SwitchId, Arc<Mutex<SwitchManager>>>>,
    /// Switches whose capture flow is being installed.  Always locked after
    /// `switches`.
    installing: Mutex<BTreeSet<SwitchId>>,
}

impl Controller {
    pub fn new(
        log: &slog::Logger,
        config: &Config,
        flows: Arc<dyn FlowProgrammer>,
        inventory: Arc<dyn Inventory>,
        routing: Arc<dyn RoutingListener>,
    ) -> Self {
        Controller {
            log: log.new(o!("unit" => "controller")),
            gmi: config.group_membership_interval(),
            capture_table_id: config.capture_table_id,
            capture_flow_priority: config.capture_flow_priority,
            flows,
            inventory,
            routing,
            flow_ids: Arc::new(IdGenerator::new(config.flow_id_start)),
            flow_cookies: Arc::new(IdGenerator::new(config.flow_cookie_start)),
            switches: Mutex::new(BTreeMap::new()),
            installing: Mutex::new(BTreeSet::new()),
        }
    }

    fn manager(
        &self,
        switch_id: &SwitchId,
    ) -> McastResult<Arc<Mutex<SwitchManager>>> {
        self.switches
            .lock()
            .get(switch_id)
            .cloned()
            .ok_or_else(|| McastError::NoSuchSwitch(switch_id.clone()))
    }

    pub fn switch_ids(&self) -> Vec<SwitchId> {
        self.switches.lock().keys().cloned().collect()
    }

    /// Run `f` against the manager for `switch_id` while holding its lock.
    pub fn with_manager<T>(
        &self,
        switch_id: &SwitchId,
        f: impl FnOnce(&SwitchManager) -> T,
    ) -> McastResult<T> {
        let mgr = self.manager(switch_id)?;
        let guard = mgr.lock();
        Ok(f(&guard))
    }

    /// A flow table appeared on a switch.  The first time the capture table
    /// appears on a switch, start managing it and install the flow that sends
    /// its IGMP traffic here.  Returns whether a new manager was created.
    ///
    /// The manager is only registered once the flow is installed, so a
    /// failed installation is retried the next time the table appears.  Each
    /// attempt draws a fresh flow id and cookie.  The installation runs
    /// without the switch map locked, so other switches are served while it
    /// is in progress.
    pub fn on_switch_table_appeared(
        &self,
        switch_id: &SwitchId,
        table_id: u8,
    ) -> McastResult<bool> {
        if table_id != self.capture_table_id {
            debug!(self.log, "ignoring table";
                "switch_id" => %switch_id,
                "table_id" => table_id);
            return Ok(false);
        }

        {
            let switches = self.switches.lock();
            let mut installing = self.installing.lock();
            if switches.contains_key(switch_id)
                || !installing.insert(switch_id.clone())
            {
                debug!(self.log, "switch already managed";
                    "switch_id" => %switch_id);
                return Ok(false);
            }
        }

        let mgr = SwitchManager::new(
            &self.log,
            switch_id.clone(),
            self.gmi,
            Arc::clone(&self.flow_ids),
            Arc::clone(&self.flow_cookies),
        );
        let flow = mgr.capture_flow(table_id, self.capture_flow_priority);
        let result = self.flows.install_flow(switch_id, &flow);

        let mut switches = self.switches.lock();
        self.installing.lock().remove(switch_id);
        if let Err(e) = result {
            error!(self.log, "failed to install igmp capture flow: {e:#}";
                "switch_id" => %switch_id);
            return Err(McastError::Flow {
                switch_id: switch_id.clone(),
                reason: format!("{e:#}"),
            });
        }
        info!(self.log, "installed igmp capture flow";
            "switch_id" => %switch_id,
            "flow" => %flow);

        switches.insert(switch_id.clone(), Arc::new(Mutex::new(mgr)));
        Ok(true)
    }

    /// Add every port the inventory lists for `switch_id` to its manager.
    /// Returns the number of ports that were new.
    pub fn refresh_ports(&self, switch_id: &SwitchId) -> McastResult<usize> {
        let mgr = self.manager(switch_id)?;
        let ports = self.inventory.switch_ports(switch_id).map_err(|e| {
            error!(self.log, "failed to read ports: {e:#}";
                "switch_id" => %switch_id);
            McastError::Topology {
                switch_id: switch_id.clone(),
                reason: format!("{e:#}"),
            }
        })?;

        let mut mgr = mgr.lock();
        let added = ports.iter().filter(|p| mgr.add_port(p)).count();
        debug!(self.log, "refreshed ports";
            "switch_id" => %switch_id,
            "listed" => ports.len(),
            "added" => added);
        Ok(added)
    }

    /// A packet was punted to the controller.  IGMP messages are handed to
    /// the switch's manager; everything else is logged and dropped.  Returns
    /// the event raised, if the message changed the switch's reception state.
    ///
    /// The event is delivered to the routing listener with the switch's lock
    /// held, so events for one switch arrive in order.  A listener failure
    /// is reported but the membership changes stand.
    pub fn on_packet_in(
        &self,
        switch_id: &SwitchId,
        ingress: &PortId,
        raw: &[u8],
    ) -> McastResult<Option<MulticastGroupEvent>> {
        let kind = match frame::classify(raw) {
            Ok(kind) => kind,
            Err(e) => {
                error!(self.log, "dropping malformed frame: {e}";
                    "switch_id" => %switch_id,
                    "port" => %ingress,
                    "len" => raw.len());
                return Ok(None);
            }
        };

        let (headers, payload) = match kind {
            FrameKind::Igmp {
                ip,
                headers,
                payload,
            } => {
                if ip.version != 4 {
                    warn!(self.log, "ipv4 packet with wrong version in header";
                        "version" => ip.version);
                }
                debug!(self.log, "igmp packet";
                    "src" => %ip.src,
                    "dst" => %ip.dst,
                    "port" => %ingress);
                (headers, payload)
            }
            FrameKind::Ipv4(ip) => {
                if ip.version != 4 {
                    warn!(self.log, "ipv4 packet with wrong version in header";
                        "version" => ip.version);
                }
                debug!(self.log, "ignoring non-igmp ipv4 packet";
                    "src" => %ip.src,
                    "dst" => %ip.dst,
                    "protocol" => ip.protocol);
                return Ok(None);
            }
            FrameKind::VlanTagged => {
                debug!(self.log, "ignoring 802.1q tagged frame");
                return Ok(None);
            }
            FrameKind::Arp => {
                debug!(self.log, "ignoring arp frame");
                return Ok(None);
            }
            FrameKind::Lldp => {
                debug!(self.log, "ignoring lldp frame");
                return Ok(None);
            }
            FrameKind::Other(ether_type) => {
                let dump = &raw[..raw.len().min(UNKNOWN_FRAME_DUMP_LEN)];
                info!(self.log, "ignoring frame with unknown ethertype";
                    "ether_type" => format!("{ether_type:#06x}"),
                    "bytes" => common::hex_string(dump));
                return Ok(None);
            }
        };

        let (msg, _) = IgmpMessage::decode(&self.log, payload);
        if let IgmpMessage::Unknown(_) = msg {
            info!(self.log, "unrecognized igmp message";
                "switch_id" => %switch_id,
                "headers" => common::hex_string(headers),
                "igmp" => common::hex_string(payload));
        }

        let mgr = match self.manager(switch_id) {
            Ok(mgr) => mgr,
            Err(e) => {
                warn!(self.log, "igmp from unmanaged switch";
                    "switch_id" => %switch_id);
                return Err(e);
            }
        };

        let mut mgr = mgr.lock();
        let Some(event) = mgr.process_igmp_packet(&msg, ingress) else {
            return Ok(None);
        };
        if let Err(e) = self.routing.on_desired_state_changed(&event) {
            error!(self.log, "routing listener failed: {e:#}";
                "switch_id" => %switch_id);
            return Err(McastError::Routing(format!("{e:#}")));
        }
        Ok(Some(event))
    }

    /// Ports of `switch_id` that should receive traffic sent by `source` to
    /// `group`.
    pub fn reception_ports(
        &self,
        switch_id: &SwitchId,
        group: Ipv4Addr,
        source: Ipv4Addr,
    ) -> McastResult<BTreeSet<PortId>> {
        self.with_manager(switch_id, |mgr| mgr.reception_ports(group, source))
    }

    /// The receiving ports of every managed switch, omitting switches with
    /// none.
    pub fn all_reception_ports(
        &self,
        group: Ipv4Addr,
        source: Ipv4Addr,
    ) -> BTreeMap<SwitchId, BTreeSet<PortId>> {
        let managers: Vec<_> = self
            .switches
            .lock()
            .iter()
            .map(|(id, mgr)| (id.clone(), Arc::clone(mgr)))
            .collect();

        managers
            .into_iter()
            .filter_map(|(id, mgr)| {
                let ports = mgr.lock().reception_ports(group, source);
                (!ports.is_empty()).then_some((id, ports))
            })
            .collect()
    }
}
