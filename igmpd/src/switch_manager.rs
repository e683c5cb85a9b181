// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Per-switch IGMP state: the ports seen, the membership records built from
//! the reports received on them, and the reception state derived from those.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use packet::IgmpMessage;
use slog::{debug, info, o};

use crate::membership::MembershipStore;
use crate::platform::{FlowSpec, IdGenerator};
use crate::reception::{self, DesiredReceptionState, MulticastGroupEvent};
use crate::transition;
use crate::types::{PortId, SwitchId};

pub struct SwitchManager {
    log: slog::Logger,
    switch_id: SwitchId,
    /// Group membership interval, in seconds.
    gmi: f64,
    flow_ids: Arc<IdGenerator>,
    flow_cookies: Arc<IdGenerator>,
    ports: BTreeSet<PortId>,
    igmp_ports: BTreeSet<PortId>,
    store: MembershipStore,
    /// None until the first report has been processed.
    reception_state: Option<DesiredReceptionState>,
}

impl SwitchManager {
    pub fn new(
        log: &slog::Logger,
        switch_id: SwitchId,
        gmi: f64,
        flow_ids: Arc<IdGenerator>,
        flow_cookies: Arc<IdGenerator>,
    ) -> Self {
        let log = log.new(o!(
            "unit" => "switch_manager",
            "switch_id" => switch_id.to_string(),
        ));
        SwitchManager {
            log,
            switch_id,
            gmi,
            flow_ids,
            flow_cookies,
            ports: BTreeSet::new(),
            igmp_ports: BTreeSet::new(),
            store: MembershipStore::new(),
            reception_state: None,
        }
    }

    pub fn switch_id(&self) -> &SwitchId {
        &self.switch_id
    }

    pub fn ports(&self) -> &BTreeSet<PortId> {
        &self.ports
    }

    pub fn igmp_ports(&self) -> &BTreeSet<PortId> {
        &self.igmp_ports
    }

    pub fn store(&self) -> &MembershipStore {
        &self.store
    }

    pub fn reception_state(&self) -> Option<&DesiredReceptionState> {
        self.reception_state.as_ref()
    }

    /// Build the flow that punts IGMP from this switch to the controller,
    /// drawing a fresh flow id and cookie.
    pub fn capture_flow(&self, table_id: u8, priority: u16) -> FlowSpec {
        FlowSpec::igmp_capture(
            self.flow_ids.next_id(),
            self.flow_cookies.next_id(),
            table_id,
            priority,
        )
    }

    /// Record `port` as both known and IGMP-enabled.  Returns true if either
    /// list grew.
    pub fn add_port(&mut self, port: &PortId) -> bool {
        let mut added = false;
        if self.ports.insert(port.clone()) {
            info!(self.log, "added port"; "port" => %port);
            added = true;
        }
        if self.igmp_ports.insert(port.clone()) {
            info!(self.log, "added igmp enabled port"; "port" => %port);
            added = true;
        }
        added
    }

    /// Apply a decoded IGMP message received on `ingress`.  Returns an event
    /// when a report leaves the switch's reception state different from the
    /// last snapshot, or produces the first one.
    pub fn process_igmp_packet(
        &mut self,
        msg: &IgmpMessage,
        ingress: &PortId,
    ) -> Option<MulticastGroupEvent> {
        self.add_port(ingress);
        debug!(self.log, "processing igmp message";
            "port" => %ingress,
            "message" => %msg);

        match msg {
            IgmpMessage::Unknown(u) => {
                info!(self.log, "ignoring unknown igmp message";
                    "port" => %ingress,
                    "version_and_type" => ?u.version_and_type);
                None
            }
            IgmpMessage::ReportV3(report) => {
                for record in &report.records {
                    self.process_group_record(record, ingress);
                }
                self.update_reception_state()
            }
            IgmpMessage::QueryV3(q)
                if !q.suppress_router_processing
                    && q.group != Ipv4Addr::UNSPECIFIED =>
            {
                info!(self.log, "group specific queries are not supported";
                    "group" => %q.group,
                    "sources" => q.sources.len());
                None
            }
            IgmpMessage::QueryV1(_)
            | IgmpMessage::QueryV2(_)
            | IgmpMessage::QueryV3(_) => {
                debug!(self.log, "ignoring query"; "type" => msg.type_name());
                None
            }
        }
    }

    fn process_group_record(
        &mut self,
        record: &packet::GroupRecord,
        ingress: &PortId,
    ) {
        debug!(self.log, "processing group record";
            "port" => %ingress,
            "record" => %record);

        match transition::apply_record(&mut self.store, ingress, record, self.gmi)
        {
            None => {
                debug!(self.log, "ignoring group record";
                    "record_type" => %record.record_type,
                    "group" => %record.group);
            }
            Some(queries) => {
                for q in queries {
                    info!(self.log, "query transmission is not supported, dropping";
                        "port" => %ingress,
                        "query" => %q);
                }
            }
        }
    }

    /// Derive the reception state from the current membership records and
    /// swap it in for the previous snapshot.  Returns an event if this is the
    /// first snapshot or it differs from the last.
    pub fn update_reception_state(&mut self) -> Option<MulticastGroupEvent> {
        let new_state = reception::recompute(&self.store);

        let changed = match &self.reception_state {
            None => {
                info!(self.log, "initial desired reception state computed";
                    "groups" => new_state.len());
                true
            }
            Some(old) if !reception::equal_reception_state(old, &new_state) => {
                info!(self.log, "desired reception state changed";
                    "groups" => new_state.len());
                true
            }
            Some(_) => {
                debug!(self.log, "desired reception state unchanged");
                false
            }
        };

        let event = changed.then(|| MulticastGroupEvent {
            switch_id: self.switch_id.clone(),
            reception_state: new_state.clone(),
        });
        self.reception_state = Some(new_state);
        if let Some(event) = &event {
            debug!(self.log, "{event}");
        }
        event
    }

    /// Ports of this switch that should receive traffic sent by `source` to
    /// `group`, according to the latest snapshot.
    pub fn reception_ports(
        &self,
        group: Ipv4Addr,
        source: Ipv4Addr,
    ) -> BTreeSet<PortId> {
        self.reception_state
            .as_ref()
            .map(|state| reception::reception_ports(state, group, source))
            .unwrap_or_default()
    }
}

impl fmt::Display for SwitchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IGMP switch manager for {}", self.switch_id)?;
        let mut last_port = None;
        for (port, record) in self.store.iter() {
            if last_port != Some(port) {
                write!(f, "\nMembership records for port: {port}")?;
                last_port = Some(port);
            }
            write!(f, "\n{record}")?;
        }
        Ok(())
    }
}
