// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The controller platform, as seen from the membership engine: somewhere to
//! install flows and somewhere to read a switch's ports from.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use packet::frame::{ETHER_IPV4, IPPROTO_IGMP};

use crate::types::{PortId, SwitchId};

/// What a matching packet should have done to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowAction {
    /// Punt to the controller, truncated to `max_len` bytes.
    SendToController { max_len: u16 },
}

/// A flow-table entry to be installed on a switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSpec {
    pub flow_id: u64,
    pub cookie: u64,
    pub table_id: u8,
    pub name: String,
    pub priority: u16,
    pub eth_type: u16,
    pub ip_proto: Option<u8>,
    pub action: FlowAction,
    /// Seconds, 0 for none.
    pub idle_timeout: u16,
    /// Seconds, 0 for none.
    pub hard_timeout: u16,
}

impl FlowSpec {
    /// The flow that sends every IGMP packet a switch sees to the controller.
    pub fn igmp_capture(
        flow_id: u64,
        cookie: u64,
        table_id: u8,
        priority: u16,
    ) -> Self {
        FlowSpec {
            flow_id,
            cookie,
            table_id,
            name: "igmp-to-controller".to_string(),
            priority,
            eth_type: ETHER_IPV4,
            ip_proto: Some(IPPROTO_IGMP),
            action: FlowAction::SendToController { max_len: u16::MAX },
            idle_timeout: 0,
            hard_timeout: 0,
        }
    }
}

impl fmt::Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flow {} ({}) table {} prio {} eth_type {:#06x}",
            self.flow_id, self.name, self.table_id, self.priority, self.eth_type
        )?;
        if let Some(proto) = self.ip_proto {
            write!(f, " ip_proto {proto}")?;
        }
        Ok(())
    }
}

/// Flow programming on the controller platform.
#[cfg_attr(test, mockall::automock)]
pub trait FlowProgrammer: Send + Sync {
    fn install_flow(
        &self,
        switch_id: &SwitchId,
        flow: &FlowSpec,
    ) -> anyhow::Result<()>;
}

/// Read access to the platform's topology inventory.
#[cfg_attr(test, mockall::automock)]
pub trait Inventory: Send + Sync {
    fn switch_ports(&self, switch_id: &SwitchId) -> anyhow::Result<Vec<PortId>>;
}

/// A monotonic sequence of 64-bit identifiers, shared by everything that
/// needs ids unique across the process.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new(start: u64) -> Self {
        IdGenerator {
            next: AtomicU64::new(start),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
