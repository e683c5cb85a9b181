// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Consumers of reception-state changes.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use slog::{info, o};

use crate::reception::MulticastGroupEvent;
use crate::types::SwitchId;

/// Notified each time a switch's desired reception state is first computed
/// or changes.
#[cfg_attr(test, mockall::automock)]
pub trait RoutingListener: Send + Sync {
    fn on_desired_state_changed(
        &self,
        event: &MulticastGroupEvent,
    ) -> anyhow::Result<()>;
}

/// A listener that records the most recent event from each switch.  Tree
/// computation and data-plane programming are not done here.
pub struct RoutingManager {
    log: slog::Logger,
    latest: Mutex<BTreeMap<SwitchId, MulticastGroupEvent>>,
}

impl RoutingManager {
    pub fn new(log: &slog::Logger) -> Self {
        RoutingManager {
            log: log.new(o!("unit" => "routing_manager")),
            latest: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn latest_event(&self, switch_id: &SwitchId) -> Option<MulticastGroupEvent> {
        self.latest.lock().get(switch_id).cloned()
    }

    /// All the latest events, as JSON keyed by switch.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&*self.latest.lock())?)
    }
}

impl RoutingListener for RoutingManager {
    fn on_desired_state_changed(
        &self,
        event: &MulticastGroupEvent,
    ) -> anyhow::Result<()> {
        info!(self.log, "multicast group event";
            "switch_id" => %event.switch_id,
            "groups" => event.reception_state.len());
        self.latest
            .lock()
            .insert(event.switch_id.clone(), event.clone());
        Ok(())
    }
}
