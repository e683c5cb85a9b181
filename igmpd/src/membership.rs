// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Router-side membership state, kept per ingress port and multicast group.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::types::PortId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Include,
    Exclude,
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::Include => write!(f, "INCLUDE"),
            FilterMode::Exclude => write!(f, "EXCLUDE"),
        }
    }
}

/// A source address and the seconds remaining on its timer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SourceRecord {
    pub address: Ipv4Addr,
    pub timer: f64,
}

/// Source timers keyed by address, so an address appears at most once.
pub type SourceTimers = BTreeMap<Ipv4Addr, f64>;

/// The state a router keeps for one group on one port.
///
/// In INCLUDE mode `x` is the list of requested sources and `y` is empty.  In
/// EXCLUDE mode `x` holds the sources still being forwarded and `y` those
/// that are blocked.  No address is ever in both.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MembershipRecord {
    pub group: Ipv4Addr,
    pub group_timer: f64,
    pub filter_mode: FilterMode,
    pub x: SourceTimers,
    pub y: SourceTimers,
}

impl MembershipRecord {
    pub fn new(group: Ipv4Addr, group_timer: f64) -> Self {
        MembershipRecord {
            group,
            group_timer,
            filter_mode: FilterMode::Include,
            x: SourceTimers::new(),
            y: SourceTimers::new(),
        }
    }

    /// The timer of `address` in the X set, or 0 if it isn't there.
    pub fn current_source_timer(&self, address: Ipv4Addr) -> f64 {
        self.x.get(&address).copied().unwrap_or(0.0)
    }

    pub fn x_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.x.keys().copied().collect()
    }

    pub fn y_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.y.keys().copied().collect()
    }

    pub fn x_records(&self) -> impl Iterator<Item = SourceRecord> + '_ {
        self.x.iter().map(|(address, timer)| SourceRecord {
            address: *address,
            timer: *timer,
        })
    }

    pub fn y_records(&self) -> impl Iterator<Item = SourceRecord> + '_ {
        self.y.iter().map(|(address, timer)| SourceRecord {
            address: *address,
            timer: *timer,
        })
    }

    /// An INCLUDE record with no sources asks for nothing, and is deleted
    /// rather than stored.
    pub fn is_prunable(&self) -> bool {
        self.filter_mode == FilterMode::Include && self.x.is_empty()
    }
}

impl fmt::Display for MembershipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group: {} mode: {} group_timer: {}",
            self.group, self.filter_mode, self.group_timer
        )?;
        for r in self.x_records() {
            write!(f, "\n\tX {} timer: {}", r.address, r.timer)?;
        }
        for r in self.y_records() {
            write!(f, "\n\tY {} timer: {}", r.address, r.timer)?;
        }
        Ok(())
    }
}

/// All of a switch's membership records: port -> group -> record.  A port
/// is only present while it has at least one record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MembershipStore {
    records: BTreeMap<PortId, BTreeMap<Ipv4Addr, MembershipRecord>>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the record for (port, group), creating an empty INCLUDE record
    /// with the given group timer if there isn't one.  An existing record is
    /// returned untouched.
    pub fn get_or_create(
        &mut self,
        port: &PortId,
        group: Ipv4Addr,
        initial_group_timer: f64,
    ) -> &mut MembershipRecord {
        self.records
            .entry(port.clone())
            .or_default()
            .entry(group)
            .or_insert_with(|| MembershipRecord::new(group, initial_group_timer))
    }

    pub fn get(&self, port: &PortId, group: Ipv4Addr) -> Option<&MembershipRecord> {
        self.records.get(port).and_then(|groups| groups.get(&group))
    }

    /// Store `record` for `port`, replacing any existing record for its group.
    #[cfg(test)]
    pub(crate) fn insert(&mut self, port: &PortId, record: MembershipRecord) {
        self.records
            .entry(port.clone())
            .or_default()
            .insert(record.group, record);
    }

    /// Delete the record for (port, group), and the port's entry along with
    /// it if that was its last record.
    pub fn remove(
        &mut self,
        port: &PortId,
        group: Ipv4Addr,
    ) -> Option<MembershipRecord> {
        let Entry::Occupied(mut groups) = self.records.entry(port.clone())
        else {
            return None;
        };
        let removed = groups.get_mut().remove(&group);
        if groups.get().is_empty() {
            groups.remove();
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortId> {
        self.records.keys()
    }

    /// Every (port, record) pair, ordered by port then group.
    pub fn iter(&self) -> impl Iterator<Item = (&PortId, &MembershipRecord)> {
        self.records
            .iter()
            .flat_map(|(port, groups)| groups.values().map(move |r| (port, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);
    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    #[test]
    fn test_get_or_create_does_not_reset() {
        let mut store = MembershipStore::new();
        let port = PortId::new("openflow:1:1");

        let rec = store.get_or_create(&port, GROUP, 260.0);
        assert_eq!(rec.filter_mode, FilterMode::Include);
        assert!(rec.x.is_empty() && rec.y.is_empty());
        rec.filter_mode = FilterMode::Exclude;
        rec.x.insert(SRC, 10.0);

        let rec = store.get_or_create(&port, GROUP, 1.0);
        assert_eq!(rec.filter_mode, FilterMode::Exclude);
        assert_eq!(rec.group_timer, 260.0);
        assert_eq!(rec.current_source_timer(SRC), 10.0);
    }

    #[test]
    fn test_remove_prunes_port() {
        let mut store = MembershipStore::new();
        let p1 = PortId::new("openflow:1:1");
        let p2 = PortId::new("openflow:1:2");
        let other = Ipv4Addr::new(239, 1, 1, 2);

        store.get_or_create(&p1, GROUP, 260.0);
        store.get_or_create(&p1, other, 260.0);
        store.get_or_create(&p2, GROUP, 260.0);

        assert!(store.remove(&p1, GROUP).is_some());
        assert_eq!(store.ports().count(), 2);
        assert!(store.remove(&p1, other).is_some());
        assert_eq!(store.ports().collect::<Vec<_>>(), vec![&p2]);
        assert!(store.remove(&p1, other).is_none());
        assert!(store.remove(&p2, GROUP).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_source_timer_only_checks_x() {
        let mut rec = MembershipRecord::new(GROUP, 260.0);
        rec.filter_mode = FilterMode::Exclude;
        rec.y.insert(SRC, 42.0);
        assert_eq!(rec.current_source_timer(SRC), 0.0);
    }

    #[test]
    fn test_prunable() {
        let mut rec = MembershipRecord::new(GROUP, 260.0);
        assert!(rec.is_prunable());
        rec.filter_mode = FilterMode::Exclude;
        assert!(!rec.is_prunable());
    }

    #[test]
    fn test_display() {
        let mut rec = MembershipRecord::new(GROUP, 260.0);
        rec.x.insert(SRC, 260.0);
        assert_eq!(
            rec.to_string(),
            "group: 239.1.1.1 mode: INCLUDE group_timer: 260\n\tX 10.0.0.5 timer: 260"
        );
    }
}
