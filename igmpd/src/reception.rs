// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The aggregated forwarding view derived from a switch's membership records:
//! for each group, which ports want its traffic and from which sources.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::membership::{FilterMode, MembershipStore};
use crate::types::{PortId, SwitchId};

/// The sources a port wants traffic from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFilter {
    /// Every source: a non-source-specific join.
    AllSources,
    /// Only these sources.  Never empty.
    Sources(BTreeSet<Ipv4Addr>),
}

impl SourceFilter {
    pub fn accepts(&self, source: Ipv4Addr) -> bool {
        match self {
            SourceFilter::AllSources => true,
            SourceFilter::Sources(s) => s.contains(&source),
        }
    }
}

/// group -> port -> wanted sources.  A group appears only if at least one
/// port wants it.
pub type DesiredReceptionState =
    BTreeMap<Ipv4Addr, BTreeMap<PortId, SourceFilter>>;

/// Derive the reception state from a switch's membership records.
///
/// An INCLUDE record wants exactly its X sources, and one with no sources
/// contributes nothing.  An EXCLUDE record with X sources wants those; with
/// none it wants every source.
pub fn recompute(store: &MembershipStore) -> DesiredReceptionState {
    let mut state = DesiredReceptionState::new();
    for (port, record) in store.iter() {
        let filter = match record.filter_mode {
            FilterMode::Include if record.x.is_empty() => continue,
            FilterMode::Exclude if record.x.is_empty() => {
                SourceFilter::AllSources
            }
            FilterMode::Include | FilterMode::Exclude => {
                SourceFilter::Sources(record.x_addresses())
            }
        };
        state
            .entry(record.group)
            .or_default()
            .insert(port.clone(), filter);
    }
    state
}

/// Whether two snapshots describe the same forwarding, group by group, port
/// by port, source by source.
pub fn equal_reception_state(
    a: &DesiredReceptionState,
    b: &DesiredReceptionState,
) -> bool {
    a == b
}

/// Every port that should receive traffic sent by `source` to `group`.
pub fn reception_ports(
    state: &DesiredReceptionState,
    group: Ipv4Addr,
    source: Ipv4Addr,
) -> BTreeSet<PortId> {
    state
        .get(&group)
        .map(|ports| {
            ports
                .iter()
                .filter(|(_, filter)| filter.accepts(source))
                .map(|(port, _)| port.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// A snapshot of a switch's reception state, raised when it is first
/// computed and whenever it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MulticastGroupEvent {
    pub switch_id: SwitchId,
    pub reception_state: DesiredReceptionState,
}

impl MulticastGroupEvent {
    pub fn reception_ports(
        &self,
        group: Ipv4Addr,
        source: Ipv4Addr,
    ) -> BTreeSet<PortId> {
        reception_ports(&self.reception_state, group, source)
    }
}

impl fmt::Display for MulticastGroupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MulticastGroupEvent: switch: {}", self.switch_id)?;
        for (group, ports) in &self.reception_state {
            write!(f, "\n group: {group}")?;
            for (port, filter) in ports {
                write!(f, "\n  port: {port}")?;
                match filter {
                    SourceFilter::AllSources => write!(f, "\n\tALL SOURCES")?,
                    SourceFilter::Sources(sources) => {
                        for s in sources {
                            write!(f, "\n\t{s}")?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipRecord;
    use pretty_assertions::assert_eq;

    const G1: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);
    const G2: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 2);
    const S5: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const S6: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 6);

    fn store() -> MembershipStore {
        let mut store = MembershipStore::new();

        let mut exclude_all = MembershipRecord::new(G1, 260.0);
        exclude_all.filter_mode = FilterMode::Exclude;
        exclude_all.y.insert(S6, 0.0);
        store.insert(&PortId::new("p1"), exclude_all);

        let mut include = MembershipRecord::new(G1, 260.0);
        include.x.insert(S5, 260.0);
        store.insert(&PortId::new("p2"), include);

        let mut exclude_some = MembershipRecord::new(G2, 260.0);
        exclude_some.filter_mode = FilterMode::Exclude;
        exclude_some.x.insert(S6, 100.0);
        store.insert(&PortId::new("p2"), exclude_some);

        // An empty INCLUDE record that escaped pruning.
        store.insert(&PortId::new("p3"), MembershipRecord::new(G2, 260.0));
        store
    }

    #[test]
    fn test_recompute() {
        let state = recompute(&store());

        let mut expected = DesiredReceptionState::new();
        expected.insert(
            G1,
            BTreeMap::from([
                (PortId::new("p1"), SourceFilter::AllSources),
                (
                    PortId::new("p2"),
                    SourceFilter::Sources(BTreeSet::from([S5])),
                ),
            ]),
        );
        expected.insert(
            G2,
            BTreeMap::from([(
                PortId::new("p2"),
                SourceFilter::Sources(BTreeSet::from([S6])),
            )]),
        );
        assert_eq!(state, expected);
    }

    #[test]
    fn test_empty_include_contributes_no_group() {
        let mut store = MembershipStore::new();
        store.insert(&PortId::new("p1"), MembershipRecord::new(G1, 260.0));
        assert!(recompute(&store).is_empty());
    }

    #[test]
    fn test_recompute_is_stable() {
        let store = store();
        let a = recompute(&store);
        let b = recompute(&store);
        assert!(equal_reception_state(&a, &b));

        let mut changed = store.clone();
        changed.remove(&PortId::new("p1"), G1);
        assert!(!equal_reception_state(&a, &recompute(&changed)));
    }

    #[test]
    fn test_reception_ports() {
        let state = recompute(&store());

        assert_eq!(
            reception_ports(&state, G1, S5),
            BTreeSet::from([PortId::new("p1"), PortId::new("p2")])
        );
        assert_eq!(
            reception_ports(&state, G1, S6),
            BTreeSet::from([PortId::new("p1")])
        );
        assert_eq!(
            reception_ports(&state, G2, S6),
            BTreeSet::from([PortId::new("p2")])
        );
        assert!(reception_ports(&state, G2, S5).is_empty());
        assert!(reception_ports(&state, Ipv4Addr::new(239, 9, 9, 9), S5)
            .is_empty());
    }

    #[test]
    fn test_event_display_and_json() {
        let mut store = MembershipStore::new();
        let mut rec = MembershipRecord::new(G1, 260.0);
        rec.filter_mode = FilterMode::Exclude;
        store.insert(&PortId::new("openflow:1:1"), rec);

        let event = MulticastGroupEvent {
            switch_id: SwitchId::new("openflow:1"),
            reception_state: recompute(&store),
        };
        assert_eq!(
            event.to_string(),
            "MulticastGroupEvent: switch: openflow:1\n group: 239.1.1.1\n  port: openflow:1:1\n\tALL SOURCES"
        );
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"switch_id":"openflow:1","reception_state":{"239.1.1.1":{"openflow:1:1":"all_sources"}}}"#
        );
    }
}
