// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The router state transitions of RFC 3376 section 6.4.
//!
//! Each report record is applied to the existing membership record to
//! produce a new one.  Set notation below follows the RFC: for an INCLUDE
//! record A is the current source list, for an EXCLUDE record X and Y are
//! its forwarded and blocked sources, and B (or A, against an EXCLUDE record)
//! is the list carried by the report.
//!
//! Queries the RFC has a router send in response to some transitions are
//! returned as [`PendingQuery`] values.  Nothing here sends or schedules
//! them.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use packet::{GroupRecord, RecordType};

use crate::membership::{FilterMode, MembershipRecord, MembershipStore, SourceTimers};
use crate::types::PortId;

/// A query a router following RFC 3376 would now send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingQuery {
    /// Q(G): a group-specific query.
    Group(Ipv4Addr),
    /// Q(G,S): a group-and-source-specific query.
    GroupAndSources(Ipv4Addr, BTreeSet<Ipv4Addr>),
}

impl fmt::Display for PendingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingQuery::Group(g) => write!(f, "Q({g})"),
            PendingQuery::GroupAndSources(g, sources) => {
                write!(f, "Q({g}, {{")?;
                for (i, s) in sources.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{s}")?;
                }
                write!(f, "}})")
            }
        }
    }
}

/// The result of applying one report record to a membership record.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub record: MembershipRecord,
    pub queries: Vec<PendingQuery>,
}

impl Transition {
    fn quiet(record: MembershipRecord) -> Self {
        Transition {
            record,
            queries: Vec::new(),
        }
    }

    fn query_sources(mut self, sources: BTreeSet<Ipv4Addr>) -> Self {
        if !sources.is_empty() {
            self.queries
                .push(PendingQuery::GroupAndSources(self.record.group, sources));
        }
        self
    }

    fn query_group(mut self) -> Self {
        self.queries.push(PendingQuery::Group(self.record.group));
        self
    }
}

fn union(a: &BTreeSet<Ipv4Addr>, b: &BTreeSet<Ipv4Addr>) -> BTreeSet<Ipv4Addr> {
    a.union(b).copied().collect()
}

fn intersection(
    a: &BTreeSet<Ipv4Addr>,
    b: &BTreeSet<Ipv4Addr>,
) -> BTreeSet<Ipv4Addr> {
    a.intersection(b).copied().collect()
}

fn difference(
    a: &BTreeSet<Ipv4Addr>,
    b: &BTreeSet<Ipv4Addr>,
) -> BTreeSet<Ipv4Addr> {
    a.difference(b).copied().collect()
}

fn with_timers(
    addrs: &BTreeSet<Ipv4Addr>,
    timer: impl Fn(Ipv4Addr) -> f64,
) -> SourceTimers {
    addrs.iter().map(|a| (*a, timer(*a))).collect()
}

// Timer of an address already in Y, or 0 for one new to it.
fn y_timer(current: &MembershipRecord, address: Ipv4Addr) -> f64 {
    current.y.get(&address).copied().unwrap_or(0.0)
}

// INCLUDE (A) + IS_IN (B) or ALLOW (B): INCLUDE (A+B), (B)=GMI
fn include_add(
    current: &MembershipRecord,
    b: &BTreeSet<Ipv4Addr>,
    gmi: f64,
) -> MembershipRecord {
    let a = current.x_addresses();
    MembershipRecord {
        x: with_timers(&union(&a, b), |s| {
            if b.contains(&s) {
                gmi
            } else {
                current.current_source_timer(s)
            }
        }),
        y: SourceTimers::new(),
        ..current.clone()
    }
}

// INCLUDE (A) + IS_EX (B) or TO_EX (B):
// EXCLUDE (A*B, B-A), (B-A)=0, Delete (A-B), Group Timer=GMI
fn include_to_exclude(
    current: &MembershipRecord,
    b: &BTreeSet<Ipv4Addr>,
    gmi: f64,
) -> MembershipRecord {
    let a = current.x_addresses();
    MembershipRecord {
        filter_mode: FilterMode::Exclude,
        group_timer: gmi,
        x: with_timers(&intersection(&a, b), |s| {
            current.current_source_timer(s)
        }),
        y: with_timers(&difference(b, &a), |_| 0.0),
        ..current.clone()
    }
}

// EXCLUDE (X,Y) + IS_IN (A) or ALLOW (A): EXCLUDE (X+A, Y-A), (A)=GMI
fn exclude_add(
    current: &MembershipRecord,
    a: &BTreeSet<Ipv4Addr>,
    gmi: f64,
) -> MembershipRecord {
    let x = current.x_addresses();
    let y = current.y_addresses();
    MembershipRecord {
        x: with_timers(&union(&x, a), |s| {
            if a.contains(&s) {
                gmi
            } else {
                current.current_source_timer(s)
            }
        }),
        y: with_timers(&difference(&y, a), |s| y_timer(current, s)),
        ..current.clone()
    }
}

// EXCLUDE (X,Y) + IS_EX (A) or TO_EX (A):
// EXCLUDE (A-Y, Y*A), (A-X-Y)=new_source_timer, Delete (X-A), Delete (Y-A),
// Group Timer=GMI
fn exclude_replace(
    current: &MembershipRecord,
    a: &BTreeSet<Ipv4Addr>,
    new_source_timer: f64,
    gmi: f64,
) -> MembershipRecord {
    let x = current.x_addresses();
    let y = current.y_addresses();
    let fresh = difference(&difference(a, &x), &y);
    MembershipRecord {
        group_timer: gmi,
        x: with_timers(&difference(a, &y), |s| {
            if fresh.contains(&s) {
                new_source_timer
            } else {
                current.current_source_timer(s)
            }
        }),
        y: with_timers(&intersection(&y, a), |s| y_timer(current, s)),
        ..current.clone()
    }
}

/// Apply a MODE_IS_INCLUDE or MODE_IS_EXCLUDE record (RFC 3376 section
/// 6.4.1).  Any other record type leaves the state as it was.
pub fn process_current_state_record(
    current: &MembershipRecord,
    report: &GroupRecord,
    gmi: f64,
) -> Transition {
    let sources = report.source_set();
    let record = match (current.filter_mode, report.record_type) {
        (FilterMode::Include, RecordType::ModeIsInclude) => {
            include_add(current, &sources, gmi)
        }
        (FilterMode::Include, RecordType::ModeIsExclude) => {
            include_to_exclude(current, &sources, gmi)
        }
        (FilterMode::Exclude, RecordType::ModeIsInclude) => {
            exclude_add(current, &sources, gmi)
        }
        (FilterMode::Exclude, RecordType::ModeIsExclude) => {
            exclude_replace(current, &sources, gmi, gmi)
        }
        _ => current.clone(),
    };
    Transition::quiet(record)
}

/// Apply an ALLOW_NEW_SOURCES, BLOCK_OLD_SOURCES, CHANGE_TO_INCLUDE_MODE or
/// CHANGE_TO_EXCLUDE_MODE record (RFC 3376 section 6.4.2).  Any other record
/// type leaves the state as it was.
pub fn process_state_change_record(
    current: &MembershipRecord,
    report: &GroupRecord,
    gmi: f64,
) -> Transition {
    let sources = report.source_set();
    let x = current.x_addresses();
    let y = current.y_addresses();

    match (current.filter_mode, report.record_type) {
        // INCLUDE (A+B), (B)=GMI
        (FilterMode::Include, RecordType::AllowNewSources) => {
            Transition::quiet(include_add(current, &sources, gmi))
        }
        // INCLUDE (A), Send Q(G,A*B)
        (FilterMode::Include, RecordType::BlockOldSources) => {
            Transition::quiet(current.clone())
                .query_sources(intersection(&x, &sources))
        }
        // EXCLUDE (A*B, B-A), Send Q(G,A*B)
        (FilterMode::Include, RecordType::ChangeToExcludeMode) => {
            Transition::quiet(include_to_exclude(current, &sources, gmi))
                .query_sources(intersection(&x, &sources))
        }
        // INCLUDE (A+B), (B)=GMI, Send Q(G,A-B)
        (FilterMode::Include, RecordType::ChangeToIncludeMode) => {
            Transition::quiet(include_add(current, &sources, gmi))
                .query_sources(difference(&x, &sources))
        }
        // EXCLUDE (X+A, Y-A), (A)=GMI
        (FilterMode::Exclude, RecordType::AllowNewSources) => {
            Transition::quiet(exclude_add(current, &sources, gmi))
        }
        // EXCLUDE (X+(A-Y), Y), (A-X-Y)=Group Timer, Send Q(G,A-Y)
        (FilterMode::Exclude, RecordType::BlockOldSources) => {
            let added = difference(&sources, &y);
            let fresh = difference(&added, &x);
            let record = MembershipRecord {
                x: with_timers(&union(&x, &added), |s| {
                    if fresh.contains(&s) {
                        current.group_timer
                    } else {
                        current.current_source_timer(s)
                    }
                }),
                ..current.clone()
            };
            Transition::quiet(record).query_sources(added)
        }
        // EXCLUDE (A-Y, Y*A), (A-X-Y)=Group Timer, Send Q(G,A-Y)
        (FilterMode::Exclude, RecordType::ChangeToExcludeMode) => {
            let record =
                exclude_replace(current, &sources, current.group_timer, gmi);
            let query = difference(&sources, &y);
            Transition::quiet(record).query_sources(query)
        }
        // (X+A), (A)=GMI, Send Q(G,X-A), Send Q(G).  The record moves to
        // INCLUDE with the sources it was forwarding, so a host leaving with
        // an empty list drops the membership.
        (FilterMode::Exclude, RecordType::ChangeToIncludeMode) => {
            let added = exclude_add(current, &sources, gmi);
            let record = MembershipRecord {
                filter_mode: FilterMode::Include,
                y: SourceTimers::new(),
                ..added
            };
            Transition::quiet(record)
                .query_sources(difference(&x, &sources))
                .query_group()
        }
        _ => Transition::quiet(current.clone()),
    }
}

/// Apply one report record received on `port` to the switch's store,
/// creating the membership record if needed and deleting it when it prunes
/// to an empty INCLUDE.  Returns the queries the transition calls for, or
/// `None` if the record type isn't one a router acts on.
pub fn apply_record(
    store: &mut MembershipStore,
    port: &PortId,
    report: &GroupRecord,
    gmi: f64,
) -> Option<Vec<PendingQuery>> {
    let is_current = report.record_type.is_current_state();
    if !is_current && !report.record_type.is_state_change() {
        return None;
    }

    let current = store.get_or_create(port, report.group, gmi);
    let transition = if is_current {
        process_current_state_record(current, report, gmi)
    } else {
        process_state_change_record(current, report, gmi)
    };

    if transition.record.is_prunable() {
        store.remove(port, report.group);
    } else {
        *current = transition.record;
    }
    Some(transition.queries)
}
