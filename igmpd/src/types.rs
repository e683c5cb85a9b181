// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout igmpd.

use std::convert;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type McastResult<T> = Result<T, McastError>;

#[derive(Debug, thiserror::Error)]
pub enum McastError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("Failed to read topology of switch \"{switch_id}\": {reason}")]
    Topology { switch_id: SwitchId, reason: String },
    #[error("Failed to program flow on switch \"{switch_id}\": {reason}")]
    Flow { switch_id: SwitchId, reason: String },
    #[error("Switch \"{0}\" is not managed")]
    NoSuchSwitch(SwitchId),
    #[error("Routing error: {0}")]
    Routing(String),
    #[error("Error: {0}")]
    Other(String),
}

impl convert::From<std::io::Error> for McastError {
    fn from(err: std::io::Error) -> Self {
        McastError::Io(err)
    }
}

impl convert::From<toml::de::Error> for McastError {
    fn from(err: toml::de::Error) -> Self {
        McastError::Config(format!("failed to parse TOML: {err}"))
    }
}

impl convert::From<anyhow::Error> for McastError {
    fn from(err: anyhow::Error) -> Self {
        McastError::Other(format!("{err:#}"))
    }
}

impl convert::From<String> for McastError {
    fn from(err: String) -> Self {
        McastError::Other(err)
    }
}

impl convert::From<&str> for McastError {
    fn from(err: &str) -> Self {
        McastError::Other(err.to_string())
    }
}

/// Identifies a switch to the controller platform, e.g. "openflow:1".
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct SwitchId(String);

impl SwitchId {
    pub fn new(id: impl Into<String>) -> Self {
        SwitchId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SwitchId {
    fn from(s: &str) -> Self {
        SwitchId::new(s)
    }
}

/// A port on a switch, as named by the platform's inventory, e.g.
/// "openflow:1:3".
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct PortId(String);

impl PortId {
    pub fn new(id: impl Into<String>) -> Self {
        PortId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PortId {
    fn from(s: &str) -> Self {
        PortId::new(s)
    }
}
