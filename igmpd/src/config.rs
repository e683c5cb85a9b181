// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `igmpd`.

use std::path::Path;

use serde::Deserialize;

use crate::types::{McastError, McastResult};

/// The run-time settings of the membership engine, loaded from a TOML file.
/// Every key is optional.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: common::logging::LogFormat,

    /// The RFC 3376 robustness variable.
    pub robustness_variable: u32,

    /// Seconds between general queries.
    pub query_interval: f64,

    /// Seconds a host is given to answer a query.
    pub query_response_interval: f64,

    /// Only the appearance of this flow table on a switch causes it to be
    /// managed.
    pub capture_table_id: u8,

    /// Priority of the flow that sends IGMP to the controller.
    pub capture_flow_priority: u16,

    /// First value issued by the flow id generator.
    pub flow_id_start: u64,

    /// First value issued by the flow cookie generator.
    pub flow_cookie_start: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: common::logging::LogFormat::Human,
            robustness_variable: 2,
            query_interval: 125.0,
            query_response_interval: 10.0,
            capture_table_id: 0,
            capture_flow_priority: 0,
            flow_id_start: 0,
            flow_cookie_start: 0x2a00_0000_0000_0000,
        }
    }
}

impl Config {
    /// The time a membership lasts without being refreshed:
    /// robustness * query interval + query response interval.
    pub fn group_membership_interval(&self) -> f64 {
        self.robustness_variable as f64 * self.query_interval
            + self.query_response_interval
    }

    pub fn from_toml(txt: &str) -> McastResult<Config> {
        let config: Config = toml::from_str(txt)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> McastResult<Config> {
        let txt = std::fs::read_to_string(path)?;
        Config::from_toml(&txt)
    }

    fn validate(&self) -> McastResult<()> {
        if self.robustness_variable == 0 {
            return Err(McastError::Config(
                "robustness_variable must be at least 1".to_string(),
            ));
        }
        if !(self.query_interval > 0.0) || self.query_response_interval < 0.0
        {
            return Err(McastError::Config(format!(
                "invalid query timing: interval {} response interval {}",
                self.query_interval, self.query_response_interval
            )));
        }
        Ok(())
    }
}
