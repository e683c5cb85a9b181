// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! An IGMPv3 membership engine for an SDN controller.
//!
//! Reports punted from each switch are applied to per-port membership
//! records following RFC 3376's router rules, and the result is folded into
//! a per-switch view of which ports want which (group, source) traffic.

pub mod config;
pub mod controller;
pub mod membership;
pub mod platform;
pub mod reception;
pub mod routing;
pub mod switch_manager;
pub mod transition;
pub mod types;

pub use config::Config;
pub use controller::Controller;
pub use reception::{MulticastGroupEvent, SourceFilter};
pub use types::{McastError, McastResult, PortId, SwitchId};

/// Build the root logger described by `config`.
pub fn init_logging(config: &Config) -> anyhow::Result<slog::Logger> {
    common::logging::init("igmpd", &config.log_file, config.log_format)
}

#[cfg(test)]
pub(crate) fn test_log() -> slog::Logger {
    use slog::Drain;

    let dec = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(dec).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_to_file() -> anyhow::Result<()> {
        let path = std::env::temp_dir()
            .join(format!("igmpd-test-{}.log", std::process::id()));
        let config = Config::from_toml(&format!(
            "log_file = {:?}\nlog_format = \"json\"",
            path.display().to_string()
        ))?;

        let log = init_logging(&config)?;
        slog::info!(log, "hello");
        drop(log);
        std::fs::remove_file(&path)?;
        Ok(())
    }
}
