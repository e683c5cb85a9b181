// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Wire formats handled by the membership engine: the IGMP messages
//! themselves, and just enough of the Ethernet and IPv4 headers to find them.

use thiserror::Error;

pub mod frame;
pub mod group_record;
pub mod igmp;
pub mod pbuf;

pub use group_record::{GroupRecord, RecordType};
pub use igmp::IgmpMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("parse error at byte {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type PacketResult<T> = Result<T, PacketError>;

pub(crate) fn parse_error(
    pb: &pbuf::ParseBuffer,
    message: impl ToString,
) -> PacketError {
    PacketError::Parse {
        offset: pb.offset(),
        message: message.to_string(),
    }
}

/// Compute the Internet checksum (RFC 1071) over `data`: the one's
/// complement of the one's complement sum of its 16-bit big-endian words.
/// A trailing odd byte is treated as the high byte of a final word.
pub fn checksum(data: &[u8]) -> u16 {
    let mut ck = internet_checksum::Checksum::new();
    ck.add_bytes(data);
    u16::from_be_bytes(ck.checksum())
}

#[cfg(test)]
pub(crate) fn test_log() -> slog::Logger {
    use slog::Drain;

    let dec = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(dec).build().fuse();
    slog::Logger::root(drain, slog::o!())
}
