// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! IGMPv3 group records (RFC 3376 section 4.2.4).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Record Type  |  Aux Data Len |     Number of Sources (N)     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Multicast Address                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Source Address [1..N]                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Auxiliary Data                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use slog::warn;

use crate::pbuf::ParseBuffer;
use crate::{parse_error, PacketResult};

pub const GROUP_RECORD_HEADER_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordType {
    ModeIsInclude,
    ModeIsExclude,
    ChangeToIncludeMode,
    ChangeToExcludeMode,
    AllowNewSources,
    BlockOldSources,
    Unknown(u8),
}

impl RecordType {
    /// MODE_IS_INCLUDE or MODE_IS_EXCLUDE
    pub fn is_current_state(&self) -> bool {
        matches!(self, RecordType::ModeIsInclude | RecordType::ModeIsExclude)
    }

    /// One of the four filter-mode or source-list change records.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            RecordType::ChangeToIncludeMode
                | RecordType::ChangeToExcludeMode
                | RecordType::AllowNewSources
                | RecordType::BlockOldSources
        )
    }
}

impl From<u8> for RecordType {
    fn from(v: u8) -> Self {
        match v {
            1 => RecordType::ModeIsInclude,
            2 => RecordType::ModeIsExclude,
            3 => RecordType::ChangeToIncludeMode,
            4 => RecordType::ChangeToExcludeMode,
            5 => RecordType::AllowNewSources,
            6 => RecordType::BlockOldSources,
            x => RecordType::Unknown(x),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(t: RecordType) -> Self {
        match t {
            RecordType::ModeIsInclude => 1,
            RecordType::ModeIsExclude => 2,
            RecordType::ChangeToIncludeMode => 3,
            RecordType::ChangeToExcludeMode => 4,
            RecordType::AllowNewSources => 5,
            RecordType::BlockOldSources => 6,
            RecordType::Unknown(x) => x,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::ModeIsInclude => write!(f, "MODE_IS_INCLUDE"),
            RecordType::ModeIsExclude => write!(f, "MODE_IS_EXCLUDE"),
            RecordType::ChangeToIncludeMode => {
                write!(f, "CHANGE_TO_INCLUDE_MODE")
            }
            RecordType::ChangeToExcludeMode => {
                write!(f, "CHANGE_TO_EXCLUDE_MODE")
            }
            RecordType::AllowNewSources => write!(f, "ALLOW_NEW_SOURCES"),
            RecordType::BlockOldSources => write!(f, "BLOCK_OLD_SOURCES"),
            RecordType::Unknown(x) => write!(f, "UNKNOWN({x})"),
        }
    }
}

/// A single group record carried in a version 3 membership report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    pub record_type: RecordType,
    /// Length of the auxiliary data, in 32-bit words.  The data itself is
    /// never interpreted.
    pub aux_data_len: u8,
    pub group: Ipv4Addr,
    pub sources: Vec<Ipv4Addr>,
}

impl GroupRecord {
    pub fn new(
        record_type: RecordType,
        group: Ipv4Addr,
        sources: Vec<Ipv4Addr>,
    ) -> Self {
        GroupRecord {
            record_type,
            aux_data_len: 0,
            group,
            sources,
        }
    }

    /// The number of bytes a record starting at `data` claims to occupy,
    /// auxiliary data included, if enough of its header is present to tell.
    pub fn declared_len(data: &[u8]) -> Option<usize> {
        match data {
            [_, aux, hi, lo, ..] => Some(
                GROUP_RECORD_HEADER_LEN
                    + 4 * u16::from_be_bytes([*hi, *lo]) as usize
                    + 4 * *aux as usize,
            ),
            _ => None,
        }
    }

    /// Decode one record from the start of `data`, returning it along with
    /// the number of bytes consumed: the header plus four bytes per source.
    /// Any auxiliary data is left unconsumed.
    pub fn decode(data: &[u8]) -> PacketResult<(GroupRecord, usize)> {
        let mut pb = ParseBuffer::new(data);
        if pb.bytes_left() < GROUP_RECORD_HEADER_LEN {
            return Err(parse_error(&pb, "group record header too short"));
        }

        let record_type = RecordType::from(pb.get_u8()?);
        let aux_data_len = pb.get_u8()?;
        let nsrc = pb.get_u16()? as usize;
        let group = pb.get_ipv4()?;

        if pb.bytes_left() < 4 * nsrc {
            return Err(parse_error(
                &pb,
                format!(
                    "group record declares {nsrc} sources, only {} bytes left",
                    pb.bytes_left()
                ),
            ));
        }
        let mut sources = Vec::with_capacity(nsrc);
        for _ in 0..nsrc {
            sources.push(pb.get_ipv4()?);
        }

        Ok((
            GroupRecord {
                record_type,
                aux_data_len,
                group,
                sources,
            },
            pb.offset(),
        ))
    }

    /// Append the wire form of this record to `v`.  Auxiliary data cannot be
    /// reproduced, so it is dropped and the length field is written as 0.
    pub fn emit_into(&self, log: &slog::Logger, v: &mut BytesMut) {
        if self.aux_data_len > 0 {
            warn!(log, "encoding group record with auxiliary data is unsupported, aux data omitted";
                "group" => %self.group,
                "aux_data_len" => self.aux_data_len);
        }
        v.put_u8(self.record_type.into());
        v.put_u8(0);
        v.put_u16(self.sources.len() as u16);
        v.put_slice(&self.group.octets());
        for src in &self.sources {
            v.put_slice(&src.octets());
        }
    }

    pub fn encoded_len(&self) -> usize {
        GROUP_RECORD_HEADER_LEN + 4 * self.sources.len()
    }

    /// The reported sources as a set, for the membership set algebra.
    pub fn source_set(&self) -> BTreeSet<Ipv4Addr> {
        self.sources.iter().copied().collect()
    }
}

impl fmt::Display for GroupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} group: {} aux_len: {} sources: [",
            self.record_type, self.group, self.aux_data_len
        )?;
        for (i, src) in self.sources.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{src}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_record() {
        let raw = hex!(
            "
            05 00 00 02
            ef 01 01 01
            0a 00 00 05
            0a 00 00 06
            ff ff"
        );

        let (rec, used) = GroupRecord::decode(&raw).unwrap();
        assert_eq!(used, 16);
        assert_eq!(rec.record_type, RecordType::AllowNewSources);
        assert_eq!(rec.group, Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(
            rec.sources,
            vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]
        );
        assert_eq!(GroupRecord::declared_len(&raw), Some(16));
    }

    #[test]
    fn test_aux_data_not_consumed() {
        // One word of aux data follows the only source.
        let raw = hex!("01 01 00 01 ef 01 01 02 0a 00 00 05 de ad be ef");

        let (rec, used) = GroupRecord::decode(&raw).unwrap();
        assert_eq!(rec.aux_data_len, 1);
        assert_eq!(used, 12);
        assert_eq!(GroupRecord::declared_len(&raw), Some(16));
    }

    #[test]
    fn test_truncated_sources() {
        let raw = hex!("02 00 00 03 ef 01 01 01 0a 00 00 05");
        assert!(GroupRecord::decode(&raw).is_err());
        assert_eq!(GroupRecord::declared_len(&raw), Some(20));
    }

    #[test]
    fn test_short_header() {
        assert!(GroupRecord::decode(&hex!("02 00 00")).is_err());
        assert_eq!(GroupRecord::declared_len(&hex!("02 00 00")), None);
    }

    #[test]
    fn test_unknown_type_preserved() {
        let raw = hex!("09 00 00 00 ef 01 01 01");
        let (rec, _) = GroupRecord::decode(&raw).unwrap();
        assert_eq!(rec.record_type, RecordType::Unknown(9));
        assert!(!rec.record_type.is_current_state());
        assert!(!rec.record_type.is_state_change());

        let mut v = BytesMut::new();
        rec.emit_into(&crate::test_log(), &mut v);
        assert_eq!(&v[..], &raw[..]);
    }

    #[test]
    fn test_emit_drops_aux_data() {
        let mut rec = GroupRecord::new(
            RecordType::ModeIsExclude,
            Ipv4Addr::new(239, 1, 1, 1),
            vec![Ipv4Addr::new(10, 0, 0, 5)],
        );
        rec.aux_data_len = 2;

        let mut v = BytesMut::new();
        rec.emit_into(&crate::test_log(), &mut v);
        assert_eq!(&v[..], &hex!("02 00 00 01 ef 01 01 01 0a 00 00 05"));
        assert_eq!(v.len(), rec.encoded_len());
    }

    #[test]
    fn test_display() {
        let rec = GroupRecord::new(
            RecordType::BlockOldSources,
            Ipv4Addr::new(239, 1, 1, 2),
            vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)],
        );
        assert_eq!(
            rec.to_string(),
            "BLOCK_OLD_SOURCES group: 239.1.1.2 aux_len: 0 sources: [10.0.0.5, 10.0.0.6]"
        );
    }
}
