// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! IGMP membership queries (versions 1 through 3) and version 3 membership
//! reports.
//!
//! Decoding never fails outright: anything that can't be recognized comes
//! back as [`IgmpMessage::Unknown`], and damage inside a recognized message
//! is logged and skipped.  Checksums are carried but not verified.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use slog::{debug, error, warn};

use crate::group_record::GroupRecord;
use crate::pbuf::ParseBuffer;
use crate::{PacketError, PacketResult};

pub const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;
pub const IGMP_MEMBERSHIP_REPORT_V1: u8 = 0x12;
pub const IGMP_MEMBERSHIP_REPORT_V2: u8 = 0x16;
pub const IGMP_MEMBERSHIP_REPORT_V3: u8 = 0x22;
pub const IGMP_LEAVE_GROUP_V2: u8 = 0x17;

/// Destination of IGMPv3 reports.
pub const IGMP_V3_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 22);
/// Destination of general queries.
pub const IGMP_ALL_SYSTEMS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

const IGMP_BASE_LEN: usize = 8;
const IGMP_V3_QUERY_HEADER_LEN: usize = 12;

// Max Resp Code and QQIC values at or above this use the floating-point
// encoding, which is not interpreted.
const FLOATING_POINT_CODE: u8 = 128;

/// A version 1 or 2 membership query.  The two share a layout; version 1
/// always carries a zero max response time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipQuery {
    pub max_resp_time: u8,
    pub checksum: u16,
    pub group: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipQueryV3 {
    pub max_resp_code: u8,
    pub checksum: u16,
    pub group: Ipv4Addr,
    pub suppress_router_processing: bool,
    /// Querier's robustness variable, 3 bits.
    pub qrv: u8,
    /// Querier's query interval code.
    pub qqic: u8,
    pub sources: Vec<Ipv4Addr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipReportV3 {
    pub checksum: u16,
    /// The record count declared in the header.  Records that failed to
    /// decode are absent from `records`, so this may exceed its length.
    pub record_count: u16,
    pub records: Vec<GroupRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownMessage {
    /// Absent when the payload was empty.
    pub version_and_type: Option<u8>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgmpMessage {
    QueryV1(MembershipQuery),
    QueryV2(MembershipQuery),
    QueryV3(MembershipQueryV3),
    ReportV3(MembershipReportV3),
    Unknown(UnknownMessage),
}

fn unknown(data: &[u8]) -> IgmpMessage {
    IgmpMessage::Unknown(UnknownMessage {
        version_and_type: data.first().copied(),
        data: data.to_vec(),
    })
}

fn warn_floating_point(log: &slog::Logger, field: &str, value: u8) {
    if value >= FLOATING_POINT_CODE {
        warn!(log, "floating point {field} is unsupported"; "value" => value);
    }
}

impl IgmpMessage {
    pub fn query_v1(group: Ipv4Addr) -> Self {
        IgmpMessage::QueryV1(MembershipQuery {
            max_resp_time: 0,
            checksum: 0,
            group,
        })
    }

    pub fn query_v2(group: Ipv4Addr, max_resp_time: u8) -> Self {
        IgmpMessage::QueryV2(MembershipQuery {
            max_resp_time,
            checksum: 0,
            group,
        })
    }

    pub fn query_v3(
        group: Ipv4Addr,
        max_resp_code: u8,
        suppress_router_processing: bool,
        qrv: u8,
        qqic: u8,
        sources: Vec<Ipv4Addr>,
    ) -> Self {
        IgmpMessage::QueryV3(MembershipQueryV3 {
            max_resp_code,
            checksum: 0,
            group,
            suppress_router_processing,
            qrv: qrv & 0x7,
            qqic,
            sources,
        })
    }

    pub fn report_v3(records: Vec<GroupRecord>) -> Self {
        IgmpMessage::ReportV3(MembershipReportV3 {
            checksum: 0,
            record_count: records.len() as u16,
            records,
        })
    }

    pub fn checksum(&self) -> Option<u16> {
        match self {
            IgmpMessage::QueryV1(q) | IgmpMessage::QueryV2(q) => Some(q.checksum),
            IgmpMessage::QueryV3(q) => Some(q.checksum),
            IgmpMessage::ReportV3(r) => Some(r.checksum),
            IgmpMessage::Unknown(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            IgmpMessage::QueryV1(_) => "MEMBERSHIP_QUERY_V1",
            IgmpMessage::QueryV2(_) => "MEMBERSHIP_QUERY_V2",
            IgmpMessage::QueryV3(_) => "MEMBERSHIP_QUERY_V3",
            IgmpMessage::ReportV3(_) => "MEMBERSHIP_REPORT_V3",
            IgmpMessage::Unknown(_) => "UNKNOWN_TYPE",
        }
    }

    /// Decode an IGMP payload, returning the message and the number of bytes
    /// it accounted for.  Bytes past that point are not part of the message.
    pub fn decode(log: &slog::Logger, data: &[u8]) -> (IgmpMessage, usize) {
        let (msg, used) = match data.first() {
            Some(&IGMP_MEMBERSHIP_REPORT_V3) => decode_report_v3(log, data),
            Some(&IGMP_MEMBERSHIP_QUERY) => decode_query(log, data),
            _ => (unknown(data), data.len()),
        };

        if used < data.len() {
            debug!(log, "trailing bytes after igmp message";
                "type" => msg.type_name(),
                "consumed" => used,
                "extra" => data.len() - used);
        }
        debug!(log, "decoded igmp message"; "type" => msg.type_name(), "bytes" => used);
        (msg, used)
    }

    // Serialize with the given value in the checksum field.
    fn emit(&self, log: &slog::Logger, checksum: u16) -> PacketResult<BytesMut> {
        let mut v = BytesMut::with_capacity(IGMP_BASE_LEN);
        match self {
            IgmpMessage::QueryV1(q) | IgmpMessage::QueryV2(q) => {
                warn_floating_point(log, "max response time", q.max_resp_time);
                v.put_u8(IGMP_MEMBERSHIP_QUERY);
                v.put_u8(q.max_resp_time);
                v.put_u16(checksum);
                v.put_slice(&q.group.octets());
            }
            IgmpMessage::QueryV3(q) => {
                warn_floating_point(log, "max response code", q.max_resp_code);
                warn_floating_point(log, "qqic", q.qqic);
                v.put_u8(IGMP_MEMBERSHIP_QUERY);
                v.put_u8(q.max_resp_code);
                v.put_u16(checksum);
                v.put_slice(&q.group.octets());
                let s_flag = if q.suppress_router_processing { 0x08 } else { 0 };
                v.put_u8(s_flag | (q.qrv & 0x07));
                v.put_u8(q.qqic);
                v.put_u16(q.sources.len() as u16);
                for src in &q.sources {
                    v.put_slice(&src.octets());
                }
            }
            IgmpMessage::ReportV3(r) => {
                if r.record_count as usize != r.records.len() {
                    debug!(log, "report record count adjusted for encode";
                        "declared" => r.record_count,
                        "records" => r.records.len());
                }
                v.put_u8(IGMP_MEMBERSHIP_REPORT_V3);
                v.put_u8(0);
                v.put_u16(checksum);
                v.put_u16(0);
                v.put_u16(r.records.len() as u16);
                for rec in &r.records {
                    rec.emit_into(log, &mut v);
                }
            }
            IgmpMessage::Unknown(u) => {
                return Err(PacketError::Unsupported(format!(
                    "cannot encode unknown igmp message type {:?}",
                    u.version_and_type
                )));
            }
        }
        Ok(v)
    }

    /// Serialize the message.  With `recalc_checksum` the checksum is
    /// computed over the message with a zeroed checksum field; otherwise
    /// the stored checksum is written as-is.
    pub fn encode(
        &self,
        log: &slog::Logger,
        recalc_checksum: bool,
    ) -> PacketResult<Bytes> {
        let stored = self.checksum().unwrap_or(0);
        if !recalc_checksum {
            return Ok(self.emit(log, stored)?.freeze());
        }

        let zeroed = self.emit(log, 0)?;
        let ck = crate::checksum(&zeroed);
        Ok(self.emit(log, ck)?.freeze())
    }
}

// Returns the checksum and record count.
fn report_header(pb: &mut ParseBuffer) -> PacketResult<(u16, u16)> {
    pb.skip_bytes(2)?;
    let checksum = pb.get_u16()?;
    pb.skip_bytes(2)?;
    let record_count = pb.get_u16()?;
    Ok((checksum, record_count))
}

fn decode_report_v3(log: &slog::Logger, data: &[u8]) -> (IgmpMessage, usize) {
    let mut pb = ParseBuffer::new(data);
    let (checksum, record_count) = match report_header(&mut pb) {
        Ok(h) => h,
        Err(e) => {
            error!(log, "truncated membership report header: {e}";
                "len" => data.len());
            return (unknown(data), data.len());
        }
    };

    let mut offset = IGMP_BASE_LEN;
    let mut records = Vec::with_capacity(record_count as usize);
    for idx in 0..record_count {
        let rest = &data[offset..];
        if rest.is_empty() {
            error!(log, "membership report truncated";
                "declared_records" => record_count,
                "present_records" => idx);
            break;
        }

        match GroupRecord::decode(rest) {
            Ok((rec, used)) => {
                // The aux words sit between this record and the next.
                let aux = 4 * rec.aux_data_len as usize;
                if aux > 0 {
                    warn!(log, "group record carries auxiliary data, skipped";
                        "group" => %rec.group,
                        "aux_data_len" => rec.aux_data_len);
                }
                records.push(rec);
                offset += used + aux.min(rest.len() - used);
            }
            Err(e) => {
                error!(log, "failed to decode group record: {e}";
                    "record" => idx,
                    "offset" => offset);
                offset += GroupRecord::declared_len(rest)
                    .map_or(rest.len(), |l| l.min(rest.len()));
            }
        }
    }

    (
        IgmpMessage::ReportV3(MembershipReportV3 {
            checksum,
            record_count,
            records,
        }),
        offset,
    )
}

fn decode_query(log: &slog::Logger, data: &[u8]) -> (IgmpMessage, usize) {
    if data.len() != IGMP_BASE_LEN && data.len() < IGMP_V3_QUERY_HEADER_LEN {
        debug!(log, "membership query with unexpected length";
            "len" => data.len());
        return (unknown(data), data.len());
    }

    // The length checks above leave at least 8 bytes to read.
    let max_resp = data[1];
    let checksum = u16::from_be_bytes([data[2], data[3]]);
    let group = Ipv4Addr::new(data[4], data[5], data[6], data[7]);
    warn_floating_point(log, "max response code", max_resp);

    if data.len() == IGMP_BASE_LEN {
        let q = MembershipQuery {
            max_resp_time: max_resp,
            checksum,
            group,
        };
        let msg = if max_resp == 0 {
            IgmpMessage::QueryV1(q)
        } else {
            IgmpMessage::QueryV2(q)
        };
        return (msg, IGMP_BASE_LEN);
    }

    let flags = data[8];
    let qqic = data[9];
    let nsrc = u16::from_be_bytes([data[10], data[11]]) as usize;
    warn_floating_point(log, "qqic", qqic);

    let mut pb = ParseBuffer::new(&data[IGMP_V3_QUERY_HEADER_LEN..]);
    let mut sources = Vec::with_capacity(nsrc);
    for idx in 0..nsrc {
        match pb.get_ipv4() {
            Ok(src) => sources.push(src),
            Err(e) => {
                error!(log, "failed to read query source address: {e}";
                    "source" => idx,
                    "declared_sources" => nsrc);
                break;
            }
        }
    }

    let q = MembershipQueryV3 {
        max_resp_code: max_resp,
        checksum,
        group,
        suppress_router_processing: flags & 0x08 != 0,
        qrv: flags & 0x07,
        qqic,
        sources,
    };
    let used = IGMP_V3_QUERY_HEADER_LEN + pb.offset();
    (IgmpMessage::QueryV3(q), used)
}

impl fmt::Display for IgmpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IGMP {}", self.type_name())?;
        match self {
            IgmpMessage::QueryV1(q) | IgmpMessage::QueryV2(q) => write!(
                f,
                " checksum: {:#06x} max_resp: {} group: {}",
                q.checksum, q.max_resp_time, q.group
            ),
            IgmpMessage::QueryV3(q) => {
                write!(
                    f,
                    " checksum: {:#06x} max_resp: {} group: {} s: {} qrv: {} qqic: {} sources: {}",
                    q.checksum,
                    q.max_resp_code,
                    q.group,
                    q.suppress_router_processing,
                    q.qrv,
                    q.qqic,
                    q.sources.len(),
                )
            }
            IgmpMessage::ReportV3(r) => {
                write!(f, " checksum: {:#06x}", r.checksum)?;
                for rec in &r.records {
                    write!(f, "\n  {rec}")?;
                }
                Ok(())
            }
            IgmpMessage::Unknown(u) => match u.version_and_type {
                Some(t) => write!(f, " version_and_type: {t:#04x}"),
                None => write!(f, " (empty)"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group_record::RecordType;
    use crate::test_log;
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    // One MODE_IS_EXCLUDE record for 239.1.1.1 with no sources.
    const REPORT_IS_EX: [u8; 16] =
        hex!("22 00 eb fb 00 00 00 01 02 00 00 00 ef 01 01 01");

    #[test]
    fn test_decode_report() {
        let log = test_log();
        let (msg, used) = IgmpMessage::decode(&log, &REPORT_IS_EX);
        assert_eq!(used, 16);
        assert_eq!(
            msg,
            IgmpMessage::ReportV3(MembershipReportV3 {
                checksum: 0xebfb,
                record_count: 1,
                records: vec![GroupRecord::new(
                    RecordType::ModeIsExclude,
                    Ipv4Addr::new(239, 1, 1, 1),
                    Vec::new()
                )],
            })
        );
    }

    #[test]
    fn test_report_checksum() {
        let log = test_log();
        let (msg, _) = IgmpMessage::decode(&log, &REPORT_IS_EX);
        let out = msg.encode(&log, true).unwrap();
        assert_eq!(&out[..], &REPORT_IS_EX[..]);
        assert_eq!(crate::checksum(&out), 0);
    }

    #[test]
    fn test_report_round_trip() {
        let log = test_log();
        let raw = hex!(
            "
            22 00 00 00 00 00 00 03
            01 00 00 01 ef 01 01 02 0a 00 00 05
            06 00 00 02 ef 01 01 03 0a 00 00 05 0a 00 00 06
            04 00 00 00 ef 01 01 04"
        );

        let (first, used) = IgmpMessage::decode(&log, &raw);
        assert_eq!(used, raw.len());
        let out = first.encode(&log, false).unwrap();
        assert_eq!(&out[..], &raw[..]);

        let (second, _) = IgmpMessage::decode(&log, &out);
        assert_eq!(first, second);
    }

    #[test]
    fn test_recalculated_checksum_verifies() {
        let log = test_log();
        let msg = IgmpMessage::report_v3(vec![
            GroupRecord::new(
                RecordType::AllowNewSources,
                Ipv4Addr::new(239, 1, 1, 2),
                vec![Ipv4Addr::new(10, 0, 0, 5)],
            ),
            GroupRecord::new(
                RecordType::ChangeToIncludeMode,
                Ipv4Addr::new(239, 2, 2, 2),
                vec![Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 1, 0, 9)],
            ),
        ]);

        let out = msg.encode(&log, true).unwrap();
        // Summing a buffer that includes its own checksum yields 0xffff,
        // whose complement is 0.
        assert_eq!(crate::checksum(&out), 0);

        let (back, _) = IgmpMessage::decode(&log, &out);
        let IgmpMessage::ReportV3(r) = back else {
            panic!("expected a report");
        };
        assert_eq!(r.checksum, u16::from_be_bytes([out[2], out[3]]));
        assert_eq!(r.records.len(), 2);
    }

    #[test]
    fn test_bad_record_skipped() {
        let log = test_log();
        // Second record declares 4 sources but carries 1.  The first record
        // survives; the report still decodes.
        let raw = hex!(
            "
            22 00 00 00 00 00 00 02
            02 00 00 00 ef 01 01 01
            01 00 00 04 ef 01 01 02 0a 00 00 05"
        );

        let (msg, used) = IgmpMessage::decode(&log, &raw);
        assert_eq!(used, raw.len());
        let IgmpMessage::ReportV3(r) = msg else {
            panic!("expected a report");
        };
        assert_eq!(r.record_count, 2);
        assert_eq!(r.records.len(), 1);
        assert_eq!(r.records[0].group, Ipv4Addr::new(239, 1, 1, 1));
    }

    #[test]
    fn test_aux_data_skipped_between_records() {
        let log = test_log();
        // An IS_IN record with one aux word, then an IS_EX record.
        let raw = hex!(
            "
            22 00 00 00 00 00 00 02
            01 01 00 01 ef 01 01 02 0a 00 00 05 de ad be ef
            02 00 00 00 ef 01 01 03"
        );

        let (msg, used) = IgmpMessage::decode(&log, &raw);
        assert_eq!(used, raw.len());
        let IgmpMessage::ReportV3(r) = msg else {
            panic!("expected a report");
        };
        assert_eq!(
            r.records
                .iter()
                .map(|rec| (rec.record_type, rec.group))
                .collect::<Vec<_>>(),
            vec![
                (RecordType::ModeIsInclude, Ipv4Addr::new(239, 1, 1, 2)),
                (RecordType::ModeIsExclude, Ipv4Addr::new(239, 1, 1, 3)),
            ]
        );
        assert_eq!(r.records[0].aux_data_len, 1);
    }

    #[test]
    fn test_report_fewer_records_than_declared() {
        let log = test_log();
        let raw = hex!("22 00 00 00 00 00 00 05 02 00 00 00 ef 01 01 01");

        let (msg, used) = IgmpMessage::decode(&log, &raw);
        assert_eq!(used, 16);
        let IgmpMessage::ReportV3(r) = msg else {
            panic!("expected a report");
        };
        assert_eq!(r.records.len(), 1);
    }

    #[test]
    fn test_one_byte_is_unknown() {
        let log = test_log();
        let cases: [&[u8]; 4] = [&[0x22], &[0x11], &[0x42], &[]];
        for raw in cases {
            let (msg, _) = IgmpMessage::decode(&log, raw);
            assert!(matches!(msg, IgmpMessage::Unknown(_)), "{raw:?}");
        }
    }

    #[test]
    fn test_other_types_unknown() {
        let log = test_log();
        for t in [
            IGMP_MEMBERSHIP_REPORT_V1,
            IGMP_MEMBERSHIP_REPORT_V2,
            IGMP_LEAVE_GROUP_V2,
        ] {
            let raw = [t, 0, 0, 0, 239, 1, 1, 1];
            let (msg, used) = IgmpMessage::decode(&log, &raw);
            assert_eq!(
                msg,
                IgmpMessage::Unknown(UnknownMessage {
                    version_and_type: Some(t),
                    data: raw.to_vec(),
                })
            );
            assert_eq!(used, 8);
            assert!(msg.encode(&log, false).is_err());
        }
    }

    #[test]
    fn test_query_versions() {
        let log = test_log();

        let (v1, _) = IgmpMessage::decode(&log, &hex!("11 00 ee fe 00 00 00 00"));
        assert_eq!(v1, IgmpMessage::QueryV1(MembershipQuery {
            max_resp_time: 0,
            checksum: 0xeefe,
            group: Ipv4Addr::UNSPECIFIED,
        }));

        let (v2, _) = IgmpMessage::decode(&log, &hex!("11 64 00 00 ef 01 01 01"));
        assert!(matches!(v2, IgmpMessage::QueryV2(ref q) if q.max_resp_time == 100));

        // 9 through 11 bytes is neither form.
        let (bad, _) =
            IgmpMessage::decode(&log, &hex!("11 64 00 00 ef 01 01 01 00 00"));
        assert!(matches!(bad, IgmpMessage::Unknown(_)));

        let (v3, used) = IgmpMessage::decode(
            &log,
            &hex!("11 64 00 00 ef 01 01 01 0a 7d 00 02 0a 00 00 05 0a 00 00 06"),
        );
        assert_eq!(used, 20);
        assert_eq!(
            v3,
            IgmpMessage::QueryV3(MembershipQueryV3 {
                max_resp_code: 100,
                checksum: 0,
                group: Ipv4Addr::new(239, 1, 1, 1),
                suppress_router_processing: true,
                qrv: 2,
                qqic: 125,
                sources: vec![
                    Ipv4Addr::new(10, 0, 0, 5),
                    Ipv4Addr::new(10, 0, 0, 6)
                ],
            })
        );
    }

    #[test]
    fn test_query_v3_short_source_list() {
        let log = test_log();
        let (msg, used) = IgmpMessage::decode(
            &log,
            &hex!("11 64 00 00 ef 01 01 01 02 7d 00 03 0a 00 00 05 0a 00"),
        );
        assert_eq!(used, 16);
        let IgmpMessage::QueryV3(q) = msg else {
            panic!("expected a v3 query");
        };
        assert!(!q.suppress_router_processing);
        assert_eq!(q.sources, vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn test_query_encode() {
        let log = test_log();

        let v1 = IgmpMessage::query_v1(Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            &v1.encode(&log, true).unwrap()[..],
            &hex!("11 00 ee ff 00 00 00 00")
        );

        let v3 = IgmpMessage::query_v3(
            Ipv4Addr::new(239, 1, 1, 1),
            100,
            true,
            2,
            125,
            vec![Ipv4Addr::new(10, 0, 0, 5)],
        );
        let out = v3.encode(&log, false).unwrap();
        assert_eq!(
            &out[..],
            &hex!("11 64 00 00 ef 01 01 01 0a 7d 00 01 0a 00 00 05")
        );
        let (back, _) = IgmpMessage::decode(&log, &out);
        assert_eq!(back, v3);
    }

    #[test]
    fn test_trailing_bytes() {
        let log = test_log();
        let mut raw = REPORT_IS_EX.to_vec();
        raw.extend_from_slice(&[0, 0, 0, 0]);
        let (msg, used) = IgmpMessage::decode(&log, &raw);
        assert!(matches!(msg, IgmpMessage::ReportV3(_)));
        assert_eq!(used, REPORT_IS_EX.len());
    }

    #[test]
    fn test_display() {
        let log = test_log();
        let (msg, _) = IgmpMessage::decode(&log, &REPORT_IS_EX);
        assert_eq!(
            msg.to_string(),
            "IGMP MEMBERSHIP_REPORT_V3 checksum: 0xebfb\n  MODE_IS_EXCLUDE group: 239.1.1.1 aux_len: 0 sources: []"
        );
    }
}
