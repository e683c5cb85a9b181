// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Locate the IGMP payload inside a raw Ethernet frame.  Only untagged frames
//! are looked into; the offsets below assume no 802.1Q tag.

use std::net::Ipv4Addr;

use crate::pbuf::ParseBuffer;
use crate::{parse_error, PacketResult};

pub const ETHER_HDR_LEN: usize = 14;
const ETHER_TYPE_OFFSET: usize = 12;

pub const ETHER_IPV4: u16 = 0x0800;
pub const ETHER_ARP: u16 = 0x0806;
pub const ETHER_VLAN: u16 = 0x8100;
pub const ETHER_LLDP: u16 = 0x88cc;

pub const IPPROTO_IGMP: u8 = 2;

const IPV4_MIN_HDR_LEN: usize = 20;

/// The fields of an IPv4 header needed to find and describe its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Summary {
    /// The version nibble as carried, which may not be 4.
    pub version: u8,
    /// Header length in bytes (IHL * 4).
    pub header_len: usize,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// An IPv4 packet carrying IGMP.  `payload` is everything after the IP
    /// header, `headers` the Ethernet and IP headers before it.
    Igmp {
        ip: Ipv4Summary,
        headers: &'a [u8],
        payload: &'a [u8],
    },
    /// Any other IPv4 packet.
    Ipv4(Ipv4Summary),
    VlanTagged,
    Arp,
    Lldp,
    Other(u16),
}

/// Classify a frame by its EtherType, looking into the IPv4 header when
/// there is one.
pub fn classify(frame: &[u8]) -> PacketResult<FrameKind<'_>> {
    let mut pb = ParseBuffer::new(frame);
    pb.skip_bytes(ETHER_TYPE_OFFSET)?;
    let ether_type = pb.get_u16()?;

    match ether_type {
        ETHER_IPV4 => (),
        ETHER_VLAN => return Ok(FrameKind::VlanTagged),
        ETHER_ARP => return Ok(FrameKind::Arp),
        ETHER_LLDP => return Ok(FrameKind::Lldp),
        x => return Ok(FrameKind::Other(x)),
    }

    let version = pb.get_bits(4)? as u8;
    let header_len = pb.get_bits(4)? as usize * 4;
    if header_len < IPV4_MIN_HDR_LEN {
        return Err(parse_error(
            &pb,
            format!("ipv4 header length {header_len} too short"),
        ));
    }
    // tos, total length, id, flags+frag, ttl
    pb.skip_bytes(8)?;
    let protocol = pb.get_u8()?;
    pb.skip_bytes(2)?;
    let src = pb.get_ipv4()?;
    let dst = pb.get_ipv4()?;

    let payload_start = ETHER_HDR_LEN + header_len;
    if frame.len() < payload_start {
        return Err(parse_error(&pb, "frame ends inside ipv4 options"));
    }

    let ip = Ipv4Summary {
        version,
        header_len,
        protocol,
        src,
        dst,
    };
    if protocol == IPPROTO_IGMP {
        Ok(FrameKind::Igmp {
            ip,
            headers: &frame[..payload_start],
            payload: &frame[payload_start..],
        })
    } else {
        Ok(FrameKind::Ipv4(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    const ETH_IPV4: [u8; 14] =
        hex!("01 00 5e 00 00 16 02 00 00 00 00 01 08 00");

    fn frame(ip: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut v = ETH_IPV4.to_vec();
        v.extend_from_slice(ip);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn test_igmp_with_router_alert() {
        // 24-byte header: router alert option, protocol 2.
        let ip = hex!(
            "
            46 c0 00 28 00 00 40 00 01 02 00 00
            0a 00 00 05 e0 00 00 16
            94 04 00 00"
        );
        let igmp = hex!("22 00 eb fb 00 00 00 01 02 00 00 00 ef 01 01 01");
        let raw = frame(&ip, &igmp);

        let FrameKind::Igmp {
            ip,
            headers,
            payload,
        } = classify(&raw).unwrap()
        else {
            panic!("expected igmp");
        };
        assert_eq!(ip.version, 4);
        assert_eq!(ip.header_len, 24);
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(ip.dst, Ipv4Addr::new(224, 0, 0, 22));
        assert_eq!(headers.len(), 38);
        assert_eq!(payload, &igmp[..]);
    }

    #[test]
    fn test_other_ip_protocol() {
        let ip = hex!(
            "
            45 00 00 1c 00 00 40 00 40 11 00 00
            0a 00 00 05 0a 00 00 06"
        );
        let raw = frame(&ip, &[0; 8]);
        assert_eq!(
            classify(&raw).unwrap(),
            FrameKind::Ipv4(Ipv4Summary {
                version: 4,
                header_len: 20,
                protocol: 17,
                src: Ipv4Addr::new(10, 0, 0, 5),
                dst: Ipv4Addr::new(10, 0, 0, 6),
            })
        );
    }

    #[test]
    fn test_wrong_version_still_parsed() {
        let ip = hex!(
            "
            65 00 00 1c 00 00 40 00 01 02 00 00
            0a 00 00 05 e0 00 00 16"
        );
        let raw = frame(&ip, &hex!("11 00 ee ff 00 00 00 00"));
        let FrameKind::Igmp { ip, .. } = classify(&raw).unwrap() else {
            panic!("expected igmp");
        };
        assert_eq!(ip.version, 6);
    }

    #[test]
    fn test_non_ip_ethertypes() {
        let mut raw = ETH_IPV4.to_vec();
        for (et, kind) in [
            (ETHER_ARP, FrameKind::Arp),
            (ETHER_VLAN, FrameKind::VlanTagged),
            (ETHER_LLDP, FrameKind::Lldp),
            (0x86dd, FrameKind::Other(0x86dd)),
        ] {
            raw[12..14].copy_from_slice(&et.to_be_bytes());
            assert_eq!(classify(&raw).unwrap(), kind);
        }
    }

    #[test]
    fn test_short_frames() {
        assert!(classify(&ETH_IPV4[..13]).is_err());
        // Truncated ip header
        assert!(classify(&frame(&hex!("45 00 00 1c"), &[])).is_err());
        // IHL claims options that aren't there
        let ip = hex!(
            "
            4f 00 00 1c 00 00 40 00 01 02 00 00
            0a 00 00 05 e0 00 00 16"
        );
        assert!(classify(&frame(&ip, &[])).is_err());
    }
}
