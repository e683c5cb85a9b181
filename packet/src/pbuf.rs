// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::net::Ipv4Addr;

use crate::parse_error;
use crate::PacketResult;

/// A cursor over a received byte slice.  Multi-byte fields are read in
/// network byte order.  Sub-byte fields are read most-significant bit first;
/// any whole-byte read first discards the rest of a partially consumed byte.
pub struct ParseBuffer<'a> {
    data: &'a [u8],
    byte: usize,
    bit: usize,
}

impl<'a> ParseBuffer<'a> {
    pub fn new(data: &'a [u8]) -> ParseBuffer<'a> {
        ParseBuffer {
            data,
            byte: 0,
            bit: 0,
        }
    }

    /// Index of the next unread byte.
    pub fn offset(&self) -> usize {
        self.byte
    }

    pub fn byte_align(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.byte += 1;
        }
    }

    /// Number of whole, unread bytes.
    pub fn bytes_left(&self) -> usize {
        let next = self.byte + usize::from(self.bit != 0);
        self.data.len().saturating_sub(next)
    }

    /// Everything from the next whole byte to the end of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        let next = self.byte + usize::from(self.bit != 0);
        self.data.get(next..).unwrap_or(&[])
    }

    pub fn skip_bytes(&mut self, bytes: usize) -> PacketResult<()> {
        self.byte_align();
        if self.bytes_left() < bytes {
            return Err(parse_error(self, "buffer overrun"));
        }
        self.byte += bytes;
        Ok(())
    }

    // Pull up to `bits` bits out of the current byte, returning the value and
    // the number of bits actually taken.
    fn get_chunk(&mut self, bits: usize) -> (u32, usize) {
        let unused = 8 - self.bit;
        let mut rval = (self.data[self.byte] as u32) & ((1 << unused) - 1);

        if bits >= unused {
            self.byte += 1;
            self.bit = 0;
            return (rval, unused);
        }

        rval >>= unused - bits;
        self.bit += bits;
        (rval, bits)
    }

    pub fn get_bits(&mut self, len: usize) -> PacketResult<u32> {
        if len > 32 {
            return Err(parse_error(self, "attempted to read more than 32 bits"));
        }

        let mut rval: u32 = 0;
        let mut left = len;
        while left > 0 {
            if self.byte >= self.data.len() {
                return Err(parse_error(self, "buffer overrun"));
            }

            let (chunk, bits) = self.get_chunk(left);
            rval = (rval << bits) | chunk;
            left -= bits;
        }

        Ok(rval)
    }

    pub fn get_flag(&mut self) -> PacketResult<bool> {
        Ok(self.get_bits(1)? == 1)
    }

    pub fn get_bytes(&mut self, bytes: usize) -> PacketResult<&'a [u8]> {
        self.byte_align();

        if self.bytes_left() < bytes {
            Err(parse_error(self, "buffer overrun"))
        } else {
            let b = &self.data[self.byte..self.byte + bytes];
            self.byte += bytes;
            Ok(b)
        }
    }

    pub fn get_u8(&mut self) -> PacketResult<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn get_u16(&mut self) -> PacketResult<u16> {
        let b = self.get_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_ipv4(&mut self) -> PacketResult<Ipv4Addr> {
        let b = self.get_bytes(4)?;
        Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }
}

#[test]
fn test_byte() {
    let raw: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
    let mut tbuf = ParseBuffer::new(&raw);

    assert_eq!(tbuf.get_u8().unwrap(), 0x11);
    assert_eq!(tbuf.get_u8().unwrap(), 0x22);
    assert_eq!(tbuf.bytes_left(), 2);
    assert_eq!(tbuf.get_u16().unwrap(), 0x3344);
    assert_eq!(tbuf.bytes_left(), 0);
    assert!(tbuf.get_u8().is_err());
}

#[test]
fn test_query_flags() {
    // Resv = 0xa, S = 1, QRV = 5
    let raw: [u8; 2] = [0xad, 0x7d];
    let mut tbuf = ParseBuffer::new(&raw);

    assert_eq!(tbuf.get_bits(4).unwrap(), 0xa);
    assert!(tbuf.get_flag().unwrap());
    assert_eq!(tbuf.get_bits(3).unwrap(), 5);
    assert_eq!(tbuf.offset(), 1);
    assert_eq!(tbuf.get_u8().unwrap(), 0x7d);
}

#[test]
fn test_align_discards_partial_byte() {
    let raw: [u8; 2] = [0xf0, 0x42];
    let mut tbuf = ParseBuffer::new(&raw);

    assert_eq!(tbuf.get_bits(4).unwrap(), 0xf);
    assert_eq!(tbuf.remaining(), &[0x42]);
    assert_eq!(tbuf.get_u8().unwrap(), 0x42);
}

#[test]
fn test_ipv4() {
    let raw: [u8; 6] = [239, 1, 1, 1, 10, 0];
    let mut tbuf = ParseBuffer::new(&raw);

    assert_eq!(tbuf.get_ipv4().unwrap(), Ipv4Addr::new(239, 1, 1, 1));
    let err = tbuf.get_ipv4().unwrap_err();
    assert_eq!(
        err,
        crate::PacketError::Parse {
            offset: 4,
            message: "buffer overrun".to_string()
        }
    );
    assert_eq!(tbuf.remaining(), &[10, 0]);
}

#[test]
fn test_skip() {
    let raw: [u8; 3] = [1, 2, 3];
    let mut tbuf = ParseBuffer::new(&raw);

    tbuf.skip_bytes(2).unwrap();
    assert_eq!(tbuf.get_u8().unwrap(), 3);
    assert!(tbuf.skip_bytes(1).is_err());
}
