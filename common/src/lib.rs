// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Functionality shared by the crates in this workspace.

pub mod logging;

/// Render a byte slice as space-separated hex octets, prefixed with "0x".
pub fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::from("0x");
    for b in bytes {
        s.push_str(&format!(" {b:02x}"));
    }
    s
}

#[test]
fn test_hex_string() {
    assert_eq!(hex_string(&[]), "0x");
    assert_eq!(hex_string(&[0x22, 0x00, 0xfa]), "0x 22 00 fa");
}
