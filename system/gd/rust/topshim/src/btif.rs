// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared Bluetooth interface types.

use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

/// Status returned by native stack requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum BtStatus {
    Success = 0,
    Fail,
    NotReady,
    NoMemory,
    Busy,
    Done,
    Unsupported,
    InvalidParam,
    Unhandled,
    AuthFailure,
    RemoteDeviceDown,
    AuthRejected,
    JniEnvironmentError,
    JniThreadAttachError,
    WakeLockError,

    // Any statuses that couldn't be cleanly converted
    Unknown = 0xff,
}

/// Bonding state of a remote device as reported by the adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum BtBondState {
    NotBonded = 0,
    Bonding,
    Bonded,
}

/// Bluetooth device address, most significant octet first.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawAddress {
    pub address: [u8; 6],
}

impl RawAddress {
    pub const fn new(address: [u8; 6]) -> Self {
        Self { address }
    }

    /// Parses a `XX:XX:XX:XX:XX:XX` string. Returns `None` on any malformed input.
    pub fn from_string<S: Into<String>>(addr: S) -> Option<RawAddress> {
        let addr: String = addr.into();
        let s = addr.split(':').collect::<Vec<&str>>();

        if s.len() != 6 {
            return None;
        }

        let mut raw: [u8; 6] = [0; 6];
        for i in 0..s.len() {
            if s[i].len() != 2 {
                return None;
            }
            raw[i] = match u8::from_str_radix(s[i], 16) {
                Ok(res) => res,
                Err(_) => {
                    return None;
                }
            };
        }

        Some(RawAddress { address: raw })
    }

    pub fn to_byte_arr(&self) -> [u8; 6] {
        self.address
    }
}

impl Display for RawAddress {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.address[0],
            self.address[1],
            self.address[2],
            self.address[3],
            self.address[4],
            self.address[5]
        )
    }
}

impl Debug for RawAddress {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        Display::fmt(self, f)
    }
}

/// 128-bit service UUID.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Uuid {
    pub uu: [u8; 16],
}

impl Uuid {
    const BASE_UUID: [u8; 16] = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34,
        0xFB,
    ];

    /// Expands a 16-bit SIG assigned number on top of the Bluetooth base UUID.
    pub const fn from_16bit(short: u16) -> Self {
        let mut uu = Self::BASE_UUID;
        uu[2] = (short >> 8) as u8;
        uu[3] = (short & 0xff) as u8;
        Self { uu }
    }
}

impl Display for Uuid {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let u = &self.uu;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-\
             {:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12], u[13],
            u[14], u[15]
        )
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn address_from_string() {
        let addr = RawAddress::from_string("00:11:22:AA:bb:FF").unwrap();
        assert_eq!(addr.to_byte_arr(), [0x00, 0x11, 0x22, 0xaa, 0xbb, 0xff]);
        assert_eq!(addr.to_string(), "00:11:22:AA:BB:FF");

        assert!(RawAddress::from_string("00:11:22:AA:BB").is_none());
        assert!(RawAddress::from_string("00:11:22:AA:BB:FFF").is_none());
        assert!(RawAddress::from_string("00:11:22:AA:BB:GG").is_none());
        assert!(RawAddress::from_string("").is_none());
    }

    #[test]
    fn uuid_from_16bit() {
        assert_eq!(Uuid::from_16bit(0x184e).to_string(), "0000184e-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn bond_state_from_raw() {
        assert_eq!(BtBondState::from_u32(2), Some(BtBondState::Bonded));
        assert_eq!(BtBondState::from_u32(42), None);
    }
}
