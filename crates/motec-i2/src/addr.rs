//! Absolute file offsets.

use crate::error::{I2Error, I2Result};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;

/// Absolute offset into an `.ld` file.
///
/// Pointer fields use `0` for "absent", so [`FileAddr::is_zero`] doubles as a
/// null check when following pointers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileAddr(u32);

impl FileAddr {
    pub const fn zero() -> Self {
        FileAddr(0)
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Seek target for this address.
    pub fn seek(&self) -> SeekFrom {
        SeekFrom::Start(self.0 as u64)
    }

    /// Address `by` bytes past this one.
    pub fn offset(&self, by: u32) -> I2Result<FileAddr> {
        self.0
            .checked_add(by)
            .map(FileAddr)
            .ok_or(I2Error::AddressOverflow {
                base: *self,
                by,
                width: 32,
            })
    }

    /// Narrow to a 16-bit pointer (venue and vehicle links are stored as u16).
    pub fn as_u16(&self) -> I2Result<u16> {
        u16::try_from(self.0).map_err(|_| I2Error::AddressOverflow {
            base: *self,
            by: 0,
            width: 16,
        })
    }
}

impl From<u32> for FileAddr {
    fn from(addr: u32) -> Self {
        FileAddr(addr)
    }
}

impl From<u16> for FileAddr {
    fn from(addr: u16) -> Self {
        FileAddr(addr as u32)
    }
}

impl From<FileAddr> for u32 {
    fn from(addr: FileAddr) -> Self {
        addr.0
    }
}

impl std::fmt::Display for FileAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_absent() {
        assert!(FileAddr::zero().is_zero());
        assert!(!FileAddr::from(0x6E2u32).is_zero());
    }

    #[test]
    fn test_offset_overflow() {
        let addr = FileAddr::from(u32::MAX - 1);
        assert_eq!(addr.offset(1).unwrap().as_u32(), u32::MAX);
        assert!(matches!(
            addr.offset(2),
            Err(I2Error::AddressOverflow { width: 32, .. })
        ));
    }

    #[test]
    fn test_as_u16() {
        assert_eq!(FileAddr::from(0x1336u32).as_u16().unwrap(), 0x1336);
        assert!(FileAddr::from(0x1_0000u32).as_u16().is_err());
    }

    #[test]
    fn test_display_hex() {
        assert_eq!(FileAddr::from(0x3448u32).to_string(), "0x3448");
    }
}
