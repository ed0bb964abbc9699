//! ESB message types and listener filters.
//!
//! An ESB message is the radio-level unit the bridge forwards: a 5-byte
//! pipeline address, a command byte, and a payload. Subscribers receive
//! messages through filters that match on source address and command,
//! each with a wildcard form.

use std::fmt;

use crate::error::Error;

/// Size of an ESB pipeline address. The bridge firmware only supports
/// 5-byte addresses.
pub const ADDRESS_SIZE: usize = 5;

/// Command filter value meaning "match any command byte".
pub const CMD_WILDCARD: u8 = 0xFF;

/// A 5-byte ESB pipeline address.
///
/// The all-zero address doubles as the listener wildcard: it is not a valid
/// peer address on the radio side, so filters use it to mean "any source".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EsbAddress([u8; ADDRESS_SIZE]);

impl EsbAddress {
    /// The all-zero wildcard address.
    pub const WILDCARD: EsbAddress = EsbAddress([0; ADDRESS_SIZE]);

    /// Create an address from its raw bytes.
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        EsbAddress(bytes)
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Returns `true` if this is the all-zero wildcard address.
    pub fn is_wildcard(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }
}

impl From<[u8; ADDRESS_SIZE]> for EsbAddress {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        EsbAddress(bytes)
    }
}

impl TryFrom<&[u8]> for EsbAddress {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| Error::InvalidSize)?;
        Ok(EsbAddress(arr))
    }
}

impl fmt::Display for EsbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4]
        )
    }
}

/// A message sent between ESB devices, as surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsbMessage {
    /// Pipeline address of the sending peer.
    pub source: EsbAddress,
    /// ESB command byte (the first payload byte on the air).
    pub cmd: u8,
    /// Application payload (may be empty).
    pub payload: Vec<u8>,
}

/// A subscription filter: which messages a listener wants to see.
///
/// Both fields have a wildcard form: [`EsbAddress::WILDCARD`] matches any
/// source, [`CMD_WILDCARD`] matches any command byte. The two conditions
/// are ANDed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenFilter {
    /// Source address to match, or the all-zero wildcard.
    pub address: EsbAddress,
    /// Command byte to match, or [`CMD_WILDCARD`].
    pub cmd: u8,
}

impl ListenFilter {
    /// Create a filter from an address and command byte.
    pub const fn new(address: EsbAddress, cmd: u8) -> Self {
        ListenFilter { address, cmd }
    }

    /// A filter that matches every message.
    pub const fn any() -> Self {
        ListenFilter {
            address: EsbAddress::WILDCARD,
            cmd: CMD_WILDCARD,
        }
    }

    /// Returns `true` if `msg` passes this filter.
    pub fn matches(&self, msg: &EsbMessage) -> bool {
        (self.cmd == CMD_WILDCARD || self.cmd == msg.cmd)
            && (self.address.is_wildcard() || self.address == msg.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(source: [u8; 5], cmd: u8) -> EsbMessage {
        EsbMessage {
            source: EsbAddress::new(source),
            cmd,
            payload: vec![],
        }
    }

    #[test]
    fn address_display_hex() {
        let addr = EsbAddress::new([0x6F, 0x6F, 0x6F, 0x6F, 0x01]);
        assert_eq!(addr.to_string(), "6F:6F:6F:6F:01");
    }

    #[test]
    fn address_wildcard_is_all_zero() {
        assert!(EsbAddress::WILDCARD.is_wildcard());
        assert!(!EsbAddress::new([1, 2, 3, 4, 5]).is_wildcard());
        assert_eq!(EsbAddress::default(), EsbAddress::WILDCARD);
    }

    #[test]
    fn address_try_from_slice() {
        let addr = EsbAddress::try_from(&[1u8, 2, 3, 4, 5][..]).unwrap();
        assert_eq!(addr.as_bytes(), &[1, 2, 3, 4, 5]);

        assert!(EsbAddress::try_from(&[1u8, 2, 3][..]).is_err());
        assert!(EsbAddress::try_from(&[1u8, 2, 3, 4, 5, 6][..]).is_err());
    }

    #[test]
    fn filter_exact_command_wildcard_address() {
        let filter = ListenFilter::new(EsbAddress::WILDCARD, 0x05);
        assert!(filter.matches(&msg([1, 2, 3, 4, 5], 0x05)));
        assert!(filter.matches(&msg([9, 9, 9, 9, 9], 0x05)));
        assert!(!filter.matches(&msg([1, 2, 3, 4, 5], 0x06)));
    }

    #[test]
    fn filter_exact_address_wildcard_command() {
        let filter = ListenFilter::new(EsbAddress::new([1, 2, 3, 4, 5]), CMD_WILDCARD);
        assert!(filter.matches(&msg([1, 2, 3, 4, 5], 0x01)));
        assert!(filter.matches(&msg([1, 2, 3, 4, 5], 0xFE)));
        assert!(!filter.matches(&msg([1, 2, 3, 4, 6], 0x01)));
    }

    #[test]
    fn filter_any_matches_everything() {
        let filter = ListenFilter::any();
        assert!(filter.matches(&msg([0, 0, 0, 0, 0], 0x00)));
        assert!(filter.matches(&msg([255; 5], 0xFF)));
    }

    #[test]
    fn filter_exact_both() {
        let filter = ListenFilter::new(EsbAddress::new([1, 2, 3, 4, 5]), 0x05);
        assert!(filter.matches(&msg([1, 2, 3, 4, 5], 0x05)));
        assert!(!filter.matches(&msg([1, 2, 3, 4, 5], 0x06)));
        assert!(!filter.matches(&msg([1, 2, 3, 4, 6], 0x05)));
    }
}
