//! Join-address validation.

use std::net::Ipv4Addr;

use crate::NetworkError;

/// Returns `true` for a dotted-quad IPv4 string: exactly four parts, each
/// one to three ASCII digits with a value of at most 255.
///
/// Leading zeros are accepted (`"010.0.0.1"`). Whitespace, signs, empty
/// parts, and host names are not.
pub fn is_valid_address(address: &str) -> bool {
    parse_address(address).is_ok()
}

/// Parses a join address, see [`is_valid_address`] for the accepted form.
pub fn parse_address(address: &str) -> Result<Ipv4Addr, NetworkError> {
    let invalid = || NetworkError::InvalidAddress(address.to_owned());

    let mut octets = [0u8; 4];
    let mut parts = address.split('.');
    for octet in &mut octets {
        let part = parts.next().ok_or_else(invalid)?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *octet = part.parse::<u8>().map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(Ipv4Addr::from(octets))
}
