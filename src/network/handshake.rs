//! Rendezvous handshake grammar
//!
//! A receiver announces where it wants audio by sending one ASCII datagram,
//! `CONNECT:<port>`, to the advertised port. The port in the body is the
//! receiver's data port; the datagram's own source port is ignored.

use thiserror::Error;

/// Literal prefix of a handshake datagram
pub const CONNECT_PREFIX: &[u8] = b"CONNECT:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing CONNECT: prefix")]
    MissingPrefix,
    #[error("port is not a decimal number")]
    NotDecimal,
    #[error("port out of range")]
    OutOfRange,
}

/// Parse a handshake datagram into the declared data port.
///
/// Exactly `"CONNECT:" DIGIT+` with a value in 0..=65535 is accepted; no
/// whitespace, sign or trailing bytes.
pub fn parse_connect(datagram: &[u8]) -> Result<u16, HandshakeError> {
    let digits = datagram
        .strip_prefix(CONNECT_PREFIX)
        .ok_or(HandshakeError::MissingPrefix)?;

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(HandshakeError::NotDecimal);
    }

    let mut value: u32 = 0;
    for &digit in digits {
        value = value * 10 + u32::from(digit - b'0');
        if value > u32::from(u16::MAX) {
            return Err(HandshakeError::OutOfRange);
        }
    }
    Ok(value as u16)
}

/// Build a handshake datagram, as a receiver would send it.
pub fn encode_connect(port: u16) -> Vec<u8> {
    format!("CONNECT:{}", port).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_the_exact_grammar() {
        assert_eq!(parse_connect(b"CONNECT:5000"), Ok(5000));
        assert_eq!(parse_connect(b"CONNECT:0"), Ok(0));
        assert_eq!(parse_connect(b"CONNECT:65535"), Ok(65535));
        assert_eq!(parse_connect(b"CONNECT:00080"), Ok(80));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(parse_connect(b"CONNECT:"), Err(HandshakeError::NotDecimal));
        assert_eq!(parse_connect(b"CONNECT:65536"), Err(HandshakeError::OutOfRange));
        assert_eq!(
            parse_connect(b"CONNECT:99999999999999999999"),
            Err(HandshakeError::OutOfRange)
        );
        assert_eq!(parse_connect(b"CONNECT:+5"), Err(HandshakeError::NotDecimal));
        assert_eq!(parse_connect(b"CONNECT:5000\n"), Err(HandshakeError::NotDecimal));
        assert_eq!(parse_connect(b"CONNECT: 5000"), Err(HandshakeError::NotDecimal));
        assert_eq!(parse_connect(b"connect:5000"), Err(HandshakeError::MissingPrefix));
        assert_eq!(parse_connect(b""), Err(HandshakeError::MissingPrefix));
        assert_eq!(parse_connect(&[0xff, 0x00]), Err(HandshakeError::MissingPrefix));
    }

    proptest! {
        #[test]
        fn every_declared_port_parses(port in any::<u16>()) {
            prop_assert_eq!(parse_connect(&encode_connect(port)), Ok(port));
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = parse_connect(&bytes);
        }

        #[test]
        fn non_prefixed_input_is_rejected(body in "[A-Za-z ]{0,8}[0-9]{1,5}") {
            prop_assume!(!body.starts_with("CONNECT:"));
            prop_assert!(parse_connect(body.as_bytes()).is_err());
        }
    }
}
