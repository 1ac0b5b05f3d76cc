//! UDP discovery datagrams.
//!
//! A peer looking for games broadcasts [`DISCOVERY_REQUEST`] to
//! [`DISCOVERY_PORT`]. Every host still accepting players answers with
//! [`DISCOVERY_RESPONSE_PREFIX`] followed by its JSON [`SessionInfo`].
//!
//! The host cannot reliably know which of its addresses the requester can
//! reach, so the requester overwrites the advertised IP with the source
//! address the datagram actually came from.

use std::net::SocketAddr;

use crate::{ProtocolError, SessionInfo};

/// Well-known UDP port hosts listen on for discovery requests.
pub const DISCOVERY_PORT: u16 = 47777;

/// Well-known TCP port hosts accept game connections on.
pub const GAME_PORT: u16 = 47778;

/// Body of a discovery request.
pub const DISCOVERY_REQUEST: &[u8] = b"DICELINK_DISCOVER";

/// Prefix of a discovery response, followed by a JSON session descriptor.
pub const DISCOVERY_RESPONSE_PREFIX: &[u8] = b"DICELINK_SESSION:";

/// Largest datagram we bother reading.
pub const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

/// Returns `true` if `datagram` is exactly a discovery request.
pub fn is_discovery_request(datagram: &[u8]) -> bool {
    datagram == DISCOVERY_REQUEST
}

/// Builds the response a host sends back to a requester.
pub fn encode_discovery_response(
    session: &SessionInfo,
) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(session).map_err(ProtocolError::Encode)?;
    let mut datagram =
        Vec::with_capacity(DISCOVERY_RESPONSE_PREFIX.len() + json.len());
    datagram.extend_from_slice(DISCOVERY_RESPONSE_PREFIX);
    datagram.extend_from_slice(&json);
    Ok(datagram)
}

/// Parses a response and points its address at the observed `source` IP.
///
/// The advertised port is kept; if the host advertised no usable address
/// the well-known [`GAME_PORT`] is assumed.
pub fn decode_discovery_response(
    datagram: &[u8],
    source: SocketAddr,
) -> Result<SessionInfo, ProtocolError> {
    let json = datagram
        .strip_prefix(DISCOVERY_RESPONSE_PREFIX)
        .ok_or_else(|| {
            ProtocolError::InvalidMessage(
                "missing discovery response prefix".into(),
            )
        })?;
    let mut session: SessionInfo =
        serde_json::from_slice(json).map_err(ProtocolError::Decode)?;

    let port = advertised_port(&session.address).unwrap_or(GAME_PORT);
    session.address = SocketAddr::new(source.ip(), port).to_string();
    Ok(session)
}

fn advertised_port(address: &str) -> Option<u16> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Some(addr.port());
    }
    let (_, port) = address.rsplit_once(':')?;
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PeerId, TransportKind};

    fn session(address: &str) -> SessionInfo {
        let mut info = SessionInfo::hosted(
            PeerId::new("host"),
            "Host",
            "Julbord",
            6,
            Some("tomte".into()),
            TransportKind::Lan,
        );
        info.address = address.into();
        info
    }

    #[test]
    fn test_is_discovery_request_exact_match_only() {
        assert!(is_discovery_request(DISCOVERY_REQUEST));
        assert!(!is_discovery_request(b"DICELINK_DISCOVER\n"));
        assert!(!is_discovery_request(b"hello"));
    }

    #[test]
    fn test_decode_discovery_response_uses_source_ip_and_advertised_port() {
        let datagram =
            encode_discovery_response(&session("0.0.0.0:5123")).unwrap();
        let source: SocketAddr = "192.168.1.40:47777".parse().unwrap();

        let info = decode_discovery_response(&datagram, source).unwrap();
        assert_eq!(info.address, "192.168.1.40:5123");
        assert_eq!(info.name, "Julbord");
    }

    #[test]
    fn test_decode_discovery_response_defaults_to_game_port() {
        let datagram = encode_discovery_response(&session("")).unwrap();
        let source: SocketAddr = "10.0.0.9:40000".parse().unwrap();

        let info = decode_discovery_response(&datagram, source).unwrap();
        assert_eq!(info.address, format!("10.0.0.9:{GAME_PORT}"));
    }

    #[test]
    fn test_decode_discovery_response_never_carries_password() {
        let datagram =
            encode_discovery_response(&session("0.0.0.0:1")).unwrap();
        let text = String::from_utf8_lossy(&datagram);
        assert!(!text.contains("tomte"));

        let source: SocketAddr = "10.0.0.9:1".parse().unwrap();
        let info = decode_discovery_response(&datagram, source).unwrap();
        assert!(info.requires_password);
        assert_eq!(info.password, None);
    }

    #[test]
    fn test_decode_discovery_response_rejects_missing_prefix() {
        let source: SocketAddr = "10.0.0.9:1".parse().unwrap();
        let err = decode_discovery_response(b"{}", source).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_decode_discovery_response_rejects_bad_json() {
        let mut datagram = DISCOVERY_RESPONSE_PREFIX.to_vec();
        datagram.extend_from_slice(b"{oops");
        let source: SocketAddr = "10.0.0.9:1".parse().unwrap();
        let err = decode_discovery_response(&datagram, source).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
