//! The join handshake on a freshly opened game connection.
//!
//! The first frame a joiner sends is a [`JoinRequest`]; the host answers
//! with a [`JoinResponse`] before any game envelope flows. Keeping the
//! password in the handshake means it never appears inside a
//! [`NetworkMessage`](crate::NetworkMessage) that gets relayed to others.

use serde::{Deserialize, Serialize};

use crate::{PeerId, PeerInfo, SessionInfo};

/// Joiner → host: "let me in".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// The joiner's own peer id; the host registers the link under it.
    pub peer_id: PeerId,
    pub player_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Host → joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JoinResponse {
    /// Joined. `host` describes the host end of the link.
    Accepted { session: SessionInfo, host: PeerInfo },
    /// Refused; the host closes the connection after sending this.
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_response_rejected_json_shape() {
        let resp = JoinResponse::Rejected {
            reason: "session is full".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["reason"], "session is full");
    }

    #[test]
    fn test_join_request_omits_missing_password() {
        let req = JoinRequest {
            peer_id: PeerId::new("p"),
            player_name: "Elsa".into(),
            password: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("password"));
    }
}
