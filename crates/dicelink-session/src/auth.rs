//! HMAC-SHA256 message authentication.
//!
//! Every participant in an authenticated session shares one secret. A
//! sender signs the JSON form of an envelope (with the signature field
//! absent); a receiver recomputes the MAC and compares in constant time.
//!
//! How the secret reaches the joiners is not this module's concern: the
//! host mints one with [`MessageAuthenticator::generate_secret`] and hands
//! it out through whatever side channel the application prefers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dicelink_protocol::NetworkMessage;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Serialize;
use sha2::Sha256;

use crate::SessionError;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a generated secret.
pub const SECRET_LEN: usize = 32;

/// Signs and verifies messages with a shared secret.
///
/// `Send + Sync + 'static` because a single authenticator is shared by
/// the sync service and every task that sends on its behalf.
pub trait MessageAuthenticator: Send + Sync + 'static {
    /// Returns the base64 MAC of `message` under `secret`.
    ///
    /// # Errors
    /// [`SessionError::EmptySecret`] for an empty secret,
    /// [`SessionError::Serialize`] if `message` cannot be encoded.
    fn sign<T: Serialize + ?Sized>(
        &self,
        message: &T,
        secret: &str,
    ) -> Result<String, SessionError>;

    /// Checks `signature` against `message` under `secret`.
    ///
    /// Never fails: bad base64, an empty secret or a mismatch all yield
    /// `false`.
    fn verify<T: Serialize + ?Sized>(
        &self,
        message: &T,
        signature: &str,
        secret: &str,
    ) -> bool;

    /// Mints a fresh session secret.
    fn generate_secret(&self) -> String;

    /// Signs the unsigned form of `message` and stores the result in its
    /// `signature` field.
    fn sign_message(
        &self,
        message: &mut NetworkMessage,
        secret: &str,
    ) -> Result<(), SessionError> {
        let signature = self.sign(&message.unsigned(), secret)?;
        message.signature = Some(signature);
        Ok(())
    }

    /// Verifies the signature a message carries. Unsigned messages fail.
    fn verify_message(&self, message: &NetworkMessage, secret: &str) -> bool {
        match message.signature.as_deref() {
            Some(signature) => {
                self.verify(&message.unsigned(), signature, secret)
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// HmacAuthenticator
// ---------------------------------------------------------------------------

/// [`MessageAuthenticator`] backed by HMAC-SHA256 and standard base64.
///
/// The key is the UTF-8 bytes of the secret string, not its base64
/// decoding, so any non-empty string works as a secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacAuthenticator;

impl HmacAuthenticator {
    fn mac<T: Serialize + ?Sized>(
        message: &T,
        secret: &str,
    ) -> Result<HmacSha256, SessionError> {
        if secret.is_empty() {
            return Err(SessionError::EmptySecret);
        }
        let payload = serde_json::to_vec(message)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SessionError::InvalidKey)?;
        mac.update(&payload);
        Ok(mac)
    }
}

impl MessageAuthenticator for HmacAuthenticator {
    fn sign<T: Serialize + ?Sized>(
        &self,
        message: &T,
        secret: &str,
    ) -> Result<String, SessionError> {
        let digest = Self::mac(message, secret)?.finalize().into_bytes();
        Ok(STANDARD.encode(digest))
    }

    fn verify<T: Serialize + ?Sized>(
        &self,
        message: &T,
        signature: &str,
        secret: &str,
    ) -> bool {
        let Ok(expected) = STANDARD.decode(signature) else {
            return false;
        };
        match Self::mac(message, secret) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }

    fn generate_secret(&self) -> String {
        let mut bytes = [0u8; SECRET_LEN];
        rand::rng().fill(&mut bytes);
        STANDARD.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicelink_protocol::{
        DiceRoll, MessageBody, NetworkMessage, PeerId, ScoreSelection,
    };

    const SECRET: &str = "julspelet-secret";

    fn roll() -> NetworkMessage {
        NetworkMessage::new(
            PeerId::new("p1"),
            1,
            MessageBody::DiceRoll(DiceRoll {
                player_id: PeerId::new("p1"),
                dice_values: vec![6, 6, 6, 2, 1],
                held_dice: vec![false; 5],
                roll_number: 1,
            }),
        )
    }

    #[test]
    fn test_sign_then_verify_succeeds() {
        let auth = HmacAuthenticator;
        let msg = roll();
        let sig = auth.sign(&msg, SECRET).unwrap();
        assert!(auth.verify(&msg, &sig, SECRET));
    }

    #[test]
    fn test_sign_is_deterministic_base64_of_32_bytes() {
        let auth = HmacAuthenticator;
        let msg = roll();
        let a = auth.sign(&msg, SECRET).unwrap();
        let b = auth.sign(&msg, SECRET).unwrap();
        assert_eq!(a, b);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_verify_fails_after_any_field_changes() {
        let auth = HmacAuthenticator;
        let msg = roll();
        let sig = auth.sign(&msg, SECRET).unwrap();

        let mut tampered = msg.clone();
        tampered.sequence += 1;
        assert!(!auth.verify(&tampered, &sig, SECRET));

        let mut tampered = msg.clone();
        tampered.sender_id = PeerId::new("p2");
        assert!(!auth.verify(&tampered, &sig, SECRET));

        let mut tampered = msg.clone();
        if let MessageBody::DiceRoll(r) = &mut tampered.body {
            r.dice_values[4] = 6;
        }
        assert!(!auth.verify(&tampered, &sig, SECRET));

        let mut tampered = msg;
        tampered.timestamp += chrono::Duration::milliseconds(1);
        assert!(!auth.verify(&tampered, &sig, SECRET));
    }

    #[test]
    fn test_verify_fails_with_other_secret() {
        let auth = HmacAuthenticator;
        let msg = roll();
        let sig = auth.sign(&msg, SECRET).unwrap();
        assert!(!auth.verify(&msg, &sig, "another-secret"));
    }

    #[test]
    fn test_verify_garbage_signature_returns_false() {
        let auth = HmacAuthenticator;
        let msg = roll();
        assert!(!auth.verify(&msg, "not base64 !!", SECRET));
        assert!(!auth.verify(&msg, "", SECRET));
        assert!(!auth.verify(&msg, "AAAA", SECRET));
    }

    #[test]
    fn test_sign_empty_secret_fails() {
        let auth = HmacAuthenticator;
        let err = auth.sign(&roll(), "").unwrap_err();
        assert!(matches!(err, SessionError::EmptySecret));
    }

    #[test]
    fn test_verify_empty_secret_returns_false() {
        let auth = HmacAuthenticator;
        let msg = roll();
        let sig = auth.sign(&msg, SECRET).unwrap();
        assert!(!auth.verify(&msg, &sig, ""));
    }

    #[test]
    fn test_generate_secret_is_32_random_bytes() {
        let auth = HmacAuthenticator;
        let a = auth.generate_secret();
        let b = auth.generate_secret();
        assert_eq!(STANDARD.decode(&a).unwrap().len(), SECRET_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sign_message_survives_wire_round_trip() {
        let auth = HmacAuthenticator;
        let mut msg = NetworkMessage::new(
            PeerId::new("p1"),
            9,
            MessageBody::ScoreSelection(ScoreSelection {
                player_id: PeerId::new("p1"),
                category: "Chance".into(),
                score: 21,
            }),
        );
        auth.sign_message(&mut msg, SECRET).unwrap();

        let bytes = serde_json::to_vec(&msg).unwrap();
        let received: NetworkMessage = serde_json::from_slice(&bytes).unwrap();
        assert!(auth.verify_message(&received, SECRET));
    }

    #[test]
    fn test_verify_message_unsigned_returns_false() {
        let auth = HmacAuthenticator;
        assert!(!auth.verify_message(&roll(), SECRET));
    }
}
