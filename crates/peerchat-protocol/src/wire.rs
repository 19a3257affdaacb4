//! Payloads of the five stream protocols, with signing and
//! verification for the friendship envelopes.
//!
//! A friendship request or response travels as
//! `{"data": {...}, "signature": "<base64>"}`. The signature covers
//! the canonical JSON bytes of `data` (see [`crate::canonical`]); the
//! outer wrapper may be serialized non-canonically. Verification
//! re-canonicalises the received `data` and checks the signature
//! against the Ed25519 key embedded in the sender's peer ID.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use libp2p_identity::{Keypair, PeerId, PublicKey};
use multihash::Multihash;
use peerchat_types::{PeerchatError, Result};
use serde::{Deserialize, Serialize};

use crate::canonical::to_canonical_json;

// ---------------------------------------------------------------------------
// Base64 (de)serialization for binary fields
// ---------------------------------------------------------------------------

mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Friendship request
// ---------------------------------------------------------------------------

/// Signed portion of a friendship request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendRequestData {
    pub sender_peer_id: String,
    /// RFC 3339; reads tolerate the legacy Go text form.
    pub timestamp: String,
}

/// The full friendship-request document as transmitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendRequest {
    pub data: FriendRequestData,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Friendship response
// ---------------------------------------------------------------------------

/// Signed portion of a friendship response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendResponseData {
    pub responder_peer_id: String,
    pub is_approved: bool,
    pub timestamp: String,
}

/// The full friendship-response document as transmitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendResponse {
    pub data: FriendResponseData,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Group invitation
// ---------------------------------------------------------------------------

/// Group-creation invitation sent to each member over
/// `/group-chat/1.0.0`. Trusted on the strength of the transport's
/// peer authentication; no additional signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupInvite {
    pub member_peers: Vec<String>,
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    pub name: String,
    pub id: String,
}

// ---------------------------------------------------------------------------
// Group pub/sub envelope
// ---------------------------------------------------------------------------

/// Plaintext envelope published (encrypted under the group key) on a
/// group topic. `id` is a fresh UUID per message for duplicate
/// suppression; `sender_peer_id` must match the pub/sub publisher
/// identity or the receiver discards the message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupEnvelope {
    pub id: String,
    pub sender_peer_id: String,
    pub message: String,
    pub time: String,
}

// ---------------------------------------------------------------------------
// Signing and verification
// ---------------------------------------------------------------------------

/// Signs a payload's canonical JSON bytes with the node key.
pub fn sign_payload<T: Serialize>(keypair: &Keypair, payload: &T) -> Result<Vec<u8>> {
    let bytes = to_canonical_json(payload)?;
    keypair
        .sign(&bytes)
        .map_err(|e| PeerchatError::AuthenticationFailure {
            reason: format!("signing failed: {e}"),
        })
}

/// Verifies a signature over a payload's canonical JSON bytes against
/// the public key embedded in `peer_id`.
///
/// # Errors
///
/// Returns [`PeerchatError::AuthenticationFailure`] if the key cannot
/// be recovered from the peer ID or the signature does not verify.
/// Callers on the receive path drop the stream silently on this
/// error; the failure is never reported to the remote peer.
pub fn verify_payload<T: Serialize>(
    peer_id: &PeerId,
    payload: &T,
    signature: &[u8],
) -> Result<()> {
    let public_key = public_key_from_peer_id(peer_id)?;
    let bytes = to_canonical_json(payload)?;

    if public_key.verify(&bytes, signature) {
        Ok(())
    } else {
        Err(PeerchatError::AuthenticationFailure {
            reason: format!("signature verification failed for {peer_id}"),
        })
    }
}

/// Recovers the public key embedded in an Ed25519 peer ID.
///
/// Ed25519 peer IDs use the identity multihash, so the digest is the
/// protobuf-encoded public key itself. This is the stream-based
/// analog of resolving a key from the overlay's peer store.
pub fn public_key_from_peer_id(peer_id: &PeerId) -> Result<PublicKey> {
    let multihash: Multihash<64> = Multihash::from(*peer_id);
    if multihash.code() != 0 {
        return Err(PeerchatError::AuthenticationFailure {
            reason: format!("peer id {peer_id} does not embed its public key"),
        });
    }
    PublicKey::try_decode_protobuf(multihash.digest()).map_err(|e| {
        PeerchatError::AuthenticationFailure {
            reason: format!("failed to decode public key from {peer_id}: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> (Keypair, PeerId) {
        let keypair = Keypair::generate_ed25519();
        let peer_id = PeerId::from(keypair.public());
        (keypair, peer_id)
    }

    #[test]
    fn sign_then_verify() {
        let (keypair, peer_id) = test_identity();
        let data = FriendRequestData {
            sender_peer_id: peer_id.to_string(),
            timestamp: "2024-05-01T12:00:00Z".into(),
        };
        let signature = sign_payload(&keypair, &data).unwrap();
        verify_payload(&peer_id, &data, &signature).unwrap();
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (keypair, peer_id) = test_identity();
        let data = FriendRequestData {
            sender_peer_id: peer_id.to_string(),
            timestamp: "2024-05-01T12:00:00Z".into(),
        };
        let signature = sign_payload(&keypair, &data).unwrap();

        let mut tampered = data.clone();
        tampered.timestamp = "2024-05-01T12:00:01Z".into();
        assert!(verify_payload(&peer_id, &tampered, &signature).is_err());
    }

    #[test]
    fn flipped_signature_byte_fails_verification() {
        let (keypair, peer_id) = test_identity();
        let data = FriendResponseData {
            responder_peer_id: peer_id.to_string(),
            is_approved: true,
            timestamp: "2024-05-01T12:00:00Z".into(),
        };
        let mut signature = sign_payload(&keypair, &data).unwrap();
        signature[0] ^= 0x01;
        assert!(verify_payload(&peer_id, &data, &signature).is_err());
    }

    #[test]
    fn signature_from_another_identity_fails() {
        let (other_keypair, _) = test_identity();
        let (_, peer_id) = test_identity();
        let data = FriendRequestData {
            sender_peer_id: peer_id.to_string(),
            timestamp: "2024-05-01T12:00:00Z".into(),
        };
        let signature = sign_payload(&other_keypair, &data).unwrap();
        assert!(verify_payload(&peer_id, &data, &signature).is_err());
    }

    #[test]
    fn friend_request_wire_document_round_trips() {
        let (keypair, peer_id) = test_identity();
        let data = FriendRequestData {
            sender_peer_id: peer_id.to_string(),
            timestamp: "2024-05-01T12:00:00Z".into(),
        };
        let request = FriendRequest {
            signature: sign_payload(&keypair, &data).unwrap(),
            data,
        };

        let json = serde_json::to_vec(&request).unwrap();
        let decoded: FriendRequest = serde_json::from_slice(&json).unwrap();
        // The re-canonicalised inner data must still verify.
        verify_payload(&peer_id, &decoded.data, &decoded.signature).unwrap();
    }

    #[test]
    fn group_invite_key_travels_as_base64() {
        let invite = GroupInvite {
            member_peers: vec!["peer-a".into(), "peer-b".into()],
            key: vec![0xAB; 32],
            name: "team".into(),
            id: "0b9e2a43-0000-4000-8000-000000000000".into(),
        };
        let json = serde_json::to_string(&invite).unwrap();
        assert!(json.contains(&BASE64.encode(vec![0xAB; 32])));
        let decoded: GroupInvite = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.key, invite.key);
    }
}
