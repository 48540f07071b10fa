//! SDP/ICE relay for the optional WebRTC playback path.
//!
//! Peer negotiation mechanics live in an external media subsystem; this
//! module only records what the client relays so that subsystem can pick
//! it up. The authoritative audio path for transcription is the WebSocket
//! `audio_chunk` stream either way.

/// Relayed negotiation state for one session's peer connection.
#[derive(Debug, Default)]
pub struct PeerLink {
    offer: Option<String>,
    candidates: Vec<serde_json::Value>,
}

impl PeerLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a relayed SDP offer.
    ///
    /// Returns the answer SDP when the media subsystem has produced one;
    /// with no subsystem attached there is none, and the client falls back
    /// to WebSocket audio playback.
    pub fn accept_offer(&mut self, sdp: &str) -> Option<String> {
        tracing::info!(sdp_len = sdp.len(), "webrtc offer relayed");
        self.offer = Some(sdp.to_string());
        None
    }

    /// Records a relayed ICE candidate.
    pub fn add_candidate(&mut self, candidate: serde_json::Value) {
        tracing::debug!(count = self.candidates.len() + 1, "ice candidate relayed");
        self.candidates.push(candidate);
    }

    /// Whether the client has attempted WebRTC negotiation.
    pub fn negotiating(&self) -> bool {
        self.offer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_records_offer_and_candidates() {
        let mut link = PeerLink::new();
        assert!(!link.negotiating());
        assert_eq!(link.accept_offer("v=0..."), None);
        assert!(link.negotiating());
        link.add_candidate(serde_json::json!({"candidate": "candidate:0 1 UDP"}));
        assert_eq!(link.candidates.len(), 1);
    }
}
