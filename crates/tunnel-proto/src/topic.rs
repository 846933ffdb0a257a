//! Tunnel topic naming

/// Prefix of every tunnel topic on the outer session.
pub const TUNNEL_TOPIC_PREFIX: &str = "$Tunnel/";

/// Topic carrying the tunnel to `peer_identity`.
///
/// The identity is appended verbatim; nothing is escaped or inserted.
pub fn tunnel_topic(peer_identity: &str) -> String {
    let mut topic = String::with_capacity(TUNNEL_TOPIC_PREFIX.len() + peer_identity.len());
    topic.push_str(TUNNEL_TOPIC_PREFIX);
    topic.push_str(peer_identity);
    topic
}
