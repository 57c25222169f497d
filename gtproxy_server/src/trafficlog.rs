//! Traffic logging.
//!
//! Decoded frames are logged through the normal `tracing` pipeline, gated
//! per category by the `log.print*` configuration switches.

use gtproxy_shared::config::LogConfig;
use gtproxy_shared::hooks::Direction;
use gtproxy_shared::packet::{ParsedPacket, Payload};
use tracing::{info, trace};

/// Logs one decoded frame according to the configured gates.
pub fn log_frame(cfg: &LogConfig, direction: Direction, parsed: &ParsedPacket) {
    let dir = match direction {
        Direction::ServerBound => "client -> server",
        Direction::ClientBound => "server -> client",
    };

    match &parsed.payload {
        Payload::Text { kind, text, .. } => {
            if cfg.print_message {
                info!(%dir, id = ?parsed.id, kind = ?kind, text = %text.escape_debug(), "text frame");
            }
        }
        Payload::Tank { packet, variant } => {
            if cfg.print_game_update_packet {
                info!(
                    %dir,
                    id = ?parsed.id,
                    packet_type = packet.packet_type(),
                    net_id = packet.net_id(),
                    target_net_id = packet.target_net_id(),
                    flags = packet.flags(),
                    extra_len = packet.extra().len(),
                    "tank frame"
                );
            }
            if cfg.print_variant && !variant.is_empty() {
                for entry in variant.entries() {
                    info!(%dir, index = entry.index(), value = ?entry.value(), "variant");
                }
            }
            if cfg.print_extra && !packet.extra().is_empty() {
                info!(%dir, extra = %hex_dump(packet.extra()), "extra");
            }
        }
        Payload::Raw => {
            trace!(%dir, "raw frame passed through");
        }
    }
}

/// Renders bytes as space-separated hex, 16 per line.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / 16 + 1);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_wraps_lines() {
        assert_eq!(hex_dump(&[]), "");
        assert_eq!(hex_dump(&[0x00, 0xff]), "00 ff");
        let long = hex_dump(&[0xaa; 17]);
        assert_eq!(long.lines().count(), 2);
        assert!(long.starts_with("aa aa"));
    }
}
