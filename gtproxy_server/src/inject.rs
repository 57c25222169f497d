//! Synthetic packet injection.
//!
//! Builds text and variant frames and pushes them to either session. Every
//! sender is a no-op returning `false` when the target peer is absent;
//! transport errors are logged, never raised.

use gtproxy_shared::packet::{text_frame, MessageType, TankPacket, TANK_CALL_FUNCTION};
use gtproxy_shared::text::TextParse;
use gtproxy_shared::transport::{PeerId, SessionHost};
use gtproxy_shared::variant::{VariantArg, VariantList};
use tracing::{debug, warn};

/// Header fields for an injected `CALL_FUNCTION` tank frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantOptions {
    pub net_id: i32,
    pub target_net_id: i32,
    pub delay: i32,
    pub channel_id: u8,
}

impl Default for VariantOptions {
    fn default() -> Self {
        Self {
            net_id: -1,
            target_net_id: 0,
            delay: 0,
            channel_id: 0,
        }
    }
}

/// Client-visible console line (`action|log`).
pub fn send_log(host: &SessionHost, peer: Option<PeerId>, message: &str) -> bool {
    let Some(peer) = peer else {
        debug!("log injection skipped, no client session");
        return false;
    };
    let mut records = TextParse::new();
    records.set("action", vec!["log"]);
    records.set("msg", vec![message]);
    let frame = text_frame(MessageType::GameMessage, &records.to_string());
    deliver(host, peer, 0, frame, "log")
}

/// Asks the server to exit the current world.
pub fn send_quit_to_exit(host: &SessionHost, peer: Option<PeerId>) -> bool {
    let Some(peer) = peer else {
        debug!("quit_to_exit injection skipped, no upstream session");
        return false;
    };
    let mut records = TextParse::new();
    records.set("action", vec!["quit_to_exit"]);
    let frame = text_frame(MessageType::GameMessage, &records.to_string());
    deliver(host, peer, 0, frame, "quit_to_exit")
}

/// Asks the server to join a world.
pub fn send_join_request(
    host: &SessionHost,
    peer: Option<PeerId>,
    world: &str,
    invited_world: bool,
) -> bool {
    let Some(peer) = peer else {
        debug!("join_request injection skipped, no upstream session");
        return false;
    };
    let mut records = TextParse::new();
    records.set("action", vec!["join_request"]);
    records.set("name", vec![world]);
    records.set("invitedWorld", vec![if invited_world { "1" } else { "0" }]);
    let frame = text_frame(MessageType::GameMessage, &records.to_string());
    deliver(host, peer, 0, frame, "join_request")
}

/// Injects a `CALL_FUNCTION` tank frame to the client, with the function
/// name prepended to the argument list.
pub fn send_variant_to_client(
    host: &SessionHost,
    peer: Option<PeerId>,
    function: &str,
    args: &[VariantArg],
    options: VariantOptions,
) -> bool {
    let Some(peer) = peer else {
        debug!(function, "variant injection skipped, no client session");
        return false;
    };

    let mut list: Vec<VariantArg> = Vec::with_capacity(args.len() + 1);
    list.push(VariantArg::from(function));
    list.extend_from_slice(args);

    let mut tank = TankPacket::new();
    tank.set_packet_type(TANK_CALL_FUNCTION);
    tank.set_net_id(options.net_id);
    tank.set_target_net_id(options.target_net_id);
    tank.set_delay(options.delay);
    tank.set_extra(VariantList::from_args(&list).encode());

    deliver(host, peer, options.channel_id, tank.to_bytes(true), function)
}

fn deliver(host: &SessionHost, peer: PeerId, channel: u8, frame: Vec<u8>, what: &str) -> bool {
    let ok = host.send(peer, channel, frame);
    if !ok {
        warn!(what, "injection dropped, transport gone");
    }
    ok
}
