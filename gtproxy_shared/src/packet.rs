//! Packet classifier and frame builders.
//!
//! Every frame starts with a little-endian u32 message type. Types 1-3
//! carry newline-separated text records; type 4 carries a 60-byte "tank"
//! header plus an optional extra buffer (a variant list for
//! `CALL_FUNCTION`). Anything else is tagged raw and passed through
//! untouched. Header bytes the proxy does not understand are preserved
//! verbatim.

use crate::text::TextParse;
use crate::variant::VariantList;

/// Wire message type, first four bytes of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Unknown,
    ServerHello,
    GenericText,
    GameMessage,
    GamePacket,
}

impl MessageType {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => MessageType::ServerHello,
            2 => MessageType::GenericText,
            3 => MessageType::GameMessage,
            4 => MessageType::GamePacket,
            _ => MessageType::Unknown,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            MessageType::Unknown => 0,
            MessageType::ServerHello => 1,
            MessageType::GenericText => 2,
            MessageType::GameMessage => 3,
            MessageType::GamePacket => 4,
        }
    }
}

/// Tank header length; every `GAME_PACKET` frame carries exactly this much
/// before the extra buffer.
pub const TANK_HEADER_LEN: usize = 60;

/// Tank packet sub-type: function call with a variant-list payload.
pub const TANK_CALL_FUNCTION: u8 = 1;
/// Tank packet sub-type: disconnect notice.
pub const TANK_DISCONNECT: u8 = 26;

/// Semantic tag derived from frame content; not on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketId {
    ServerHello,
    Quit,
    QuitToExit,
    JoinRequest,
    ValidateWorld,
    Input,
    Log,
    Disconnect,
    OnSendToServer,
    OnSpawn,
    OnRemove,
    OnNameChanged,
    OnChangeSkin,
    Unknown,
}

fn action_id(action: &str) -> PacketId {
    match action {
        "quit" => PacketId::Quit,
        "quit_to_exit" => PacketId::QuitToExit,
        "join_request" => PacketId::JoinRequest,
        "validate_world" => PacketId::ValidateWorld,
        "input" => PacketId::Input,
        "log" => PacketId::Log,
        _ => PacketId::Unknown,
    }
}

fn function_id(function: &str) -> PacketId {
    match function {
        "OnSendToServer" => PacketId::OnSendToServer,
        "OnSpawn" => PacketId::OnSpawn,
        "OnRemove" => PacketId::OnRemove,
        "OnNameChanged" => PacketId::OnNameChanged,
        "OnChangeSkin" => PacketId::OnChangeSkin,
        _ => PacketId::Unknown,
    }
}

/// A `GAME_PACKET` frame: the raw 60-byte header (opaque bytes preserved
/// verbatim) plus the extra buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TankPacket {
    header: [u8; TANK_HEADER_LEN],
    extra: Vec<u8>,
}

impl TankPacket {
    /// A zeroed header with the message type set.
    pub fn new() -> Self {
        let mut packet = Self {
            header: [0u8; TANK_HEADER_LEN],
            extra: Vec::new(),
        };
        packet.header[0..4].copy_from_slice(&MessageType::GamePacket.as_u32().to_le_bytes());
        packet
    }

    /// Reads a tank packet from a frame body (trailing NUL already
    /// stripped). The extra slice is clamped to the announced data size.
    pub fn from_bytes(body: &[u8]) -> Option<Self> {
        if body.len() < TANK_HEADER_LEN {
            return None;
        }
        let mut header = [0u8; TANK_HEADER_LEN];
        header.copy_from_slice(&body[..TANK_HEADER_LEN]);
        let announced = u32::from_le_bytes(header[56..60].try_into().unwrap()) as usize;
        let end = body.len().min(TANK_HEADER_LEN + announced);
        Some(Self {
            header,
            extra: body[TANK_HEADER_LEN..end].to_vec(),
        })
    }

    pub fn packet_type(&self) -> u8 {
        self.header[4]
    }

    pub fn set_packet_type(&mut self, value: u8) {
        self.header[4] = value;
    }

    pub fn net_id(&self) -> i32 {
        i32::from_le_bytes(self.header[8..12].try_into().unwrap())
    }

    pub fn set_net_id(&mut self, value: i32) {
        self.header[8..12].copy_from_slice(&value.to_le_bytes());
    }

    pub fn target_net_id(&self) -> i32 {
        i32::from_le_bytes(self.header[12..16].try_into().unwrap())
    }

    pub fn set_target_net_id(&mut self, value: i32) {
        self.header[12..16].copy_from_slice(&value.to_le_bytes());
    }

    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.header[16..20].try_into().unwrap())
    }

    pub fn delay(&self) -> i32 {
        i32::from_le_bytes(self.header[24..28].try_into().unwrap())
    }

    pub fn set_delay(&mut self, value: i32) {
        self.header[24..28].copy_from_slice(&value.to_le_bytes());
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Replaces the extra buffer and keeps the announced length in sync.
    pub fn set_extra(&mut self, extra: Vec<u8>) {
        self.header[56..60].copy_from_slice(&(extra.len() as u32).to_le_bytes());
        self.extra = extra;
    }

    /// Serializes header plus extra, appending a trailing NUL on request.
    pub fn to_bytes(&self, trailing_nul: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(TANK_HEADER_LEN + self.extra.len() + 1);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.extra);
        if trailing_nul {
            out.push(0);
        }
        out
    }
}

impl Default for TankPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded frame content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text {
        kind: MessageType,
        text: String,
        records: TextParse,
    },
    Tank {
        packet: TankPacket,
        variant: VariantList,
    },
    /// Unparseable or unrecognized; forwarded unchanged.
    Raw,
}

/// The classifier's view of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket {
    pub id: PacketId,
    pub payload: Payload,
    /// Whether the original frame ended in a NUL; rebuilds preserve it.
    pub had_trailing_nul: bool,
    /// Cached chat/command line for `Input` frames.
    pub input_text: Option<String>,
}

impl ParsedPacket {
    fn raw(had_trailing_nul: bool) -> Self {
        Self {
            id: PacketId::Unknown,
            payload: Payload::Raw,
            had_trailing_nul,
            input_text: None,
        }
    }
}

/// Tags a raw frame as text/tank/raw and extracts the semantic fields.
pub fn classify(raw: &[u8]) -> ParsedPacket {
    let had_trailing_nul = raw.last() == Some(&0);
    let body = if had_trailing_nul {
        &raw[..raw.len() - 1]
    } else {
        raw
    };

    if body.len() < 4 {
        return ParsedPacket::raw(had_trailing_nul);
    }

    let kind = MessageType::from_u32(u32::from_le_bytes(body[..4].try_into().unwrap()));
    match kind {
        MessageType::ServerHello | MessageType::GenericText | MessageType::GameMessage => {
            let text = String::from_utf8_lossy(&body[4..]).into_owned();
            let records = TextParse::parse(&text);
            let id = if kind == MessageType::ServerHello {
                PacketId::ServerHello
            } else {
                action_id(records.get("action", 0))
            };
            let input_text = (id == PacketId::Input).then(|| cached_input_text(&records));
            ParsedPacket {
                id,
                payload: Payload::Text {
                    kind,
                    text,
                    records,
                },
                had_trailing_nul,
                input_text,
            }
        }
        MessageType::GamePacket => match TankPacket::from_bytes(body) {
            Some(packet) => {
                let (id, variant) = match packet.packet_type() {
                    TANK_DISCONNECT => (PacketId::Disconnect, VariantList::default()),
                    TANK_CALL_FUNCTION => {
                        let variant = VariantList::decode(packet.extra());
                        let id = variant
                            .function_name()
                            .map_or(PacketId::Unknown, function_id);
                        (id, variant)
                    }
                    _ => (PacketId::Unknown, VariantList::default()),
                };
                ParsedPacket {
                    id,
                    payload: Payload::Tank { packet, variant },
                    had_trailing_nul,
                    input_text: None,
                }
            }
            None => ParsedPacket::raw(had_trailing_nul),
        },
        MessageType::Unknown => ParsedPacket::raw(had_trailing_nul),
    }
}

/// The `text` key's first value, falling back to the value of a record
/// whose key tokenized to the empty string (malformed client input).
fn cached_input_text(records: &TextParse) -> String {
    if records.contains("text") {
        return records.get("text", 0).to_string();
    }
    records
        .iter()
        .find(|(key, _)| key.is_empty())
        .and_then(|(_, values)| values.first())
        .cloned()
        .unwrap_or_default()
}

/// Builds a text frame: message type, UTF-8 body, trailing NUL.
pub fn text_frame(kind: MessageType, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + text.len() + 1);
    out.extend_from_slice(&kind.as_u32().to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    out
}
