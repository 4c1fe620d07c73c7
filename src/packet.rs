//! Wire constants, request building and response framing.
//!
//! Reference: <https://developer.valvesoftware.com/wiki/Server_queries>
use log::{trace, warn};

use crate::error::SourceQueryError;
use crate::parse::PayloadCursor;

/// A 4-byte challenge token, echoed back exactly as the server sent it.
pub type Challenge = [u8; 4];

/// Sent in place of a challenge to ask the server for a fresh one.
pub const NO_CHALLENGE: Challenge = [0xFF, 0xFF, 0xFF, 0xFF];

/// A2S_INFO request, without a challenge.
pub const INFO_QUERY: &[u8] = b"\xFF\xFF\xFF\xFFTSource Engine Query\0";
/// A2S_PLAYER request prefix; the challenge is appended.
pub const PLAYER_QUERY: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x55];
/// A2S_PLAYER request asking for a challenge.
pub const PLAYER_QUERY_CHALLENGE: [u8; 9] = [0xFF, 0xFF, 0xFF, 0xFF, 0x55, 0xFF, 0xFF, 0xFF, 0xFF];
/// A2S_RULES request prefix; the challenge is appended.
pub const RULE_QUERY: [u8; 5] = [0xFF, 0xFF, 0xFF, 0xFF, 0x56];
/// A2S_RULES request asking for a challenge.
pub const RULE_QUERY_CHALLENGE: [u8; 9] = [0xFF, 0xFF, 0xFF, 0xFF, 0x56, 0xFF, 0xFF, 0xFF, 0xFF];
/// A2S_SERVERQUERY_GETCHALLENGE. Deprecated, many servers ignore it.
pub const CHALLENGE_QUERY: [u8; 9] = [0xFF, 0xFF, 0xFF, 0xFF, 0x57, 0xFF, 0xFF, 0xFF, 0xFF];

/// App ids of "The Ship" titles, which carry extra fields in A2S_INFO and A2S_PLAYER.
pub const THE_SHIP_APP_IDS: [u16; 8] = [2400, 2401, 2402, 2403, 2405, 2406, 2412, 2430];

pub fn is_the_ship(app_id: u16) -> bool {
    THE_SHIP_APP_IDS.contains(&app_id)
}

/// Extra Data Flag bits of the A2S_INFO response.
pub mod edf {
    pub const PORT: u8 = 0x80;
    pub const STEAM_ID: u8 = 0x10;
    pub const SOURCE_TV: u8 = 0x40;
    pub const KEYWORDS: u8 = 0x20;
    pub const GAME_ID: u8 = 0x01;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketHeader {
    Single,
    Split,
}

impl TryFrom<i32> for PacketHeader {
    type Error = SourceQueryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(PacketHeader::Single),
            -2 => Ok(PacketHeader::Split),
            n => Err(SourceQueryError::UnknownPacketHeader(n)),
        }
    }
}

impl PacketHeader {
    pub fn to_le_bytes(self) -> [u8; 4] {
        let value: i32 = match self {
            PacketHeader::Single => -1,
            PacketHeader::Split => -2,
        };
        value.to_le_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// A2S_INFO request ('T')
    InfoRequest,
    /// A2S_PLAYER request ('U')
    PlayerRequest,
    /// A2S_RULES request ('V')
    RulesRequest,
    /// A2S_SERVERQUERY_GETCHALLENGE ('W')
    ChallengeRequest,
    /// S2C_CHALLENGE ('A')
    ///
    /// The client should repeat the request with the 4-byte challenge appended.
    Challenge,
    /// A2S_INFO response ('I')
    InfoResponse,
    /// A2S_PLAYER response ('D')
    PlayerResponse,
    /// A2S_RULES response ('E')
    RulesResponse,
}

impl TryFrom<u8> for PacketType {
    type Error = SourceQueryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x54 => Ok(PacketType::InfoRequest),
            0x55 => Ok(PacketType::PlayerRequest),
            0x56 => Ok(PacketType::RulesRequest),
            0x57 => Ok(PacketType::ChallengeRequest),
            0x41 => Ok(PacketType::Challenge),
            0x49 => Ok(PacketType::InfoResponse),
            0x44 => Ok(PacketType::PlayerResponse),
            0x45 => Ok(PacketType::RulesResponse),
            n => Err(SourceQueryError::UnknownPacketType(n)),
        }
    }
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::InfoRequest => 0x54,
            PacketType::PlayerRequest => 0x55,
            PacketType::RulesRequest => 0x56,
            PacketType::ChallengeRequest => 0x57,
            PacketType::Challenge => 0x41,
            PacketType::InfoResponse => 0x49,
            PacketType::PlayerResponse => 0x44,
            PacketType::RulesResponse => 0x45,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    packet_type: PacketType,
    challenge: Option<Challenge>,
}

impl RequestPacket {
    pub fn new(packet_type: PacketType, challenge: Option<Challenge>) -> Self {
        RequestPacket {
            packet_type,
            challenge,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Serializes a request into bytes.
    ///
    /// A2S_INFO only carries a challenge once the server asked for one; every
    /// other request carries either the challenge or [NO_CHALLENGE].
    pub fn pack(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = match self.packet_type {
            PacketType::InfoRequest => {
                let mut payload = INFO_QUERY.to_vec();
                if let Some(c) = &self.challenge {
                    payload.extend_from_slice(c);
                }
                return payload;
            }
            PacketType::PlayerRequest => PLAYER_QUERY.to_vec(),
            PacketType::RulesRequest => RULE_QUERY.to_vec(),
            other => {
                let mut payload = PacketHeader::Single.to_le_bytes().to_vec();
                payload.push(other.to_byte());
                payload
            }
        };
        payload.extend_from_slice(&self.challenge.unwrap_or(NO_CHALLENGE));
        payload
    }
}

/// A complete, single-packet response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    packet_type: PacketType,
    body: Vec<u8>,
}

impl ResponsePacket {
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Everything after the type byte.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The challenge token carried by an S2C_CHALLENGE response.
    pub fn challenge(&self) -> Result<Challenge, SourceQueryError> {
        PayloadCursor::new(&self.body).read_array::<4>()
    }

    /// Fail unless this is a response of type `expected`.
    pub fn expect_type(&self, expected: PacketType) -> Result<(), SourceQueryError> {
        if self.packet_type == expected {
            Ok(())
        } else {
            Err(SourceQueryError::UnexpectedResponse {
                expected: expected.to_byte(),
                got: self.packet_type.to_byte(),
            })
        }
    }
}

/// One fragment of a split (multi-packet) response, Source layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPacket {
    pub id: i32,
    pub total: u8,
    pub number: u8,
    pub max_size: u16,
    pub payload: Vec<u8>,
}

impl SplitPacket {
    /// The high bit of the id marks a bzip2-compressed response.
    pub fn is_compressed(&self) -> bool {
        (self.id as u32) & 0x8000_0000 != 0
    }
}

/// A received datagram, either complete or one part of a split response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Single(ResponsePacket),
    Split(SplitPacket),
}

impl Frame {
    /// Deserializes a received payload, splitting it into headers and body.
    pub fn unpack(incoming: &[u8]) -> Result<Frame, SourceQueryError> {
        trace!("unpacking {} byte(s): {:02x?}", incoming.len(), incoming);
        let mut cursor = PayloadCursor::new(incoming);
        let header = PacketHeader::try_from(cursor.read_i32()?)?;

        match header {
            PacketHeader::Single => {
                let packet_type = PacketType::try_from(cursor.read_byte()?)?;
                Ok(Frame::Single(ResponsePacket {
                    packet_type,
                    body: cursor.unparsed_payload().to_vec(),
                }))
            }
            PacketHeader::Split => {
                let id = cursor.read_i32()?;
                let total = cursor.read_byte()?;
                let number = cursor.read_byte()?;
                let max_size = cursor.read_u16()?;
                Ok(Frame::Split(SplitPacket {
                    id,
                    total,
                    number,
                    max_size,
                    payload: cursor.unparsed_payload().to_vec(),
                }))
            }
        }
    }
}

/// Collects the fragments of one split response until all have arrived.
#[derive(Debug)]
pub struct SplitAssembler {
    id: i32,
    parts: Vec<Option<Vec<u8>>>,
}

impl SplitAssembler {
    pub fn new(first: &SplitPacket) -> Result<Self, SourceQueryError> {
        if first.is_compressed() {
            return Err(SourceQueryError::CompressedSplitPacket);
        }
        if first.total == 0 {
            return Err(SourceQueryError::InvalidSplitPacket(
                "fragment count is zero".to_owned(),
            ));
        }
        Ok(SplitAssembler {
            id: first.id,
            parts: vec![None; first.total as usize],
        })
    }

    /// Store a fragment. Returns the reassembled payload once every fragment is present.
    pub fn push(&mut self, packet: SplitPacket) -> Result<Option<Vec<u8>>, SourceQueryError> {
        if packet.id != self.id {
            warn!(
                "dropping fragment of response {} while assembling {}",
                packet.id, self.id
            );
            return Ok(None);
        }
        if packet.total as usize != self.parts.len() || packet.number >= packet.total {
            return Err(SourceQueryError::InvalidSplitPacket(format!(
                "fragment {} of {} does not fit a {}-part response",
                packet.number,
                packet.total,
                self.parts.len()
            )));
        }
        self.parts[packet.number as usize] = Some(packet.payload);

        if self.parts.iter().any(Option::is_none) {
            return Ok(None);
        }
        Ok(Some(self.parts.iter().flatten().flatten().copied().collect()))
    }
}
