use log::warn;

use crate::error::SourceQueryError;
use crate::packet::{edf, is_the_ship};
use crate::parse::{Parsed, PayloadCursor};

/// Kind of server, from the A2S_INFO type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    /// `d`
    Dedicated,
    /// `l`, a listen server
    NonDedicated,
    /// `p`
    SourceTvRelay,
    Unknown,
}

impl From<u8> for ServerType {
    fn from(value: u8) -> Self {
        match value {
            b'd' => ServerType::Dedicated,
            b'l' => ServerType::NonDedicated,
            b'p' => ServerType::SourceTvRelay,
            _ => ServerType::Unknown,
        }
    }
}

/// Operating system of the server, from the A2S_INFO environment byte.
/// Unrecognised values fall back to [Environment::Linux].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Linux,
    Windows,
    Mac,
}

impl From<u8> for Environment {
    fn from(value: u8) -> Self {
        match value {
            b'l' => Environment::Linux,
            b'w' => Environment::Windows,
            b'm' | b'o' => Environment::Mac,
            _ => Environment::Linux,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TheShipMode {
    Hunt,
    Elimination,
    Duel,
    Deathmatch,
    VipTeam,
    TeamElimination,
    Unknown,
}

impl From<u8> for TheShipMode {
    fn from(value: u8) -> Self {
        match value {
            0 => TheShipMode::Hunt,
            1 => TheShipMode::Elimination,
            2 => TheShipMode::Duel,
            3 => TheShipMode::Deathmatch,
            4 => TheShipMode::VipTeam,
            5 => TheShipMode::TeamElimination,
            _ => TheShipMode::Unknown,
        }
    }
}

/// Extra A2S_INFO fields sent only by "The Ship" servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TheShipInfo {
    pub mode: TheShipMode,
    /// Witnesses needed to arrest a player
    pub witnesses: u8,
    /// Seconds before a player is arrested while being witnessed
    pub duration: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTvInfo {
    pub port: u16,
    pub name: String,
}

/// Optional trailing block of A2S_INFO. Only fields flagged in `flags` are
/// ever read; a field left `None` was either not flagged or cut off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedInfo {
    /// Extra Data Flags byte as sent by the server
    pub flags: u8,
    /// Server's game port
    pub port: Option<u16>,
    /// Server's 64-bit Steam ID
    pub steam_id: Option<u64>,
    pub source_tv: Option<SourceTvInfo>,
    /// Tags that describe the game
    pub keywords: Option<String>,
    /// 64-bit game id; the low 24 bits are the app id
    pub game_id: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum ExtraField {
    Port,
    SteamId,
    SourceTv,
    Keywords,
    GameId,
}

/// On-wire order of the Extra Data Flags fields.
const EXTRA_FIELDS: [(u8, ExtraField); 5] = [
    (edf::PORT, ExtraField::Port),
    (edf::STEAM_ID, ExtraField::SteamId),
    (edf::SOURCE_TV, ExtraField::SourceTv),
    (edf::KEYWORDS, ExtraField::Keywords),
    (edf::GAME_ID, ExtraField::GameId),
];

impl ExtendedInfo {
    /// Read every flagged field in wire order, filling `self` as it goes.
    fn read_fields(&mut self, cursor: &mut PayloadCursor) -> Result<(), SourceQueryError> {
        for (bit, field) in EXTRA_FIELDS {
            if self.flags & bit == 0 {
                continue;
            }
            match field {
                ExtraField::Port => self.port = Some(cursor.read_u16()?),
                ExtraField::SteamId => self.steam_id = Some(cursor.read_u64()?),
                ExtraField::SourceTv => {
                    let port = cursor.read_u16()?;
                    let name = cursor.read_cstring()?;
                    self.source_tv = Some(SourceTvInfo { port, name });
                }
                ExtraField::Keywords => self.keywords = Some(cursor.read_cstring()?),
                ExtraField::GameId => self.game_id = Some(cursor.read_u64()?),
            }
        }
        Ok(())
    }
}

/// Server information as obtained by an A2S_INFO query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// A2S_INFO protocol version
    pub protocol: u8,
    /// Server name
    pub name: String,
    /// Current map
    pub map: String,
    /// Location of server files
    pub folder: String,
    /// Name of game
    pub game: String,
    /// Steam app id of game
    pub app_id: u16,
    /// Current players
    pub players: u8,
    /// Max players
    pub max_players: u8,
    /// Current bots
    pub bots: u8,
    pub server_type: ServerType,
    pub environment: Environment,
    /// Is the server password protected?
    pub password_protected: bool,
    /// Is the server VAC enabled?
    pub vac_enabled: bool,
    /// Present only for "The Ship" app ids
    pub the_ship: Option<TheShipInfo>,
    /// Game version
    pub version: String,
    /// Present only when bytes follow the version string
    pub extended: Option<ExtendedInfo>,
}

impl ServerInfo {
    /// Parse the body of an A2S_INFO response (everything after the `I` type byte).
    ///
    /// Running out of bytes before the version string ends is an error.
    /// Running out inside the extended block still yields the fields read
    /// so far, with the reason in [Parsed::incomplete].
    pub fn parse(body: &[u8]) -> Result<Parsed<ServerInfo>, SourceQueryError> {
        let mut cursor = PayloadCursor::new(body);

        let protocol = cursor.read_byte()?;
        let name = cursor.read_cstring()?;
        let map = cursor.read_cstring()?;
        let folder = cursor.read_cstring()?;
        let game = cursor.read_cstring()?;
        let app_id = cursor.read_u16()?;
        let players = cursor.read_byte()?;
        let max_players = cursor.read_byte()?;
        let bots = cursor.read_byte()?;
        let server_type = ServerType::from(cursor.read_byte()?);
        let environment = Environment::from(cursor.read_byte()?);
        let password_protected = cursor.read_byte()? > 0;
        let vac_enabled = cursor.read_byte()? > 0;

        let the_ship = if is_the_ship(app_id) {
            Some(TheShipInfo {
                mode: TheShipMode::from(cursor.read_byte()?),
                witnesses: cursor.read_byte()?,
                duration: cursor.read_byte()?,
            })
        } else {
            None
        };

        let version = cursor.read_cstring()?;

        let mut info = ServerInfo {
            protocol,
            name,
            map,
            folder,
            game,
            app_id,
            players,
            max_players,
            bots,
            server_type,
            environment,
            password_protected,
            vac_enabled,
            the_ship,
            version,
            extended: None,
        };

        if cursor.remaining_unparsed_length() == 0 {
            return Ok(Parsed::complete(info));
        }

        let mut extended = ExtendedInfo {
            flags: cursor.read_byte()?,
            ..ExtendedInfo::default()
        };
        let outcome = extended.read_fields(&mut cursor);
        info.extended = Some(extended);

        match outcome {
            Ok(()) => Ok(Parsed::complete(info)),
            Err(e) => {
                warn!("extended info block of `{}` is incomplete: {e}", info.name);
                Ok(Parsed {
                    value: info,
                    incomplete: Some(format!("extended data could not be fully parsed: {e}")),
                })
            }
        }
    }
}
