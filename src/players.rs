use std::time::Duration;

use log::warn;

use crate::error::SourceQueryError;
use crate::parse::{Parsed, PayloadCursor};

/// One entry of an A2S_PLAYER response.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Index of the player chunk, usually 0
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Time connected to the server
    pub duration: Duration,
}

/// Totals appended by "The Ship" servers after the player list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TheShipTotals {
    pub deaths: u64,
    pub money: u64,
}

/// Player list as obtained by an A2S_PLAYER query.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayersInfo {
    /// Player count reported by the server
    pub count: u8,
    pub players: Vec<Player>,
    pub the_ship: Option<TheShipTotals>,
}

fn seconds(secs: f32) -> Duration {
    Duration::try_from_secs_f32(secs.max(0.0)).unwrap_or_default()
}

impl PlayersInfo {
    /// Parse the body of an A2S_PLAYER response (everything after the `D` type byte).
    ///
    /// `the_ship` enables the trailing totals, which are optional: a cut-off
    /// trailer still yields the player list.
    pub fn parse(body: &[u8], the_ship: bool) -> Result<Parsed<PlayersInfo>, SourceQueryError> {
        let mut cursor = PayloadCursor::new(body);

        let count = cursor.read_byte()?;
        let mut players = Vec::with_capacity(count as usize);
        for _ in 0..count {
            players.push(Player {
                index: cursor.read_byte()?,
                name: cursor.read_cstring()?,
                score: cursor.read_i32()?,
                duration: seconds(cursor.read_f32()?),
            });
        }

        let mut info = PlayersInfo {
            count,
            players,
            the_ship: None,
        };
        if !the_ship || cursor.remaining_unparsed_length() == 0 {
            return Ok(Parsed::complete(info));
        }

        let totals = cursor
            .read_u64()
            .and_then(|deaths| Ok((deaths, cursor.read_u64()?)));
        match totals {
            Ok((deaths, money)) => {
                info.the_ship = Some(TheShipTotals { deaths, money });
                Ok(Parsed::complete(info))
            }
            Err(e) => {
                warn!("player totals are incomplete: {e}");
                Ok(Parsed {
                    value: info,
                    incomplete: Some(format!("player totals could not be fully parsed: {e}")),
                })
            }
        }
    }
}
