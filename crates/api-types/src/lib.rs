//! Shared wire types
//!
//! Records exchanged between the BR31 server and player processes: move
//! requests sent over pipes and message queues, and the status records the
//! server broadcasts back to players that cannot read shared memory.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Player identifier as carried on the wire.
pub type PlayerId = u32;

/// Sentinel turn value used before any player has registered.
pub const UNASSIGNED: PlayerId = 0;

/// Highest player identifier the server accepts.
pub const MAX_PLAYERS: PlayerId = 5;

/// Maximum length of a reply channel path carried in fixed-size records.
pub const MAX_REPLY_PATH_LEN: usize = 40;

/// Size of the fixed binary move record: native-endian `i32` player id,
/// `i32` amount, then a NUL padded reply path.
pub const FIXED_RECORD_LEN: usize = 8 + MAX_REPLY_PATH_LEN;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("empty record")]
    Empty,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("reply path is longer than {MAX_REPLY_PATH_LEN} bytes")]
    ReplyPathTooLong,
}

/// A single submitted move, decoded by whichever adapter received it.
///
/// `amount == 0` is reserved as a registration request on transports that
/// support dynamic registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub player_id: PlayerId,
    pub amount: u32,
    pub reply_channel: Option<PathBuf>,
}

impl MoveRequest {
    pub fn new(player_id: PlayerId, amount: u32) -> Self {
        Self {
            player_id,
            amount,
            reply_channel: None,
        }
    }

    /// Builds a registration request announcing where status records go.
    pub fn register(player_id: PlayerId, reply_channel: Option<PathBuf>) -> Self {
        Self {
            player_id,
            amount: 0,
            reply_channel,
        }
    }

    pub fn is_registration(&self) -> bool {
        self.amount == 0
    }

    /// Parses the text form `<player_id> <amount>[ <reply_path>]`.
    pub fn parse_line(line: &str) -> Result<Self, WireError> {
        let mut fields = line.split_whitespace();
        let player_id = fields.next().ok_or(WireError::Empty)?;
        let player_id = parse_field("player_id", player_id)?;
        let amount = fields.next().ok_or(WireError::MissingField("amount"))?;
        let amount = parse_field("amount", amount)?;
        let reply_channel = fields.next().map(PathBuf::from);

        if let Some(extra) = fields.next() {
            return Err(WireError::InvalidField {
                field: "reply_channel",
                value: extra.to_string(),
            });
        }

        Ok(Self {
            player_id,
            amount,
            reply_channel,
        })
    }

    /// Decodes one fixed binary record. A reply path with no NUL uses the
    /// whole field.
    pub fn decode_fixed(record: &[u8; FIXED_RECORD_LEN]) -> Result<Self, WireError> {
        let word = |field: &'static str, at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&record[at..at + 4]);
            let value = i32::from_ne_bytes(bytes);
            u32::try_from(value).map_err(|_| WireError::InvalidField {
                field,
                value: value.to_string(),
            })
        };
        let player_id = word("player_id", 0)?;
        let amount = word("amount", 4)?;

        let path = &record[8..];
        let len = path.iter().position(|&b| b == 0).unwrap_or(path.len());
        let reply_channel = match std::str::from_utf8(&path[..len]) {
            Ok("") => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => {
                return Err(WireError::InvalidField {
                    field: "reply_channel",
                    value: String::from_utf8_lossy(&path[..len]).into_owned(),
                })
            }
        };

        Ok(Self {
            player_id,
            amount,
            reply_channel,
        })
    }

    /// Encodes the fixed binary form.
    pub fn encode_fixed(&self) -> Result<[u8; FIXED_RECORD_LEN], WireError> {
        let mut record = [0u8; FIXED_RECORD_LEN];
        let word = |field: &'static str, value: u32| {
            i32::try_from(value).map_err(|_| WireError::InvalidField {
                field,
                value: value.to_string(),
            })
        };
        record[..4].copy_from_slice(&word("player_id", self.player_id)?.to_ne_bytes());
        record[4..8].copy_from_slice(&word("amount", self.amount)?.to_ne_bytes());
        if let Some(path) = &self.reply_channel {
            let path = path.to_string_lossy();
            // Keep room for the terminating NUL.
            if path.len() >= MAX_REPLY_PATH_LEN {
                return Err(WireError::ReplyPathTooLong);
            }
            record[8..8 + path.len()].copy_from_slice(path.as_bytes());
        }
        Ok(record)
    }

    /// Encodes the text form, terminated by a newline.
    pub fn to_line(&self) -> String {
        match &self.reply_channel {
            Some(path) => format!("{} {} {}\n", self.player_id, self.amount, path.display()),
            None => format!("{} {}\n", self.player_id, self.amount),
        }
    }
}

fn lookup_pair<'a>(body: &'a str, key: &'static str) -> Result<&'a str, WireError> {
    body.split_whitespace()
        .find_map(|pair| pair.strip_prefix(key)?.strip_prefix('='))
        .ok_or(WireError::MissingField(key))
}

fn parse_field(field: &'static str, value: &str) -> Result<u32, WireError> {
    value.parse::<u32>().map_err(|_| WireError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Status broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusRecord {
    InProgress {
        current_count: u32,
        current_turn: PlayerId,
        players: Vec<PlayerId>,
    },
    Finished {
        loser: PlayerId,
        final_count: u32,
    },
    Aborted {
        final_count: u32,
    },
}

impl StatusRecord {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusRecord::InProgress { .. })
    }
}

/// Prefix marking a terminal record in the text form.
pub const END_MARKER: &str = "END:";

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusRecord::InProgress {
                current_count,
                current_turn,
                players,
            } => {
                let players = players
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "count={current_count} turn={current_turn} players={players}")
            }
            StatusRecord::Finished { loser, final_count } => {
                write!(f, "{END_MARKER} ended=true loser={loser} final_count={final_count}")
            }
            StatusRecord::Aborted { final_count } => {
                write!(f, "{END_MARKER} ended=false aborted=true final_count={final_count}")
            }
        }
    }
}

impl FromStr for StatusRecord {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(WireError::Empty);
        }

        let body = s.strip_prefix(END_MARKER).unwrap_or(s);
        let lookup = |key| lookup_pair(body, key);

        if !s.starts_with(END_MARKER) {
            let players = lookup("players")?;
            let players = players
                .split(',')
                .filter(|p| !p.is_empty())
                .map(|p| parse_field("players", p))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(StatusRecord::InProgress {
                current_count: parse_field("count", lookup("count")?)?,
                current_turn: parse_field("turn", lookup("turn")?)?,
                players,
            });
        }

        let final_count = parse_field("final_count", lookup("final_count")?)?;
        match lookup("ended")? {
            "true" => Ok(StatusRecord::Finished {
                loser: parse_field("loser", lookup("loser")?)?,
                final_count,
            }),
            "false" => Ok(StatusRecord::Aborted { final_count }),
            other => Err(WireError::InvalidField {
                field: "ended",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parses_move_with_and_without_reply_path() {
        assert_eq!(MoveRequest::parse_line("2 3").unwrap(), MoveRequest::new(2, 3));
        assert_eq!(
            MoveRequest::parse_line(" 1 0 /tmp/br31_resp_1\n").unwrap(),
            MoveRequest::register(1, Some(PathBuf::from("/tmp/br31_resp_1")))
        );
    }

    #[test]
    fn rejects_malformed_moves() {
        assert_eq!(MoveRequest::parse_line("   "), Err(WireError::Empty));
        assert_eq!(
            MoveRequest::parse_line("1"),
            Err(WireError::MissingField("amount"))
        );
        assert!(matches!(
            MoveRequest::parse_line("one 2"),
            Err(WireError::InvalidField { field: "player_id", .. })
        ));
        assert!(matches!(
            MoveRequest::parse_line("1 -2"),
            Err(WireError::InvalidField { field: "amount", .. })
        ));
        assert!(MoveRequest::parse_line("1 2 /a /b").is_err());
    }

    #[test]
    fn decodes_fixed_registration_record() {
        let mut record = [0u8; FIXED_RECORD_LEN];
        record[..4].copy_from_slice(&4i32.to_ne_bytes());
        record[8..23].copy_from_slice(b"/tmp/br31_resp_");
        record[23] = b'4';
        assert_eq!(
            MoveRequest::decode_fixed(&record).unwrap(),
            MoveRequest::register(4, Some(PathBuf::from("/tmp/br31_resp_4")))
        );

        record[4..8].copy_from_slice(&(-1i32).to_ne_bytes());
        assert!(matches!(
            MoveRequest::decode_fixed(&record),
            Err(WireError::InvalidField { field: "amount", .. })
        ));
    }

    #[test]
    fn fixed_record_needs_room_for_nul() {
        let path = PathBuf::from(format!("/{}", "x".repeat(MAX_REPLY_PATH_LEN - 1)));
        assert_eq!(
            MoveRequest::register(1, Some(path)).encode_fixed(),
            Err(WireError::ReplyPathTooLong)
        );
        let record = MoveRequest::new(2, 3).encode_fixed().unwrap();
        assert_eq!(MoveRequest::decode_fixed(&record).unwrap(), MoveRequest::new(2, 3));
    }

    #[test]
    fn registration_is_amount_zero() {
        assert!(MoveRequest::register(3, None).is_registration());
        assert!(!MoveRequest::new(3, 1).is_registration());
    }

    #[test]
    fn status_text_form() {
        let progress = StatusRecord::InProgress {
            current_count: 12,
            current_turn: 2,
            players: vec![1, 2, 3],
        };
        assert_eq!(progress.to_string(), "count=12 turn=2 players=1,2,3");
        assert_eq!(progress.to_string().parse::<StatusRecord>().unwrap(), progress);

        let finished = StatusRecord::Finished {
            loser: 1,
            final_count: 31,
        };
        assert_eq!(finished.to_string(), "END: ended=true loser=1 final_count=31");
        assert_eq!(finished.to_string().parse::<StatusRecord>().unwrap(), finished);
        assert!(finished.is_terminal());

        let aborted = StatusRecord::Aborted { final_count: 10 };
        assert_eq!(
            aborted.to_string().parse::<StatusRecord>().unwrap(),
            aborted
        );
    }

    #[test]
    fn status_json_is_tagged() {
        let json = serde_json::to_string(&StatusRecord::Finished {
            loser: 2,
            final_count: 33,
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"finished","loser":2,"final_count":33}"#);
    }
}
