//! Parsers for console command output
//!
//! The remote console only speaks free text, so every status field is scraped
//! from the human-readable reply of a command. Each parser is a pure function
//! that either produces the whole value or rejects the response; partial
//! results are never returned.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Region reported by servers that predate per-planet evolution.
pub const DEFAULT_PLANET: &str = "Nauvis";

static PLAYERS_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Players \((?P<count>\d+)\):(?P<list>(?s:.*))").unwrap());

/// Suffix the server appends to players currently in game.
const ONLINE_MARKER: &str = " (online)";

static EVOLUTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<planet>.+) - )?",
        r"Evolution factor: (?P<factor>[0-9.]+)\. ",
        r"\([tT]ime (?P<time>[0-9.]+)%\) ",
        r"\(Pollution (?P<pollution>[0-9.]+)%\) ",
        r"\(Spawner kills (?P<kills>[0-9.]+)%\)$",
    ))
    .unwrap()
});

static TIME_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<value>\d+(?:\.\d+)?) (?P<unit>day|hour|minute|second)s?$").unwrap()
});

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("players response has no `Players (N):` header")]
    PlayersHeader,

    #[error("players response declares {declared} entries but lists {listed}")]
    PlayerCount { declared: usize, listed: usize },

    #[error("empty evolution response")]
    EmptyEvolution,

    #[error("unrecognised evolution line {0:?}")]
    EvolutionLine(String),

    #[error("unrecognised elapsed time {0:?}")]
    ElapsedTime(String),
}

/// One line of a `/players` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    pub name: String,
    pub online: bool,
}

/// Evolution of one region. `time`, `pollution` and `kills` are the shares
/// of the factor contributed by each source, as fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evolution {
    pub factor: f64,
    pub time: f64,
    pub pollution: f64,
    pub kills: f64,
}

/// Map age as reported by `/time`
///
/// Falls back to the raw reply when the text cannot be read as a duration, so
/// the dashboard still has something to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ElapsedTime {
    /// Hours since the map was created.
    Parsed(f64),
    Raw(String),
}

/// Parses `Players (N):` followed by one name per line, each optionally
/// suffixed with ` (online)`.
///
/// The declared count must equal the number of non-blank lines; a mismatch
/// usually means the reply was cut short.
pub fn parse_players(text: &str) -> Result<Vec<PlayerEntry>, ParseError> {
    let captures = PLAYERS_HEADER
        .captures(text)
        .ok_or(ParseError::PlayersHeader)?;

    let declared: usize = captures["count"]
        .parse()
        .map_err(|_| ParseError::PlayersHeader)?;

    let lines: Vec<&str> = captures["list"]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if declared != lines.len() {
        return Err(ParseError::PlayerCount {
            declared,
            listed: lines.len(),
        });
    }

    Ok(lines
        .into_iter()
        .map(|line| match line.strip_suffix(ONLINE_MARKER) {
            Some(name) => PlayerEntry {
                name: name.trim_end().to_string(),
                online: true,
            },
            None => PlayerEntry {
                name: line.to_string(),
                online: false,
            },
        })
        .collect())
}

/// Parses the `/evolution` reply, one line per region.
///
/// Either every line parses or the whole reply is rejected.
pub fn parse_evolution(text: &str) -> Result<BTreeMap<String, Evolution>, ParseError> {
    let mut regions = BTreeMap::new();

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let invalid = || ParseError::EvolutionLine(line.to_string());
        let captures = EVOLUTION_LINE.captures(line).ok_or_else(invalid)?;

        let number = |group: &str| captures[group].parse::<f64>().map_err(|_| invalid());

        let planet = captures
            .name("planet")
            .map_or(DEFAULT_PLANET, |planet| planet.as_str());

        regions.insert(
            planet.to_string(),
            Evolution {
                factor: number("factor")?,
                time: number("time")? / 100.0,
                pollution: number("pollution")? / 100.0,
                kills: number("kills")? / 100.0,
            },
        );
    }

    if regions.is_empty() {
        return Err(ParseError::EmptyEvolution);
    }

    Ok(regions)
}

/// Parses a duration such as `2 hours, 5 minutes and 30 seconds` into hours.
///
/// Parts are separated by commas or `and`; each unit may appear once and any
/// missing unit counts as zero.
pub fn parse_elapsed_time(text: &str) -> Result<f64, ParseError> {
    let text = text.trim();
    let invalid = || ParseError::ElapsedTime(text.to_string());

    let mut seen = [false; 4];
    let mut hours = 0.0;

    for piece in text.split(',') {
        let piece = piece.trim();
        let piece = piece.strip_prefix("and ").unwrap_or(piece);

        for part in piece.split(" and ") {
            let captures = TIME_PART.captures(part.trim()).ok_or_else(invalid)?;
            let value: f64 = captures["value"].parse().map_err(|_| invalid())?;

            let (slot, scale) = match &captures["unit"] {
                "day" => (0, 24.0),
                "hour" => (1, 1.0),
                "minute" => (2, 1.0 / 60.0),
                _ => (3, 1.0 / 3600.0),
            };

            if seen[slot] {
                return Err(invalid());
            }
            seen[slot] = true;
            hours += value * scale;
        }
    }

    Ok(hours)
}

/// Reads a `/time` reply, keeping the raw text when it is not a duration.
pub fn elapsed_time_from_response(text: &str) -> Result<ElapsedTime, (ElapsedTime, ParseError)> {
    parse_elapsed_time(text)
        .map(ElapsedTime::Parsed)
        .map_err(|e| (ElapsedTime::Raw(text.trim().to_string()), e))
}

/// Version and seed replies are taken verbatim.
pub fn parse_text_value(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
