use super::model::{MatchStats, PlayerStats};
use std::fmt;

/// Why a recorded match does not move ratings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    TooFewPlayers { count: usize },
    NoContest,
    MultipleWinners { count: usize },
    CpuPlayer { name: String },
    OnlineMatch,
    PlaceholderName { name: String },
    DuplicatePlayer { name: String },
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::TooFewPlayers { count } => write!(f, "only {} participant(s)", count),
            Ineligible::NoContest => write!(f, "no contest (no winner)"),
            Ineligible::MultipleWinners { count } => write!(f, "{} winners flagged", count),
            Ineligible::CpuPlayer { name } => write!(f, "CPU participant {}", name),
            Ineligible::OnlineMatch => write!(f, "online match"),
            Ineligible::PlaceholderName { name } => {
                write!(f, "unidentified player '{}'", name)
            }
            Ineligible::DuplicatePlayer { name } => {
                write!(f, "player '{}' listed twice", name)
            }
        }
    }
}

/// Check whether a match may update ratings
pub fn rating_eligibility(stats: &MatchStats) -> Result<(), Ineligible> {
    let count = stats.participants.len();
    if count < 2 {
        return Err(Ineligible::TooFewPlayers { count });
    }

    match stats.winner_count() {
        0 => return Err(Ineligible::NoContest),
        1 => {}
        count => return Err(Ineligible::MultipleWinners { count }),
    }

    if let Some(cpu) = stats.participants.iter().find(|p| p.is_cpu) {
        return Err(Ineligible::CpuPlayer {
            name: cpu.name.clone(),
        });
    }

    if stats.participants.iter().any(|p| p.is_online) {
        return Err(Ineligible::OnlineMatch);
    }

    if let Some(player) = stats.participants.iter().find(|p| is_placeholder(p)) {
        return Err(Ineligible::PlaceholderName {
            name: player.name.clone(),
        });
    }

    for (i, player) in stats.participants.iter().enumerate() {
        if stats.participants[..i].iter().any(|p| p.name == player.name) {
            return Err(Ineligible::DuplicatePlayer {
                name: player.name.clone(),
            });
        }
    }

    Ok(())
}

/// `Player 3`, `P3`, `P 3` and `unknown` are not real player names
pub fn is_placeholder(player: &PlayerStats) -> bool {
    is_placeholder_name(&player.name)
}

pub fn is_placeholder_name(name: &str) -> bool {
    if name.is_empty() || name == "unknown" {
        return true;
    }

    let rest = name
        .strip_prefix("Player ")
        .or_else(|| name.strip_prefix("P "))
        .or_else(|| name.strip_prefix('P'));

    match rest {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}
