//! Game-system instruction prompts.

use std::fmt;
use std::str::FromStr;

const GENERIC_INSTRUCTIONS: &str = "I would like you to help me with running the game by coming up with ideas, answering questions, and improvising. Keep responses as short as possible. Stick to the rules as much as possible.";
const FORMAT_INSTRUCTIONS: &str = "Always format each answer as HTML code without CSS, including lists and tables. Never use Markdown.";
const RULES_FORMAT_INSTRUCTIONS: &str =
    "Properly format spells, monsters, conditions, and so on.";

/// Which game the assistant is helping to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameSystem {
    #[default]
    Generic,
    Dnd5e,
    Pf2e,
}

impl GameSystem {
    /// Built-in instruction prompt for this system.
    pub fn prompt(self) -> String {
        match self {
            Self::Generic => format!(
                "You are a game master for a tabletop roleplaying game. {GENERIC_INSTRUCTIONS} {FORMAT_INSTRUCTIONS}"
            ),
            Self::Dnd5e => format!(
                "You are a dungeon master for a Dungeons & Dragons 5th Edition game. {GENERIC_INSTRUCTIONS} {RULES_FORMAT_INSTRUCTIONS} {FORMAT_INSTRUCTIONS}"
            ),
            Self::Pf2e => format!(
                "You are a game master for a Pathfinder 2nd Edition game. {GENERIC_INSTRUCTIONS} {RULES_FORMAT_INSTRUCTIONS} {FORMAT_INSTRUCTIONS}"
            ),
        }
    }
}

impl FromStr for GameSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "dnd5e" | "dnd" | "5e" => Ok(Self::Dnd5e),
            "pf2e" | "pathfinder" => Ok(Self::Pf2e),
            _ => Err(format!(
                "invalid game system '{}', expected one of: generic, dnd5e, pf2e",
                s
            )),
        }
    }
}

impl fmt::Display for GameSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::Dnd5e => write!(f, "dnd5e"),
            Self::Pf2e => write!(f, "pf2e"),
        }
    }
}

/// The custom prompt when it has content, otherwise the system preset.
pub fn resolve_prompt(system: GameSystem, custom: Option<&str>) -> String {
    match custom.map(str::trim) {
        Some(custom) if !custom.is_empty() => custom.to_string(),
        _ => system.prompt(),
    }
}
