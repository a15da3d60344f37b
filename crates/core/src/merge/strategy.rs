//! Conflict strategies and resolution labels.

use serde::{Deserialize, Serialize};

/// How a key collision between two sources is settled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Higher priority wins; ties keep the existing entry.
    #[default]
    Priority,
    /// A local existing entry is always kept; otherwise the incoming one wins.
    LocalWins,
    /// Nothing is replaced; the collision is left for human review.
    Manual,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Priority => write!(f, "priority"),
            Self::LocalWins => write!(f, "local_wins"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(Self::Priority),
            "local_wins" | "local-wins" => Ok(Self::LocalWins),
            "manual" => Ok(Self::Manual),
            other => Err(format!(
                "unknown conflict strategy '{}': expected priority, local_wins or manual",
                other
            )),
        }
    }
}

/// How one collision was resolved, as recorded in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The incoming contribution replaced the existing one.
    Replace,
    /// The existing contribution was kept.
    Keep,
    /// Both contributions were deep-merged.
    Merged,
    /// Deferred to human review; the current entry is untouched.
    Manual,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Keep => write!(f, "keep"),
            Self::Merged => write!(f, "merged"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// One side of a collision.
#[derive(Debug, Clone, Copy)]
pub struct Contender<'a> {
    pub origin: &'a str,
    pub priority: u16,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub resolution: Resolution,
    pub reason: String,
}

impl Decision {
    fn new(resolution: Resolution, reason: impl Into<String>) -> Self {
        Self {
            resolution,
            reason: reason.into(),
        }
    }
}

/// Settle a collision between the `existing` and `incoming` contributions.
///
/// Under `priority`, equal priorities keep the existing entry unless only the
/// incoming side is local.
pub fn decide(strategy: ConflictStrategy, existing: &Contender<'_>, incoming: &Contender<'_>) -> Decision {
    match strategy {
        ConflictStrategy::Priority => {
            if incoming.priority > existing.priority {
                Decision::new(
                    Resolution::Replace,
                    format!(
                        "'{}' priority {} is higher than '{}' priority {}",
                        incoming.origin, incoming.priority, existing.origin, existing.priority
                    ),
                )
            } else if incoming.priority == existing.priority
                && incoming.is_local
                && !existing.is_local
            {
                Decision::new(
                    Resolution::Replace,
                    format!(
                        "equal priority {}; local source '{}' preferred",
                        incoming.priority, incoming.origin
                    ),
                )
            } else {
                Decision::new(
                    Resolution::Keep,
                    format!(
                        "'{}' priority {} does not exceed '{}' priority {}",
                        incoming.origin, incoming.priority, existing.origin, existing.priority
                    ),
                )
            }
        }
        ConflictStrategy::LocalWins => {
            if existing.is_local {
                Decision::new(
                    Resolution::Keep,
                    format!("existing entry comes from local source '{}'", existing.origin),
                )
            } else {
                Decision::new(
                    Resolution::Replace,
                    format!("'{}' replaces non-local '{}'", incoming.origin, existing.origin),
                )
            }
        }
        ConflictStrategy::Manual => Decision::new(
            Resolution::Manual,
            format!(
                "'{}' and '{}' both define this key; left for manual review",
                existing.origin, incoming.origin
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(origin: &str, priority: u16, is_local: bool) -> Contender<'_> {
        Contender {
            origin,
            priority,
            is_local,
        }
    }

    #[test]
    fn test_priority_strategy() {
        let s = ConflictStrategy::Priority;
        assert_eq!(decide(s, &c("a", 5, false), &c("b", 10, false)).resolution, Resolution::Replace);
        assert_eq!(decide(s, &c("a", 10, false), &c("b", 5, false)).resolution, Resolution::Keep);
        assert_eq!(decide(s, &c("a", 5, false), &c("b", 5, false)).resolution, Resolution::Keep);
    }

    #[test]
    fn test_priority_tie_prefers_local() {
        let s = ConflictStrategy::Priority;
        assert_eq!(decide(s, &c("r", 999, false), &c("l", 999, true)).resolution, Resolution::Replace);
        assert_eq!(decide(s, &c("l", 999, true), &c("r", 999, false)).resolution, Resolution::Keep);
    }

    #[test]
    fn test_local_wins_strategy() {
        let s = ConflictStrategy::LocalWins;
        assert_eq!(decide(s, &c("l", 0, true), &c("r", 900, false)).resolution, Resolution::Keep);
        assert_eq!(decide(s, &c("r", 900, false), &c("x", 0, false)).resolution, Resolution::Replace);
    }

    #[test]
    fn test_manual_strategy() {
        let d = decide(ConflictStrategy::Manual, &c("a", 1, false), &c("b", 2, false));
        assert_eq!(d.resolution, Resolution::Manual);
        assert!(d.reason.contains("manual review"));
    }

    #[test]
    fn test_strategy_parse_and_display() {
        assert_eq!("local-wins".parse::<ConflictStrategy>(), Ok(ConflictStrategy::LocalWins));
        assert_eq!(ConflictStrategy::LocalWins.to_string(), "local_wins");
        assert!("random".parse::<ConflictStrategy>().is_err());
    }
}
