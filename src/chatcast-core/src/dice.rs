//! Dice expressions and rolling.
//!
//! Accepts `NdS`, `NdS+B`, `NdS-B` and the shorthand `dS` (one die).

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::ChatCastError;

static DICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d*)[dD](\d+)\s*(?:([+-])\s*(\d+))?$").expect("dice pattern is valid")
});

/// Upper bound on dice per roll, so a single command cannot flood chat.
pub const DEFAULT_MAX_DICE: u32 = 100;
/// Upper bound on sides per die.
pub const DEFAULT_MAX_SIDES: u32 = 1000;

/// Number of dice, sides per die and a flat bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceSpec {
    pub count: u32,
    pub sides: u32,
    #[serde(default)]
    pub bonus: i32,
}

impl Default for DiceSpec {
    fn default() -> Self {
        Self {
            count: 1,
            sides: 20,
            bonus: 0,
        }
    }
}

impl DiceSpec {
    pub fn new(count: u32, sides: u32, bonus: i32) -> Self {
        Self { count, sides, bonus }
    }

    /// Parse a roll expression with the default limits.
    pub fn parse(input: &str) -> Result<Self, ChatCastError> {
        Self::parse_with_limits(input, DEFAULT_MAX_DICE, DEFAULT_MAX_SIDES)
    }

    /// Parse a roll expression, rejecting more than `max_dice` dice or more
    /// than `max_sides` sides.
    pub fn parse_with_limits(
        input: &str,
        max_dice: u32,
        max_sides: u32,
    ) -> Result<Self, ChatCastError> {
        let trimmed = input.trim();
        let caps = DICE_RE
            .captures(trimmed)
            .ok_or_else(|| ChatCastError::parse(input, "expected NdS or NdS+B"))?;

        let count = match caps.get(1).map(|m| m.as_str()).unwrap_or_default() {
            "" => 1,
            digits => digits
                .parse::<u32>()
                .map_err(|_| ChatCastError::parse(input, "dice count is too large"))?,
        };
        let sides = caps[2]
            .parse::<u32>()
            .map_err(|_| ChatCastError::parse(input, "side count is too large"))?;
        let bonus = match (caps.get(3), caps.get(4)) {
            (Some(sign), Some(value)) => {
                let value = value
                    .as_str()
                    .parse::<i32>()
                    .map_err(|_| ChatCastError::parse(input, "bonus is too large"))?;
                if sign.as_str() == "-" { -value } else { value }
            }
            _ => 0,
        };

        let spec = Self { count, sides, bonus };
        spec.validate(max_dice, max_sides)
            .map_err(|reason| ChatCastError::parse(input, reason))?;
        Ok(spec)
    }

    fn validate(&self, max_dice: u32, max_sides: u32) -> Result<(), String> {
        if self.count == 0 {
            return Err("must roll at least one die".to_string());
        }
        if self.sides == 0 {
            return Err("dice need at least one side".to_string());
        }
        if self.count > max_dice {
            return Err(format!("at most {} dice per roll", max_dice));
        }
        if self.sides > max_sides {
            return Err(format!("at most {} sides per die", max_sides));
        }
        Ok(())
    }

    /// Smallest possible total.
    pub fn min_total(&self) -> i64 {
        i64::from(self.count) + i64::from(self.bonus)
    }

    /// Largest possible total.
    pub fn max_total(&self) -> i64 {
        i64::from(self.count) * i64::from(self.sides) + i64::from(self.bonus)
    }
}

impl fmt::Display for DiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.bonus {
            0 => Ok(()),
            b if b > 0 => write!(f, "+{}", b),
            b => write!(f, "{}", b),
        }
    }
}

/// Result of a roll: the individual dice and the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollOutcome {
    pub spec: DiceSpec,
    pub rolls: Vec<u32>,
    pub total: i64,
}

impl fmt::Display for RollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rolls = self
            .rolls
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}: [{}]", self.spec, rolls)?;
        match self.spec.bonus {
            0 => {}
            b if b > 0 => write!(f, " + {}", b)?,
            b => write!(f, " - {}", -b)?,
        }
        write!(f, " = {}", self.total)
    }
}

/// Roll `spec.count` dice with `spec.sides` sides and add the bonus.
pub fn roll_dice<R: Rng>(spec: DiceSpec, rng: &mut R) -> RollOutcome {
    let rolls: Vec<u32> = (0..spec.count)
        .map(|_| rng.random_range(1..=spec.sides))
        .collect();
    let total = rolls.iter().map(|&r| i64::from(r)).sum::<i64>() + i64::from(spec.bonus);

    RollOutcome { spec, rolls, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_parse_count_and_sides() {
        assert_eq!(DiceSpec::parse("2d6").unwrap(), DiceSpec::new(2, 6, 0));
    }

    #[test]
    fn test_parse_with_bonus() {
        assert_eq!(DiceSpec::parse("3d6+2").unwrap(), DiceSpec::new(3, 6, 2));
        assert_eq!(DiceSpec::parse(" 1D8 - 1 ").unwrap(), DiceSpec::new(1, 8, -1));
    }

    #[test]
    fn test_parse_shorthand_single_die() {
        assert_eq!(DiceSpec::parse("d20").unwrap(), DiceSpec::new(1, 20, 0));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["abc", "2dX", "20", "", "2d", "d", "2d6+", "2d6+x", "1.5d6"] {
            let err = DiceSpec::parse(input).unwrap_err();
            assert!(matches!(err, ChatCastError::Parse { .. }), "{input}");
        }
    }

    #[test]
    fn test_parse_rejects_zero_and_limits() {
        assert!(DiceSpec::parse("0d6").is_err());
        assert!(DiceSpec::parse("2d0").is_err());
        assert!(DiceSpec::parse("101d6").is_err());
        assert!(DiceSpec::parse("1d1001").is_err());
        assert!(DiceSpec::parse("99999999999d6").is_err());
        assert!(DiceSpec::parse_with_limits("5d6", 4, 6).is_err());
    }

    #[test]
    fn test_roll_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for spec in [
            DiceSpec::default(),
            DiceSpec::new(3, 6, 2),
            DiceSpec::new(10, 4, -3),
            DiceSpec::new(1, 1, 0),
        ] {
            for _ in 0..200 {
                let outcome = roll_dice(spec, &mut rng);
                assert_eq!(outcome.rolls.len(), spec.count as usize);
                assert!(outcome.total >= spec.min_total());
                assert!(outcome.total <= spec.max_total());
            }
        }
    }

    #[test]
    fn test_single_sided_die_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = roll_dice(DiceSpec::new(4, 1, 3), &mut rng);
        assert_eq!(outcome.total, 7);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(DiceSpec::new(3, 6, 2).to_string(), "3d6+2");
        assert_eq!(DiceSpec::new(1, 8, -1).to_string(), "1d8-1");

        let outcome = RollOutcome {
            spec: DiceSpec::new(3, 6, 2),
            rolls: vec![4, 1, 6],
            total: 13,
        };
        assert_eq!(outcome.to_string(), "3d6+2: [4, 1, 6] + 2 = 13");
    }
}
