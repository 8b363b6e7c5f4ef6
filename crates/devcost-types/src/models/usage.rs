use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Token counts for a single interaction (or an aggregate of several)
///
/// `total` is always `input + output`. The fields are private so the
/// invariant cannot be broken after construction, and deserialization
/// recomputes `total` instead of trusting the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawTokenUsage")]
pub struct TokenUsage {
    input: u64,
    output: u64,
    total: u64,
}

/// Wire shape accepted on deserialization (`total` is ignored)
#[derive(Deserialize)]
struct RawTokenUsage {
    #[serde(default)]
    input: u64,
    #[serde(default)]
    output: u64,
    #[serde(default)]
    #[allow(dead_code)]
    total: Option<u64>,
}

impl From<RawTokenUsage> for TokenUsage {
    fn from(raw: RawTokenUsage) -> Self {
        Self::new(raw.input, raw.output)
    }
}

impl TokenUsage {
    /// Build a usage value; `total` is derived
    ///
    /// Counts saturate at `u64::MAX`: `output` is clamped to the room left
    /// above `input`, so `total == input + output` holds exactly.
    pub fn new(input: u64, output: u64) -> Self {
        let output = output.min(u64::MAX - input);
        Self {
            input,
            output,
            total: input + output,
        }
    }

    pub fn input(&self) -> u64 {
        self.input
    }

    pub fn output(&self) -> u64 {
        self.output
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage::new(
            self.input.saturating_add(rhs.input),
            self.output.saturating_add(rhs.output),
        )
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), |acc, u| acc + u)
    }
}

impl<'a> Sum<&'a TokenUsage> for TokenUsage {
    fn sum<I: Iterator<Item = &'a TokenUsage>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
