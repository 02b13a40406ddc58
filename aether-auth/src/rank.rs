//! Officer rank, used only by the emergency-reallocation edge policy
//! (§4.2: "approved_by_rank ≥ O-5").

use std::fmt;
use std::str::FromStr;

/// An O-scale officer rank, O-1 through O-10. Ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OfficerRank(pub u8);

impl fmt::Display for OfficerRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O-{}", self.0)
    }
}

impl FromStr for OfficerRank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("O-")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=10).contains(n))
            .map(OfficerRank)
            .ok_or_else(|| format!("invalid officer rank: '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders() {
        let o5: OfficerRank = "O-5".parse().unwrap();
        let o6: OfficerRank = "O-6".parse().unwrap();
        assert!(o6 > o5);
        assert_eq!(o5.to_string(), "O-5");
    }

    #[test]
    fn rejects_malformed_rank() {
        assert!("O-99".parse::<OfficerRank>().is_err());
        assert!("E-5".parse::<OfficerRank>().is_err());
    }
}
