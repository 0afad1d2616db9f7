//! Sport Names
//!
//! The closed set of sports the service ingests and streams. Parsing a name
//! is the only way to obtain a [`SportName`], so every layer that holds one
//! (configuration, ingestion, the stream engine) already knows it is valid.

use std::fmt;
use std::str::FromStr;

/// A sport whose lines are ingested and streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SportName {
    /// Baseball lines.
    Baseball,
    /// Football lines.
    Football,
    /// Soccer lines.
    Soccer,
}

impl SportName {
    /// Every supported sport, in canonical order.
    pub const ALL: [Self; 3] = [Self::Baseball, Self::Football, Self::Soccer];

    /// Lowercase wire name, as used by clients and the lines provider.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseball => "baseball",
            Self::Football => "football",
            Self::Soccer => "soccer",
        }
    }

    /// Comma-separated list of accepted names for error messages.
    #[must_use]
    pub fn accepted_names() -> String {
        Self::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SportName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no supported sport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sport name {0:?}")]
pub struct UnknownSport(pub String);

impl FromStr for SportName {
    type Err = UnknownSport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseball" => Ok(Self::Baseball),
            "football" => Ok(Self::Football),
            "soccer" => Ok(Self::Soccer),
            other => Err(UnknownSport(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_wire_names() {
        for sport in SportName::ALL {
            assert_eq!(sport.as_str().parse::<SportName>().unwrap(), sport);
        }
    }

    #[test]
    fn rejects_unknown_and_differently_cased_names() {
        assert_eq!(
            "tennis".parse::<SportName>(),
            Err(UnknownSport("tennis".to_string()))
        );
        assert!("Soccer".parse::<SportName>().is_err());
        assert!("".parse::<SportName>().is_err());
    }

    #[test]
    fn accepted_names_lists_every_sport() {
        assert_eq!(SportName::accepted_names(), "baseball, football, soccer");
    }
}
