//! Domain types for hourly spot prices as held by the price store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse price level of one hour relative to its surroundings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    Low,
    Normal,
    High,
}

impl PriceLevel {
    /// Map a feed label onto the three-step scale.
    ///
    /// The feed uses a five-step scale (`VERY_CHEAP` .. `VERY_EXPENSIVE`);
    /// labels already on the three-step scale are accepted too. Unknown
    /// labels fall back to `Normal`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "VERY_CHEAP" | "CHEAP" | "LOW" => PriceLevel::Low,
            "EXPENSIVE" | "VERY_EXPENSIVE" | "HIGH" => PriceLevel::High,
            _ => PriceLevel::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceLevel::Low => "LOW",
            PriceLevel::Normal => "NORMAL",
            PriceLevel::High => "HIGH",
        }
    }
}

impl core::fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hour's price record. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEntry {
    /// Start of the hour this price applies to.
    pub timestamp: DateTime<Utc>,
    pub total: f64,
    pub energy: f64,
    pub tax: f64,
    pub currency: String,
    pub level: PriceLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_step_labels_collapse_to_three() {
        assert_eq!(PriceLevel::from_label("VERY_CHEAP"), PriceLevel::Low);
        assert_eq!(PriceLevel::from_label("cheap"), PriceLevel::Low);
        assert_eq!(PriceLevel::from_label("NORMAL"), PriceLevel::Normal);
        assert_eq!(PriceLevel::from_label("expensive"), PriceLevel::High);
        assert_eq!(PriceLevel::from_label("VERY_EXPENSIVE"), PriceLevel::High);
        assert_eq!(PriceLevel::from_label("something else"), PriceLevel::Normal);
    }

    #[test]
    fn level_serializes_as_screaming_name() {
        let s = serde_json::to_string(&PriceLevel::High).unwrap();
        assert_eq!(s, "\"HIGH\"");
        assert_eq!(PriceLevel::Low.to_string(), "LOW");
    }
}
