//! Blocking client for the Tibber price API.
//!
//! - One GraphQL query returning hourly price entries for today and, once
//!   published, tomorrow.
//! - Uses `ureq` with a global request timeout.
//! - Non-200 status, GraphQL errors and responses without a home are all
//!   reported as `FeedError`.

use crate::models::price::{PriceEntry, PriceLevel};
use crate::models::tibber;
use std::time::Duration;

pub const DEFAULT_URL: &str = "https://api.tibber.com/v1-beta/gql";

const PRICE_QUERY: &str = r#"{
  viewer {
    homes {
      currentSubscription {
        priceRating {
          hourly {
            entries {
              total
              time
              level
              energy
              tax
              currency
            }
          }
        }
      }
    }
  }
}"#;

#[derive(Debug)]
pub enum FeedError {
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
    Api(String),
    NoHomes,
    MissingPriceRating,
}

impl core::fmt::Display for FeedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FeedError::Transport(s) => write!(f, "transport error: {}", s),
            FeedError::Http { status, message } => write!(f, "http {}: {}", status, message),
            FeedError::Json(s) => write!(f, "json error: {}", s),
            FeedError::Api(s) => write!(f, "tibber error: {}", s),
            FeedError::NoHomes => write!(f, "no homes found in response"),
            FeedError::MissingPriceRating => write!(f, "home has no subscription price rating"),
        }
    }
}

impl std::error::Error for FeedError {}

impl From<ureq::Error> for FeedError {
    fn from(value: ureq::Error) -> Self {
        FeedError::Transport(value.to_string())
    }
}

/// Source of hourly prices.
pub trait PriceFeed {
    fn fetch_prices(&self) -> Result<Vec<PriceEntry>, FeedError>;
}

pub struct TibberClient {
    agent: ureq::Agent,
    url: String,
    token: String,
}

impl TibberClient {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        TibberClient {
            agent,
            url: url.into(),
            token: token.into(),
        }
    }
}

impl PriceFeed for TibberClient {
    fn fetch_prices(&self) -> Result<Vec<PriceEntry>, FeedError> {
        let body = serde_json::json!({ "query": PRICE_QUERY });
        let mut resp = self
            .agent
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.token))
            .send_json(&body)?;

        let status = resp.status();
        let text = resp.body_mut().read_to_string()?;
        if status != http::StatusCode::OK {
            return Err(FeedError::Http {
                status: status.as_u16(),
                message: text,
            });
        }
        parse_response(&text)
    }
}

/// Decode a price query response into store entries.
pub fn parse_response(body: &str) -> Result<Vec<PriceEntry>, FeedError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    let response: tibber::Response =
        serde_path_to_error::deserialize(de).map_err(|e| FeedError::Json(format!("{} at {}", e.inner(), e.path())))?;

    if let Some(first) = response.errors.first() {
        return Err(FeedError::Api(first.message.clone()));
    }
    let home = response
        .data
        .and_then(|d| d.viewer.homes.into_iter().next())
        .ok_or(FeedError::NoHomes)?;
    let rating = home
        .current_subscription
        .and_then(|s| s.price_rating)
        .ok_or(FeedError::MissingPriceRating)?;

    Ok(rating.hourly.entries.into_iter().map(into_entry).collect())
}

fn into_entry(p: tibber::Price) -> PriceEntry {
    PriceEntry {
        timestamp: p.time,
        total: p.total,
        energy: p.energy,
        tax: p.tax,
        currency: p.currency,
        level: PriceLevel::from_label(&p.level),
    }
}
