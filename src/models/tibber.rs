//! Wire types for the Tibber GraphQL price query.
//!
//! Only the fields requested by the query in `crate::client` are modelled.
//! Everything is optional or defaulted so that a partially populated
//! response still decodes and the client can report what was missing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Response {
    #[serde(default)]
    pub data: Option<Data>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Data {
    #[serde(default)]
    pub viewer: Viewer,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Viewer {
    #[serde(default)]
    pub homes: Vec<Home>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Home {
    #[serde(default)]
    pub current_subscription: Option<CurrentSubscription>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSubscription {
    #[serde(default)]
    pub price_rating: Option<PriceRating>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PriceRating {
    #[serde(default)]
    pub hourly: Hourly,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Hourly {
    #[serde(default)]
    pub entries: Vec<Price>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub total: f64,
    // Offsets in the feed are local (e.g. +01:00); chrono normalises to UTC.
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub currency: String,
}
