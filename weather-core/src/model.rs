use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// A normalized forecast request.
///
/// City and country are trimmed and guaranteed non-empty. The only way to
/// build one is [`ForecastQuery::normalize`], so every value seen by a
/// provider or the cache has gone through the same normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastQuery {
    date: NaiveDate,
    city: String,
    country: String,
}

impl ForecastQuery {
    pub fn normalize(date: NaiveDate, city: &str, country: &str) -> Result<Self, ForecastError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(ForecastError::EmptyCity);
        }

        let country = country.trim();
        if country.is_empty() {
            return Err(ForecastError::EmptyCountry);
        }

        Ok(Self {
            date,
            city: city.to_string(),
            country: country.to_string(),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    /// Key under which the aggregated answer for this query is cached.
    ///
    /// Case-insensitive on city and country, exact on date.
    pub fn cache_key(&self) -> String {
        format!(
            "forecast:{}:{}:{}",
            self.date.format("%Y-%m-%d"),
            self.city.to_lowercase(),
            self.country.to_lowercase()
        )
    }
}

/// One provider's answer for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider_name: String,
    pub temperature_celsius: Decimal,
    pub summary: String,
    pub source_url: String,
}

/// Combined answer from every provider that succeeded.
///
/// `results` may be empty when all providers failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedForecast {
    pub date: NaiveDate,
    pub city: String,
    pub country: String,
    pub results: Vec<ProviderResult>,
}

impl AggregatedForecast {
    pub fn new(query: &ForecastQuery, results: Vec<ProviderResult>) -> Self {
        Self {
            date: query.date(),
            city: query.city().to_string(),
            country: query.country().to_string(),
            results,
        }
    }
}
