use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    model::{ForecastQuery, ProviderResult},
    provider::{celsius, get_json, guarded_fetch},
};

use super::WeatherProvider;

const NAME: &str = "WeatherBit";
const SOURCE_URL: &str = "https://www.weatherbit.io/";

/// Days requested from the daily forecast endpoint (its maximum).
const FORECAST_DAYS: &str = "16";

#[derive(Debug, Clone)]
pub struct WeatherBitProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl WeatherBitProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: Client::new(),
        }
    }

    async fn request(&self, query: &ForecastQuery) -> Result<Option<ProviderResult>> {
        let url = format!("{}/v2.0/forecast/daily", self.base_url);

        let parsed: WbForecastResponse = get_json(
            &self.http,
            &url,
            &[
                ("city", query.city()),
                ("country", query.country()),
                ("days", FORECAST_DAYS),
                ("key", self.api_key.as_str()),
            ],
            "Weatherbit daily forecast",
        )
        .await?;

        select_forecast(&parsed, query.date())
    }
}

#[derive(Debug, Deserialize)]
struct WbCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct WbDay {
    datetime: NaiveDate,
    temp: f64,
    weather: Option<WbCondition>,
}

#[derive(Debug, Deserialize)]
struct WbForecastResponse {
    #[serde(default)]
    data: Vec<WbDay>,
}

fn select_forecast(parsed: &WbForecastResponse, date: NaiveDate) -> Result<Option<ProviderResult>> {
    let Some(day) = parsed
        .data
        .iter()
        .min_by_key(|d| (d.datetime - date).num_days().abs())
    else {
        return Ok(None);
    };

    let summary = day
        .weather
        .as_ref()
        .map(|w| w.description.clone())
        .unwrap_or_else(|| "N/A".to_string());

    Ok(Some(ProviderResult {
        provider_name: NAME.to_string(),
        temperature_celsius: celsius(day.temp)?,
        summary,
        source_url: SOURCE_URL.to_string(),
    }))
}

#[async_trait]
impl WeatherProvider for WeatherBitProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn source_url(&self) -> &'static str {
        SOURCE_URL
    }

    async fn fetch(
        &self,
        query: &ForecastQuery,
        cancel: &CancellationToken,
    ) -> Option<ProviderResult> {
        guarded_fetch(NAME, query, cancel, self.timeout, self.request(query)).await
    }
}
