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

const NAME: &str = "WeatherApiCom";
const SOURCE_URL: &str = "https://www.weatherapi.com/";

/// weatherapi.com: daily forecast, with the current reading as a fallback
/// when the upstream returns no forecast days.
#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: Client::new(),
        }
    }

    async fn request(&self, query: &ForecastQuery) -> Result<Option<ProviderResult>> {
        let url = format!("{}/v1/forecast.json", self.base_url);
        let location = format!("{},{}", query.city(), query.country());

        let parsed: WaForecastResponse = get_json(
            &self.http,
            &url,
            &[
                ("key", self.api_key.as_str()),
                ("q", location.as_str()),
                ("days", "3"),
                ("aqi", "no"),
                ("alerts", "no"),
            ],
            "WeatherAPI.com forecast",
        )
        .await?;

        select_forecast(&parsed, query.date())
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    avgtemp_c: f64,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    #[serde(default)]
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    current: Option<WaCurrent>,
    forecast: Option<WaForecast>,
}

fn condition_text(condition: Option<&WaCondition>) -> String {
    condition
        .map(|c| c.text.clone())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Picks the forecast day nearest to `date`. Without any forecast days the
/// current reading is returned as-is, whatever date was asked for.
fn select_forecast(parsed: &WaForecastResponse, date: NaiveDate) -> Result<Option<ProviderResult>> {
    let days = parsed
        .forecast
        .as_ref()
        .map(|f| f.forecastday.as_slice())
        .unwrap_or_default();

    let (temp, summary) = match days
        .iter()
        .min_by_key(|d| (d.date - date).num_days().abs())
    {
        Some(day) => (day.day.avgtemp_c, condition_text(day.day.condition.as_ref())),
        None => match &parsed.current {
            Some(current) => {
                tracing::debug!(provider = NAME, "no forecast days, using current conditions");
                (current.temp_c, condition_text(current.condition.as_ref()))
            }
            None => return Ok(None),
        },
    };

    Ok(Some(ProviderResult {
        provider_name: NAME.to_string(),
        temperature_celsius: celsius(temp)?,
        summary,
        source_url: SOURCE_URL.to_string(),
    }))
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
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
