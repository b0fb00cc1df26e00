use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    model::{ForecastQuery, ProviderResult},
    provider::{celsius, get_json, guarded_fetch},
};

use super::WeatherProvider;

const NAME: &str = "OpenWeather";
const SOURCE_URL: &str = "https://openweathermap.org/";

/// openweathermap.org: geocodes the city, then reads the 5-day / 3-hour forecast.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: Client::new(),
        }
    }

    async fn locate(&self, query: &ForecastQuery) -> Result<OwGeo> {
        let url = format!("{}/geo/1.0/direct", self.base_url);
        let location = format!("{},{}", query.city(), query.country());

        let matches: Vec<OwGeo> = get_json(
            &self.http,
            &url,
            &[
                ("q", location.as_str()),
                ("limit", "1"),
                ("appid", self.api_key.as_str()),
            ],
            "OpenWeather geocoding",
        )
        .await?;

        matches.into_iter().next().ok_or_else(|| {
            anyhow!(
                "OpenWeather could not resolve location {}, {}",
                query.city(),
                query.country()
            )
        })
    }

    async fn request(&self, query: &ForecastQuery) -> Result<Option<ProviderResult>> {
        let geo = self.locate(query).await?;

        let url = format!("{}/data/2.5/forecast", self.base_url);
        let lat = geo.lat.to_string();
        let lon = geo.lon.to_string();

        let forecast: OwForecastResponse = get_json(
            &self.http,
            &url,
            &[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("units", "metric"),
                ("appid", self.api_key.as_str()),
            ],
            "OpenWeather forecast",
        )
        .await?;

        select_forecast(&forecast, query.date())
    }
}

#[derive(Debug, Deserialize)]
struct OwGeo {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    /// Shift from UTC in seconds.
    #[serde(default)]
    timezone: i64,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: Option<OwCity>,
    #[serde(default)]
    list: Vec<OwForecastEntry>,
}

/// Picks the 3-hour slot closest to local noon on `date`.
fn select_forecast(
    forecast: &OwForecastResponse,
    date: NaiveDate,
) -> Result<Option<ProviderResult>> {
    let offset = forecast.city.as_ref().map_or(0, |c| c.timezone);
    let target_ts = date
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp()
        .checked_add(12 * 3600)
        .and_then(|noon_utc| noon_utc.checked_sub(offset))
        .ok_or_else(|| anyhow!("OpenWeather timezone offset {offset} is out of range"))?;

    let Some(entry) = forecast
        .list
        .iter()
        .min_by_key(|e| e.dt.abs_diff(target_ts))
    else {
        return Ok(None);
    };

    let summary = entry
        .weather
        .first()
        .map(|w| w.description.clone())
        .unwrap_or_else(|| "N/A".to_string());

    Ok(Some(ProviderResult {
        provider_name: NAME.to_string(),
        temperature_celsius: celsius(entry.main.temp)?,
        summary,
        source_url: SOURCE_URL.to_string(),
    }))
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn june_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    // 2024-06-01T00:00:00Z
    const MIDNIGHT: i64 = 1_717_200_000;

    fn parse(json: &str) -> OwForecastResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn picks_slot_closest_to_utc_noon() {
        let forecast = parse(&format!(
            r#"{{
                "city": {{ "timezone": 0 }},
                "list": [
                    {{ "dt": {}, "main": {{ "temp": 15.0 }}, "weather": [{{ "description": "fog" }}] }},
                    {{ "dt": {}, "main": {{ "temp": 21.5 }}, "weather": [{{ "description": "clear sky" }}] }},
                    {{ "dt": {}, "main": {{ "temp": 18.0 }}, "weather": [{{ "description": "rain" }}] }}
                ]
            }}"#,
            MIDNIGHT + 9 * 3600,
            MIDNIGHT + 12 * 3600,
            MIDNIGHT + 15 * 3600,
        ));

        let result = select_forecast(&forecast, june_first()).unwrap().unwrap();
        assert_eq!(result.provider_name, "OpenWeather");
        assert_eq!(result.temperature_celsius, Decimal::new(215, 1));
        assert_eq!(result.summary, "clear sky");
        assert_eq!(result.source_url, "https://openweathermap.org/");
    }

    #[test]
    fn uses_city_timezone_for_local_noon() {
        // UTC+9: local noon is 03:00Z
        let forecast = parse(&format!(
            r#"{{
                "city": {{ "timezone": 32400 }},
                "list": [
                    {{ "dt": {}, "main": {{ "temp": 24.0 }}, "weather": [] }},
                    {{ "dt": {}, "main": {{ "temp": 19.0 }}, "weather": [] }}
                ]
            }}"#,
            MIDNIGHT + 3 * 3600,
            MIDNIGHT + 12 * 3600,
        ));

        let result = select_forecast(&forecast, june_first()).unwrap().unwrap();
        assert_eq!(result.temperature_celsius, Decimal::new(24, 0));
        assert_eq!(result.summary, "N/A");
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let forecast = parse(&format!(
            r#"{{
                "list": [
                    {{ "dt": {}, "main": {{ "temp": 5.0 }}, "weather": [] }},
                    {{ "dt": {}, "main": {{ "temp": 21.0 }}, "weather": [] }}
                ]
            }}"#,
            i64::MIN + 1,
            MIDNIGHT + 12 * 3600,
        ));

        let result = select_forecast(&forecast, june_first()).unwrap().unwrap();
        assert_eq!(result.temperature_celsius, Decimal::new(21, 0));
    }

    #[test]
    fn out_of_range_timezone_is_an_error() {
        let forecast = parse(&format!(
            r#"{{
                "city": {{ "timezone": {} }},
                "list": [ {{ "dt": {}, "main": {{ "temp": 21.0 }}, "weather": [] }} ]
            }}"#,
            i64::MIN + 1,
            MIDNIGHT,
        ));

        let err = select_forecast(&forecast, june_first()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn empty_list_yields_nothing() {
        let forecast = parse(r#"{ "list": [] }"#);
        assert!(select_forecast(&forecast, june_first()).unwrap().is_none());
    }

    mod http {
        use super::*;
        use crate::provider::canned_http::{CannedServer, Route};

        fn provider(server: &CannedServer) -> OpenWeatherProvider {
            OpenWeatherProvider::new("KEY".into(), server.base_url.clone(), Duration::from_secs(5))
        }

        fn paris() -> ForecastQuery {
            ForecastQuery::normalize(june_first(), "Paris", "FR").unwrap()
        }

        #[tokio::test]
        async fn geocodes_then_reads_forecast() {
            let server = CannedServer::start(vec![
                Route::new("/geo/1.0/direct", 200, r#"[{ "lat": 48.85, "lon": 2.35 }]"#),
                Route::new(
                    "/data/2.5/forecast",
                    200,
                    format!(
                        r#"{{ "city": {{ "timezone": 0 }}, "list": [
                            {{ "dt": {}, "main": {{ "temp": 21.5 }}, "weather": [{{ "description": "clear sky" }}] }}
                        ] }}"#,
                        MIDNIGHT + 12 * 3600
                    ),
                ),
            ])
            .await;

            let result = provider(&server)
                .fetch(&paris(), &CancellationToken::new())
                .await
                .expect("forecast should be returned");
            assert_eq!(result.temperature_celsius, Decimal::new(215, 1));
            assert_eq!(result.summary, "clear sky");

            let requests = server.requests();
            assert_eq!(requests.len(), 2);
            assert!(requests[0].starts_with("/geo/1.0/direct?"));
            assert!(requests[0].contains("q=Paris%2CFR"));
            assert!(requests[0].contains("limit=1"));
            assert!(requests[0].contains("appid=KEY"));
            assert!(requests[1].starts_with("/data/2.5/forecast?"));
            assert!(requests[1].contains("lat=48.85"));
            assert!(requests[1].contains("lon=2.35"));
            assert!(requests[1].contains("units=metric"));
            assert!(requests[1].contains("appid=KEY"));
        }

        #[tokio::test]
        async fn unresolved_location_is_absent() {
            let server = CannedServer::start(vec![Route::new("/geo/1.0/direct", 200, "[]")]).await;

            let result = provider(&server).fetch(&paris(), &CancellationToken::new()).await;

            assert!(result.is_none());
            assert_eq!(server.requests().len(), 1, "forecast must not be requested");
        }

        #[tokio::test]
        async fn server_error_is_absent() {
            let server =
                CannedServer::start(vec![Route::new("/geo/1.0/direct", 503, "unavailable")]).await;

            assert!(provider(&server).fetch(&paris(), &CancellationToken::new()).await.is_none());
        }

        #[tokio::test]
        async fn malformed_forecast_body_is_absent() {
            let server = CannedServer::start(vec![
                Route::new("/geo/1.0/direct", 200, r#"[{ "lat": 48.85, "lon": 2.35 }]"#),
                Route::new("/data/2.5/forecast", 200, r#"{ "list": "nope" }"#),
            ])
            .await;

            assert!(provider(&server).fetch(&paris(), &CancellationToken::new()).await.is_none());
        }
    }
}
