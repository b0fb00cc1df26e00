use crate::{
    Config, ForecastQuery, ProviderResult,
    provider::{
        openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider,
        weatherbit::WeatherBitProvider,
    },
};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::{convert::TryFrom, fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub mod openweather;
pub mod weatherapi;
pub mod weatherbit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    WeatherBit,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::WeatherBit => "weatherbit",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi, ProviderId::WeatherBit]
    }

    /// Upstream API root used when the config does not override it.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "https://api.openweathermap.org",
            ProviderId::WeatherApi => "https://api.weatherapi.com",
            ProviderId::WeatherBit => "https://api.weatherbit.io",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "weatherbit" => Ok(ProviderId::WeatherBit),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, weatherbit."
            )),
        }
    }
}

/// An upstream forecast source.
///
/// `fetch` never fails: every problem (network, status, payload shape, no
/// usable data, timeout, cancellation) is logged by the provider and
/// reported as `None`.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Name used to attribute results, e.g. "OpenWeather".
    fn name(&self) -> &'static str;

    /// Human-facing page of the upstream service.
    fn source_url(&self) -> &'static str;

    async fn fetch(
        &self,
        query: &ForecastQuery,
        cancel: &CancellationToken,
    ) -> Option<ProviderResult>;
}

/// Runs a provider's request under the caller's cancellation token and a
/// timeout, turning every failure into `None` plus a warning.
pub async fn guarded_fetch<F>(
    provider: &str,
    query: &ForecastQuery,
    cancel: &CancellationToken,
    timeout: Duration,
    request: F,
) -> Option<ProviderResult>
where
    F: Future<Output = anyhow::Result<Option<ProviderResult>>>,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(provider, "request cancelled");
            return None;
        }
        outcome = tokio::time::timeout(timeout, request) => outcome,
    };

    match outcome {
        Ok(Ok(Some(result))) => Some(result),
        Ok(Ok(None)) => {
            tracing::warn!(
                provider,
                city = query.city(),
                country = query.country(),
                date = %query.date(),
                "no usable forecast data"
            );
            None
        }
        Ok(Err(err)) => {
            tracing::warn!(
                provider,
                city = query.city(),
                country = query.country(),
                date = %query.date(),
                cause = %format!("{err:#}"),
                "provider request failed"
            );
            None
        }
        Err(_) => {
            tracing::warn!(
                provider,
                timeout_ms = timeout.as_millis() as u64,
                "provider request timed out"
            );
            None
        }
    }
}

/// The fixed, ordered set of providers consulted on every request.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn WeatherProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>) -> Self {
        Self { providers }
    }

    /// Builds every provider that has an API key configured, in
    /// [`ProviderId::all`] order.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let providers: Vec<Arc<dyn WeatherProvider>> = ProviderId::all()
            .iter()
            .filter_map(|id| provider_from_config(*id, config).ok())
            .collect();

        if providers.is_empty() {
            return Err(anyhow::anyhow!(
                "No providers configured.\n\
                 Hint: run `weather configure <provider>` (e.g. `weather configure openweather`) first."
            ));
        }

        Ok(Self { providers })
    }

    pub fn providers(&self) -> &[Arc<dyn WeatherProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let api_key = config
        .provider_api_key(id)
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow!(
                "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
            )
        })?;

    let base_url = config.provider_base_url(id);
    let timeout = config.request_timeout();

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => Arc::new(OpenWeatherProvider::new(
            api_key.to_owned(),
            base_url,
            timeout,
        )),
        ProviderId::WeatherApi => {
            Arc::new(WeatherApiProvider::new(api_key.to_owned(), base_url, timeout))
        }
        ProviderId::WeatherBit => {
            Arc::new(WeatherBitProvider::new(api_key.to_owned(), base_url, timeout))
        }
    };

    Ok(provider)
}

/// GET `url` and decode a JSON body, treating non-2xx statuses as errors.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &Client,
    url: &str,
    params: &[(&str, &str)],
    what: &str,
) -> anyhow::Result<T> {
    let res = http
        .get(url)
        .query(params)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {what}"))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .with_context(|| format!("Failed to read {what} response body"))?;

    if !status.is_success() {
        return Err(anyhow!(
            "{what} request failed with status {}: {}",
            status,
            truncate_body(&body),
        ));
    }

    serde_json::from_str(&body).with_context(|| format!("Failed to parse {what} JSON"))
}

/// Converts an upstream float reading into a two-decimal Celsius value.
pub(crate) fn celsius(value: f64) -> anyhow::Result<Decimal> {
    let temp = Decimal::try_from(value)
        .with_context(|| format!("Temperature {value} is not representable"))?;
    Ok(temp.round_dp(2))
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn query() -> ForecastQuery {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        ForecastQuery::normalize(date, "Paris", "FR").unwrap()
    }

    fn sample() -> ProviderResult {
        ProviderResult {
            provider_name: "Test".into(),
            temperature_celsius: Decimal::new(215, 1),
            summary: "clear".into(),
            source_url: "https://example.com/".into(),
        }
    }

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn provider_id_parse_is_case_insensitive() {
        assert_eq!(ProviderId::try_from("WeatherBit").unwrap(), ProviderId::WeatherBit);
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(ProviderId::OpenWeather, &cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured for provider"));
    }

    #[test]
    fn registry_from_config_errors_when_nothing_configured() {
        let err = ProviderRegistry::from_config(&Config::default()).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No providers configured"));
        assert!(msg.contains("Hint: run `weather configure"));
    }

    #[test]
    fn registry_from_config_keeps_declaration_order() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherBit, "BIT".to_string());
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN".to_string());

        let registry = ProviderRegistry::from_config(&cfg).unwrap();
        let names: Vec<_> = registry.providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["OpenWeather", "WeatherBit"]);
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "é".repeat(300);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 203);
    }

    #[test]
    fn celsius_rounds_to_two_places() {
        assert_eq!(celsius(21.5).unwrap(), Decimal::new(215, 1));
        assert_eq!(celsius(18.456).unwrap(), Decimal::new(1846, 2));
    }

    #[test]
    fn celsius_rejects_nan() {
        assert!(celsius(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn get_json_rejects_error_status() {
        use canned_http::{CannedServer, Route};

        let server =
            CannedServer::start(vec![Route::new("/boom", 503, r#"{"error":"down"}"#)]).await;
        let url = format!("{}/boom", server.base_url);

        let err = get_json::<serde_json::Value>(&Client::new(), &url, &[("a", "b")], "Test API")
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("Test API request failed with status 503"));
        assert!(msg.contains("down"));
        assert_eq!(server.requests(), vec!["/boom?a=b".to_string()]);
    }

    #[tokio::test]
    async fn get_json_rejects_unparsable_body() {
        use canned_http::{CannedServer, Route};

        let server = CannedServer::start(vec![Route::new("/", 200, "<html>oops</html>")]).await;

        let err = get_json::<serde_json::Value>(&Client::new(), &server.base_url, &[], "Test API")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse Test API JSON"));
    }

    #[tokio::test]
    async fn guarded_fetch_passes_through_success() {
        let out = guarded_fetch(
            "test",
            &query(),
            &CancellationToken::new(),
            Duration::from_secs(1),
            async { anyhow::Ok(Some(sample())) },
        )
        .await;
        assert_eq!(out, Some(sample()));
    }

    #[tokio::test]
    async fn guarded_fetch_absorbs_errors() {
        let out = guarded_fetch(
            "test",
            &query(),
            &CancellationToken::new(),
            Duration::from_secs(1),
            async { Err::<Option<ProviderResult>, _>(anyhow::anyhow!("HTTP 500")) },
        )
        .await;
        assert!(out.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_fetch_times_out() {
        let out = guarded_fetch(
            "test",
            &query(),
            &CancellationToken::new(),
            Duration::from_secs(5),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::Ok(Some(sample()))
            },
        )
        .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn guarded_fetch_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = guarded_fetch(
            "test",
            &query(),
            &cancel,
            Duration::from_secs(3600),
            std::future::pending::<anyhow::Result<Option<ProviderResult>>>(),
        )
        .await;
        assert!(out.is_none());
    }
}
