use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{FORECAST_TTL, ResultCache},
    error::ForecastError,
    model::{AggregatedForecast, ForecastQuery},
    provider::ProviderRegistry,
};

/// Answers forecast requests from the cache, or by asking every registered
/// provider at once and keeping whatever succeeded.
#[derive(Debug, Clone)]
pub struct ForecastAggregator {
    registry: ProviderRegistry,
    cache: Arc<ResultCache>,
}

impl ForecastAggregator {
    pub fn new(registry: ProviderRegistry, cache: Arc<ResultCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Returns the combined forecast for `city`, `country` on `date`.
    ///
    /// Fails only on blank input or cancellation. Providers that fail are
    /// left out of `results`; if all of them fail the result list is empty.
    /// Results keep registry order.
    pub async fn get_forecast(
        &self,
        date: NaiveDate,
        city: &str,
        country: &str,
        cancel: &CancellationToken,
    ) -> Result<AggregatedForecast, ForecastError> {
        let query = ForecastQuery::normalize(date, city, country)?;
        let cache_key = query.cache_key();

        if let Some(entry) = self.cache.get(&cache_key).await {
            tracing::info!(%cache_key, "cache hit");
            return Ok(entry.value);
        }

        tracing::info!(
            %cache_key,
            providers = self.registry.len(),
            "cache miss, querying providers"
        );

        if cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }

        let calls = self
            .registry
            .providers()
            .iter()
            .map(|provider| provider.fetch(&query, cancel));

        let settled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForecastError::Cancelled),
            settled = join_all(calls) => settled,
        };

        // providers report cancellation as an absent result, so a token that
        // fired during the join must not produce a cached partial answer
        if cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }

        let results: Vec<_> = settled.into_iter().flatten().collect();
        tracing::debug!(
            %cache_key,
            succeeded = results.len(),
            failed = self.registry.len() - results.len(),
            "providers settled"
        );

        let forecast = AggregatedForecast::new(&query, results);
        self.cache.set(&cache_key, forecast.clone(), FORECAST_TTL).await;

        Ok(forecast)
    }
}
