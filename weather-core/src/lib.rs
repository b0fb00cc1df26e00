//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - The forecast aggregation engine (cache lookup, concurrent provider fan-out, merge)
//! - Abstraction over weather providers, with OpenWeather, WeatherAPI.com and Weatherbit
//! - Configuration & credentials handling
//! - Shared domain models (queries, provider results, aggregated forecasts)
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;

pub use aggregator::ForecastAggregator;
pub use cache::{CacheEntry, FORECAST_TTL, ResultCache};
pub use config::{Config, ProviderConfig};
pub use error::ForecastError;
pub use model::{AggregatedForecast, ForecastQuery, ProviderResult};
pub use provider::{ProviderId, ProviderRegistry, WeatherProvider};
pub use tokio_util::sync::CancellationToken;
