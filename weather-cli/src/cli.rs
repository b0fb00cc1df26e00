use std::{fmt::Write as _, path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use chrono::{Local, NaiveDate};
use clap::{ArgAction, Parser, Subcommand};
use weather_core::{
    AggregatedForecast, CancellationToken, Config, ForecastAggregator, ProviderId,
    ProviderRegistry, ResultCache,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather forecasts aggregated from several providers")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name: "openweather", "weatherapi" or "weatherbit".
        provider: String,
    },

    /// Show the forecast for a city from every configured provider.
    Show {
        #[arg(long)]
        city: String,

        #[arg(long)]
        country: String,

        /// Date as YYYY-MM-DD; defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print the aggregated forecast as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List supported providers and whether they are configured.
    Providers,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.load_config()?;

        match self.command {
            Command::Configure { ref provider } => self.configure(config, provider)?,
            Command::Show { ref city, ref country, date, json } => {
                let date = date.unwrap_or_else(|| Local::now().date_naive());
                show(&config, date, city, country, json).await?;
            }
            Command::Providers => {
                for id in ProviderId::all() {
                    let state = if config.is_provider_configured(*id) {
                        "configured"
                    } else {
                        "not configured"
                    };
                    println!("{:<12} {:<15} {}", id, state, config.provider_base_url(*id));
                }
            }
        }

        Ok(())
    }

    fn load_config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
    }

    fn configure(&self, mut config: Config, provider: &str) -> anyhow::Result<()> {
        let id = ProviderId::try_from(provider)?;

        let api_key = inquire::Password::new(&format!("API key for {id}:"))
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        if api_key.trim().is_empty() {
            bail!("API key must not be empty");
        }
        config.upsert_provider_api_key(id, api_key.trim().to_string());

        let base_url = inquire::Text::new("Base URL:")
            .with_default(&config.provider_base_url(id))
            .prompt()
            .context("Failed to read base URL")?;
        if base_url.trim() != id.default_base_url() {
            config.set_provider_base_url(id, base_url.trim().to_string())?;
        }

        match &self.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }

        println!("Provider '{id}' configured.");
        Ok(())
    }
}

async fn show(
    config: &Config,
    date: NaiveDate,
    city: &str,
    country: &str,
    json: bool,
) -> anyhow::Result<()> {
    let registry = ProviderRegistry::from_config(config)?;
    tracing::info!(providers = registry.len(), %date, city, country, "querying forecast");
    let aggregator = ForecastAggregator::new(registry, Arc::new(ResultCache::new()));

    let cancel = CancellationToken::new();
    let on_ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = aggregator.get_forecast(date, city, country, &cancel).await;
    on_ctrl_c.abort();

    let forecast = match outcome {
        Ok(forecast) => forecast,
        Err(err) if err.is_validation() => bail!("Invalid request: {err}"),
        Err(err) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&forecast)?);
    } else {
        print!("{}", render(&forecast));
    }

    Ok(())
}

fn render(forecast: &AggregatedForecast) -> String {
    let mut out = format!(
        "Forecast for {}, {} on {}\n",
        forecast.city, forecast.country, forecast.date
    );

    if forecast.results.is_empty() {
        out.push_str("  No provider returned a forecast.\n");
        return out;
    }

    for result in &forecast.results {
        let _ = writeln!(
            out,
            "  {:<14} {:>7}°C  {}  ({})",
            result.provider_name,
            result.temperature_celsius.to_string(),
            result.summary,
            result.source_url,
        );
    }

    out
}
