use std::sync::Arc;

use albumlist_worker::tasks::{AlbumOfTheDay, CheckAllUrls};
use albumlist_worker::{
    BandcampScraper, PgAlbumStore, RedisCache, Services, SlackChat, WorkerConfig, WorkerOptions,
};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

fn enable_logs() -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer();
    // sqlx at warn so every query is not logged
    let filter_layer =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info,sqlx=warn"))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    enable_logs()?;

    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url())
        .await?;

    let services = Services::new(
        Arc::new(PgAlbumStore::connect(pg_pool, config.schema()).await?),
        Arc::new(BandcampScraper::new(*config.call_timeout())?),
        Arc::new(SlackChat::new(config.slack_token().clone(), *config.call_timeout())?),
        Arc::new(RedisCache::from_url(config.redis_url(), config.cache_prefix().as_str())?),
    );

    let mut options = WorkerOptions::default()
        .redis_url(config.redis_url())
        .queue_name(config.queue_name())
        .concurrency(*config.concurrency())
        .result_ttl(*config.result_ttl())
        .call_timeout(*config.call_timeout())
        .services(services)
        .define_albumlist_jobs();

    if let Some(every) = config.check_urls_interval() {
        info!(every_secs = every.as_secs(), "Scheduling url checks");
        options = options.sweep(CheckAllUrls::default(), *every)?;
    }

    if let Some(channel) = config.album_of_the_day_channel() {
        let every = *config.album_of_the_day_interval();
        info!(%channel, every_secs = every.as_secs(), "Scheduling album of the day");
        options = options.sweep(
            AlbumOfTheDay {
                channel: channel.clone(),
            },
            every,
        )?;
    }

    options.init().await?.run().await?;

    Ok(())
}
