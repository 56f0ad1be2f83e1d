use anyhow::{bail, Context, Result};
use cached_image::{Callbacks, Config, HttpClient, ImageService};
use time::macros::format_description;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime::new(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        )))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    if config.sources.is_empty() {
        bail!("no image sources given");
    }

    let client = HttpClient::new(config.base_url()?).context("failed to build http client")?;
    let service = ImageService::new(config.clone(), client);

    let callbacks = Callbacks::default()
        .on_ready(|resource| info!(resource = %resource, "Image ready"))
        .on_error(|resource, e| {
            if e.is_not_found() {
                warn!(resource = %resource, "Image unavailable");
            } else {
                error!(resource = %resource, error = %e, "Image error");
            }
        });

    let regions: Vec<_> = config
        .sources
        .iter()
        .map(|source| {
            let options = service.default_options().with_callbacks(callbacks.clone());
            let region = service.region(source.as_str(), options);
            region.tracker().mount();
            region.tracker().set_intersection(1.0);
            region
        })
        .collect();

    info!(sources = regions.len(), "Watching images, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!(cached = service.store().len(), "Shutting down");
    drop(regions);
    Ok(())
}
