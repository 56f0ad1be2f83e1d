use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;
use url::Url;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3 * 60;
pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.1;

/// What a region shows once it has no image to display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProblemHandling {
    /// Show the substitute image.
    #[default]
    Fallback,
    /// Render nothing.
    Hide,
    /// Surface the failure to the rendering layer.
    Error,
}

/// What happens to a region that leaves the viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum NotInViewHandling {
    /// Keep showing the cached image.
    #[default]
    Show,
    /// Render a placeholder instead of the image.
    Hide,
    /// Drop the cached image as soon as the region goes inactive.
    RemoveFromCache,
}

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL that relative image sources are resolved against.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    #[arg(
        long,
        env = "REFRESH_INTERVAL_SECS",
        default_value_t = DEFAULT_REFRESH_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub refresh_interval_secs: u64,

    #[arg(
        long,
        env = "RETRY_DELAY_SECS",
        default_value_t = DEFAULT_RETRY_DELAY_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub retry_delay_secs: u64,

    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl_secs: u64,

    #[arg(
        long,
        env = "CACHE_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub cache_sweep_interval_secs: u64,

    #[arg(long, env = "CHECK_HASH", default_value_t = true, action = ArgAction::Set)]
    pub check_hash: bool,

    #[arg(long, env = "VISIBILITY_THRESHOLD", default_value_t = DEFAULT_VISIBILITY_THRESHOLD)]
    pub visibility_threshold: f32,

    #[arg(long, env = "PROBLEM_HANDLING", value_enum, default_value_t = ProblemHandling::Fallback)]
    pub problem_handling: ProblemHandling,

    #[arg(long, env = "NOT_IN_VIEW", value_enum, default_value_t = NotInViewHandling::Show)]
    pub not_in_view: NotInViewHandling,

    /// Substitute image shown when `problem_handling` is `fallback`.
    #[arg(long, env = "FALLBACK_SRC")]
    pub fallback: Option<String>,

    /// Image sources to keep refreshed.
    pub sources: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self::parse())
    }

    pub fn base_url(&self) -> Result<Option<Url>> {
        self.base_url
            .as_deref()
            .map(|base| Url::parse(base).with_context(|| format!("invalid base url {}", base)))
            .transpose()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            check_hash: true,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
            problem_handling: ProblemHandling::default(),
            not_in_view: NotInViewHandling::default(),
            fallback: None,
            sources: Vec::new(),
        }
    }
}
