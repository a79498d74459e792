//! Global tracing setup, trimmed down from
//! `firezone-firezone/rust/libs/logging`: an `EnvFilter` built from a
//! directives string, with either a human-readable or JSON formatter.
//!
//! Logging itself is an out-of-scope external collaborator (§1 "Out of
//! scope"); this crate is the one seam every in-scope component uses to
//! reach it, so every worker gets the same format and filtering regardless
//! of which binary links it in.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Crates that are noisy at `info` and are silenced by default unless the
/// caller's directives string overrides them explicitly.
const QUIET_BY_DEFAULT: &str = "hyper=warn,reqwest=warn,rustls=warn";

/// Installs a global [`tracing`] subscriber.
///
/// `directives` follows `tracing_subscriber::EnvFilter` syntax (e.g.
/// `"info,resolver=debug"`); an empty string defaults to `"info"`.
pub fn init(directives: &str, json: bool) -> Result<()> {
    let directives = if directives.is_empty() {
        "info"
    } else {
        directives
    };

    let filter = build_filter(directives).context("Failed to parse log directives")?;

    let subscriber = Registry::default().with(match json {
        true => fmt::layer()
            .json()
            .flatten_event(true)
            .with_filter(filter)
            .boxed(),
        false => fmt::layer().with_filter(filter).boxed(),
    });

    subscriber
        .try_init()
        .context("Failed to install global tracing subscriber")?;

    Ok(())
}

/// Sets up a bootstrap logger for use before [`init`] is called (e.g. while
/// parsing configuration), matching the teacher's `setup_bootstrap`.
pub fn init_bootstrap() -> tracing::subscriber::DefaultGuard {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = build_filter(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(fmt::layer().with_filter(filter));

    tracing::dispatcher::set_default(&subscriber.into())
}

fn build_filter(directives: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::builder().parse(format!("{QUIET_BY_DEFAULT},{directives}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_filter_from_directives() {
        build_filter("info,netenv=debug").unwrap();
    }
}
