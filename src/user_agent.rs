//! User-Agent string sent by the HTTP backend.

/// Default User-Agent for transfer and probe requests (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("dataset-fetcher/{version}")
}
