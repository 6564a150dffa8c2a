//! Small error-mapping helpers shared by the adapters.

use invorto_domain::error::Error;

/// Map a reqwest error onto the domain taxonomy. Connection-level
/// failures are transient (`AdapterUnavailable`); everything else is
/// surfaced as `Http`.
pub(crate) fn from_reqwest(adapter: &str, e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::AdapterUnavailable {
            adapter: adapter.to_string(),
            message: e.to_string(),
        }
    } else {
        Error::Http(e.to_string())
    }
}

/// Map a WebSocket transport error onto the domain taxonomy.
pub(crate) fn from_ws(adapter: &str, e: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::AdapterUnavailable {
        adapter: adapter.to_string(),
        message: e.to_string(),
    }
}
