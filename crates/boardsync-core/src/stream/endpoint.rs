//! Stream endpoint addressing
//!
//! Endpoints are identified by their HTTP URI. The WebSocket address is
//! derived by swapping the scheme, leaving path and query as they are.

use url::{ParseError, Url};

use crate::error::{StreamError, StreamResult};

/// Translate an HTTP(S) endpoint into its WebSocket address
///
/// `http` becomes `ws` and `https` becomes `wss`. Endpoints that already
/// use a WebSocket scheme are returned unchanged.
pub fn stream_address(endpoint: &str) -> StreamResult<String> {
    let mut url = Url::parse(endpoint.trim()).map_err(|e| invalid(endpoint, &e.to_string()))?;

    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(endpoint, &format!("unsupported scheme '{}'", other))),
    };

    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid(endpoint, "missing host"));
    }

    url.set_scheme(ws_scheme)
        .map_err(|()| invalid(endpoint, "cannot switch to a WebSocket scheme"))?;
    Ok(url.into())
}

/// Resolve an endpoint against the configured server URL
///
/// Absolute URIs are kept. Paths like `/api/...` are joined onto the path
/// of `base`; the base's own query and fragment are not carried over.
pub fn resolve(base: &str, endpoint: &str) -> StreamResult<String> {
    let endpoint = endpoint.trim();
    match Url::parse(endpoint) {
        Ok(url) => return Ok(url.into()),
        Err(ParseError::RelativeUrlWithoutBase) => {}
        Err(e) => return Err(invalid(endpoint, &e.to_string())),
    }

    if base.trim().is_empty() {
        return Err(invalid(endpoint, "relative endpoint and no server URL configured"));
    }

    let mut base_url = Url::parse(base.trim())
        .map_err(|e| invalid(endpoint, &format!("bad server URL '{}': {}", base, e)))?;
    if base_url.cannot_be_a_base() {
        return Err(invalid(endpoint, &format!("server URL '{}' cannot be a base", base)));
    }
    base_url.set_query(None);
    base_url.set_fragment(None);

    // Treat the base path as a directory so the endpoint lands under it
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }

    let joined = base_url
        .join(endpoint.trim_start_matches('/'))
        .map_err(|e| invalid(endpoint, &e.to_string()))?;
    Ok(joined.into())
}

fn invalid(endpoint: &str, details: &str) -> StreamError {
    StreamError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        details: details.to_string(),
    }
}
