//! Optional process-wide client handle.
//!
//! Nothing here is initialized implicitly: [`default_client`] returns `None`
//! until [`init_default`] is called.

use std::sync::{PoisonError, RwLock};

use crate::HttpClient;

static DEFAULT_CLIENT: RwLock<Option<HttpClient>> = RwLock::new(None);

/// Installs `client` as the default handle and returns the previous one.
pub fn init_default(client: HttpClient) -> Option<HttpClient> {
    DEFAULT_CLIENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(client)
}

pub fn default_client() -> Option<HttpClient> {
    DEFAULT_CLIENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Removes the default handle, shutting it down. Returns `false` if none was
/// installed.
pub fn shutdown_default(reason: Option<&str>) -> bool {
    let previous = DEFAULT_CLIENT
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match previous {
        Some(client) => {
            client.shutdown(reason);
            true
        }
        None => false,
    }
}
