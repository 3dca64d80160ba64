use reqflow::{ClientConfig, HttpClient, RequestOptions};

/// Path fetched from the live endpoint; defaults to the root.
fn live_path() -> String {
    std::env::var("REQFLOW_LIVE_PATH").unwrap_or_else(|_| "/".to_owned())
}

fn load_live_client() -> Result<HttpClient, String> {
    let config = ClientConfig::from_env()?;
    if config.base_url.is_none() {
        return Err("REQFLOW_BASE_URL is required".to_owned());
    }
    HttpClient::new(config).map_err(|err| err.to_string())
}

#[tokio::test]
async fn live_get_is_cached_and_tracked() {
    let client = match load_live_client() {
        Ok(client) => client,
        Err(reason) => {
            eprintln!("skipping live test: {reason}");
            return;
        }
    };

    let options = RequestOptions::new().enable_cache(true);
    let first = client
        .get(live_path(), options.clone())
        .await
        .expect("live request must succeed");
    assert!(!first.from_cache);
    assert!(first.request_id.is_some());

    let second = client
        .get(live_path(), options)
        .await
        .expect("cached request must succeed");
    assert!(second.from_cache);
    assert_eq!(first.body, second.body);
    assert!(client.pending_request_ids().is_empty());

    client.shutdown(None);
    assert_eq!(client.cache_len(), 0);
}
