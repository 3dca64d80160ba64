use std::time::Duration;

use reqflow::{BearerAuth, ClientConfig, HttpClient, RequestOptions, RetryConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    stargazers_count: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env().map_err(anyhow::Error::msg)?;
    if config.base_url.is_none() {
        config.base_url = Some("https://api.github.com".to_owned());
    }
    if config.retry.is_none() {
        config.retry = Some(RetryConfig::default().max_retries(2).retry_delay_ms(500));
    }
    let config = config.header("User-Agent", "reqflow-demo");

    let mut builder = HttpClient::builder(config);
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        builder = builder.interceptor(BearerAuth::new(token));
    }
    let client = builder.build()?;

    let options = RequestOptions::new()
        .enable_cache(true)
        .cache_time(Duration::from_secs(30));
    let response = client.get("/repos/rust-lang/rust", options.clone()).await?;
    let repo: Repo = response.json()?;
    println!(
        "{} has {} stars ({}ms, {} retries)",
        repo.full_name,
        repo.stargazers_count,
        response.duration_ms(),
        response.retry_count
    );

    let cached = client.get("/repos/rust-lang/rust", options).await?;
    println!("second call served from cache: {}", cached.from_cache);

    Ok(())
}
