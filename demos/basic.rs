use std::{sync::Arc, time::Duration};

use reach_http::{ApiClient, CacheOptions, ClientOptions, MemoryStore, RequestData, RequestOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut options = ClientOptions::from_env().map_err(anyhow::Error::msg)?;
    if options.base_url.is_none() {
        options = options.with_base_url("https://httpbin.org");
    }
    let client = ApiClient::new(options);

    let store = Arc::new(MemoryStore::new());
    let request_options = RequestOptions::new()
        .retries(2, Duration::from_millis(250))
        .cache(CacheOptions::new(store).ttl(Duration::from_secs(60)));

    for _ in 0..2 {
        let response = client
            .get(
                "/get",
                RequestData::new().with_query("hello", "world"),
                request_options.clone(),
            )
            .await?;
        println!(
            "status={} cached={} body={:?}",
            response.status, response.cached, response.body
        );
        // Let the cache write land before the second call.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}
