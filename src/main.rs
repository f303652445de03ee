use connlens_lib::config::{resolve_endpoint, ENDPOINT_ENV_VAR};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let endpoint = resolve_endpoint(
        std::env::args().nth(1),
        std::env::var(ENDPOINT_ENV_VAR).ok(),
    );
    connlens_lib::run(endpoint).await
}
