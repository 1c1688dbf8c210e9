use anyhow::Result;

pub type HttpClient = reqwest::Client;
pub type PgClient = tokio_postgres::Client;

/// Build the shared HTTP client, identified by `USER_AGENT` when set.
pub fn build_client() -> Result<HttpClient> {
    let user_agent = std::env::var("USER_AGENT")
        .unwrap_or_else(|_| format!("lode/{}", env!("CARGO_PKG_VERSION")));
    let client = reqwest::ClientBuilder::new()
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}
