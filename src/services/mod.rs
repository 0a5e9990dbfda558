//! Clients for the third-party services the storefront talks to.

pub mod media;
pub mod payment;
pub mod shipping;

use std::time::Duration;

use reqwest::Client;

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("shopfront/", env!("CARGO_PKG_VERSION")))
        .build()
}
