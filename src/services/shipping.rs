//! RajaOngkir courier rate client.
//!
//! Every upstream answer is wrapped in `{ "rajaongkir": { "status": {..},
//! "results": .. } }`. Successful responses are kept in a `moka` cache for the
//! configured TTL so repeated lookups for the same route do not hit the API.

use std::sync::Arc;

use moka::future::Cache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::ShippingConfig;

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RajaOngkir returned {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Unexpected RajaOngkir response for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Province {
    pub province_id: String,
    pub province: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub city_id: String,
    pub province_id: String,
    pub province: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub city_name: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierRates {
    pub code: String,
    pub name: String,
    pub costs: Vec<ServiceRate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRate {
    pub service: String,
    pub description: String,
    pub cost: Vec<RateValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateValue {
    pub value: i64,
    pub etd: String,
    #[serde(default)]
    pub note: String,
}

/// Price of one courier service for a concrete parcel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub cost: i64,
    pub etd: Option<String>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Provinces,
    Cities { province: Option<String> },
    Cost { origin: String, destination: String, weight: u32, courier: String },
}

#[derive(Debug, Clone)]
enum CacheValue {
    Provinces(Arc<Vec<Province>>),
    Cities(Arc<Vec<City>>),
    Cost(Arc<Vec<CourierRates>>),
}

#[derive(Deserialize)]
struct Envelope {
    rajaongkir: Body,
}

#[derive(Deserialize)]
struct Body {
    status: Status,
    #[serde(default)]
    results: serde_json::Value,
}

#[derive(Deserialize)]
struct Status {
    code: u16,
    description: String,
}

#[derive(Clone)]
pub struct ShippingClient {
    inner: Arc<ShippingClientInner>,
}

struct ShippingClientInner {
    client: Client,
    api_key: SecretString,
    base_url: String,
    origin_city: String,
    cache: Cache<CacheKey, CacheValue>,
}

impl ShippingClient {
    pub fn new(config: &ShippingConfig) -> Result<Self, ShippingError> {
        let cache = Cache::builder().max_capacity(1_000).time_to_live(config.cache_ttl).build();
        Ok(Self {
            inner: Arc::new(ShippingClientInner {
                client: super::http_client()?,
                api_key: config.api_key.clone(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                origin_city: config.origin_city.clone(),
                cache,
            }),
        })
    }

    pub fn origin_city(&self) -> &str { &self.inner.origin_city }

    #[instrument(skip(self))]
    pub async fn provinces(&self) -> Result<Arc<Vec<Province>>, ShippingError> {
        if let Some(CacheValue::Provinces(hit)) = self.inner.cache.get(&CacheKey::Provinces).await {
            debug!("cache hit for provinces");
            return Ok(hit);
        }
        let request = self.inner.client.get(format!("{}/province", self.inner.base_url));
        let provinces: Arc<Vec<Province>> = Arc::new(self.send(request, "province").await?);
        self.inner.cache.insert(CacheKey::Provinces, CacheValue::Provinces(provinces.clone())).await;
        Ok(provinces)
    }

    #[instrument(skip(self))]
    pub async fn cities(&self, province: Option<&str>) -> Result<Arc<Vec<City>>, ShippingError> {
        let province = province.map(str::trim).filter(|p| !p.is_empty());
        let key = CacheKey::Cities { province: province.map(str::to_string) };
        if let Some(CacheValue::Cities(hit)) = self.inner.cache.get(&key).await {
            debug!("cache hit for cities");
            return Ok(hit);
        }
        let mut request = self.inner.client.get(format!("{}/city", self.inner.base_url));
        if let Some(province) = province {
            request = request.query(&[("province", province)]);
        }
        let cities: Arc<Vec<City>> = Arc::new(self.send(request, "city").await?);
        self.inner.cache.insert(key, CacheValue::Cities(cities.clone())).await;
        Ok(cities)
    }

    /// Rates for every service of `courier` between two cities. `origin`
    /// falls back to the configured warehouse city.
    #[instrument(skip(self))]
    pub async fn cost(
        &self,
        origin: Option<&str>,
        destination: &str,
        weight: u32,
        courier: &str,
    ) -> Result<Arc<Vec<CourierRates>>, ShippingError> {
        let origin = origin.map(str::trim).filter(|o| !o.is_empty()).unwrap_or(&self.inner.origin_city).to_string();
        // The API rejects zero-gram parcels.
        let weight = weight.max(1);
        let courier = courier.trim().to_lowercase();
        let key = CacheKey::Cost { origin: origin.clone(), destination: destination.trim().to_string(), weight, courier: courier.clone() };
        if let Some(CacheValue::Cost(hit)) = self.inner.cache.get(&key).await {
            debug!("cache hit for cost");
            return Ok(hit);
        }
        let weight_param = weight.to_string();
        let request = self.inner.client.post(format!("{}/cost", self.inner.base_url)).form(&[
            ("origin", origin.as_str()),
            ("destination", destination.trim()),
            ("weight", weight_param.as_str()),
            ("courier", courier.as_str()),
        ]);
        let rates: Arc<Vec<CourierRates>> = Arc::new(self.send(request, "cost").await?);
        self.inner.cache.insert(key, CacheValue::Cost(rates.clone())).await;
        Ok(rates)
    }

    /// Looks up a single courier service, as picked at checkout. Returns
    /// `None` when the courier does not offer that service on this route.
    pub async fn quote(&self, destination: &str, weight: u32, courier: &str, service: &str) -> Result<Option<Quote>, ShippingError> {
        let rates = self.cost(None, destination, weight, courier).await?;
        let quote = rates
            .iter()
            .flat_map(|c| c.costs.iter())
            .find(|s| s.service.eq_ignore_ascii_case(service.trim()))
            .and_then(|s| s.cost.first())
            .map(|v| Quote { cost: v.value, etd: Some(v.etd.clone()).filter(|e| !e.is_empty()) });
        Ok(quote)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, context: &str) -> Result<T, ShippingError> {
        let response = request.header("key", self.inner.api_key.expose_secret()).send().await?;
        let http_status = response.status();
        let text = response.text().await?;
        let envelope: Envelope = serde_json::from_str(&text).map_err(|source| {
            if http_status.is_success() {
                ShippingError::Deserialize { context: context.to_string(), source }
            } else {
                ShippingError::Api { code: http_status.as_u16(), description: text.chars().take(200).collect() }
            }
        })?;
        let Body { status, results } = envelope.rajaongkir;
        if status.code != 200 {
            tracing::warn!(endpoint = context, code = status.code, description = %status.description, "RajaOngkir request rejected");
            return Err(ShippingError::Api { code: status.code, description: status.description });
        }
        serde_json::from_value(results).map_err(|source| ShippingError::Deserialize { context: context.to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(base_url: &str) -> ShippingClient {
        ShippingClient::new(&ShippingConfig {
            api_key: SecretString::from("ro-key"),
            base_url: base_url.to_string(),
            origin_city: "501".into(),
            cache_ttl: Duration::from_secs(60),
        })
        .expect("client construction should not fail")
    }

    fn ok(results: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "rajaongkir": { "status": { "code": 200, "description": "OK" }, "results": results }
        }))
    }

    fn jne_rates() -> serde_json::Value {
        json!([{
            "code": "jne", "name": "Jalur Nugraha Ekakurir (JNE)",
            "costs": [
                { "service": "OKE", "description": "Ongkos Kirim Ekonomis", "cost": [{ "value": 18000, "etd": "2-3", "note": "" }] },
                { "service": "REG", "description": "Layanan Reguler", "cost": [{ "value": 22000, "etd": "1-2", "note": "" }] }
            ]
        }])
    }

    #[tokio::test]
    async fn test_identical_cost_requests_hit_upstream_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cost"))
            .and(header("key", "ro-key"))
            .and(body_string_contains("origin=501"))
            .and(body_string_contains("destination=114"))
            .respond_with(ok(jne_rates()))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let first = client.cost(None, "114", 1200, "JNE").await.unwrap();
        let second = client.cost(None, "114", 1200, "jne").await.unwrap();
        assert_eq!(first[0].costs.len(), 2);
        assert_eq!(second[0].code, "jne");
    }

    #[tokio::test]
    async fn test_quote_picks_the_requested_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/cost")).respond_with(ok(jne_rates())).mount(&server).await;

        let client = test_client(&server.uri());
        let quote = client.quote("114", 800, "jne", "reg").await.unwrap();
        assert_eq!(quote, Some(Quote { cost: 22_000, etd: Some("1-2".into()) }));
        assert_eq!(client.quote("114", 800, "jne", "YES").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cities_are_filtered_by_province() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/city"))
            .and(query_param("province", "9"))
            .respond_with(ok(json!([{
                "city_id": "23", "province_id": "9", "province": "Jawa Barat",
                "type": "Kota", "city_name": "Bandung", "postal_code": "40111"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let cities = client.cities(Some("9")).await.unwrap();
        assert_eq!(cities[0].city_name, "Bandung");
        assert_eq!(cities[0].kind, "Kota");
        client.cities(Some("9")).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_errors_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/province"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "rajaongkir": { "status": { "code": 400, "description": "Invalid key" } }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        for _ in 0..2 {
            let err = client.provinces().await.unwrap_err();
            assert!(matches!(err, ShippingError::Api { code: 400, .. }));
        }
    }
}
