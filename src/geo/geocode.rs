use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::prelude::FromRow;

use crate::config::Config;
use crate::error::ServiceError;

#[derive(Debug, Clone)]
pub struct Geocoded {
    pub lat: f64,
    pub lon: f64,
    pub formatted_address: String,
}

#[derive(FromRow)]
struct GeocodeCacheRow {
    lat: f64,
    lon: f64,
    formatted_address: String,
}

/// 地址解析客户端，结果按地址字符串落库缓存
pub struct Geocoder {
    http: Client,
    api_key: String,
    base_url: String,
}

impl Geocoder {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            api_key: config.geocoder_api_key.clone(),
            base_url: config.geocoder_base_url.clone(),
        }
    }

    pub async fn resolve(&self, pool: &PgPool, address: &str) -> Result<Geocoded, ServiceError> {
        // 先查缓存
        let cached = sqlx::query_as::<_, GeocodeCacheRow>(
            "SELECT lat, lon, formatted_address FROM geocode_cache WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = cached {
            tracing::debug!("Geocode cache hit: {}", address);
            return Ok(Geocoded {
                lat: row.lat,
                lon: row.lon,
                formatted_address: row.formatted_address,
            });
        }

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("geocode", address),
                ("format", "json"),
                ("results", "1"),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("地理编码服务不可用: {}", e)))?;

        let data: Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("地理编码响应无效: {}", e)))?;

        let (lat, lon, formatted_address) = parse_geocode_response(&data)
            .ok_or_else(|| ServiceError::AddressNotFound(address.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO geocode_cache (address, lat, lon, formatted_address, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(address)
        .bind(lat)
        .bind(lon)
        .bind(&formatted_address)
        .execute(pool)
        .await?;

        Ok(Geocoded {
            lat,
            lon,
            formatted_address,
        })
    }
}

// 响应结构: response.GeoObjectCollection.featureMember[0].GeoObject
// 其中 Point.pos 为 "lon lat"
fn parse_geocode_response(data: &Value) -> Option<(f64, f64, String)> {
    let geo_object = data
        .get("response")?
        .get("GeoObjectCollection")?
        .get("featureMember")?
        .get(0)?
        .get("GeoObject")?;

    let pos = geo_object.get("Point")?.get("pos")?.as_str()?;
    let mut parts = pos.split_whitespace();
    let lon: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;

    let formatted = geo_object
        .get("metaDataProperty")?
        .get("GeocoderMetaData")?
        .get("text")?
        .as_str()?
        .to_string();

    Some((lat, lon, formatted))
}
