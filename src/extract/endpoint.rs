use reqwest::{header::ACCEPT, StatusCode};
use tracing::info;
use url::Url;

use crate::{
    schema::{RecordSet, Value},
    EtlError, Result,
};

/// GETs `url` and turns a JSON array of flat objects into records, one object
/// per row.
pub async fn extract_from_endpoint(url: &str) -> Result<RecordSet> {
    let url = parse_http_url(url)?;
    let client = reqwest::Client::new();

    info!("Fetching records from {}", url);

    let response = client
        .get(url.as_str())
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| EtlError::Connection(format!("Failed to fetch URL {}: {}", url, e)))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(EtlError::NotFound(format!("HTTP 404 for {}", url)));
    }
    if !status.is_success() {
        return Err(EtlError::Connection(format!(
            "HTTP request failed with status {}: {}",
            status, url
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| EtlError::Connection(format!("Failed to read response body: {}", e)))?;

    info!("Received {} bytes from {}", body.len(), url);
    records_from_json(&body)
}

fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| EtlError::Parse(format!("Invalid URL '{}': {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(EtlError::Parse(format!(
                "endpoint URL requires http:// or https:// scheme, got: {}",
                scheme
            )))
        }
    }

    if url.host().is_none() {
        return Err(EtlError::Parse(format!("endpoint URL has no host: {}", raw)));
    }

    Ok(url)
}

/// Parses a JSON array of objects. Nested arrays and objects are kept as
/// their JSON text.
pub fn records_from_json(body: &str) -> Result<RecordSet> {
    let json: serde_json::Value = serde_json::from_str(body)?;

    let array = match json {
        serde_json::Value::Array(array) => array,
        _ => {
            return Err(EtlError::Parse(
                "response body must be a JSON array of objects".to_string(),
            ))
        }
    };

    let mut maps = Vec::with_capacity(array.len());
    for (index, item) in array.into_iter().enumerate() {
        match item {
            serde_json::Value::Object(object) => maps.push(
                object
                    .into_iter()
                    .map(|(key, value)| (key, Value::from_json(&value)))
                    .collect::<Vec<_>>(),
            ),
            other => {
                return Err(EtlError::Parse(format!(
                    "element {} of the response is not an object: {}",
                    index, other
                )))
            }
        }
    }

    Ok(RecordSet::from_maps(maps))
}
