//! A [`ContentStore`] backed by the HTTP API of an IPFS node.
//!
//! Requires the `reqwest-client` feature.

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{ContentHash, StoreError};
use crate::ContentStore;

#[derive(Debug, Clone)]
/// A client for the `/api/v0/add` and `/api/v0/cat` endpoints of an IPFS node.
pub struct IpfsStore {
    client: Client,
    api_url: Url,
}

/// The relevant part of the response to `/api/v0/add`.
#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsStore {
    /// Creates a new client for the node whose API is served at `api_url`, e.g.
    /// `http://127.0.0.1:5001`.
    pub fn new(api_url: Url) -> Self {
        Self {
            client: Client::new(),
            api_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.api_url
            .join(path)
            .map_err(|e| StoreError::InvalidResponse(format!("invalid API url: {}", e)))
    }
}

fn connection(e: reqwest::Error) -> StoreError {
    StoreError::Connection(e.to_string())
}

fn parse_add_response(body: &str) -> Result<ContentHash, StoreError> {
    // the node answers with one JSON object per added file, the last one being the root
    let last = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .ok_or_else(|| StoreError::InvalidResponse("empty response to add".into()))?;
    serde_json::from_str::<AddResponse>(last)
        .map(|response| ContentHash::from(response.hash))
        .map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ContentStore for IpfsStore {
    async fn put(&mut self, blob: Vec<u8>) -> Result<ContentHash, StoreError> {
        let url = self.endpoint("api/v0/add")?;
        let form = multipart::Form::new().part("file", multipart::Part::bytes(blob));
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(connection)?;
        if resp.status() != StatusCode::OK {
            return Err(StoreError::InvalidResponse(format!(
                "add returned {}",
                resp.status()
            )));
        }
        let body = resp.text().await.map_err(connection)?;
        parse_add_response(&body)
    }

    async fn get(&mut self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
        let mut url = self.endpoint("api/v0/cat")?;
        url.query_pairs_mut().append_pair("arg", hash.as_str());
        let resp = self.client.post(url).send().await.map_err(connection)?;
        match resp.status() {
            StatusCode::OK => Ok(resp.bytes().await.map_err(connection)?.to_vec()),
            // the node reports unknown or unresolvable paths as internal errors
            StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR => {
                Err(StoreError::NotFound(hash.clone()))
            }
            status => Err(StoreError::InvalidResponse(format!("cat returned {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_response() {
        let body = concat!(
            r#"{"Name":"blob","#,
            r#""Hash":"QmPChd2hVbrJ6bfo3WBcTW4iZnpHm8TEzWkLHmLpXhF68A","Size":"14"}"#,
        );
        assert_eq!(
            parse_add_response(body).unwrap(),
            ContentHash::from("QmPChd2hVbrJ6bfo3WBcTW4iZnpHm8TEzWkLHmLpXhF68A")
        );
    }

    #[test]
    fn test_parse_add_response_takes_the_root() {
        let body = concat!(
            r#"{"Name":"a","Hash":"QmA","Size":"1"}"#,
            "\n",
            r#"{"Name":"","Hash":"QmRoot","Size":"2"}"#,
            "\n",
        );
        assert_eq!(parse_add_response(body).unwrap(), ContentHash::from("QmRoot"));
    }

    #[test]
    fn test_parse_add_response_invalid() {
        assert!(matches!(
            parse_add_response(""),
            Err(StoreError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_add_response("{\"Name\":\"blob\"}"),
            Err(StoreError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_endpoints() {
        let store = IpfsStore::new(Url::parse("http://127.0.0.1:5001/").unwrap());
        assert_eq!(
            store.endpoint("api/v0/add").unwrap().as_str(),
            "http://127.0.0.1:5001/api/v0/add"
        );
    }
}
