//! Remote backed by another cacheprog HTTP front-end
//!
//! - `GET  /action/<actionID>` returns `{"outputID": .., "size": ..}`
//! - `GET  /output/<outputID>` returns the payload
//! - `PUT  /<actionID>/<outputID>` stores a payload, answering 204
//!
//! Every request carries the shared secret in the `secret` header.

use super::{blocking, http_agent, ActionValue, RemoteCache, RemoteEntry, MAX_BODY_SIZE};
use crate::config::schema::HttpRemoteConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::ids;
use async_trait::async_trait;
use std::io::Cursor;
use tracing::debug;

const BACKEND: &str = "http";

/// Bytes of an error response kept for the error message
const ERROR_BODY_LIMIT: u64 = 4 << 10;

pub struct HttpRemote {
    base_url: String,
    secret: String,
    agent: ureq::Agent,
}

impl HttpRemote {
    pub fn new(config: &HttpRemoteConfig) -> ProxyResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProxyError::Setting("remote.http.base_url is not set".to_string()))?;

        Ok(Self {
            base_url,
            secret: config.secret.clone().unwrap_or_default(),
            agent: http_agent(),
        })
    }
}

#[async_trait]
impl RemoteCache for HttpRemote {
    async fn get(&self, action_id: &str) -> ProxyResult<Option<RemoteEntry>> {
        let agent = self.agent.clone();
        let base_url = self.base_url.clone();
        let secret = self.secret.clone();
        let action_id = action_id.to_string();

        blocking(BACKEND, move || {
            let url = format!("{}/action/{}", base_url, action_id);
            let mut res = agent
                .get(&url)
                .header("secret", &secret)
                .call()
                .map_err(|e| ProxyError::remote(BACKEND, format!("GET {}: {}", url, e)))?;

            match res.status().as_u16() {
                200 => {}
                404 => return Ok(None),
                status => {
                    return Err(ProxyError::remote(
                        BACKEND,
                        format!("unexpected GET /action/{} status {}", action_id, status),
                    ))
                }
            }

            let raw = read_limited(res.body_mut(), ERROR_BODY_LIMIT)?;
            let action: ActionValue = serde_json::from_slice(&raw)?;
            if !ids::is_valid_hex(&action.output_id) {
                return Err(ProxyError::InvalidHex {
                    what: "output ID",
                    value: action.output_id,
                });
            }
            if action.size == 0 {
                return Ok(Some(RemoteEntry::from_bytes(action.output_id, Vec::new())));
            }

            let url = format!("{}/output/{}", base_url, action.output_id);
            let mut res = agent
                .get(&url)
                .header("secret", &secret)
                .call()
                .map_err(|e| ProxyError::remote(BACKEND, format!("GET {}: {}", url, e)))?;

            match res.status().as_u16() {
                200 => {}
                404 => return Ok(None),
                status => {
                    return Err(ProxyError::remote(
                        BACKEND,
                        format!(
                            "unexpected GET /output/{} status {}",
                            action.output_id, status
                        ),
                    ))
                }
            }
            if res.headers().get("content-length").is_none() {
                return Err(ProxyError::remote(BACKEND, "no Content-Length from server"));
            }

            let body = read_limited(res.body_mut(), MAX_BODY_SIZE)?;
            debug!("GET /output/{}: {} bytes", action.output_id, body.len());
            Ok(Some(RemoteEntry {
                output_id: action.output_id,
                size: action.size,
                body: Box::new(Cursor::new(body)),
            }))
        })
        .await
    }

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        _size: u64,
        body: Vec<u8>,
    ) -> ProxyResult<()> {
        let agent = self.agent.clone();
        let secret = self.secret.clone();
        let path = format!("/{}/{}", action_id, output_id);
        let url = format!("{}{}", self.base_url, path);

        blocking(BACKEND, move || {
            let mut res = agent
                .put(&url)
                .header("secret", &secret)
                .send(&body[..])
                .map_err(|e| ProxyError::remote(BACKEND, format!("PUT {}: {}", path, e)))?;

            let status = res.status().as_u16();
            if status != 204 {
                let detail = read_limited(res.body_mut(), ERROR_BODY_LIMIT).unwrap_or_default();
                return Err(ProxyError::remote(
                    BACKEND,
                    format!(
                        "unexpected PUT {} status {}: {}",
                        path,
                        status,
                        String::from_utf8_lossy(&detail)
                    ),
                ));
            }
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

fn read_limited(body: &mut ureq::Body, limit: u64) -> ProxyResult<Vec<u8>> {
    body.with_config()
        .limit(limit)
        .read_to_vec()
        .map_err(|e| ProxyError::remote(BACKEND, format!("reading body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn trims_trailing_slash() {
        let remote = HttpRemote::new(&HttpRemoteConfig {
            base_url: Some("http://cache.internal:31364/".to_string()),
            secret: None,
        })
        .unwrap();
        assert_eq!(remote.base_url, "http://cache.internal:31364");
        assert_eq!(remote.secret, "");
    }

    /// Serve `action_body` for `/action/aaaa` and count requests for anything else
    async fn peer(action_body: &'static str) -> (String, Arc<AtomicUsize>) {
        let others = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&others);
        let app = Router::new()
            .route("/action/aaaa", get(move || async move { action_body }))
            .fallback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "abc" }
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), others)
    }

    fn remote(base_url: String) -> HttpRemote {
        HttpRemote::new(&HttpRemoteConfig {
            base_url: Some(base_url),
            secret: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn non_hex_output_id_is_rejected_before_fetching() {
        let (url, others) = peer(r#"{"outputID":"../../evil","size":3}"#).await;

        match remote(url).get("aaaa").await {
            Err(ProxyError::InvalidHex { value, .. }) => assert_eq!(value, "../../evil"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("non-hex output ID accepted"),
        }
        assert_eq!(others.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_output_id_fetches_payload() {
        let (url, others) = peer(r#"{"outputID":"bbbb","size":3}"#).await;

        let entry = remote(url).get("aaaa").await.unwrap().unwrap();
        assert_eq!(entry.output_id, "bbbb");
        assert_eq!(entry.size, 3);
        assert_eq!(others.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_url_is_rejected() {
        let result = HttpRemote::new(&HttpRemoteConfig {
            base_url: Some(String::new()),
            secret: None,
        });
        assert!(matches!(result, Err(ProxyError::Setting(_))));
    }
}
