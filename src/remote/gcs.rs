//! Cloud Storage remote
//!
//! Each action is one object, `cache/<cache_key>/<goarch>/<goos>/<actionID>`,
//! holding the zstd-compressed payload. The output ID and the uncompressed
//! length live in the object's custom metadata. Requests go through the JSON
//! API, so any compatible endpoint (an emulator, for instance) works.

use super::token::AccessTokenProvider;
use super::{blocking, http_agent, RemoteCache, RemoteEntry, MAX_BODY_SIZE};
use crate::config::schema::GcsConfig;
use crate::error::{ProxyError, ProxyResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::RwLock;
use tracing::debug;
use zstd::stream::{decode_all as zstd_decode, encode_all as zstd_encode};

const BACKEND: &str = "gcs";

const OUTPUT_ID_KEY: &str = "outputid";
const RAW_LENGTH_KEY: &str = "content-length-raw";
const BINARY_TYPE: &str = "application/octet-stream";
const BOUNDARY: &str = "cacheprog-part-boundary-5f3b1c";
const COMPRESSION_LEVEL: i32 = 3;

/// Object resource, reduced to the fields we read or write
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    content_type: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl ObjectResource {
    /// Output ID and uncompressed size; `None` if either is missing
    fn cache_metadata(&self) -> ProxyResult<Option<(String, u64)>> {
        let output_id = match self.metadata.get(OUTPUT_ID_KEY) {
            Some(id) if !id.is_empty() => id.clone(),
            _ => return Ok(None),
        };
        let size = match self.metadata.get(RAW_LENGTH_KEY) {
            Some(raw) if !raw.is_empty() => raw.parse::<u64>().map_err(|e| {
                ProxyError::remote(BACKEND, format!("bad {} {:?}: {}", RAW_LENGTH_KEY, raw, e))
            })?,
            _ => return Ok(None),
        };
        Ok(Some((output_id, size)))
    }
}

pub struct GcsRemote {
    endpoint: String,
    bucket: String,
    prefix: String,
    tokens: AccessTokenProvider,
    agent: ureq::Agent,
    /// Actions known to exist remotely; puts for them are skipped
    known: RwLock<HashSet<String>>,
}

impl GcsRemote {
    pub fn new(config: &GcsConfig) -> ProxyResult<Self> {
        if config.bucket.is_empty() {
            return Err(ProxyError::Setting("remote.gcs.bucket is not set".to_string()));
        }

        let prefix = object_prefix(&config.cache_key, &target_arch(), &target_os());
        debug!("GCS objects under gs://{}/{}", config.bucket, prefix);

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            prefix,
            tokens: AccessTokenProvider::from_env(config.service_account.clone()),
            agent: http_agent(),
            known: RwLock::new(HashSet::new()),
        })
    }

    fn object_name(&self, action_id: &str) -> String {
        format!("{}/{}", self.prefix, action_id)
    }

    fn object_url(&self, action_id: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(&self.object_name(action_id))
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=multipart",
            self.endpoint,
            urlencoding::encode(&self.bucket)
        )
    }

    fn is_known(&self, action_id: &str) -> bool {
        self.known
            .read()
            .map(|known| known.contains(action_id))
            .unwrap_or(false)
    }

    fn mark_known(&self, action_id: &str) {
        if let Ok(mut known) = self.known.write() {
            known.insert(action_id.to_string());
        }
    }
}

#[async_trait]
impl RemoteCache for GcsRemote {
    async fn get(&self, action_id: &str) -> ProxyResult<Option<RemoteEntry>> {
        let token = self.tokens.token().await?;
        let agent = self.agent.clone();
        let url = self.object_url(action_id);

        blocking(BACKEND, move || {
            let Some(object) = fetch_metadata(&agent, &url, &token)? else {
                return Ok(None);
            };
            let Some((output_id, size)) = object.cache_metadata()? else {
                debug!("{} has no cache metadata", url);
                return Ok(None);
            };

            let media_url = format!("{}?alt=media", url);
            let mut res = agent
                .get(&media_url)
                .header("Authorization", &format!("Bearer {}", token))
                .call()
                .map_err(|e| ProxyError::remote(BACKEND, format!("GET {}: {}", media_url, e)))?;
            match res.status().as_u16() {
                200 => {}
                404 => return Ok(None),
                status => {
                    return Err(ProxyError::remote(
                        BACKEND,
                        format!("unexpected media status {}", status),
                    ))
                }
            }

            let compressed = res
                .body_mut()
                .with_config()
                .limit(MAX_BODY_SIZE)
                .read_to_vec()
                .map_err(|e| ProxyError::remote(BACKEND, format!("reading object: {}", e)))?;
            let body = zstd_decode(&compressed[..])
                .map_err(|e| ProxyError::remote(BACKEND, format!("decompressing object: {}", e)))?;

            Ok(Some(RemoteEntry {
                output_id,
                size,
                body: Box::new(Cursor::new(body)),
            }))
        })
        .await
    }

    async fn put(
        &self,
        action_id: &str,
        output_id: &str,
        size: u64,
        body: Vec<u8>,
    ) -> ProxyResult<()> {
        if self.is_known(action_id) {
            return Ok(());
        }

        let token = self.tokens.token().await?;
        let agent = self.agent.clone();
        let object_url = self.object_url(action_id);
        let upload_url = self.upload_url();
        let resource = ObjectResource {
            name: self.object_name(action_id),
            content_type: BINARY_TYPE.to_string(),
            metadata: HashMap::from([
                (OUTPUT_ID_KEY.to_string(), output_id.to_string()),
                (RAW_LENGTH_KEY.to_string(), size.to_string()),
            ]),
        };

        blocking(BACKEND, move || {
            if let Ok(Some(_)) = fetch_metadata(&agent, &object_url, &token) {
                debug!("{} already uploaded", resource.name);
                return Ok(());
            }

            let compressed = zstd_encode(&body[..], COMPRESSION_LEVEL)
                .map_err(|e| ProxyError::remote(BACKEND, format!("compressing object: {}", e)))?;
            let payload = multipart_body(&resource, &compressed)?;

            let mut res = agent
                .post(&upload_url)
                .header("Authorization", &format!("Bearer {}", token))
                .header(
                    "Content-Type",
                    &format!("multipart/related; boundary={}", BOUNDARY),
                )
                .send(&payload[..])
                .map_err(|e| ProxyError::remote(BACKEND, format!("upload: {}", e)))?;

            let status = res.status().as_u16();
            if !(200..300).contains(&status) {
                let detail = res
                    .body_mut()
                    .with_config()
                    .limit(4 << 10)
                    .read_to_string()
                    .unwrap_or_default();
                return Err(ProxyError::remote(
                    BACKEND,
                    format!("upload status {}: {}", status, detail),
                ));
            }
            Ok(())
        })
        .await?;

        self.mark_known(action_id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// Fetch object metadata; `None` when the object does not exist
fn fetch_metadata(
    agent: &ureq::Agent,
    url: &str,
    token: &str,
) -> ProxyResult<Option<ObjectResource>> {
    let mut res = agent
        .get(url)
        .header("Authorization", &format!("Bearer {}", token))
        .call()
        .map_err(|e| ProxyError::remote(BACKEND, format!("GET {}: {}", url, e)))?;

    match res.status().as_u16() {
        200 => {}
        404 => return Ok(None),
        status => {
            return Err(ProxyError::remote(
                BACKEND,
                format!("unexpected metadata status {}", status),
            ))
        }
    }

    let raw = res
        .body_mut()
        .with_config()
        .limit(1 << 20)
        .read_to_vec()
        .map_err(|e| ProxyError::remote(BACKEND, format!("reading metadata: {}", e)))?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

/// `multipart/related` upload body: JSON resource, then the media
fn multipart_body(resource: &ObjectResource, media: &[u8]) -> ProxyResult<Vec<u8>> {
    let json = serde_json::to_vec(resource)?;
    let mut body = Vec::with_capacity(json.len() + media.len() + 256);

    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&json);
    body.extend_from_slice(format!("\r\n--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", BINARY_TYPE).as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    Ok(body)
}

fn object_prefix(cache_key: &str, arch: &str, os: &str) -> String {
    format!("cache/{}/{}/{}", cache_key, arch, os)
}

/// Target architecture in Go's naming; `GOARCH` wins when set
fn target_arch() -> String {
    match std::env::var("GOARCH") {
        Ok(arch) if !arch.is_empty() => arch,
        _ => go_arch(std::env::consts::ARCH).to_string(),
    }
}

/// Target OS in Go's naming; `GOOS` wins when set
fn target_os() -> String {
    match std::env::var("GOOS") {
        Ok(os) if !os.is_empty() => os,
        _ => go_os(std::env::consts::OS).to_string(),
    }
}

fn go_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

fn go_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> GcsRemote {
        GcsRemote::new(&GcsConfig {
            bucket: "ci-cache".to_string(),
            cache_key: "main".to_string(),
            endpoint: "http://127.0.0.1:4443/".to_string(),
            service_account: None,
        })
        .unwrap()
    }

    #[test]
    fn object_layout() {
        assert_eq!(object_prefix("main", "amd64", "linux"), "cache/main/amd64/linux");

        let remote = remote();
        let name = remote.object_name("aa");
        assert!(name.starts_with("cache/main/"));
        assert!(name.ends_with("/aa"));
    }

    #[test]
    fn urls_escape_object_name() {
        let remote = remote();
        let url = remote.object_url("aa");
        assert!(url.starts_with("http://127.0.0.1:4443/storage/v1/b/ci-cache/o/cache%2Fmain%2F"));
        assert!(url.ends_with("%2Faa"));
        assert_eq!(
            remote.upload_url(),
            "http://127.0.0.1:4443/upload/storage/v1/b/ci-cache/o?uploadType=multipart"
        );
    }

    #[test]
    fn go_names() {
        assert_eq!(go_arch("x86_64"), "amd64");
        assert_eq!(go_arch("aarch64"), "arm64");
        assert_eq!(go_arch("riscv64"), "riscv64");
        assert_eq!(go_os("macos"), "darwin");
        assert_eq!(go_os("linux"), "linux");
    }

    #[test]
    fn empty_bucket_is_rejected() {
        let config = GcsConfig {
            bucket: String::new(),
            ..Default::default()
        };
        assert!(matches!(GcsRemote::new(&config), Err(ProxyError::Setting(_))));
    }

    #[test]
    fn reads_cache_metadata() {
        let object: ObjectResource = serde_json::from_str(
            r#"{"name":"cache/main/amd64/linux/aa","metadata":{"outputid":"bb","content-length-raw":"3"}}"#,
        )
        .unwrap();
        assert_eq!(
            object.cache_metadata().unwrap(),
            Some(("bb".to_string(), 3))
        );

        let bare: ObjectResource = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(bare.cache_metadata().unwrap(), None);

        let bad: ObjectResource = serde_json::from_str(
            r#"{"metadata":{"outputid":"bb","content-length-raw":"three"}}"#,
        )
        .unwrap();
        assert!(bad.cache_metadata().is_err());
    }

    #[test]
    fn multipart_layout() {
        let resource = ObjectResource {
            name: "cache/main/amd64/linux/aa".to_string(),
            content_type: BINARY_TYPE.to_string(),
            metadata: HashMap::from([(OUTPUT_ID_KEY.to_string(), "bb".to_string())]),
        };
        let body = multipart_body(&resource, b"MEDIA").unwrap();
        let text = String::from_utf8_lossy(&body);

        assert!(text.starts_with(&format!("--{}\r\n", BOUNDARY)));
        assert!(text.contains(r#""contentType":"application/octet-stream""#));
        assert!(text.contains("\r\n\r\nMEDIA\r\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", BOUNDARY)));
    }

    #[test]
    fn known_actions_are_remembered() {
        let remote = remote();
        assert!(!remote.is_known("aa"));
        remote.mark_known("aa");
        assert!(remote.is_known("aa"));
    }

    #[test]
    fn payload_compression() {
        let raw = vec![7u8; 4096];
        let compressed = zstd_encode(&raw[..], COMPRESSION_LEVEL).unwrap();
        assert!(compressed.len() < raw.len());
        assert_eq!(zstd_decode(&compressed[..]).unwrap(), raw);
    }
}
