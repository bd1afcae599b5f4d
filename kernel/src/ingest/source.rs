// Content Sources
//
// File content comes from exactly one source per operation. Sources
// are tried in order and the first one that yields a result wins:
// inline base64 data, then online media (creates only), then a direct
// conditional download.

use std::sync::Arc;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::http::HttpClient;
use super::media::OnlineMediaRegistry;
use super::HANDLER_KEY;
use crate::mapping::{Metadata, RemoteIdMappingRepository};
use crate::operation::{OperationError, OperationKind};
use crate::storage::{file_stem, Folder, ResourceStore, StoredFile};

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Outcome of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// New bytes for the target file.
    Content(Vec<u8>),

    /// The source already produced a stored file.
    Materialized(StoredFile),

    /// The remote copy is unchanged; keep the stored bytes.
    NotModified,
}

/// Inputs available to content sources.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest<'a> {
    pub kind: OperationKind,
    pub remote_id: &'a str,
    pub base_name: &'a str,
    pub file_data: Option<&'a str>,
    pub url: Option<&'a str>,
    pub folder: &'a Folder,
}

pub trait ContentSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means this source does not apply to the request.
    fn try_acquire(&self, request: &AcquisitionRequest<'_>)
        -> Result<Option<Acquired>, OperationError>;
}

/// Decode base64 file data, ignoring embedded whitespace.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT_BASE64.decode(compact)
}

/// `fileData` carried in the request itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSource;

impl ContentSource for InlineSource {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn try_acquire(
        &self,
        request: &AcquisitionRequest<'_>,
    ) -> Result<Option<Acquired>, OperationError> {
        let Some(data) = request.file_data else {
            return Ok(None);
        };

        let bytes = decode_base64(data)?;
        debug!(remote_id = request.remote_id, bytes = bytes.len(), "decoded inline file data");
        Ok(Some(Acquired::Content(bytes)))
    }
}

/// Provider URLs turned into placeholder files. Creates only.
pub struct OnlineMediaSource {
    resources: Arc<ResourceStore>,
    registry: OnlineMediaRegistry,
}

impl OnlineMediaSource {
    pub fn new(resources: Arc<ResourceStore>, registry: OnlineMediaRegistry) -> Self {
        Self {
            resources,
            registry,
        }
    }
}

impl ContentSource for OnlineMediaSource {
    fn name(&self) -> &'static str {
        "online-media"
    }

    fn try_acquire(
        &self,
        request: &AcquisitionRequest<'_>,
    ) -> Result<Option<Acquired>, OperationError> {
        let (OperationKind::Create, Some(url)) = (request.kind, request.url) else {
            return Ok(None);
        };

        let Some(file) = self
            .registry
            .transform_url_to_file(url, request.folder, &self.resources)?
        else {
            return Ok(None);
        };

        let name = match file.extension() {
            Some(ext) => format!("{}.{}", file_stem(request.base_name), ext),
            None => file_stem(request.base_name).to_string(),
        };
        let file = self.resources.rename_file(&file, &name)?;

        Ok(Some(Acquired::Materialized(file)))
    }
}

/// Conditional GET of the URL, revalidated with the `Date` and `ETag`
/// remembered from the previous successful download. Creates have no
/// stored file to fall back on and always fetch unconditionally.
pub struct DownloadSource {
    client: Arc<dyn HttpClient>,
    mapping: Arc<dyn RemoteIdMappingRepository>,
}

impl DownloadSource {
    pub fn new(client: Arc<dyn HttpClient>, mapping: Arc<dyn RemoteIdMappingRepository>) -> Self {
        Self { client, mapping }
    }
}

impl ContentSource for DownloadSource {
    fn name(&self) -> &'static str {
        "download"
    }

    fn try_acquire(
        &self,
        request: &AcquisitionRequest<'_>,
    ) -> Result<Option<Acquired>, OperationError> {
        let Some(url) = request.url else {
            return Ok(None);
        };

        let is_create = request.kind == OperationKind::Create;
        let cached = if is_create {
            Metadata::new()
        } else {
            self.mapping
                .metadata(request.remote_id, HANDLER_KEY)
                .unwrap_or_default()
        };

        let mut headers = Vec::new();
        if let Some(date) = cached.get("date").filter(|v| !v.is_empty()) {
            headers.push(("If-Modified-Since", date.clone()));
        }
        if let Some(etag) = cached.get("etag").filter(|v| !v.is_empty()) {
            headers.push(("If-None-Match", etag.clone()));
        }

        let response = self.client.get(url, &headers).map_err(|e| {
            OperationError::Transport(format!("URL: \"{url}\" Message: \"{e}\""))
        })?;

        if response.is_error() {
            let reason = StatusCode::from_u16(response.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("error");
            return Err(OperationError::NotFound(format!(
                "Request failed. URL: \"{url}\" Message: \"{} {reason}\"",
                response.status
            )));
        }

        if response.is_not_modified() {
            if is_create {
                return Err(OperationError::Transport(format!(
                    "URL: \"{url}\" Message: \"304 Not Modified for an unconditional request\""
                )));
            }
            debug!(remote_id = request.remote_id, url, "remote file not modified");
            return Ok(Some(Acquired::NotModified));
        }

        let mut validators = Metadata::new();
        if let Some(date) = response.header("Date") {
            validators.insert("date".into(), date.to_string());
        }
        if let Some(etag) = response.header("ETag") {
            validators.insert("etag".into(), etag.to_string());
        }
        self.mapping
            .set_metadata(request.remote_id, HANDLER_KEY, validators)?;

        info!(remote_id = request.remote_id, url, bytes = response.body.len(), "downloaded file");
        Ok(Some(Acquired::Content(response.body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn decodes_padded_unpadded_and_wrapped_input() {
        assert_eq!(decode_base64("UE5HREFUQQ==").unwrap(), b"PNGDATA");
        assert_eq!(decode_base64("UE5HREFUQQ").unwrap(), b"PNGDATA");
        assert_eq!(decode_base64("UE5H\nREFU\r\nQQ==").unwrap(), b"PNGDATA");
    }

    #[test]
    fn decoded_length_matches_encoded_length() {
        for len in 0..32usize {
            let bytes: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let encoded = STANDARD.encode(&bytes);
            let padding = encoded.chars().rev().take_while(|c| *c == '=').count();

            let decoded = decode_base64(&encoded).unwrap();

            assert_eq!(decoded.len(), encoded.len() * 3 / 4 - padding);
            assert_eq!(decoded, bytes);
        }
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(decode_base64("not*base64").is_err());
    }

    #[test]
    fn inline_source_skips_requests_without_data() {
        let folder = Folder {
            storage: "local".into(),
            path: String::new(),
        };
        let request = AcquisitionRequest {
            kind: OperationKind::Create,
            remote_id: "r",
            base_name: "a.txt",
            file_data: None,
            url: Some("https://example.com/a.txt"),
            folder: &folder,
        };

        assert_eq!(InlineSource.try_acquire(&request).unwrap(), None);
    }
}
