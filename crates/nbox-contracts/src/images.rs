use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{NboxError, NboxResult};

/// Raw image payload as base64 plus its MIME tag.
///
/// Values are replaced wholesale; nothing mutates one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceImage {
    pub base64: String,
    pub mime_type: String,
}

impl SourceImage {
    /// Builds a `SourceImage` from uploaded bytes and the MIME type the upload declared.
    pub fn encode(bytes: &[u8], declared_mime: &str) -> NboxResult<Self> {
        let mime = declared_mime.trim().to_ascii_lowercase();
        if !is_image_mime(&mime) {
            return Err(NboxError::InvalidImageFormat(declared_mime.to_string()));
        }
        Ok(Self {
            base64: BASE64.encode(bytes),
            mime_type: mime,
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Parses `data:image/<subtype>;base64,<payload>`.
    ///
    /// Anything else yields `None`: callers treat an unrecognized URL as a soft condition.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (mime, payload) = rest.split_once(";base64,")?;
        let subtype = mime.strip_prefix("image/")?;
        if subtype.is_empty() || !subtype.bytes().all(|byte| byte.is_ascii_lowercase()) {
            return None;
        }
        if payload.is_empty() || payload.contains(['\n', '\r']) {
            return None;
        }
        Some(Self {
            base64: payload.to_string(),
            mime_type: mime.to_string(),
        })
    }

    pub fn decode_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(BASE64.decode(self.base64.as_bytes())?)
    }

    pub fn file_extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

fn is_image_mime(mime: &str) -> bool {
    mime.strip_prefix("image/")
        .map(|subtype| !subtype.is_empty())
        .unwrap_or(false)
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
