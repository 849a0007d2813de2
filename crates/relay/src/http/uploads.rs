//! `POST /uploads` (multipart): ingest a client-supplied input image (§4.I,
//! §6).

use crate::app::Core;
use crate::http::client_id::ClientIdentity;
use crate::http::error::ApiError;
use axum::extract::{Multipart, State};
use axum::Json;
use relay_protocol::http_types::UploadResponse;
use std::sync::Arc;

pub async fn upload_file(
    State(core): State<Arc<Core>>,
    ClientIdentity(owner): ClientIdentity,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let max_bytes = core.config.uploads.max_upload_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload.bin").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("failed reading upload body: {e}")))?;

        if bytes.len() as u64 > max_bytes {
            return Err(ApiError::validation(format!(
                "upload of {} bytes exceeds the configured limit of {max_bytes} bytes",
                bytes.len()
            )));
        }

        let dims = image_dimensions(&mime_type, &bytes);
        let record = core
            .file_plane
            .ingest_upload(owner, &original_name, &bytes, mime_type, dims)
            .await?;

        return Ok(Json(UploadResponse {
            file_id: record.file_id,
            relative_path: record.relative_path,
            size: record.size,
            mime_type: record.mime_type,
            width: record.width,
            height: record.height,
        }));
    }

    Err(ApiError::validation("multipart body had no `file` field"))
}

/// Best-effort PNG/JPEG dimension sniff from the header bytes, so an
/// upload's width/height can be recorded without a full image-decode
/// dependency. Unrecognised formats simply get no dimensions recorded.
fn image_dimensions(mime_type: &str, bytes: &[u8]) -> Option<(u32, u32)> {
    match mime_type {
        "image/png" => png_dimensions(bytes),
        "image/jpeg" => jpeg_dimensions(bytes),
        _ => None,
    }
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const PNG_SIGNATURE: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    if bytes.len() < 24 || &bytes[0..8] != PNG_SIGNATURE {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 4 || bytes[0] != 0xff || bytes[1] != 0xd8 {
        return None;
    }
    let mut offset = 2usize;
    while offset + 9 < bytes.len() {
        if bytes[offset] != 0xff {
            offset += 1;
            continue;
        }
        let marker = bytes[offset + 1];
        let is_sof = matches!(marker, 0xc0..=0xc3 | 0xc5..=0xc7 | 0xc9..=0xcb | 0xcd..=0xcf);
        let segment_len = u16::from_be_bytes(bytes[offset + 2..offset + 4].try_into().ok()?) as usize;
        if is_sof {
            let height = u16::from_be_bytes(bytes[offset + 5..offset + 7].try_into().ok()?) as u32;
            let width = u16::from_be_bytes(bytes[offset + 7..offset + 9].try_into().ok()?) as u32;
            return Some((width, height));
        }
        offset += 2 + segment_len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_signature_without_ihdr_returns_none() {
        assert_eq!(png_dimensions(&[0x89, 0x50, 0x4e, 0x47]), None);
    }

    #[test]
    fn non_png_bytes_return_none() {
        assert_eq!(png_dimensions(b"not a png file at all!!"), None);
    }

    #[test]
    fn non_jpeg_bytes_return_none() {
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
    }
}
