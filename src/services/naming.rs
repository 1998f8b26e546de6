//! Identifier and path conventions shared by the upload and download flows.
//!
//! Blob layout is `public/{token}{ext}` or `private/{secret_id}/{token}{ext}`.
//! Object rows never store that path; it is rebuilt from the row each time.

use base64::{Engine as _, engine::general_purpose};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::models::object::StorageObject;

/// Width of an encoded block index (max varint length of an i64).
const BLOCK_ID_WIDTH: usize = 10;

/// Bytes handed to the content sniffer.
const SNIFF_LEN: usize = 8192;

/// Longest extension kept from a client file name, dot included.
const MAX_EXT_LEN: usize = 16;

const DOWNLOAD_PASSWORD_LEN: usize = 8;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Physical name of a blob inside the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPath(String);

impl BlobPath {
    pub fn new(secret_id: &str, token: &str, ext: &str) -> Self {
        if secret_id.is_empty() {
            Self(format!("public/{token}{ext}"))
        } else {
            Self(format!("private/{secret_id}/{token}{ext}"))
        }
    }

    pub fn for_object(object: &StorageObject) -> Self {
        Self::new(&object.secret_id, &object.token, &object.ext)
    }

    /// Wrap an already-built path, e.g. one taken from a signed URL.
    pub fn from_raw(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blob token carried by the last path segment.
    pub fn token(&self) -> &str {
        let name = self.0.rsplit('/').next().unwrap_or_default();
        name.split('.').next().unwrap_or_default()
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fresh random hex token (64 chars). Used for blob tokens and access tokens.
pub fn new_token() -> String {
    hex::encode(Sha256::digest(Uuid::new_v4().as_bytes()))
}

/// Fresh 8-hex-char share password.
pub fn new_download_password() -> String {
    let mut token = new_token();
    token.truncate(DOWNLOAD_PASSWORD_LEN);
    token
}

pub fn new_object_id() -> String {
    Uuid::new_v4().to_string()
}

/// Encode a chunk index as a block id.
///
/// Zig-zag varint in a zero-padded 10-byte buffer, then standard base64.
/// Every id of an object has the same length, and the index can be read
/// back with [`block_index`].
pub fn block_id(index: i64) -> String {
    let mut buf = [0u8; BLOCK_ID_WIDTH];
    let mut value = ((index << 1) ^ (index >> 63)) as u64;
    let mut pos = 0;
    while value >= 0x80 {
        buf[pos] = (value as u8) | 0x80;
        value >>= 7;
        pos += 1;
    }
    buf[pos] = value as u8;
    general_purpose::STANDARD.encode(buf)
}

/// Decode a block id produced by [`block_id`]. `None` for foreign ids.
pub fn block_index(block_id: &str) -> Option<i64> {
    let raw = general_purpose::STANDARD.decode(block_id).ok()?;
    if raw.len() != BLOCK_ID_WIDTH {
        return None;
    }
    let mut value: u64 = 0;
    for (pos, byte) in raw.iter().enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * pos);
        if *byte < 0x80 {
            return Some(((value >> 1) as i64) ^ -((value & 1) as i64));
        }
    }
    None
}

/// Order block ids by the chunk index they encode and drop repeats.
///
/// A chunk staged twice keeps a single entry; the blob store holds the
/// latest bytes for that id. Ids that do not decode sort last, in arrival
/// order.
pub fn commit_order(block_ids: &[String]) -> Vec<String> {
    let mut keyed: Vec<(Option<i64>, usize, &String)> = block_ids
        .iter()
        .enumerate()
        .map(|(pos, id)| (block_index(id), pos, id))
        .collect();
    keyed.sort_by_key(|(index, pos, _)| (index.is_none(), *index, *pos));

    let mut ordered: Vec<String> = Vec::with_capacity(keyed.len());
    for (_, _, id) in keyed {
        if !ordered.contains(id) {
            ordered.push(id.clone());
        }
    }
    ordered
}

/// Raw extension of the last path segment, dot included ("" if none).
fn raw_ext(file_name: &str) -> &str {
    let base_start = file_name.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    match file_name[base_start..].rfind('.') {
        Some(dot) => &file_name[base_start + dot..],
        None => "",
    }
}

/// Extension safe to embed in a blob path, or empty.
pub fn file_ext(file_name: &str) -> String {
    let ext = raw_ext(file_name);
    let safe = ext.len() > 1
        && ext.len() <= MAX_EXT_LEN
        && ext[1..].chars().all(|c| c.is_ascii_alphanumeric());
    if safe { ext.to_string() } else { String::new() }
}

/// Name shown to clients.
///
/// An explicit name wins; otherwise the client's file name without its
/// extension, or the whole name when stripping leaves nothing.
pub fn display_name(explicit: Option<&str>, original: &str) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let stripped = original.strip_suffix(raw_ext(original)).unwrap_or(original);
    if stripped.is_empty() {
        original.to_string()
    } else {
        stripped.to_string()
    }
}

/// Content type from the leading bytes of a payload.
pub fn sniff_mime(data: &[u8]) -> String {
    let head = &data[..data.len().min(SNIFF_LEN)];
    infer::get(head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}

/// Exactly four ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit())
}

/// API link stored on the object and returned at upload time.
pub fn download_url(public_url: &str, file_id: &str, token: &str) -> String {
    format!(
        "{}/api/v1/storage/download/{file_id}?token={token}",
        public_url.trim_end_matches('/')
    )
}

/// Share page link handed out by a download request.
pub fn share_url(public_url: &str, file_id: &str, token: &str) -> String {
    format!(
        "{}/share/download/{file_id}?token={token}",
        public_url.trim_end_matches('/')
    )
}

/// Progress after staging `chunk_index`, in percent, capped at 100.
pub fn chunk_progress(chunk_index: i64, total_chunks: i64) -> f64 {
    if total_chunks <= 0 {
        return 100.0;
    }
    ((chunk_index + 1) as f64 / total_chunks as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_matches_varint_base64_layout() {
        assert_eq!(block_id(0), "AAAAAAAAAAAAAA==");
        assert_eq!(block_id(1), "AgAAAAAAAAAAAA==");
        assert_eq!(block_id(-1), "AQAAAAAAAAAAAA==");
        // 64 zig-zags to 128, which needs a continuation byte.
        assert_eq!(block_id(64), "gAEAAAAAAAAAAA==");
    }

    #[test]
    fn block_index_recovers_chunk_positions() {
        for index in [0, 1, 2, 63, 64, 1000, 123_456_789, i64::MAX, -5] {
            assert_eq!(block_index(&block_id(index)), Some(index));
        }
        assert_eq!(block_index("not-a-block"), None);
        assert_eq!(block_index("AAAA"), None);
    }

    #[test]
    fn commit_order_sorts_by_index_and_dedups() {
        let ids = vec![block_id(2), block_id(0), block_id(3), block_id(1), block_id(2)];
        assert_eq!(
            commit_order(&ids),
            vec![block_id(0), block_id(1), block_id(2), block_id(3)]
        );
    }

    #[test]
    fn blob_path_depends_on_namespace() {
        assert_eq!(BlobPath::new("", "tok", ".png").as_str(), "public/tok.png");
        assert_eq!(
            BlobPath::new("sec", "tok", "").as_str(),
            "private/sec/tok"
        );
        assert_eq!(BlobPath::new("sec", "tok", ".png").token(), "tok");
        assert_eq!(BlobPath::from_raw("public/tok").token(), "tok");
    }

    #[test]
    fn file_ext_keeps_only_safe_extensions() {
        assert_eq!(file_ext("photo.JPG"), ".JPG");
        assert_eq!(file_ext("archive.tar.gz"), ".gz");
        assert_eq!(file_ext("noext"), "");
        assert_eq!(file_ext("dir.v2/noext"), "");
        assert_eq!(file_ext("trailing."), "");
        assert_eq!(file_ext("evil.p/../x"), "");
        assert_eq!(file_ext("weird.p%2f"), "");
    }

    #[test]
    fn display_name_strips_extension_or_falls_back() {
        assert_eq!(display_name(None, "holiday.mp4"), "holiday");
        assert_eq!(display_name(Some("  "), "holiday.mp4"), "holiday");
        assert_eq!(display_name(Some("Trip"), "holiday.mp4"), "Trip");
        assert_eq!(display_name(None, ".bashrc"), ".bashrc");
        assert_eq!(display_name(None, "README"), "README");
    }

    #[test]
    fn tokens_are_random_hex() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let password = new_download_password();
        assert_eq!(password.len(), 8);
        assert!(password.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pin_must_be_four_digits() {
        assert!(is_valid_pin("0042"));
        assert!(!is_valid_pin("123"));
        assert!(!is_valid_pin("12345"));
        assert!(!is_valid_pin("12a4"));
        assert!(!is_valid_pin("١٢٣٤"));
    }

    #[test]
    fn sniff_mime_detects_png_and_defaults() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(sniff_mime(&png), "image/png");
        assert_eq!(sniff_mime(b"plain words"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn chunk_progress_is_capped() {
        assert_eq!(chunk_progress(0, 4), 25.0);
        assert_eq!(chunk_progress(3, 4), 100.0);
        assert_eq!(chunk_progress(9, 4), 100.0);
    }

    #[test]
    fn links_are_built_from_public_url() {
        assert_eq!(
            download_url("http://h/", "f", "t"),
            "http://h/api/v1/storage/download/f?token=t"
        );
        assert_eq!(share_url("http://h", "f", "t"), "http://h/share/download/f?token=t");
    }
}
