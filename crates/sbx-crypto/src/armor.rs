//! ASCII armor for binary blobs, RFC 4880 radix-64 framing.
//!
//! ```text
//! -----BEGIN <label>-----
//! Version: En1gm4 v1.0.0 (GnuPG v1.4.10)
//!
//! <base64, 64 columns>
//! =<CRC-24 of the raw bytes, base64>
//! -----END <label>-----
//! ```
//!
//! Implemented here rather than through the pgp crate because the stored
//! artifact format uses its own block labels, and the pgp armor writer only
//! emits the standard RFC 4880 ones. The version header and labels are
//! wire-format constants shared with other tools.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use sbx_core::{SbxError, SbxResult};

use crate::ARMOR_VERSION;

const LINE_WIDTH: usize = 64;

// OpenPGP radix-64 checksum parameters
const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for byte in data {
        crc ^= (*byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

/// Quick check for armored input, used to accept both armored and raw
/// artifacts on the read path.
pub fn is_armored(data: &[u8]) -> bool {
    data.trim_ascii_start().starts_with(b"-----BEGIN ")
}

/// Wrap `data` in an armored block with the given label.
pub fn encode_armored(data: &[u8], blocktype: &str) -> Vec<u8> {
    let b64 = STANDARD.encode(data);
    let crc = crc24(data);
    let crc_b64 = STANDARD.encode(&crc.to_be_bytes()[1..]);

    let mut out = String::new();
    out.push_str(&format!("-----BEGIN {blocktype}-----\n"));
    out.push_str(&format!("Version: {ARMOR_VERSION}\n\n"));
    for line in b64.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(std::str::from_utf8(line).expect("base64 output is ASCII"));
        out.push('\n');
    }
    out.push_str(&format!("={crc_b64}\n"));
    out.push_str(&format!("-----END {blocktype}-----\n"));
    out.into_bytes()
}

/// Decode an armored block back into raw bytes, verifying framing and the
/// CRC-24 checksum.
pub fn decode_armored(data: &[u8]) -> SbxResult<Vec<u8>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| SbxError::MalformedCiphertext("armor is not valid UTF-8".into()))?;
    let mut lines = text.lines().map(str::trim_end);

    let begin = lines
        .find(|l| l.starts_with("-----BEGIN "))
        .ok_or_else(|| SbxError::MalformedCiphertext("missing armor BEGIN line".into()))?;
    let label = begin
        .strip_prefix("-----BEGIN ")
        .and_then(|l| l.strip_suffix("-----"))
        .ok_or_else(|| SbxError::MalformedCiphertext("bad armor BEGIN line".into()))?
        .to_string();

    // headers run until the first blank line
    let mut in_headers = true;
    let mut b64 = String::new();
    let mut checksum: Option<String> = None;
    let mut end_seen = false;

    for line in lines {
        if in_headers {
            if line.is_empty() {
                in_headers = false;
            } else if !line.contains(": ") {
                // tolerate header-less blocks: first data line ends the header section
                in_headers = false;
                b64.push_str(line);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("-----END ") {
            let end_label = rest
                .strip_suffix("-----")
                .ok_or_else(|| SbxError::MalformedCiphertext("bad armor END line".into()))?;
            if end_label != label {
                return Err(SbxError::MalformedCiphertext(format!(
                    "armor label mismatch: BEGIN {label}, END {end_label}"
                )));
            }
            end_seen = true;
            break;
        }
        if let Some(crc) = line.strip_prefix('=') {
            checksum = Some(crc.to_string());
        } else if !line.is_empty() {
            b64.push_str(line);
        }
    }

    if !end_seen {
        return Err(SbxError::MalformedCiphertext("missing armor END line".into()));
    }

    let raw = STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| SbxError::MalformedCiphertext(format!("armor base64: {e}")))?;

    if let Some(crc_b64) = checksum {
        let crc_bytes = STANDARD
            .decode(crc_b64.as_bytes())
            .map_err(|e| SbxError::MalformedCiphertext(format!("armor checksum: {e}")))?;
        if crc_bytes.len() != 3 {
            return Err(SbxError::MalformedCiphertext(
                "armor checksum must be 3 bytes".into(),
            ));
        }
        let expected =
            ((crc_bytes[0] as u32) << 16) | ((crc_bytes[1] as u32) << 8) | crc_bytes[2] as u32;
        if crc24(&raw) != expected {
            return Err(SbxError::IntegrityFailure(
                "armor checksum mismatch".into(),
            ));
        }
    }

    Ok(raw)
}
