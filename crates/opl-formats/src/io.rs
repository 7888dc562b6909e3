//! Endian-aware record I/O and the IMF/DRO tag block.
//!
//! Each binary format wrapper is otherwise pure data shuffling; this is
//! the one place `byteorder` earns its keep.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    let b = *bytes.get(*pos).ok_or(Error::TruncatedInput { expected: 1 })?;
    *pos += 1;
    Ok(b)
}

pub fn read_u16le(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    let slice = bytes
        .get(*pos..*pos + 2)
        .ok_or(Error::TruncatedInput { expected: 2 })?;
    *pos += 2;
    Ok(LittleEndian::read_u16(slice))
}

pub fn read_u32le(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or(Error::TruncatedInput { expected: 4 })?;
    *pos += 4;
    Ok(LittleEndian::read_u32(slice))
}

pub fn read_u16be(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    let slice = bytes
        .get(*pos..*pos + 2)
        .ok_or(Error::TruncatedInput { expected: 2 })?;
    *pos += 2;
    Ok(BigEndian::read_u16(slice))
}

pub fn read_u32be(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or(Error::TruncatedInput { expected: 4 })?;
    *pos += 4;
    Ok(BigEndian::read_u32(slice))
}

pub fn read_exact<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= bytes.len())
        .ok_or(Error::TruncatedInput { expected: len })?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

pub fn write_u16le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u32le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u16be(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u32be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// App identifier used when this library emits a tag block. Any 8-char
/// identifier is acceptable per the format; this is ours.
pub const DEFAULT_APP_ID: &str = "OPLCODEC";

/// The `u8 0x1A` + three NUL-terminated strings + `char app[9]` trailer
/// IMF and DRO share.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagBlock {
    pub title: String,
    pub artist: String,
    pub comment: String,
    pub app: String,
}

fn read_nul_string(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let start = *pos;
    let end = bytes[start..].iter().position(|&b| b == 0)? + start;
    let s = String::from_utf8_lossy(&bytes[start..end]).into_owned();
    *pos = end + 1;
    Some(s)
}

/// Parse a tag block starting at `bytes[0] == 0x1A`, requiring it to
/// consume `bytes` exactly. Used both to decode a known trailer and, by
/// [`split_body_and_tag`], to test whether a candidate split point really
/// is one.
pub fn parse_tag_block_exact(bytes: &[u8]) -> Option<TagBlock> {
    if bytes.first() != Some(&0x1A) {
        return None;
    }
    let mut pos = 1;
    let title = read_nul_string(bytes, &mut pos)?;
    let artist = read_nul_string(bytes, &mut pos)?;
    let comment = read_nul_string(bytes, &mut pos)?;
    let app_bytes = bytes.get(pos..)?;
    if app_bytes.len() != 9 {
        return None;
    }
    let nul_at = app_bytes.iter().position(|&b| b == 0).unwrap_or(app_bytes.len());
    let app = String::from_utf8_lossy(&app_bytes[..nul_at]).into_owned();
    Some(TagBlock { title, artist, comment, app })
}

/// Encode a tag block. The `app` field is NUL-padded across its full nine
/// bytes (REDESIGN FLAG 9d — writing just a single terminator after the
/// text and leaving the rest uninitialized is a bug this spec calls out).
pub fn write_tag_block(tag: &TagBlock) -> Vec<u8> {
    let mut out = vec![0x1A];
    for s in [&tag.title, &tag.artist, &tag.comment] {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    let mut app_field = [0u8; 9];
    let app_bytes = tag.app.as_bytes();
    let n = app_bytes.len().min(8);
    app_field[..n].copy_from_slice(&app_bytes[..n]);
    out.extend_from_slice(&app_field);
    out
}

/// IMF/DRO register bytes never legitimately start a 4-byte-aligned record
/// with `0x1A` (it's an invalid OPL register — see
/// [`opl_core::ChipState::is_valid_register`]), so any 4-byte boundary
/// where a byte `0x1A` parses a tag block that exactly exhausts the rest
/// of `bytes` is the real split point. Scans forward to prefer the
/// longest valid body, as corrupt event data could coincidentally start
/// with `0x1A` without the remainder happening to parse as a full tag.
pub fn split_body_and_tag(bytes: &[u8], record_len: usize) -> (&[u8], Option<TagBlock>) {
    let mut pos = 0;
    while pos + record_len <= bytes.len() {
        if bytes[pos] == 0x1A {
            if let Some(tag) = parse_tag_block_exact(&bytes[pos..]) {
                return (&bytes[..pos], Some(tag));
            }
        }
        pos += record_len;
    }
    (bytes, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tag_block_roundtrip() {
        let tag = TagBlock {
            title: "Test Song".into(),
            artist: "Nobody".into(),
            comment: "".into(),
            app: DEFAULT_APP_ID.into(),
        };
        let bytes = write_tag_block(&tag);
        let parsed = parse_tag_block_exact(&bytes).unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn app_field_is_fully_nul_padded() {
        let tag = TagBlock {
            title: String::new(),
            artist: String::new(),
            comment: String::new(),
            app: "AB".into(),
        };
        let bytes = write_tag_block(&tag);
        // 1 (0x1A) + 3 NULs + 9-byte app field
        let app_field = &bytes[bytes.len() - 9..];
        assert_eq!(app_field, &[b'A', b'B', 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn split_finds_trailing_tag_block() {
        let mut body = vec![0x01, 0x20, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00];
        let tag = TagBlock {
            title: "Hi".into(),
            artist: "".into(),
            comment: "".into(),
            app: "APP".into(),
        };
        body.extend_from_slice(&write_tag_block(&tag));
        let (split_body, split_tag) = split_body_and_tag(&body, 4);
        assert_eq!(split_body.len(), 8);
        assert_eq!(split_tag.unwrap(), tag);
    }

    #[test]
    fn split_with_no_tag_returns_everything_as_body() {
        let body = vec![0x01, 0x20, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00];
        let (split_body, split_tag) = split_body_and_tag(&body, 4);
        assert_eq!(split_body.len(), body.len());
        assert!(split_tag.is_none());
    }
}
