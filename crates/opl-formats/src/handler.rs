//! The format-handler contract (spec §6): every on-disk format implements
//! `metadata`, `identify`, `parse`, `generate` and `check_limits` against
//! the shared [`crate::music::Music`] container.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::music::Music;

/// Static description of a format, exposed to tooling (`opl-cli list`,
/// JSON dumps) without needing an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatMetadata {
    pub id: String,
    pub title: String,
    pub games: Vec<String>,
    pub glob: Vec<String>,
    pub caps: FormatCaps,
}

/// What a format can represent. Drives `check_limits` and lets callers
/// decide ahead of time whether a conversion will be lossy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatCaps {
    pub channel_map: Vec<String>,
    pub tags: bool,
    pub supported_events: Vec<String>,
    pub patch_names: bool,
}

/// The verdict [`FormatHandler::identify`] reaches for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Yes,
    No,
    Maybe,
}

/// An identification verdict plus the human-readable reason behind it —
/// shown to a user puzzling over why autodetection guessed what it did.
#[derive(Debug, Clone)]
pub struct Identification {
    pub valid: Validity,
    pub reason: String,
}

impl Identification {
    pub fn yes(reason: impl Into<String>) -> Self {
        Identification { valid: Validity::Yes, reason: reason.into() }
    }
    pub fn no(reason: impl Into<String>) -> Self {
        Identification { valid: Validity::No, reason: reason.into() }
    }
    pub fn maybe(reason: impl Into<String>) -> Self {
        Identification { valid: Validity::Maybe, reason: reason.into() }
    }
}

/// The on-disk bytes a handler works with: a main file plus any
/// supplementary files the format splits data across (currently unused by
/// any handler in this crate, but named so a future multi-file format
/// doesn't need a `Content` redesign).
#[derive(Debug, Clone, Default)]
pub struct Content {
    pub main: Vec<u8>,
    pub supplementary: Vec<(String, Vec<u8>)>,
}

impl Content {
    pub fn from_bytes(main: Vec<u8>) -> Self {
        Content { main, supplementary: Vec::new() }
    }
}

/// A single on-disk music file format.
///
/// `identify` never fails — an unreadable or ambiguous file is `No` or
/// `Maybe`, never an `Err`. `parse` fails fast on the first malformed byte.
/// `generate` prefers a warning over an error: anything the format can't
/// represent gets flagged in the returned list and silently dropped or
/// approximated, except for true preconditions violations (see
/// `check_limits`).
pub trait FormatHandler {
    fn metadata(&self) -> FormatMetadata;

    fn identify(&self, content: &Content, filename: &str) -> Identification;

    fn parse(&self, content: &Content) -> Result<Music>;

    /// Returns the generated bytes plus any non-fatal warnings. Rate
    /// limited by the caller, not here — a handler just reports each
    /// lossy decision as it happens.
    fn generate(&self, music: &Music) -> Result<(Content, Vec<String>)>;

    /// Preconditions `generate` needs met to produce anything meaningful
    /// at all (e.g. SBI needs exactly one patch). Returns human-readable
    /// problem descriptions; an empty list means `generate` is safe to
    /// call.
    fn check_limits(&self, music: &Music) -> Vec<String>;
}
