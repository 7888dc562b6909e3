//! File-format layer on top of `opl_core` (spec §6): the format-independent
//! [`music::Music`] container, the [`handler::FormatHandler`] contract
//! every on-disk format implements, and the concrete IMF/WLF, DRO, SBI and
//! MID codecs.

pub mod dro;
pub mod error;
pub mod handler;
pub mod imf;
pub mod io;
pub mod mid;
pub mod music;
pub mod registry;
pub mod sbi;
pub mod tracks;

pub use dro::Dro;
pub use error::{Error, Result};
pub use handler::{Content, FormatCaps, FormatHandler, FormatMetadata, Identification, Validity};
pub use imf::{ImfType0, ImfType1};
pub use mid::MidType1;
pub use music::{Music, Pattern, Tags, TrackKind};
pub use registry::{IdentifyReport, Registry};
pub use sbi::Sbi;
