//! ERF (BioWare Encapsulated Resource File) decoding
//!
//! Read-only support for the three on-disk layouts used by Dragon Age:
//! - `ERF V2.0` (Origins): inline 32-character names
//! - `ERF V2.2` (Origins, later tools): V2.0 plus a header extension and
//!   per-entry unpacked length
//! - `ERF V3.0` (Dragon Age 2): names in a separate string table
//!
//! The whole archive must be resident as one buffer (see
//! [`crate::archive::ByteSource`]). Decoding validates every offset and
//! length before anything is exposed; a single bad entry fails the archive.

mod accessor;
mod dialect;
#[cfg(test)]
pub(crate) mod fixture;
mod table;

pub use dialect::{detect, is_erf, Dialect, MAGIC_LEN, NAME_UNITS};
pub use table::{BuildStamp, ErfEntry, ErfHeader, ErfTable, ModuleInfo, NameTable};
