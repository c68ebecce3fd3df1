//! Compressed kernel modules (`.ko.xz`, `.ko.zst`, `.ko.gz`).
//!
//! Distributions ship modules compressed; the DWARF inside is only
//! reachable after inflating the whole object into memory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{IpftError, Result};

/// Codec of a compressed module file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression
{
    Gzip,
    Xz,
    Zstd,
}

const MODULE_SUFFIXES: [(&str, Compression); 3] = [
    (".ko.xz", Compression::Xz),
    (".ko.zst", Compression::Zstd),
    (".ko.gz", Compression::Gzip),
];

impl Compression
{
    /// Split `nf_conntrack.ko.zst` into `nf_conntrack` and its codec.
    #[must_use]
    pub fn split_module_name(file_name: &str) -> Option<(&str, Self)>
    {
        MODULE_SUFFIXES.iter().find_map(|(suffix, compression)| {
            file_name
                .strip_suffix(suffix)
                .map(|stem| (stem, *compression))
        })
    }

    /// Inflate the file at `path`.
    ///
    /// ## Errors
    ///
    /// [`IpftError::Io`] if the file cannot be opened, [`IpftError::Object`]
    /// if the stream is corrupt.
    pub fn decompress(self, path: &Path) -> Result<Vec<u8>>
    {
        let file = BufReader::new(File::open(path)?);
        let mut data = Vec::new();
        let read = match self {
            Compression::Gzip => flate2::read::GzDecoder::new(file).read_to_end(&mut data),
            Compression::Xz => xz2::read::XzDecoder::new(file).read_to_end(&mut data),
            Compression::Zstd => zstd::stream::read::Decoder::with_buffer(file)?.read_to_end(&mut data),
        };
        read.map_err(|err| IpftError::Object {
            context: format!("decompressing {}", path.display()),
            message: err.to_string(),
        })?;
        Ok(data)
    }
}
