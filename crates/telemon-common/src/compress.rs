use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Upper bound on a decompressed body; larger payloads are rejected.
pub const MAX_DECOMPRESSED_BYTES: u64 = 32 * 1024 * 1024;

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut out)?;
    if out.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "decompressed payload too large",
        ));
    }
    Ok(out)
}

/// Whether an `Accept-Encoding` / `Content-Encoding` header value names gzip.
pub fn names_gzip(header: &str) -> bool {
    header
        .split(',')
        .map(|part| part.split(';').next().unwrap_or("").trim())
        .any(|coding| coding.eq_ignore_ascii_case("gzip"))
}
