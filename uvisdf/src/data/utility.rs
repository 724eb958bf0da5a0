use std::io;
use std::io::{Read, Write};
use std::path::Path;

/// Extension that marks a zstd compressed observation file
pub const ZSTD_EXTENSION: &str = "zst";

/// Decompresses a ZSTD compressed byte array
///
/// # Arguments
///
/// * `compressed_data` - A byte slice that holds the compressed data
///
/// # Returns
///
/// * `decompressed_data` - A vector of u8 that holds the decompressed data
///
pub fn zstd_decompress(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

/// Compresses a byte array using ZSTD
///
/// # Arguments
///
/// * `decompressed_data` - A byte slice that holds the decompressed data
/// * `compression_level` - zstd level, 0 selects the library default
///
/// # Returns
///
/// * `compressed_data` - A vector of u8 that holds the compressed data
///
pub fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    encoder.finish()
}

/// True if the path names a zstd compressed file
pub fn is_compressed_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ZSTD_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_compress_shrinks_repetitive_data() {
        let data = b"0.0,0.0,0.0,0.0,".repeat(512);
        let compressed = zstd_compress(&data, 3).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(zstd_decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_is_compressed_path() {
        assert!(is_compressed_path(Path::new("visit/obs.json.zst")));
        assert!(is_compressed_path(Path::new("obs.ZST")));
        assert!(!is_compressed_path(Path::new("obs.json")));
        assert!(!is_compressed_path(Path::new("zst")));
    }
}
