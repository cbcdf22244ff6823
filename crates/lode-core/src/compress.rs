use std::io::Read;

use brotli::enc::BrotliEncoderParams;

use crate::error::{LodeError, Result};

const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub const TAG_NONE: u32 = 0;
pub const TAG_BROTLI_GENERIC_MIN: u32 = fourcc(b"btgm");
pub const TAG_BROTLI_GENERIC_DEFAULT: u32 = fourcc(b"btgd");
pub const TAG_BROTLI_GENERIC_MAX: u32 = fourcc(b"btgx");
pub const TAG_BROTLI_TEXT_MIN: u32 = fourcc(b"bttm");
pub const TAG_BROTLI_TEXT_DEFAULT: u32 = fourcc(b"bttd");
pub const TAG_BROTLI_TEXT_MAX: u32 = fourcc(b"bttx");
pub const TAG_LZ4_DEFAULT: u32 = fourcc(b"lz4d");
pub const TAG_ZSTD_MIN: u32 = fourcc(b"zstm");
pub const TAG_ZSTD_DEFAULT: u32 = fourcc(b"zstd");
pub const TAG_ZSTD_MAX: u32 = fourcc(b"zstx");

const ZSTD_LEVEL_MIN: i32 = 1;
const ZSTD_LEVEL_DEFAULT: i32 = 3;
const ZSTD_LEVEL_MAX: i32 = 19;

const BROTLI_QUALITY_MIN: i32 = 2;
const BROTLI_QUALITY_DEFAULT: i32 = 9;
const BROTLI_QUALITY_MAX: i32 = 11;

/// Parse a CLI compression-algorithm name into a block tag.
pub fn tag_for_name(name: &str) -> Result<u32> {
    match name {
        "none" => Ok(TAG_NONE),
        "brotli" => Ok(TAG_BROTLI_GENERIC_DEFAULT),
        "brotli_min" => Ok(TAG_BROTLI_GENERIC_MIN),
        "brotli_max" => Ok(TAG_BROTLI_GENERIC_MAX),
        "brotli_text" => Ok(TAG_BROTLI_TEXT_DEFAULT),
        "brotli_text_min" => Ok(TAG_BROTLI_TEXT_MIN),
        "brotli_text_max" => Ok(TAG_BROTLI_TEXT_MAX),
        "lz4" => Ok(TAG_LZ4_DEFAULT),
        "zstd" => Ok(TAG_ZSTD_DEFAULT),
        "zstd_min" => Ok(TAG_ZSTD_MIN),
        "zstd_max" => Ok(TAG_ZSTD_MAX),
        other => Err(LodeError::InvalidArgument(format!(
            "unknown compression algorithm: '{other}'"
        ))),
    }
}

pub fn name_for_tag(tag: u32) -> &'static str {
    match tag {
        TAG_NONE => "none",
        TAG_BROTLI_GENERIC_MIN => "brotli_min",
        TAG_BROTLI_GENERIC_DEFAULT => "brotli",
        TAG_BROTLI_GENERIC_MAX => "brotli_max",
        TAG_BROTLI_TEXT_MIN => "brotli_text_min",
        TAG_BROTLI_TEXT_DEFAULT => "brotli_text",
        TAG_BROTLI_TEXT_MAX => "brotli_text_max",
        TAG_LZ4_DEFAULT => "lz4",
        TAG_ZSTD_MIN => "zstd_min",
        TAG_ZSTD_DEFAULT => "zstd",
        TAG_ZSTD_MAX => "zstd_max",
        _ => "unknown",
    }
}

fn brotli_params(quality: i32, text_mode: bool) -> BrotliEncoderParams {
    let mut params = BrotliEncoderParams {
        quality,
        ..Default::default()
    };
    if text_mode {
        params.mode = brotli::enc::backward_references::BrotliEncoderMode::BROTLI_MODE_TEXT;
    }
    params
}

fn brotli_compress(data: &[u8], quality: i32, text_mode: bool) -> Result<Vec<u8>> {
    let params = brotli_params(quality, text_mode);
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut out, &params)
        .map_err(|e| LodeError::Other(format!("brotli compress: {e}")))?;
    Ok(out)
}

/// Compress a block payload under the codec named by `tag`.
///
/// `TAG_NONE` passes the payload through unchanged. The tag is stored in
/// the block index, never inside the payload, so addressing is always
/// over the uncompressed chunk contents.
pub fn compress(tag: u32, data: &[u8]) -> Result<Vec<u8>> {
    match tag {
        TAG_NONE => Ok(data.to_vec()),
        TAG_BROTLI_GENERIC_MIN => brotli_compress(data, BROTLI_QUALITY_MIN, false),
        TAG_BROTLI_GENERIC_DEFAULT => brotli_compress(data, BROTLI_QUALITY_DEFAULT, false),
        TAG_BROTLI_GENERIC_MAX => brotli_compress(data, BROTLI_QUALITY_MAX, false),
        TAG_BROTLI_TEXT_MIN => brotli_compress(data, BROTLI_QUALITY_MIN, true),
        TAG_BROTLI_TEXT_DEFAULT => brotli_compress(data, BROTLI_QUALITY_DEFAULT, true),
        TAG_BROTLI_TEXT_MAX => brotli_compress(data, BROTLI_QUALITY_MAX, true),
        TAG_LZ4_DEFAULT => Ok(lz4_flex::compress_prepend_size(data)),
        TAG_ZSTD_MIN => zstd_compress(data, ZSTD_LEVEL_MIN),
        TAG_ZSTD_DEFAULT => zstd_compress(data, ZSTD_LEVEL_DEFAULT),
        TAG_ZSTD_MAX => zstd_compress(data, ZSTD_LEVEL_MAX),
        other => Err(LodeError::UnknownCompressionTag(other)),
    }
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::bulk::compress(data, level).map_err(|e| LodeError::Other(format!("zstd compress: {e}")))
}

/// Decompress a block payload. `uncompressed_size` comes from the block
/// header and bounds the output; a payload that inflates past it is
/// rejected rather than trusted.
pub fn decompress(tag: u32, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    let out = match tag {
        TAG_NONE => data.to_vec(),
        TAG_BROTLI_GENERIC_MIN
        | TAG_BROTLI_GENERIC_DEFAULT
        | TAG_BROTLI_GENERIC_MAX
        | TAG_BROTLI_TEXT_MIN
        | TAG_BROTLI_TEXT_DEFAULT
        | TAG_BROTLI_TEXT_MAX => {
            let mut out = Vec::with_capacity(uncompressed_size);
            let mut reader = brotli::Decompressor::new(data, 4096);
            reader
                .by_ref()
                .take(uncompressed_size as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| LodeError::Decompression(format!("brotli: {e}")))?;
            out
        }
        TAG_LZ4_DEFAULT => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| LodeError::Decompression(format!("lz4: {e}")))?,
        TAG_ZSTD_MIN | TAG_ZSTD_DEFAULT | TAG_ZSTD_MAX => {
            zstd::bulk::decompress(data, uncompressed_size)
                .map_err(|e| LodeError::Decompression(format!("zstd: {e}")))?
        }
        other => return Err(LodeError::UnknownCompressionTag(other)),
    };
    if out.len() != uncompressed_size {
        return Err(LodeError::Decompression(format!(
            "payload inflated to {} bytes, header says {}",
            out.len(),
            uncompressed_size
        )));
    }
    Ok(out)
}
