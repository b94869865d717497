mod ucs4;
mod utf16;

use std::{
    collections::BTreeMap,
    str::{from_utf8, from_utf8_unchecked},
    sync::{LazyLock, RwLock},
};

pub use crate::encoding::{
    ucs4::{
        UCS4_2143_NAME, UCS4_3412_NAME, UCS4Unusual2143Decoder, UCS4Unusual3412Decoder,
        UTF32BE_NAME, UTF32BEDecoder, UTF32LE_NAME, UTF32LEDecoder,
    },
    utf16::{UTF16BE_NAME, UTF16BEDecoder, UTF16LE_NAME, UTF16LEDecoder},
};

pub trait Decoder {
    fn name(&self) -> &'static str;
    /// If no error occurs, return `Ok((read_bytes, write_bytes))`.
    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError>;
}

#[derive(Debug, Clone)]
pub enum DecodeError {
    /// Input buffer is empty.
    InputIsEmpty,
    /// Malformed byte sequence is found.
    ///
    /// The input and output buffer have consumed `read` and `write` bytes
    /// respectively.
    /// The malformed sequence occupies `input[read-length..read]`.
    Malformed {
        read: usize,
        write: usize,
        length: usize,
    },
    /// A code point outside the Unicode scalar value range, or a surrogate
    /// encoded as a scalar value.
    InvalidCodePoint { read: usize, write: usize, code: u32 },
}

pub const UTF8_NAME: &str = "UTF-8";

pub struct UTF8Decoder;
impl Decoder for UTF8Decoder {
    fn name(&self) -> &'static str {
        UTF8_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        if src.is_empty() {
            return Err(DecodeError::InputIsEmpty);
        }

        match from_utf8(src) {
            Ok(s) => {
                dst.push_str(s);
                Ok((src.len(), src.len()))
            }
            Err(err) => {
                let up_to = err.valid_up_to();
                dst.push_str(unsafe {
                    // # Safety
                    // This operation is safe due to the `Utf8Error` constraint.
                    from_utf8_unchecked(&src[..up_to])
                });
                match err.error_len() {
                    Some(len) => Err(DecodeError::Malformed {
                        read: up_to + len,
                        write: up_to,
                        length: len,
                    }),
                    None => {
                        if finish {
                            Err(DecodeError::Malformed {
                                read: src.len(),
                                write: up_to,
                                length: src.len() - up_to,
                            })
                        } else {
                            Ok((up_to, up_to))
                        }
                    }
                }
            }
        }
    }
}

pub const LATIN1_NAME: &str = "ISO-8859-1";

/// HTML 4's reference encoding. Each byte maps to the scalar value of the
/// same number, so this decoder cannot fail.
pub struct Latin1Decoder;
impl Decoder for Latin1Decoder {
    fn name(&self) -> &'static str {
        LATIN1_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        _finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        if src.is_empty() {
            return Err(DecodeError::InputIsEmpty);
        }

        let mut write = 0;
        for &byte in src {
            let c = byte as char;
            write += c.len_utf8();
            dst.push(c);
        }
        Ok((src.len(), write))
    }
}

/// Supported encodings.
///
/// Encoding names are listed in lexical order.
pub const DEFAULT_SUPPORTED_ENCODINGS: &[&str] = &[
    LATIN1_NAME,
    UCS4_2143_NAME,
    UCS4_3412_NAME,
    UTF16BE_NAME,
    UTF16LE_NAME,
    UTF32BE_NAME,
    UTF32LE_NAME,
    UTF8_NAME,
];

/// Manage aliases for encoding names.
///
/// Aliases follow the IANA character set registry where one exists; the
/// `windows-1252` alias maps to Latin-1 because the parser remaps the
/// `0x80..=0x9F` range itself when expanding character references.
pub static ENCODING_ALIASES: LazyLock<RwLock<BTreeMap<&'static str, &'static str>>> =
    LazyLock::new(|| {
        RwLock::new(BTreeMap::from([
            ("UTF8", UTF8_NAME),
            ("UTF16", UTF16LE_NAME),
            ("UTF-16", UTF16LE_NAME),
            ("UTF16BE", UTF16BE_NAME),
            ("UTF16LE", UTF16LE_NAME),
            ("UTF-32", UTF32LE_NAME),
            ("ISO-10646-UCS-4", UTF32BE_NAME),
            ("LATIN1", LATIN1_NAME),
            ("ISO8859-1", LATIN1_NAME),
            ("ISO_8859-1", LATIN1_NAME),
            ("8859-1", LATIN1_NAME),
            ("WINDOWS-1252", LATIN1_NAME),
            ("CP1252", LATIN1_NAME),
            ("US-ASCII", UTF8_NAME),
            ("ASCII", UTF8_NAME),
        ]))
    });

/// Register `alias` as an alias for the encoding name `real`.  \
/// If `alias` is already an alias for another encoding name, overwrite it and
/// return the encoding name before the overwrite.
pub fn register_encoding_alias(alias: &'static str, real: &'static str) -> Option<&'static str> {
    ENCODING_ALIASES.write().unwrap().insert(alias, real)
}

pub type DecoderFactory = fn() -> Box<dyn Decoder + Send>;
pub static DECODER_TABLE: LazyLock<RwLock<BTreeMap<&'static str, DecoderFactory>>> =
    LazyLock::new(|| {
        let mut map = BTreeMap::<&'static str, DecoderFactory>::new();
        map.insert(UTF8_NAME, || Box::new(UTF8Decoder));
        map.insert(LATIN1_NAME, || Box::new(Latin1Decoder));
        map.insert(UTF16BE_NAME, || Box::new(UTF16BEDecoder::default()));
        map.insert(UTF16LE_NAME, || Box::new(UTF16LEDecoder::default()));
        map.insert(UTF32BE_NAME, || Box::new(UTF32BEDecoder));
        map.insert(UTF32LE_NAME, || Box::new(UTF32LEDecoder));
        map.insert(UCS4_2143_NAME, || Box::new(UCS4Unusual2143Decoder));
        map.insert(UCS4_3412_NAME, || Box::new(UCS4Unusual3412Decoder));
        RwLock::new(map)
    });

/// Look up a decoder by name or registered alias, case-insensitively.
pub fn find_decoder(encoding_name: &str) -> Option<Box<dyn Decoder + Send>> {
    let normalized = encoding_name.to_ascii_uppercase();
    let table = DECODER_TABLE.read().unwrap();
    if let Some(factory) = table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&normalized))
        .map(|(_, f)| f)
    {
        return Some(factory());
    }

    let aliases = ENCODING_ALIASES.read().unwrap();
    let &alias = aliases
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&normalized))
        .map(|(_, real)| real)?;
    table.get(alias).map(|f| f())
}

pub fn register_decoder(
    encoding_name: &'static str,
    factory: DecoderFactory,
) -> Option<DecoderFactory> {
    DECODER_TABLE
        .write()
        .unwrap()
        .insert(encoding_name, factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_maps_high_bytes() {
        let mut dst = String::new();
        let (read, _) = Latin1Decoder.decode(&[0x63, 0x61, 0x66, 0xE9], &mut dst, true).unwrap();
        assert_eq!(read, 4);
        assert_eq!(dst, "caf\u{E9}");
    }

    #[test]
    fn decoder_lookup_is_case_insensitive() {
        assert!(find_decoder("utf-8").is_some());
        assert!(find_decoder("Windows-1252").is_some());
        assert!(find_decoder("x-unknown-charset").is_none());
    }
}
