use crate::encoding::{DecodeError, Decoder};

pub const UTF32BE_NAME: &str = "UTF-32BE";
pub const UTF32LE_NAME: &str = "UTF-32LE";
pub const UCS4_2143_NAME: &str = "UCS-4-2143";
pub const UCS4_3412_NAME: &str = "UCS-4-3412";

/// Code points must not exceed U+10FFFF and must not be surrogate scalar
/// values; both conditions are reported as [`DecodeError::InvalidCodePoint`]
/// rather than being replaced, since a bad UCS-4 unit almost always means the
/// byte order was misjudged.
fn decode_ucs4(
    read_unit: fn([u8; 4]) -> u32,
    src: &[u8],
    dst: &mut String,
    finish: bool,
) -> Result<(usize, usize), DecodeError> {
    if src.is_empty() {
        return Err(DecodeError::InputIsEmpty);
    }

    let mut read = 0;
    let mut write = 0;
    for bytes in src.chunks_exact(4) {
        read += 4;
        let code = read_unit(bytes.try_into().unwrap());
        if code > 0x10FFFF || (0xD800..=0xDFFF).contains(&code) {
            return Err(DecodeError::InvalidCodePoint { read, write, code });
        }
        let c = char::from_u32(code).ok_or(DecodeError::InvalidCodePoint { read, write, code })?;
        write += c.len_utf8();
        dst.push(c);
    }

    let rem = src.len() - read;
    if finish && rem != 0 {
        return Err(DecodeError::Malformed {
            read: src.len(),
            write,
            length: rem,
        });
    }

    Ok((read, write))
}

pub struct UTF32BEDecoder;
impl Decoder for UTF32BEDecoder {
    fn name(&self) -> &'static str {
        UTF32BE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_ucs4(u32::from_be_bytes, src, dst, finish)
    }
}

pub struct UTF32LEDecoder;
impl Decoder for UTF32LEDecoder {
    fn name(&self) -> &'static str {
        UTF32LE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_ucs4(u32::from_le_bytes, src, dst, finish)
    }
}

/// UCS-4, unusual octet order (2143).
pub struct UCS4Unusual2143Decoder;
impl Decoder for UCS4Unusual2143Decoder {
    fn name(&self) -> &'static str {
        UCS4_2143_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_ucs4(
            |b| u32::from_be_bytes([b[1], b[0], b[3], b[2]]),
            src,
            dst,
            finish,
        )
    }
}

/// UCS-4, unusual octet order (3412).
pub struct UCS4Unusual3412Decoder;
impl Decoder for UCS4Unusual3412Decoder {
    fn name(&self) -> &'static str {
        UCS4_3412_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_ucs4(
            |b| u32::from_be_bytes([b[2], b[3], b[0], b[1]]),
            src,
            dst,
            finish,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ucs4_non_bmp() {
        let mut dst = String::new();
        UTF32BEDecoder
            .decode(&[0x00, 0x01, 0xF6, 0x00], &mut dst, true)
            .unwrap();
        assert_eq!(dst, "\u{1F600}");
    }

    #[test]
    fn ucs4_rejects_surrogate_scalar() {
        let mut dst = String::new();
        let err = UTF32LEDecoder
            .decode(&[0x00, 0xD8, 0x00, 0x00], &mut dst, true)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidCodePoint { code: 0xD800, .. }));
    }

    #[test]
    fn ucs4_rejects_out_of_range() {
        let mut dst = String::new();
        let err = UTF32BEDecoder
            .decode(&[0x00, 0x11, 0x00, 0x00], &mut dst, true)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidCodePoint { code: 0x110000, .. }));
    }
}
