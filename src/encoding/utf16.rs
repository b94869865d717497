use crate::encoding::{DecodeError, Decoder};

pub const UTF16BE_NAME: &str = "UTF-16BE";
pub const UTF16LE_NAME: &str = "UTF-16LE";

/// Shared machinery for both byte orders.
///
/// Surrogate halves may be split across `decode` calls, so an unpaired high
/// surrogate is carried over in `pending`.
fn decode_utf16(
    read_unit: fn(&[u8]) -> u16,
    pending: &mut Option<u16>,
    src: &[u8],
    dst: &mut String,
    finish: bool,
) -> Result<(usize, usize), DecodeError> {
    if src.is_empty() {
        return Err(DecodeError::InputIsEmpty);
    }

    let mut read = 0;
    let mut write = 0;
    while src.len() - read >= 2 {
        let unit = read_unit(&src[read..]);
        read += 2;
        if let Some(high) = pending.take() {
            if (0xDC00..=0xDFFF).contains(&unit) {
                let code = 0x10000 + (((high - 0xD800) as u32) << 10) + (unit - 0xDC00) as u32;
                let c = char::from_u32(code).ok_or(DecodeError::InvalidCodePoint {
                    read,
                    write,
                    code,
                })?;
                write += c.len_utf8();
                dst.push(c);
            } else {
                return Err(DecodeError::Malformed {
                    read,
                    write,
                    length: 2,
                });
            }
        } else if (0xD800..=0xDBFF).contains(&unit) {
            *pending = Some(unit);
        } else if (0xDC00..=0xDFFF).contains(&unit) {
            return Err(DecodeError::Malformed {
                read,
                write,
                length: 2,
            });
        } else {
            let c = char::from_u32(unit as u32).unwrap();
            write += c.len_utf8();
            dst.push(c);
        }
    }

    if finish && (src.len() - read != 0 || pending.is_some()) {
        return Err(DecodeError::Malformed {
            read: src.len(),
            write,
            length: src.len() - read,
        });
    }

    Ok((read, write))
}

#[derive(Default)]
pub struct UTF16BEDecoder {
    pending: Option<u16>,
}
impl Decoder for UTF16BEDecoder {
    fn name(&self) -> &'static str {
        UTF16BE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_utf16(
            |b| u16::from_be_bytes([b[0], b[1]]),
            &mut self.pending,
            src,
            dst,
            finish,
        )
    }
}

#[derive(Default)]
pub struct UTF16LEDecoder {
    pending: Option<u16>,
}
impl Decoder for UTF16LEDecoder {
    fn name(&self) -> &'static str {
        UTF16LE_NAME
    }

    fn decode(
        &mut self,
        src: &[u8],
        dst: &mut String,
        finish: bool,
    ) -> Result<(usize, usize), DecodeError> {
        decode_utf16(
            |b| u16::from_le_bytes([b[0], b[1]]),
            &mut self.pending,
            src,
            dst,
            finish,
        )
    }
}
