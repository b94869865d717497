use std::io::Read;

use crate::{
    encoding::{DecodeError, Decoder, UTF8_NAME, find_decoder},
    error::SgmlError,
};

/// A decoded character supply for one entity frame.
///
/// The whole byte stream is buffered up front: encoding detection may need to
/// restart decoding from byte 0 once an XML declaration or `<meta>` element
/// has been sniffed out of the provisionally decoded prefix, and the readers
/// handed to the parser are not seekable in general.
pub struct InputSource {
    bytes: Vec<u8>,
    bom_len: usize,
    decoded: String,
    pos: usize,
    encoding: &'static str,
}

impl InputSource {
    /// Construct an [`InputSource`] from a byte stream.
    ///
    /// `default_encoding` is used for the provisional decode when the stream
    /// carries no byte order mark; when absent, UTF-8 is assumed. A sniffed
    /// XML declaration or HTML `<meta>` charset replaces the provisional
    /// choice and decoding restarts from the beginning.
    pub fn from_reader(
        reader: &mut dyn Read,
        default_encoding: Option<&str>,
    ) -> Result<Self, SgmlError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(bytes, default_encoding)
    }

    pub fn from_bytes(bytes: Vec<u8>, default_encoding: Option<&str>) -> Result<Self, SgmlError> {
        let mut ret = Self {
            bytes,
            bom_len: 0,
            decoded: String::new(),
            pos: 0,
            encoding: UTF8_NAME,
        };

        let mut decoder = match ret.detect_bom()? {
            Some(decoder) => decoder,
            None => match default_encoding {
                Some(name) => find_decoder(name).ok_or(SgmlError::UnsupportedEncoding)?,
                None => find_decoder(UTF8_NAME).unwrap(),
            },
        };
        ret.decode_all(decoder.as_mut())?;

        if ret.bom_len == 0
            && let Some(sniffed) = ret
                .sniff_xml_declaration()
                .or_else(|| ret.sniff_meta_charset())
            && let Some(mut new_decoder) = find_decoder(&sniffed)
            && new_decoder.name() != ret.encoding
        {
            ret.decoded.clear();
            ret.decode_all(new_decoder.as_mut())?;
        }

        Ok(ret)
    }

    /// Construct an [`InputSource`] from character data that is already
    /// decoded, such as an internal entity literal.
    pub fn from_content(content: &str) -> Self {
        Self {
            bytes: Vec::new(),
            bom_len: 0,
            // NUL is not legal XML text; see `decode_all`.
            decoded: content.replace('\0', " "),
            pos: 0,
            encoding: UTF8_NAME,
        }
    }

    pub(crate) fn next_char(&mut self) -> Option<char> {
        let c = self.decoded[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub(crate) fn peek_char(&self) -> Option<char> {
        self.decoded[self.pos..].chars().next()
    }

    /// The encoding name of the decoder that produced the character stream.
    pub fn encoding_name(&self) -> &'static str {
        self.encoding
    }

    fn detect_bom(&mut self) -> Result<Option<Box<dyn Decoder + Send>>, SgmlError> {
        let mut four = [0u8; 4];
        let head = self.bytes.get(..4).unwrap_or(&self.bytes);
        four[..head.len()].copy_from_slice(head);

        let (name, bom_len): (&str, usize) = match four {
            // UCS-4, big-endian machine (1234 order)
            [0x00, 0x00, 0xFE, 0xFF] => ("UTF-32BE", 4),
            // UCS-4, little-endian machine (4321 order)
            [0xFF, 0xFE, 0x00, 0x00] => ("UTF-32LE", 4),
            // UCS-4, unusual octet order (2143)
            [0x00, 0x00, 0xFF, 0xFE] => ("UCS-4-2143", 4),
            // UCS-4, unusual octet order (3412)
            [0xFE, 0xFF, 0x00, 0x00] => ("UCS-4-3412", 4),
            // UTF-16, big-endian
            [0xFE, 0xFF, ..] => ("UTF-16BE", 2),
            // UTF-16, little-endian
            [0xFF, 0xFE, ..] => ("UTF-16LE", 2),
            // UTF-8
            [0xEF, 0xBB, 0xBF, ..] => ("UTF-8", 3),
            // Cases where BOM was not found but the '<' of the first markup
            // betrays the code unit width and byte order:
            [0x00, 0x00, 0x00, 0x3C] => ("UTF-32BE", 0),
            [0x3C, 0x00, 0x00, 0x00] => ("UTF-32LE", 0),
            [0x00, 0x00, 0x3C, 0x00] => ("UCS-4-2143", 0),
            [0x00, 0x3C, 0x00, 0x00] => ("UCS-4-3412", 0),
            [0x00, 0x3C, 0x00, 0x3F] => ("UTF-16BE", 0),
            [0x3C, 0x00, 0x3F, 0x00] => ("UTF-16LE", 0),
            // EBCDIC, in some flavor
            [0x4C, 0x6F, 0xA7, 0x94] => return Err(SgmlError::UnsupportedEncoding),
            _ => return Ok(None),
        };
        self.bom_len = bom_len;
        Ok(find_decoder(name))
    }

    fn decode_all(&mut self, decoder: &mut dyn Decoder) -> Result<(), SgmlError> {
        self.encoding = decoder.name();
        let mut cursor = self.bom_len;
        while cursor < self.bytes.len() {
            match decoder.decode(&self.bytes[cursor..], &mut self.decoded, true) {
                Ok((read, _)) => {
                    if read == 0 {
                        break;
                    }
                    cursor += read;
                }
                Err(DecodeError::Malformed { read, length, .. }) => {
                    // Recover with a replacement character and resume after
                    // the offending sequence.
                    self.decoded.push('\u{FFFD}');
                    cursor += read.max(length.max(1));
                }
                Err(err @ DecodeError::InvalidCodePoint { .. }) => return Err(err.into()),
                Err(DecodeError::InputIsEmpty) => break,
            }
        }

        // NUL is not legal XML text, and real-world SGML producers emit it
        // as padding. Map it to a space.
        if self.decoded.contains('\0') {
            self.decoded = self.decoded.replace('\0', " ");
        }
        Ok(())
    }

    /// Look for `<?xml ... encoding="..."?>` at the very start of the
    /// provisionally decoded text.
    fn sniff_xml_declaration(&self) -> Option<String> {
        let rest = self.decoded.strip_prefix("<?xml")?;
        let end = memchr::memmem::find(rest.as_bytes(), b"?>")?;
        let decl = &rest[..end];
        Self::scan_pseudo_attribute(decl, "encoding")
    }

    /// Look for `<meta http-equiv="content-type" content="...charset=...">`
    /// in the provisionally decoded prefix.
    fn sniff_meta_charset(&self) -> Option<String> {
        let mut cut = self.decoded.len().min(4096);
        while !self.decoded.is_char_boundary(cut) {
            cut -= 1;
        }
        let prefix = &self.decoded[..cut];
        let lower = prefix.to_ascii_lowercase();
        let finder = memchr::memmem::Finder::new(b"<meta");
        let mut from = 0;
        while let Some(at) = finder.find(lower[from..].as_bytes()) {
            let start = from + at;
            let end = memchr::memchr(b'>', lower[start..].as_bytes()).map(|e| start + e)?;
            let tag = &prefix[start..end];
            let tag_lower = &lower[start..end];
            if tag_lower.contains("content-type")
                && let Some(content) = Self::scan_pseudo_attribute(tag, "content")
                && let Some(pos) = content.to_ascii_lowercase().find("charset=")
            {
                let charset = content[pos + "charset=".len()..]
                    .trim_start()
                    .trim_start_matches(['"', '\'']);
                let charset: String = charset
                    .chars()
                    .take_while(|c| !c.is_whitespace() && !matches!(c, ';' | '"' | '\''))
                    .collect();
                if !charset.is_empty() {
                    return Some(charset);
                }
            }
            from = end;
        }
        None
    }

    fn scan_pseudo_attribute(tag: &str, name: &str) -> Option<String> {
        let lower = tag.to_ascii_lowercase();
        let mut from = 0;
        while let Some(at) = lower[from..].find(name) {
            let rest = tag[from + at + name.len()..].trim_start();
            if let Some(rest) = rest.strip_prefix('=') {
                let rest = rest.trim_start();
                let quote = rest.chars().next()?;
                if matches!(quote, '"' | '\'') {
                    let value = &rest[1..];
                    let end = value.find(quote)?;
                    return Some(value[..end].to_owned());
                }
            }
            from += at + name.len();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16le_bom_is_consumed() {
        let bytes = vec![0xFF, 0xFE, b'<', 0x00, b'a', 0x00, b'>', 0x00];
        let mut source = InputSource::from_bytes(bytes, None).unwrap();
        assert_eq!(source.encoding_name(), "UTF-16LE");
        assert_eq!(source.next_char(), Some('<'));
        assert_eq!(source.next_char(), Some('a'));
    }

    #[test]
    fn xml_declaration_switches_encoding() {
        let mut bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><p>".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"</p>");
        let source = InputSource::from_bytes(bytes, None).unwrap();
        assert_eq!(source.encoding_name(), "ISO-8859-1");
        assert!(source.decoded.contains('\u{E9}'));
    }

    #[test]
    fn meta_charset_switches_encoding() {
        let mut bytes =
            b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\"></head><body>"
                .to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"</body></html>");
        let source = InputSource::from_bytes(bytes, None).unwrap();
        assert_eq!(source.encoding_name(), "ISO-8859-1");
        assert!(source.decoded.contains('\u{E9}'));
    }

    #[test]
    fn nul_bytes_become_spaces() {
        let source = InputSource::from_bytes(b"a\x00b".to_vec(), None).unwrap();
        assert_eq!(source.decoded, "a b");
    }
}
