use std::fmt::Write as _;

use url::Url;

use crate::{
    error::SgmlError,
    resolver::{EntityResolver, Resource, resolve_uri},
    source::InputSource,
};

/// Sentinel returned by [`Entity::read_char`] once the frame is exhausted.
pub const EOF_CHAR: char = '\u{FFFF}';

/// Windows-1252 mapping for the C1 control range `0x80..=0x9F`.
///
/// HTML producers routinely emit numeric character references into this range
/// meaning the Windows-1252 glyphs, not the C1 controls; the remap applies
/// only to entities flagged as HTML.
const WINDOWS_1252_C1: [u16; 32] = [
    0x20AC, 0x0081, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160,
    0x2039, 0x0152, 0x008D, 0x017D, 0x008F, 0x0090, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022,
    0x2013, 0x2014, 0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0x009D, 0x017E, 0x0178,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralType {
    Cdata,
    Sdata,
    Pi,
}

pub enum EntityKind {
    /// Replacement text supplied inline by a declaration.
    Internal {
        literal: String,
        literal_type: Option<LiteralType>,
    },
    /// An external resource reached through the resolver.
    External { system_id: String },
    /// A stream handed in by the caller (the top-level document).
    Reader,
}

/// A single named input source: one frame of the entity stack.
///
/// The frame owns its decoded character supply, tracks line/column for error
/// reports, and exposes the primitive scanners both the DTD parser and the
/// document parser are built from. The most recently read character stays
/// available as `last_char`, so a scanner always begins at the current
/// position of the previous one.
pub struct Entity {
    name: String,
    kind: EntityKind,
    public_id: Option<String>,
    uri: Option<Url>,
    is_html: bool,
    source: Option<InputSource>,
    last_char: char,
    is_whitespace: bool,
    line: usize,
    column: usize,
}

impl Entity {
    pub fn internal(name: impl Into<String>, literal: impl Into<String>) -> Self {
        Self::new(
            name,
            EntityKind::Internal {
                literal: literal.into(),
                literal_type: None,
            },
        )
    }

    pub fn typed_literal(
        name: impl Into<String>,
        literal: impl Into<String>,
        literal_type: LiteralType,
    ) -> Self {
        Self::new(
            name,
            EntityKind::Internal {
                literal: literal.into(),
                literal_type: Some(literal_type),
            },
        )
    }

    pub fn external(
        name: impl Into<String>,
        public_id: Option<String>,
        system_id: impl Into<String>,
    ) -> Self {
        let mut ret = Self::new(
            name,
            EntityKind::External {
                system_id: system_id.into(),
            },
        );
        ret.public_id = public_id;
        ret
    }

    pub fn from_reader(name: impl Into<String>, source: InputSource) -> Self {
        let mut ret = Self::new(name, EntityKind::Reader);
        ret.source = Some(source);
        ret
    }

    fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        let name = name.into();
        let is_html = name.eq_ignore_ascii_case("html");
        Self {
            name,
            kind,
            public_id: None,
            uri: None,
            is_html,
            source: None,
            last_char: '\0',
            is_whitespace: false,
            line: 1,
            column: 0,
        }
    }

    /// Open the frame: internal literals become their own character supply,
    /// external references go through `resolver` relative to `base`.
    ///
    /// The first character is primed into `last_char`.
    pub fn open(
        &mut self,
        resolver: &dyn EntityResolver,
        base: Option<&Url>,
        default_encoding: Option<&str>,
    ) -> Result<(), SgmlError> {
        match &self.kind {
            EntityKind::Internal { literal, .. } => {
                self.source = Some(InputSource::from_content(literal));
            }
            EntityKind::External { system_id } => {
                let uri = resolve_uri(base, system_id)?;
                let Resource {
                    mut stream,
                    encoding,
                    mime_type,
                    redirect,
                } = resolver.get_content(&uri)?;
                if mime_type.as_deref().is_some_and(|m| m.starts_with("text/html")) {
                    self.is_html = true;
                }
                self.uri = Some(redirect.unwrap_or(uri));
                let encoding = encoding.as_deref().or(default_encoding);
                self.source = Some(InputSource::from_reader(stream.as_mut(), encoding)?);
            }
            EntityKind::Reader => {
                if self.source.is_none() {
                    return Err(SgmlError::InternalError);
                }
            }
        }
        self.read_char()?;
        Ok(())
    }

    /// Release the character supply. Idempotent; also performed on drop.
    pub fn close(&mut self) {
        self.source = None;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    pub fn uri(&self) -> Option<&Url> {
        self.uri.as_ref()
    }

    pub fn set_uri(&mut self, uri: Url) {
        self.uri = Some(uri);
    }

    pub fn is_html(&self) -> bool {
        self.is_html
    }

    pub fn set_html(&mut self, is_html: bool) {
        self.is_html = is_html;
    }

    pub fn literal_type(&self) -> Option<LiteralType> {
        match &self.kind {
            EntityKind::Internal { literal_type, .. } => *literal_type,
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, EntityKind::Internal { .. })
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn last_char(&self) -> char {
        self.last_char
    }

    pub fn is_whitespace(&self) -> bool {
        self.is_whitespace
    }

    pub fn encoding_name(&self) -> Option<&'static str> {
        self.source.as_ref().map(|s| s.encoding_name())
    }

    /// The character after `last_char`, without consuming it.
    pub fn peek(&self) -> char {
        self.source
            .as_ref()
            .and_then(|s| s.peek_char())
            .unwrap_or(EOF_CHAR)
    }

    /// Advance to the next character and return it.
    ///
    /// A CR alone or a CR immediately before LF is normalized to a single LF
    /// and bumps the line counter, as does a lone LF. Space and tab set the
    /// whitespace flag without touching the line counter.
    pub fn read_char(&mut self) -> Result<char, SgmlError> {
        let Some(source) = self.source.as_mut() else {
            self.last_char = EOF_CHAR;
            return Ok(EOF_CHAR);
        };
        let Some(mut c) = source.next_char() else {
            self.last_char = EOF_CHAR;
            self.is_whitespace = false;
            return Ok(EOF_CHAR);
        };
        if c == '\r' {
            if source.peek_char() == Some('\n') {
                source.next_char();
            }
            c = '\n';
        }
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        self.is_whitespace = matches!(c, ' ' | '\t' | '\n');
        self.last_char = c;
        Ok(c)
    }

    /// Return the first character that is not space, CR, LF, or tab.
    pub fn skip_whitespace(&mut self) -> Result<char, SgmlError> {
        let mut c = self.last_char;
        while matches!(c, ' ' | '\t' | '\n' | '\r') {
            c = self.read_char()?;
        }
        Ok(c)
    }

    /// Accumulate characters starting at `last_char` until one of
    /// `terminators` or EOF.
    ///
    /// With `nmtoken`, the first character must be a letter or `_` and each
    /// subsequent character a letter, digit, or one of `_ . - :`; anything
    /// else is a name-character error, reported without consuming the
    /// offending character.
    pub fn scan_token(&mut self, terminators: &str, nmtoken: bool) -> Result<String, SgmlError> {
        let mut buffer = String::new();
        let mut c = self.last_char;
        while c != EOF_CHAR && !terminators.contains(c) {
            if nmtoken {
                if buffer.is_empty() {
                    if !(c.is_alphabetic() || c == '_') {
                        return Err(SgmlError::ScannerInvalidNameStartChar);
                    }
                } else if !(c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':')) {
                    return Err(SgmlError::ScannerInvalidNameChar);
                }
            }
            buffer.push(c);
            c = self.read_char()?;
        }
        Ok(buffer)
    }

    /// Accumulate characters until the quote that opened the literal,
    /// expanding numeric character references inline. Unknown or non-numeric
    /// `&name;` references are kept verbatim.
    ///
    /// `last_char` must be the opening quote; on return it is the character
    /// after the closing quote.
    pub fn scan_literal(&mut self, quote: char) -> Result<String, SgmlError> {
        let mut buffer = String::new();
        let mut c = self.read_char()?;
        while c != quote {
            match c {
                EOF_CHAR => return Err(SgmlError::ScannerUnclosedLiteral),
                '&' if self.peek() == '#' => {
                    buffer.push(self.expand_char_entity()?);
                    c = self.last_char;
                    continue;
                }
                c => buffer.push(c),
            }
            c = self.read_char()?;
        }
        self.read_char()?;
        Ok(buffer)
    }

    /// String-search for the multi-character `terminator` (`-->`, `]]>`, …),
    /// accumulating everything before it. Matching falls back over the
    /// longest proper border of the partially matched terminator, so
    /// overlapping candidates (`--->`) are handled without rescanning input.
    ///
    /// An unclosed block is an error; the caller holds the opening line for
    /// its report.
    pub fn scan_to_end(&mut self, terminator: &str) -> Result<String, SgmlError> {
        debug_assert!(!terminator.is_empty());
        let term: Vec<char> = terminator.chars().collect();
        let border = border_table(&term);

        let mut buffer = String::new();
        let mut matched = 0;
        let mut c = self.last_char;
        loop {
            if c == EOF_CHAR {
                return Err(SgmlError::ScannerUnclosedBlock);
            }
            if c == term[matched] {
                matched += 1;
                if matched == term.len() {
                    self.read_char()?;
                    return Ok(buffer);
                }
                c = self.read_char()?;
            } else if matched > 0 {
                // Keep the longest border of the matched prefix; everything
                // before it is plain content.
                let keep = border[matched - 1];
                buffer.extend(&term[..matched - keep]);
                matched = keep;
            } else {
                buffer.push(c);
                c = self.read_char()?;
            }
        }
    }

    /// Expand `&#d+;` or `&#x…;` into a character.
    ///
    /// `last_char` must be the `&`; on return it is the character after the
    /// `;`. Values in `0x80..=0x9F` are remapped through the Windows-1252
    /// table when this entity is HTML, and a high surrogate immediately
    /// followed by a second reference holding the low surrogate combines
    /// into a single scalar.
    pub fn expand_char_entity(&mut self) -> Result<char, SgmlError> {
        let code = self.scan_char_reference()?;
        let code = if (0xD800..=0xDBFF).contains(&code) {
            // A surrogate pair written as two adjacent references.
            if self.last_char == '&' && self.peek() == '#' {
                let low = self.scan_char_reference()?;
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(SgmlError::ScannerInvalidCharacterReference);
                }
                0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00)
            } else {
                return Err(SgmlError::ScannerInvalidCharacterReference);
            }
        } else {
            code
        };
        char::from_u32(code).ok_or(SgmlError::ScannerInvalidCharacterReference)
    }

    fn scan_char_reference(&mut self) -> Result<u32, SgmlError> {
        debug_assert_eq!(self.last_char, '&');
        let mut c = self.read_char()?;
        debug_assert_eq!(c, '#');
        c = self.read_char()?;

        let mut code = 0u32;
        let mut digits = 0usize;
        if c == 'x' || c == 'X' {
            c = self.read_char()?;
            while let Some(d) = c.to_digit(16) {
                code = code.checked_mul(16).and_then(|v| v.checked_add(d))
                    .ok_or(SgmlError::ScannerInvalidCharacterReference)?;
                digits += 1;
                c = self.read_char()?;
            }
        } else {
            while let Some(d) = c.to_digit(10) {
                code = code.checked_mul(10).and_then(|v| v.checked_add(d))
                    .ok_or(SgmlError::ScannerInvalidCharacterReference)?;
                digits += 1;
                c = self.read_char()?;
            }
        }
        if digits == 0 || c != ';' {
            return Err(SgmlError::ScannerInvalidCharacterReference);
        }
        self.read_char()?;

        if self.is_html && (0x80..=0x9F).contains(&code) {
            code = WINDOWS_1252_C1[(code - 0x80) as usize] as u32;
        }
        Ok(code)
    }

    /// One frame of the error-context chain.
    pub fn context(&self) -> String {
        let mut out = String::new();
        write!(out, "{}({},{})", self.name, self.line, self.column).ok();
        out
    }
}

fn border_table(pattern: &[char]) -> Vec<usize> {
    let mut border = vec![0usize; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = border[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        border[i] = k;
    }
    border
}

/// Render the entity chain, innermost frame first, for one-line error
/// reports. `stack` holds the outer frames, bottom first.
pub fn render_context(current: &Entity, stack: &[Entity]) -> String {
    let mut out = current.context();
    for entity in stack.iter().rev() {
        out.push_str(" <- ");
        out.push_str(&entity.context());
    }
    out
}

/// The absolute URI of the outermost open entity, when known.
pub fn outermost_uri(current: &Entity, stack: &[Entity]) -> Option<String> {
    stack
        .first()
        .and_then(|e| e.uri())
        .or_else(|| current.uri())
        .map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(content: &str) -> Entity {
        let mut e = Entity::internal("test", content);
        e.open(&crate::resolver::DefaultResolver, None, None).unwrap();
        e
    }

    #[test]
    fn read_char_normalizes_line_endings() {
        let mut e = entity("a\r\nb\rc\nd");
        assert_eq!(e.last_char(), 'a');
        assert_eq!(e.read_char().unwrap(), '\n');
        assert_eq!(e.read_char().unwrap(), 'b');
        assert_eq!(e.line(), 2);
        assert_eq!(e.read_char().unwrap(), '\n');
        assert_eq!(e.read_char().unwrap(), 'c');
        assert_eq!(e.line(), 3);
        assert_eq!(e.read_char().unwrap(), '\n');
        assert_eq!(e.read_char().unwrap(), 'd');
        assert_eq!(e.line(), 4);
        assert_eq!(e.read_char().unwrap(), EOF_CHAR);
    }

    #[test]
    fn scan_token_nmtoken_rejects_bad_start() {
        let mut e = entity("1abc ");
        assert!(matches!(
            e.scan_token(" ", true),
            Err(SgmlError::ScannerInvalidNameStartChar)
        ));
    }

    #[test]
    fn scan_token_stops_at_terminator() {
        let mut e = entity("name>rest");
        assert_eq!(e.scan_token(">", true).unwrap(), "name");
        assert_eq!(e.last_char(), '>');
    }

    #[test]
    fn scan_literal_expands_numeric_references() {
        let mut e = entity("'a&#233;b&unknown;c'x");
        assert_eq!(e.scan_literal('\'').unwrap(), "a\u{E9}b&unknown;c");
        assert_eq!(e.last_char(), 'x');
    }

    #[test]
    fn scan_to_end_handles_overlap() {
        // The third '-' must survive as content when `--->` closes a comment.
        let mut e = entity("a---->after");
        assert_eq!(e.scan_to_end("-->").unwrap(), "a--");
        assert_eq!(e.last_char(), 'a');

        let mut e = entity("x]]]>y");
        assert_eq!(e.scan_to_end("]]>").unwrap(), "x]");
        assert_eq!(e.last_char(), 'y');
    }

    #[test]
    fn scan_to_end_partial_match_rewind() {
        // `--a` begins like the terminator but is not it; the matched prefix
        // must land in the output exactly once.
        let mut e = entity("x--a-->z");
        assert_eq!(e.scan_to_end("-->").unwrap(), "x--a");
        assert_eq!(e.last_char(), 'z');
    }

    #[test]
    fn scan_to_end_unclosed_is_error() {
        let mut e = entity("no terminator here");
        assert!(matches!(
            e.scan_to_end("-->"),
            Err(SgmlError::ScannerUnclosedBlock)
        ));
    }

    #[test]
    fn char_entity_windows_1252_remap() {
        let mut e = entity("&#133;x");
        e.set_html(true);
        assert_eq!(e.expand_char_entity().unwrap(), '\u{2026}');
        assert_eq!(e.last_char(), 'x');

        // Without the HTML flag the C1 control comes through untouched.
        let mut e = entity("&#133;x");
        e.set_html(false);
        assert_eq!(e.expand_char_entity().unwrap(), '\u{85}');
    }

    #[test]
    fn char_entity_surrogate_pair() {
        let mut e = entity("&#xD83D;&#xDE00;x");
        assert_eq!(e.expand_char_entity().unwrap(), '\u{1F600}');
        assert_eq!(e.last_char(), 'x');
    }
}
