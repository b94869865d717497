#![doc = include_str!("../README.md")]

pub mod dtd;
pub mod encoding;
pub mod entity;
pub mod error;
pub mod reader;
pub mod resolver;
pub mod source;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Case folding applied to element and attribute names as they are emitted.
///
/// With `None`, names keep the casing they had in the input, except that end
/// tags are forced to match the casing of their start tag. Lookups into the
/// DTD are case-insensitive under every setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseFolding {
    #[default]
    None,
    ToUpper,
    ToLower,
}

/// Whether pure-whitespace text nodes surface at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhitespaceHandling {
    /// Surface whitespace nodes everywhere.
    #[default]
    All,
    /// Surface whitespace only where `xml:space="preserve"` is in effect.
    Significant,
    /// Never surface pure-whitespace nodes.
    None,
}

/// Trimming policy applied to the values of emitted text nodes.
///
/// A flags value over `TRIM_LEADING`, `TRIM_TRAILING`, and
/// `ONLY_LINE_BREAKS`. When neither trim flag is set, text is verbatim.
/// `ONLY_LINE_BREAKS` restricts the trimmed character set to CR and LF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextWhitespace(u8);

impl TextWhitespace {
    pub const TRIM_LEADING: u8 = 0b001;
    pub const TRIM_TRAILING: u8 = 0b010;
    pub const ONLY_LINE_BREAKS: u8 = 0b100;

    pub fn new(flags: u8) -> Self {
        let mut ret = Self(0);
        ret.set(flags);
        ret
    }

    /// Replace the flags. Bits outside the defined set are silently
    /// dropped, and `ONLY_LINE_BREAKS` is cleared when neither trim flag is
    /// set.
    pub fn set(&mut self, flags: u8) {
        let mut flags =
            flags & (Self::TRIM_LEADING | Self::TRIM_TRAILING | Self::ONLY_LINE_BREAKS);
        if flags & (Self::TRIM_LEADING | Self::TRIM_TRAILING) == 0 {
            flags &= !Self::ONLY_LINE_BREAKS;
        }
        self.0 = flags;
    }

    pub fn trim_leading(&self) -> bool {
        self.0 & Self::TRIM_LEADING != 0
    }

    pub fn trim_trailing(&self) -> bool {
        self.0 & Self::TRIM_TRAILING != 0
    }

    pub fn only_line_breaks(&self) -> bool {
        self.0 & Self::ONLY_LINE_BREAKS != 0
    }

    /// Apply the policy to a text value.
    pub fn apply<'a>(&self, text: &'a str) -> &'a str {
        let trimmable: fn(char) -> bool = if self.only_line_breaks() {
            |c| matches!(c, '\r' | '\n')
        } else {
            |c| matches!(c, ' ' | '\t' | '\r' | '\n')
        };
        let mut text = text;
        if self.trim_leading() {
            text = text.trim_start_matches(trimmable);
        }
        if self.trim_trailing() {
            text = text.trim_end_matches(trimmable);
        }
        text
    }
}
