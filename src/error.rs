use std::sync::Arc;

use crate::encoding::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgmlErrorLevel {
    FatalError,
    Error,
    Warning,
}

impl std::fmt::Display for SgmlErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::FatalError => write!(f, "fatal error"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SgmlError {
    // general errors
    InternalError,
    // resolver errors
    ResourceNotFound,
    UnsupportedScheme,
    BaseUriRequired,
    // decoder errors
    UnsupportedEncoding,
    InvalidCodePoint,
    DecodeError(DecodeError),
    // entity scanner errors
    ScannerInvalidNameStartChar,
    ScannerInvalidNameChar,
    ScannerUnclosedLiteral,
    ScannerUnclosedBlock,
    ScannerInvalidCharacterReference,
    ScannerUnexpectedEOF,
    // DTD errors
    DtdInvalidDeclaration,
    DtdDuplicateDeclaration,
    DtdInvalidContentModel,
    DtdMixedConnectors,
    DtdInvalidAttributeType,
    DtdInvalidAttributeDefault,
    DtdMarkedSectionUnsupported,
    DtdUndefinedParameterEntity,
    DtdImproperEntityNesting,
    DtdUnexpectedEOF,
    // document parser errors
    ParserUnknownEntity,
    ParserDuplicateAttribute,
    ParserInvalidAttributeName,
    ParserUnmatchedEndTag,
    ParserUnexpectedDeclaration,
    ParserBadCommentSyntax,
    ParserStrayCharacter,
    ParserRequiredRootMissing,
    ParserDoctypeNameMismatch,
    ParserMultipleRootElements,
    ParserTextNotAllowed,
    ParserElementNotAllowed,
    ParserUnexpectedEOF,
    // I/O errors
    IOError(Arc<std::io::Error>),
    // URI errors
    UriError(url::ParseError),
}

impl std::fmt::Display for SgmlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for SgmlError {}

impl From<std::io::Error> for SgmlError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(Arc::new(value))
    }
}

impl From<DecodeError> for SgmlError {
    fn from(value: DecodeError) -> Self {
        Self::DecodeError(value)
    }
}

impl From<url::ParseError> for SgmlError {
    fn from(value: url::ParseError) -> Self {
        Self::UriError(value)
    }
}

/// A recoverable or fatal condition observed while parsing, stamped with the
/// position of the entity frame that produced it.
///
/// `context` is the rendered entity chain, innermost frame first, so a reader
/// of the log can see through parameter- and general-entity expansion.
#[derive(Debug)]
pub struct SgmlParseError {
    pub error: SgmlError,
    pub level: SgmlErrorLevel,
    pub line: usize,
    pub column: usize,
    pub context: String,
    pub uri: Option<String>,
    pub message: String,
}

impl std::fmt::Display for SgmlParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(uri) = self.uri.as_deref() {
            write!(
                f,
                "{}[{}][line:{},column:{}][{}] {}",
                uri, self.context, self.line, self.column, self.level, self.message,
            )
        } else {
            write!(
                f,
                "[{}][line:{},column:{}][{}] {}",
                self.context, self.line, self.column, self.level, self.message,
            )
        }
    }
}

impl std::error::Error for SgmlParseError {}

/// Sink for recoverable parse conditions.
///
/// The parser keeps going after anything reported through `error` or
/// `warning`; `fatal_error` is reported once, immediately before the parse
/// gives up.
pub trait ErrorHandler {
    fn warning(&self, error: SgmlParseError) {
        let _ = error;
    }

    fn error(&self, error: SgmlParseError) {
        let _ = error;
    }

    fn fatal_error(&self, error: SgmlParseError) {
        let _ = error;
    }
}

/// Discards warnings and errors. The default sink.
pub struct SilentErrorHandler;

impl ErrorHandler for SilentErrorHandler {}

/// Writes every report to stderr, one line each.
pub struct StderrErrorHandler;

impl ErrorHandler for StderrErrorHandler {
    fn warning(&self, error: SgmlParseError) {
        eprintln!("{error}");
    }

    fn error(&self, error: SgmlParseError) {
        eprintln!("{error}");
    }

    fn fatal_error(&self, error: SgmlParseError) {
        eprintln!("{error}");
    }
}

macro_rules! fatal_error {
    ($parser:expr, $code:ident, $( $args:expr ),+ $(,)?) => {
        $parser.report(
            $crate::error::SgmlErrorLevel::FatalError,
            $crate::error::SgmlError::$code,
            format!($( $args ),+),
        )
    };
}

macro_rules! error {
    ($parser:expr, $code:ident, $( $args:expr ),+ $(,)?) => {
        $parser.report(
            $crate::error::SgmlErrorLevel::Error,
            $crate::error::SgmlError::$code,
            format!($( $args ),+),
        )
    };
}

macro_rules! warning {
    ($parser:expr, $code:ident, $( $args:expr ),+ $(,)?) => {
        $parser.report(
            $crate::error::SgmlErrorLevel::Warning,
            $crate::error::SgmlError::$code,
            format!($( $args ),+),
        )
    };
}

pub(crate) use {error, fatal_error, warning};
