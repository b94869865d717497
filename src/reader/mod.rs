mod infer;
mod namespaces;
mod node;
mod parse;

use std::{
    collections::{HashMap, VecDeque},
    io::Read,
    sync::Arc,
};

use url::Url;

pub use crate::reader::node::{Attribute, NodeType};
use crate::{
    CaseFolding, TextWhitespace, WhitespaceHandling,
    dtd::Dtd,
    entity::{Entity, outermost_uri, render_context},
    error::{
        ErrorHandler, SgmlError, SgmlErrorLevel, SgmlParseError, SilentErrorHandler,
    },
    reader::node::{HwStack, Node},
    resolver::{DefaultResolver, EntityResolver},
};

/// Internal parser states. The public [`SgmlReader::read`] loops over state
/// transitions until a node is ready to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ParserState {
    #[default]
    Initial,
    /// At a content boundary; the current character begins markup or text.
    Markup,
    /// `<` plus one more character were consumed while accumulating text;
    /// resume parsing the interrupted tag.
    PartialTag,
    /// Synthetic start/end events are being drained ahead of a deferred
    /// real event.
    PseudoStartTag,
    /// The synthetic queue is drained; surface the deferred start tag.
    ContinueStartTag,
    /// Positioned on a text node; transition to the recorded continuation.
    Text,
    /// Positioned on a text node inside a CDATA-content element with a
    /// markup construct pending.
    PartialText,
    /// The synthetic queue is drained; surface the deferred text node.
    ContinueTextNode,
    /// Inside a CDATA-content element, at a content boundary.
    CData,
    /// Positioned on an attribute.
    Attr,
    /// Positioned on an attribute's value.
    AttrValue,
    /// An end tag has been recognized; surface the end-element event.
    EndTag,
    /// Synthesizing end-element events down to a target depth.
    AutoClose,
    Eof,
}

/// A synthetic event awaiting surfacing, produced by tag inference and
/// auto-close.
#[derive(Debug)]
pub(crate) enum Pending {
    Open { name: String, simulated: bool },
    Close { simulated: bool },
}

/// The real event deferred behind the synthetic queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Deferred {
    #[default]
    None,
    StartTag,
    Text,
}

/// The construct pending after text inside a CDATA-content element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CDataPending {
    Comment,
    Pi,
    EndTag,
    Eof,
}

enum InputKind {
    Reader(Box<dyn Read>),
    Content(String),
}

/// A forgiving SGML pull parser.
///
/// Feed it HTML 4 or OFX 1.x style SGML and it produces the node stream of
/// the equivalent well-formed XML document: omitted tags are inferred from
/// the DTD, illegal children auto-close their ancestors, and malformed
/// markup is repaired and reported through the error handler rather than
/// rejected.
///
/// A reader instance holds mutable parse state and is not meant for
/// concurrent use; share a pre-parsed [`Dtd`] across instances instead.
pub struct SgmlReader {
    // configuration
    doc_type: Option<String>,
    public_id: Option<String>,
    system_id: Option<String>,
    internal_subset: Option<String>,
    href: Option<String>,
    base_uri: Option<Url>,
    case_folding: CaseFolding,
    whitespace_handling: WhitespaceHandling,
    text_whitespace: TextWhitespace,
    strip_doc_type: bool,
    ignore_dtd: bool,
    fragment: bool,
    resolver: Arc<dyn EntityResolver>,
    handler: Arc<dyn ErrorHandler>,
    dtd: Option<Arc<Dtd>>,
    input: Option<InputKind>,

    // parse state
    current: Entity,
    entity_stack: Vec<Entity>,
    state: ParserState,
    stack: HwStack<Node>,
    node: Node,
    partial: Node,
    pending_text: String,
    queue: VecDeque<Pending>,
    deferred: Deferred,
    text_next: ParserState,
    cdata_pending: Option<CDataPending>,
    attr_index: Option<usize>,
    attr_value_read: bool,
    resume_state: ParserState,
    root_emitted: bool,
    fatal: bool,
    unknown_namespaces: HashMap<String, String>,
}

impl SgmlReader {
    pub fn builder() -> SgmlReaderBuilder {
        SgmlReaderBuilder::new()
    }

    /// Advance to the next node. Returns `Ok(false)` once the stream is
    /// exhausted; a fatal error surfaces as `Err` exactly once, after which
    /// the reader reports end-of-stream.
    pub fn read(&mut self) -> Result<bool, SgmlError> {
        if self.fatal {
            return Ok(false);
        }
        match self.next_node() {
            Ok(has_node) => Ok(has_node),
            Err(err) => {
                self.report(
                    SgmlErrorLevel::FatalError,
                    err.clone(),
                    format!("Unrecoverable error: {err}"),
                );
                self.fatal = true;
                self.node.reset();
                Err(err)
            }
        }
    }

    // ---- current node accessors -------------------------------------------

    pub fn node_type(&self) -> NodeType {
        if self.attr_index.is_some() {
            if self.attr_value_read {
                return NodeType::Text;
            }
            return NodeType::Attribute;
        }
        self.node.node_type
    }

    /// Qualified name of the current node.
    pub fn name(&self) -> &str {
        if let Some(attr) = self.current_attribute() {
            if self.attr_value_read {
                return "";
            }
            return &attr.name;
        }
        &self.node.name
    }

    pub fn local_name(&self) -> &str {
        let name = self.name();
        name.rsplit_once(':').map_or(name, |(_, local)| local)
    }

    pub fn prefix(&self) -> &str {
        self.name()
            .rsplit_once(':')
            .map_or("", |(prefix, _)| prefix)
    }

    /// Text value of the current node: character data, attribute value,
    /// comment text, PI data, or the internal subset of a DOCTYPE.
    pub fn value(&self) -> &str {
        if let Some(attr) = self.current_attribute() {
            return attr.value();
        }
        &self.node.value
    }

    /// Nesting depth of the current node. The root element is at depth 1;
    /// attribute positioning adds one level, attribute values two.
    pub fn depth(&self) -> usize {
        let mut depth = self.node.depth;
        if self.attr_index.is_some() {
            depth += 1;
            if self.attr_value_read {
                depth += 1;
            }
        }
        depth
    }

    /// The base URI the current input resolves relative references against.
    pub fn base_uri(&self) -> Option<&Url> {
        self.current.uri().or(self.base_uri.as_ref())
    }

    /// Whether the current element was written `<x/>` or is declared EMPTY.
    pub fn is_empty_element(&self) -> bool {
        self.node.node_type == NodeType::Element && self.node.is_empty
    }

    /// Whether the current node was synthesized by tag inference rather than
    /// read from input.
    pub fn is_simulated(&self) -> bool {
        self.node.simulated
    }

    /// The `xml:space` value in effect, from the nearest ancestor that set
    /// one.
    pub fn xml_space(&self) -> &str {
        if let Some(space) = self.node.xml_space.as_deref() {
            return space;
        }
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.xml_space.as_deref())
            .unwrap_or("")
    }

    /// The `xml:lang` value in effect, from the nearest ancestor that set
    /// one.
    pub fn xml_lang(&self) -> &str {
        if let Some(lang) = self.node.xml_lang.as_deref() {
            return lang;
        }
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.xml_lang.as_deref())
            .unwrap_or("")
    }

    pub fn eof(&self) -> bool {
        self.fatal || (self.state == ParserState::Eof && self.stack.count() <= 1)
    }

    // ---- attributes -------------------------------------------------------

    pub fn attribute_count(&self) -> usize {
        self.node.attributes.len()
    }

    pub fn attribute_at(&self, index: usize) -> Option<&Attribute> {
        self.node.attributes.get(index)
    }

    /// Value of the named attribute, under the configured case folding.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        let folded = self.fold_name(name);
        self.node
            .attributes
            .iter()
            .find(|a| a.name == folded)
            .map(|a| a.value())
    }

    /// The quote character used around the current attribute's value: `'`,
    /// `"`, or `'\0'` when unquoted or synthesized.
    pub fn quote_char(&self) -> char {
        self.current_attribute().map_or('\0', |a| a.quote_char)
    }

    /// Whether the current attribute's value comes from the DTD default.
    pub fn is_default(&self) -> bool {
        self.current_attribute().is_some_and(|a| a.is_default())
    }

    pub fn move_to_attribute(&mut self, index: usize) -> bool {
        if index >= self.node.attributes.len() {
            return false;
        }
        if self.attr_index.is_none() {
            self.resume_state = self.state;
        }
        self.attr_index = Some(index);
        self.attr_value_read = false;
        self.state = ParserState::Attr;
        true
    }

    pub fn move_to_attribute_named(&mut self, name: &str) -> bool {
        let folded = self.fold_name(name);
        match self.node.attributes.iter().position(|a| a.name == folded) {
            Some(index) => self.move_to_attribute(index),
            None => false,
        }
    }

    pub fn move_to_first_attribute(&mut self) -> bool {
        self.move_to_attribute(0)
    }

    pub fn move_to_next_attribute(&mut self) -> bool {
        match self.attr_index {
            Some(index) => self.move_to_attribute(index + 1),
            None => self.move_to_attribute(0),
        }
    }

    /// Return from attribute positioning to the owning element.
    pub fn move_to_element(&mut self) -> bool {
        if self.attr_index.is_none() {
            return false;
        }
        self.attr_index = None;
        self.attr_value_read = false;
        self.state = self.resume_state;
        true
    }

    /// Surface the current attribute's value as a text node. Returns `true`
    /// once per attribute.
    pub fn read_attribute_value(&mut self) -> bool {
        if self.attr_index.is_none() || self.attr_value_read {
            return false;
        }
        self.attr_value_read = true;
        self.state = ParserState::AttrValue;
        true
    }

    // ---- internals shared across reader modules ---------------------------

    fn current_attribute(&self) -> Option<&Attribute> {
        self.attr_index.and_then(|i| self.node.attributes.get(i))
    }

    pub(crate) fn fold_name(&self, name: &str) -> String {
        match self.case_folding {
            CaseFolding::None => name.to_owned(),
            CaseFolding::ToUpper => name.to_ascii_uppercase(),
            CaseFolding::ToLower => name.to_ascii_lowercase(),
        }
    }

    pub(crate) fn report(&self, level: SgmlErrorLevel, error: SgmlError, message: String) {
        let record = SgmlParseError {
            error,
            level,
            line: self.current.line(),
            column: self.current.column(),
            context: render_context(&self.current, &self.entity_stack),
            uri: outermost_uri(&self.current, &self.entity_stack),
            message,
        };
        match level {
            SgmlErrorLevel::Warning => self.handler.warning(record),
            SgmlErrorLevel::Error => self.handler.error(record),
            SgmlErrorLevel::FatalError => self.handler.fatal_error(record),
        }
    }
}

/// Builder for [`SgmlReader`]. Every configuration option of the parser is
/// set here; `build` produces a reader ready for its first `read`.
pub struct SgmlReaderBuilder {
    reader: SgmlReader,
}

impl SgmlReaderBuilder {
    pub fn new() -> Self {
        Self {
            reader: SgmlReader {
                doc_type: None,
                public_id: None,
                system_id: None,
                internal_subset: None,
                href: None,
                base_uri: None,
                case_folding: CaseFolding::default(),
                whitespace_handling: WhitespaceHandling::default(),
                text_whitespace: TextWhitespace::default(),
                strip_doc_type: false,
                ignore_dtd: false,
                fragment: false,
                resolver: Arc::new(DefaultResolver),
                handler: Arc::new(SilentErrorHandler),
                dtd: None,
                input: None,
                current: Entity::internal("[empty]", ""),
                entity_stack: Vec::new(),
                state: ParserState::Initial,
                stack: HwStack::new(),
                node: Node::default(),
                partial: Node::default(),
                pending_text: String::new(),
                queue: VecDeque::new(),
                deferred: Deferred::None,
                text_next: ParserState::Markup,
                cdata_pending: None,
                attr_index: None,
                attr_value_read: false,
                resume_state: ParserState::Markup,
                root_emitted: false,
                fatal: false,
                unknown_namespaces: HashMap::new(),
            },
        }
    }

    /// Names the root element; `html` (case-insensitive) selects the
    /// built-in HTML DTD.
    pub fn doc_type(mut self, name: impl Into<String>) -> Self {
        self.reader.doc_type = Some(name.into());
        self
    }

    pub fn public_identifier(mut self, public_id: impl Into<String>) -> Self {
        self.reader.public_id = Some(public_id.into());
        self
    }

    pub fn system_literal(mut self, system_id: impl Into<String>) -> Self {
        self.reader.system_id = Some(system_id.into());
        self
    }

    pub fn internal_subset(mut self, subset: impl Into<String>) -> Self {
        self.reader.internal_subset = Some(subset.into());
        self
    }

    /// Provide the document as a byte stream. Takes precedence over `href`.
    pub fn input_reader(mut self, reader: impl Read + 'static) -> Self {
        self.reader.input = Some(InputKind::Reader(Box::new(reader)));
        self
    }

    /// Provide the document as already-decoded character data.
    pub fn input_str(mut self, content: impl Into<String>) -> Self {
        self.reader.input = Some(InputKind::Content(content.into()));
        self
    }

    /// Provide the document by URI, opened through the resolver.
    pub fn href(mut self, href: impl Into<String>) -> Self {
        self.reader.href = Some(href.into());
        self
    }

    /// Base URI for resolving relative DTD and entity references.
    pub fn base_uri(mut self, base_uri: Url) -> Self {
        self.reader.base_uri = Some(base_uri);
        self
    }

    pub fn case_folding(mut self, case_folding: CaseFolding) -> Self {
        self.reader.case_folding = case_folding;
        self
    }

    pub fn whitespace_handling(mut self, handling: WhitespaceHandling) -> Self {
        self.reader.whitespace_handling = handling;
        self
    }

    pub fn text_whitespace(mut self, text_whitespace: TextWhitespace) -> Self {
        self.reader.text_whitespace = text_whitespace;
        self
    }

    /// Absorb the DOCTYPE declaration instead of surfacing it as a node.
    pub fn strip_doc_type(mut self, strip: bool) -> Self {
        self.reader.strip_doc_type = strip;
        self
    }

    /// Skip DTD loading entirely; tag inference and validation are
    /// effectively disabled.
    pub fn ignore_dtd(mut self, ignore: bool) -> Self {
        self.reader.ignore_dtd = ignore;
        self
    }

    /// Permit multiple root elements.
    pub fn fragment(mut self, fragment: bool) -> Self {
        self.reader.fragment = fragment;
        self
    }

    /// Reuse a pre-parsed DTD across parses.
    pub fn dtd(mut self, dtd: Arc<Dtd>) -> Self {
        self.reader.dtd = Some(dtd);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.reader.resolver = resolver;
        self
    }

    /// Sink for recoverable errors.
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.reader.handler = handler;
        self
    }

    pub fn build(self) -> SgmlReader {
        self.reader
    }
}

impl Default for SgmlReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
