use std::{mem::take, sync::Arc};

use crate::{
    WhitespaceHandling,
    dtd::{DeclaredContent, Dtd, EntityDef, GroupConnector},
    entity::{EOF_CHAR, Entity, LiteralType},
    error::{SgmlError, error, warning},
    reader::{
        CDataPending, Deferred, InputKind, ParserState, Pending, SgmlReader,
        infer::{StartPlan, TextPlan},
        node::{Attribute, NodeType},
    },
    source::InputSource,
};

impl SgmlReader {
    /// The state loop behind [`SgmlReader::read`]: runs transitions until a
    /// node is ready to surface or the stream ends.
    pub(super) fn next_node(&mut self) -> Result<bool, SgmlError> {
        if matches!(self.state, ParserState::Attr | ParserState::AttrValue) {
            self.attr_index = None;
            self.attr_value_read = false;
            self.state = self.resume_state;
        }

        loop {
            match self.state {
                ParserState::Initial => self.prime()?,
                ParserState::Eof => {
                    if self.stack.count() > 1 {
                        self.pop_and_emit_end(true);
                        return Ok(true);
                    }
                    self.node.reset();
                    return Ok(false);
                }
                ParserState::Markup => {
                    let c = self.current.last_char();
                    if c == EOF_CHAR {
                        if !self.entity_stack.is_empty() {
                            self.pop_entity()?;
                            continue;
                        }
                        self.state = ParserState::Eof;
                        continue;
                    }
                    if c == '<' {
                        let c2 = self.current.read_char()?;
                        if let Some(ready) = self.dispatch_markup(c2)? {
                            return Ok(ready);
                        }
                    } else if let Some(ready) = self.scan_text(None)? {
                        return Ok(ready);
                    }
                }
                ParserState::PartialTag => {
                    self.state = ParserState::Markup;
                    let c = self.current.last_char();
                    if let Some(ready) = self.dispatch_markup(c)? {
                        return Ok(ready);
                    }
                }
                ParserState::Text => self.state = self.text_next,
                ParserState::PartialText => {
                    if let Some(ready) = self.continue_cdata()? {
                        return Ok(ready);
                    }
                }
                ParserState::CData => {
                    if let Some(ready) = self.parse_cdata()? {
                        return Ok(ready);
                    }
                }
                ParserState::PseudoStartTag | ParserState::AutoClose => {
                    match self.queue.pop_front() {
                        Some(Pending::Open { name, simulated }) => {
                            self.apply_open(name, simulated);
                            self.set_queue_state();
                            return Ok(true);
                        }
                        Some(Pending::Close { simulated }) => {
                            self.pop_and_emit_end(simulated);
                            self.set_queue_state();
                            return Ok(true);
                        }
                        None => self.set_queue_state(),
                    }
                }
                ParserState::ContinueStartTag => {
                    self.deferred = Deferred::None;
                    self.emit_start_tag();
                    return Ok(true);
                }
                ParserState::ContinueTextNode => {
                    self.deferred = Deferred::None;
                    self.emit_pending_text();
                    return Ok(true);
                }
                ParserState::EndTag => {
                    self.pop_and_emit_end(false);
                    self.state = ParserState::Markup;
                    return Ok(true);
                }
                ParserState::Attr | ParserState::AttrValue => unreachable!(),
            }
        }
    }

    /// First call: open the document entity, load any preconfigured DTD, and
    /// lay down the document frame.
    fn prime(&mut self) -> Result<(), SgmlError> {
        let frame = self.stack.push();
        frame.reset();
        frame.node_type = NodeType::Document;
        frame.name.push_str("#document");

        if self.dtd.is_none()
            && !self.ignore_dtd
            && let Some(doc_type) = self.doc_type.clone()
        {
            if doc_type.eq_ignore_ascii_case("html")
                && self.system_id.is_none()
                && self.internal_subset.is_none()
            {
                self.dtd = Some(crate::dtd::html_dtd());
            } else if self.system_id.is_some() || self.internal_subset.is_some() {
                let dtd = Dtd::parse(
                    &doc_type,
                    self.public_id.as_deref(),
                    self.system_id.as_deref(),
                    self.internal_subset.as_deref(),
                    self.resolver.as_ref(),
                    self.base_uri.as_ref(),
                    self.handler.as_ref(),
                )?;
                self.dtd = Some(Arc::new(dtd));
            }
        }

        let name = self
            .doc_type
            .clone()
            .unwrap_or_else(|| "[document]".to_owned());
        match self.input.take() {
            Some(InputKind::Reader(mut reader)) => {
                let source = InputSource::from_reader(reader.as_mut(), None)?;
                self.current = Entity::from_reader(name, source);
                self.current
                    .open(self.resolver.as_ref(), self.base_uri.as_ref(), None)?;
            }
            Some(InputKind::Content(content)) => {
                self.current = Entity::from_reader(name, InputSource::from_content(&content));
                self.current
                    .open(self.resolver.as_ref(), self.base_uri.as_ref(), None)?;
            }
            None => {
                let Some(href) = self.href.clone() else {
                    return Err(SgmlError::ResourceNotFound);
                };
                self.current = Entity::external(name, None, href);
                self.current
                    .open(self.resolver.as_ref(), self.base_uri.as_ref(), None)?;
                if self.base_uri.is_none() {
                    self.base_uri = self.current.uri().cloned();
                }
            }
        }

        self.state = ParserState::Markup;
        Ok(())
    }

    /// The character after `<` has been consumed; `c` is that character.
    fn dispatch_markup(&mut self, c: char) -> Result<Option<bool>, SgmlError> {
        match c {
            '!' => {
                self.current.read_char()?;
                self.parse_declaration_markup()
            }
            '?' => {
                self.current.read_char()?;
                self.parse_pi()
            }
            '/' => self.parse_end_tag(),
            c if c.is_alphabetic() || c == '_' => self.parse_start_tag(),
            _ => {
                // A stray '<' is character data in a forgiving parse.
                self.scan_text(Some("<"))
            }
        }
    }

    /// `<!` has been consumed: a comment, a CDATA section, or a DOCTYPE.
    fn parse_declaration_markup(&mut self) -> Result<Option<bool>, SgmlError> {
        match self.current.last_char() {
            '-' => {
                if self.current.read_char()? != '-' {
                    warning!(
                        self,
                        ParserBadCommentSyntax,
                        "A comment must open with '<!--'."
                    );
                    self.recover_to_gt()?;
                    return Ok(None);
                }
                self.current.read_char()?;
                let text = self.current.scan_to_end("-->")?;
                self.node.reset();
                self.node.node_type = NodeType::Comment;
                self.node.value = text;
                self.node.depth = self.stack.count();
                self.state = ParserState::Markup;
                Ok(Some(true))
            }
            '[' => {
                self.current.read_char()?;
                let keyword = self.current.scan_token(" \t\r\n[>", false)?;
                if keyword.eq_ignore_ascii_case("CDATA") && self.current.last_char() == '[' {
                    self.current.read_char()?;
                    let text = self.current.scan_to_end("]]>")?;
                    self.node.reset();
                    self.node.node_type = NodeType::CData;
                    self.node.value = text;
                    self.node.depth = self.stack.count();
                    self.state = ParserState::Markup;
                    Ok(Some(true))
                } else {
                    warning!(
                        self,
                        ParserUnexpectedDeclaration,
                        "Unsupported marked section '<![{}' in document content.",
                        keyword
                    );
                    self.recover_to_gt()?;
                    Ok(None)
                }
            }
            _ => {
                let keyword = self.current.scan_token(" \t\r\n>[", false)?;
                if keyword.eq_ignore_ascii_case("DOCTYPE") {
                    self.parse_doctype()
                } else {
                    error!(
                        self,
                        ParserUnexpectedDeclaration,
                        "Unexpected declaration '<!{}' in document content.",
                        keyword
                    );
                    self.recover_to_gt()?;
                    Ok(None)
                }
            }
        }
    }

    /// `<!DOCTYPE` has been consumed.
    fn parse_doctype(&mut self) -> Result<Option<bool>, SgmlError> {
        self.current.skip_whitespace()?;
        let name = match self.current.scan_token(" \t\r\n>[", true) {
            Ok(name) => name,
            Err(err) => {
                error!(self, ParserUnexpectedDeclaration, "Bad DOCTYPE name: {err}");
                self.recover_to_gt()?;
                return Ok(None);
            }
        };

        let mut public_id = None;
        let mut system_id = None;
        let mut c = self.current.skip_whitespace()?;
        if c.is_alphabetic() {
            let keyword = self.current.scan_token(" \t\r\n>[", false)?;
            if keyword.eq_ignore_ascii_case("PUBLIC") {
                c = self.current.skip_whitespace()?;
                if matches!(c, '"' | '\'') {
                    public_id = Some(self.current.scan_literal(c)?);
                }
                c = self.current.skip_whitespace()?;
                if matches!(c, '"' | '\'') {
                    system_id = Some(self.current.scan_literal(c)?);
                }
            } else if keyword.eq_ignore_ascii_case("SYSTEM") {
                c = self.current.skip_whitespace()?;
                if matches!(c, '"' | '\'') {
                    system_id = Some(self.current.scan_literal(c)?);
                }
            } else {
                warning!(
                    self,
                    ParserUnexpectedDeclaration,
                    "Unexpected keyword '{}' in DOCTYPE.",
                    keyword
                );
            }
        }

        let mut subset = None;
        c = self.current.skip_whitespace()?;
        if c == '[' {
            subset = Some(self.scan_internal_subset()?);
            c = self.current.skip_whitespace()?;
        }
        if c == '>' {
            self.current.read_char()?;
        } else {
            warning!(
                self,
                ParserUnexpectedDeclaration,
                "The DOCTYPE declaration does not close with '>'."
            );
            self.recover_to_gt()?;
        }

        if let Some(dtd) = self.dtd.as_deref() {
            if !dtd.name().eq_ignore_ascii_case(&name) {
                return Err(SgmlError::ParserDoctypeNameMismatch);
            }
        } else if !self.ignore_dtd {
            let is_html = name.eq_ignore_ascii_case("html");
            if is_html && system_id.is_none() && subset.as_deref().is_none_or(|s| s.trim().is_empty())
            {
                self.dtd = Some(crate::dtd::html_dtd());
            } else if system_id.is_some() || subset.is_some() || is_html {
                let dtd = Dtd::parse(
                    &name,
                    public_id.as_deref(),
                    system_id.as_deref().or(is_html.then_some("Html.dtd")),
                    subset.as_deref(),
                    self.resolver.as_ref(),
                    self.base_uri().cloned().as_ref(),
                    self.handler.as_ref(),
                )?;
                self.dtd = Some(Arc::new(dtd));
            }
        }
        if self.doc_type.is_none() {
            self.doc_type = Some(name.clone());
        }
        if name.eq_ignore_ascii_case("html") {
            self.current.set_html(true);
        }

        if self.strip_doc_type {
            return Ok(None);
        }
        self.node.reset();
        self.node.node_type = NodeType::DocumentType;
        self.node.name = self.fold_name(&name);
        self.node.value = subset.unwrap_or_default();
        self.node.depth = self.stack.count();
        self.state = ParserState::Markup;
        Ok(Some(true))
    }

    /// Raw text of the internal subset: everything up to the `]` that closes
    /// it, tracking quotes inside declarations and nested `[`/`]` pairs.
    fn scan_internal_subset(&mut self) -> Result<String, SgmlError> {
        let mut text = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut in_decl = false;
        let mut c = self.current.read_char()?;
        loop {
            if c == EOF_CHAR {
                return Err(SgmlError::ScannerUnclosedBlock);
            }
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
            } else {
                match c {
                    '"' | '\'' if in_decl => quote = Some(c),
                    '<' => in_decl = true,
                    '>' => in_decl = false,
                    '[' => depth += 1,
                    ']' => {
                        if depth == 0 {
                            self.current.read_char()?;
                            return Ok(text);
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            text.push(c);
            c = self.current.read_char()?;
        }
    }

    /// `<?` has been consumed; `last_char` is the first character of the
    /// target. SGML processing instructions close with a plain `>`; an
    /// XML-style `?>` is tolerated by trimming the trailing `?`.
    fn parse_pi(&mut self) -> Result<Option<bool>, SgmlError> {
        let target = self.current.scan_token(" \t\r\n>?", false)?;
        if target.is_empty() {
            warning!(self, ParserStrayCharacter, "A processing instruction has no target.");
            self.recover_to_gt()?;
            return Ok(None);
        }
        self.current.skip_whitespace()?;
        let mut data = String::new();
        let mut c = self.current.last_char();
        while !matches!(c, '>' | EOF_CHAR) {
            data.push(c);
            c = self.current.read_char()?;
        }
        if c == EOF_CHAR {
            warning!(
                self,
                ParserUnexpectedEOF,
                "The processing instruction '{}' is not closed.",
                target
            );
        } else {
            self.current.read_char()?;
        }
        if data.ends_with('?') {
            data.pop();
        }

        self.node.reset();
        self.node.node_type = NodeType::ProcessingInstruction;
        self.node.name = target;
        self.node.value = data;
        self.node.depth = self.stack.count();
        self.state = ParserState::Markup;
        Ok(Some(true))
    }

    /// `last_char` is the first character of the tag name.
    fn parse_start_tag(&mut self) -> Result<Option<bool>, SgmlError> {
        let raw_name = match self.current.scan_token(" \t\r\n=>/<", true) {
            Ok(name) => name,
            Err(err) => {
                warning!(self, ScannerInvalidNameChar, "Bad element name: {err}");
                self.recover_to_gt()?;
                return Ok(None);
            }
        };
        let upper = raw_name.to_ascii_uppercase();
        let dtd = self.dtd.clone();
        let decl = dtd.as_deref().and_then(|d| d.find_element(&upper));

        self.partial.reset();
        self.partial.name = self.fold_name(&raw_name);
        if decl.is_some() {
            self.partial.dtd_type = Some(upper.clone());
        }

        // attribute scanning
        loop {
            let c = self.current.skip_whitespace()?;
            match c {
                '>' => {
                    self.current.read_char()?;
                    break;
                }
                EOF_CHAR => {
                    warning!(
                        self,
                        ParserUnexpectedEOF,
                        "The start tag '{}' is not closed.",
                        raw_name
                    );
                    break;
                }
                '/' => {
                    if self.current.peek() == '>' {
                        self.current.read_char()?;
                        self.current.read_char()?;
                        self.partial.is_empty = true;
                        break;
                    }
                    self.current.read_char()?;
                }
                // Spurious punctuation between attributes is silently
                // dropped.
                ',' | '=' | ':' | ';' | '"' | '\'' => {
                    self.current.read_char()?;
                }
                _ => {
                    let attr_raw = self.current.scan_token(" \t\r\n=>/<", false)?;
                    if attr_raw.is_empty() {
                        self.current.read_char()?;
                        continue;
                    }
                    let c = self.current.skip_whitespace()?;
                    let (value, quote_char) = if c == '=' {
                        self.current.read_char()?;
                        let c = self.current.skip_whitespace()?;
                        match c {
                            '"' | '\'' => (Some(self.scan_attribute_literal(c)?), c),
                            '>' | EOF_CHAR => (Some(String::new()), '\0'),
                            _ => (
                                Some(self.current.scan_token(" \t\r\n><", false)?),
                                '\0',
                            ),
                        }
                    } else {
                        (None, '\0')
                    };

                    let folded = self.fold_name(&attr_raw);
                    if !is_valid_xml_name(&folded) {
                        warning!(
                            self,
                            ParserInvalidAttributeName,
                            "The attribute name '{}' is not a valid XML name; the attribute is dropped.",
                            attr_raw
                        );
                        continue;
                    }
                    if self.partial.attributes.iter().any(|a| a.name == folded) {
                        warning!(
                            self,
                            ParserDuplicateAttribute,
                            "The attribute '{}' appears more than once; later occurrences are dropped.",
                            folded
                        );
                        continue;
                    }
                    let att_def = decl.and_then(|d| d.find_attribute(&attr_raw)).cloned();
                    // A value-less attribute takes the declaration default
                    // when one exists; otherwise the name doubles as the
                    // value.
                    let value = value.or_else(|| {
                        att_def
                            .as_ref()
                            .and_then(|d| d.default_value.as_ref())
                            .is_none()
                            .then(|| attr_raw.clone())
                    });
                    self.partial.attributes.push(Attribute {
                        name: folded,
                        value,
                        quote_char,
                        att_def,
                    });
                }
            }
        }

        if decl.is_some_and(|d| d.content_model.declared == DeclaredContent::Empty) {
            self.partial.is_empty = true;
        }
        for attr in &self.partial.attributes {
            if attr.name.eq_ignore_ascii_case("xml:space") {
                self.partial.xml_space = Some(attr.value().to_owned());
            } else if attr.name.eq_ignore_ascii_case("xml:lang") {
                self.partial.xml_lang = Some(attr.value().to_owned());
            }
        }

        if self.dtd.is_some() && !self.ignore_dtd {
            match self.plan_start(&upper) {
                StartPlan::Emit(actions) => {
                    if actions.is_empty() {
                        self.emit_start_tag();
                        return Ok(Some(true));
                    }
                    self.queue = actions;
                    self.deferred = Deferred::StartTag;
                    self.set_queue_state();
                    Ok(None)
                }
                StartPlan::SecondRoot => {
                    error!(
                        self,
                        ParserMultipleRootElements,
                        "A second root element '{}' is not allowed; the parse ends here.",
                        raw_name
                    );
                    self.state = ParserState::Eof;
                    Ok(None)
                }
                StartPlan::RejectRoot => Err(SgmlError::ParserRequiredRootMissing),
            }
        } else {
            self.emit_start_tag();
            Ok(Some(true))
        }
    }

    /// The parser-level literal scanner: unlike the entity's low-level one
    /// it runs under recovery rules (EOF closes the literal with a warning)
    /// and leaves unknown `&name;` references untouched while expanding
    /// numeric character references. A `>` inside the quotes does not
    /// terminate the tag.
    fn scan_attribute_literal(&mut self, quote: char) -> Result<String, SgmlError> {
        let mut buffer = String::new();
        let mut c = self.current.read_char()?;
        loop {
            if c == quote {
                self.current.read_char()?;
                return Ok(buffer);
            }
            match c {
                EOF_CHAR => {
                    warning!(
                        self,
                        ScannerUnclosedLiteral,
                        "An attribute value is not closed before the end of input."
                    );
                    return Ok(buffer);
                }
                '&' if self.current.peek() == '#' => {
                    match self.current.expand_char_entity() {
                        Ok(expanded) => buffer.push(expanded),
                        Err(err) => {
                            warning!(
                                self,
                                ScannerInvalidCharacterReference,
                                "Bad character reference in attribute value: {err}"
                            );
                        }
                    }
                    c = self.current.last_char();
                    continue;
                }
                c => buffer.push(c),
            }
            c = self.current.read_char()?;
        }
    }

    /// `last_char` is the `/` of `</`.
    fn parse_end_tag(&mut self) -> Result<Option<bool>, SgmlError> {
        self.current.read_char()?;
        let raw_name = match self.current.scan_token(" \t\r\n><", true) {
            Ok(name) => name,
            Err(err) => {
                warning!(self, ScannerInvalidNameChar, "Bad end tag name: {err}");
                self.recover_to_gt()?;
                return Ok(None);
            }
        };
        // consume any junk up to '>'
        let c = self.current.skip_whitespace()?;
        if c == '>' {
            self.current.read_char()?;
        } else if c != EOF_CHAR {
            warning!(
                self,
                ParserStrayCharacter,
                "Unexpected content in the end tag '</{}>'.",
                raw_name
            );
            self.recover_to_gt()?;
        }

        let count = self.stack.count();
        let matched = (1..count)
            .rev()
            .find(|&i| {
                self.stack
                    .get(i)
                    .is_some_and(|f| f.name.eq_ignore_ascii_case(&raw_name))
            });
        match matched {
            None => {
                warning!(
                    self,
                    ParserUnmatchedEndTag,
                    "The end tag '</{}>' matches no open element and is ignored.",
                    raw_name
                );
                Ok(None)
            }
            Some(i) if i == count - 1 => {
                self.pop_and_emit_end(false);
                self.state = ParserState::Markup;
                Ok(Some(true))
            }
            Some(i) => {
                warning!(
                    self,
                    ParserUnmatchedEndTag,
                    "The end tag '</{}>' implies closing {} open element(s).",
                    raw_name,
                    count - 1 - i
                );
                for _ in i..count - 1 {
                    self.queue.push_back(Pending::Close { simulated: true });
                }
                self.queue.push_back(Pending::Close { simulated: false });
                self.deferred = Deferred::None;
                self.state = ParserState::AutoClose;
                Ok(None)
            }
        }
    }

    // ---- text -------------------------------------------------------------

    /// Accumulate character data starting at `last_char` (optionally seeded
    /// with characters already consumed). Ends at a genuine tag opening or
    /// EOF; general entity references expand by pushing entity frames, so
    /// the run continues transparently across their boundaries.
    fn scan_text(&mut self, initial: Option<&str>) -> Result<Option<bool>, SgmlError> {
        self.pending_text.clear();
        if let Some(initial) = initial {
            self.pending_text.push_str(initial);
        }
        loop {
            let c = self.current.last_char();
            match c {
                EOF_CHAR => {
                    if !self.entity_stack.is_empty() {
                        self.pop_entity()?;
                        continue;
                    }
                    self.text_next = ParserState::Eof;
                    break;
                }
                // A '<' inside the replacement text of a CDATA/SDATA/PI
                // entity is character data, never markup.
                '<' if self.current.literal_type().is_none() => {
                    let c2 = self.current.read_char()?;
                    if c2.is_alphabetic() || matches!(c2, '_' | '/' | '!' | '?') {
                        self.text_next = ParserState::PartialTag;
                        break;
                    }
                    self.pending_text.push('<');
                    // c2 is picked up by the next iteration
                }
                '&' => self.scan_reference_in_text()?,
                c => {
                    self.pending_text.push(c);
                    self.current.read_char()?;
                }
            }
        }
        self.finish_text()
    }

    /// `last_char` is `&`.
    fn scan_reference_in_text(&mut self) -> Result<(), SgmlError> {
        let next = self.current.peek();
        if next == '#' {
            match self.current.expand_char_entity() {
                Ok(c) => self.pending_text.push(c),
                Err(err) => {
                    warning!(
                        self,
                        ScannerInvalidCharacterReference,
                        "Bad character reference in text: {err}"
                    );
                }
            }
            return Ok(());
        }
        if !(next.is_alphanumeric() || next == '_') {
            self.pending_text.push('&');
            self.current.read_char()?;
            return Ok(());
        }

        self.current.read_char()?;
        let mut name = String::new();
        let mut c = self.current.last_char();
        while c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':') {
            name.push(c);
            c = self.current.read_char()?;
        }
        let has_semicolon = c == ';';

        let literal = self.dtd.as_deref().and_then(|d| {
            d.find_entity(&name).and_then(|def| match def {
                EntityDef::Internal {
                    literal,
                    literal_type,
                } => Some((literal.clone(), *literal_type)),
                EntityDef::External { .. } => None,
            })
        });
        match literal {
            Some((literal, literal_type)) => {
                if has_semicolon {
                    self.current.read_char()?;
                }
                if self.entity_stack.iter().any(|e| e.name() == name)
                    || self.current.name() == name
                {
                    warning!(
                        self,
                        ParserUnknownEntity,
                        "The entity '&{};' references itself; the reference is kept as text.",
                        name
                    );
                    self.pending_text.push('&');
                    self.pending_text.push_str(&name);
                    self.pending_text.push(';');
                } else {
                    self.push_general_entity(&name, &literal, literal_type)?;
                }
            }
            None => {
                // Unknown or external entity: the reference text is kept
                // verbatim.
                warning!(
                    self,
                    ParserUnknownEntity,
                    "The entity '&{}' is not defined; the reference is kept as text.",
                    name
                );
                self.pending_text.push('&');
                self.pending_text.push_str(&name);
                if has_semicolon {
                    self.pending_text.push(';');
                    self.current.read_char()?;
                }
            }
        }
        Ok(())
    }

    /// Surface, suppress, or defer the accumulated text.
    fn finish_text(&mut self) -> Result<Option<bool>, SgmlError> {
        if self.pending_text.is_empty() {
            self.state = self.text_next;
            return Ok(None);
        }
        let is_whitespace = self
            .pending_text
            .chars()
            .all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));

        if is_whitespace {
            // Whitespace between markup is legal everywhere; it never
            // triggers tag inference, and never surfaces at document level.
            let surface = self.stack.count() > 1
                && match self.whitespace_handling {
                    WhitespaceHandling::All => true,
                    WhitespaceHandling::None => false,
                    WhitespaceHandling::Significant => self.frame_xml_space() == "preserve",
                };
            if !surface {
                self.pending_text.clear();
                self.state = self.text_next;
                return Ok(None);
            }
            self.node.reset();
            self.node.node_type = NodeType::Whitespace;
            self.node.value = take(&mut self.pending_text);
            self.node.depth = self.stack.count();
            self.state = ParserState::Text;
            return Ok(Some(true));
        }

        let trimmed = self.text_whitespace.apply(&self.pending_text);
        if trimmed.is_empty() {
            self.pending_text.clear();
            self.state = self.text_next;
            return Ok(None);
        }
        if trimmed.len() != self.pending_text.len() {
            let trimmed = trimmed.to_owned();
            self.pending_text = trimmed;
        }

        match self.plan_text() {
            TextPlan::Emit(actions) => {
                if actions.is_empty() {
                    self.emit_pending_text();
                    return Ok(Some(true));
                }
                self.queue = actions;
                self.deferred = Deferred::Text;
                self.set_queue_state();
                Ok(None)
            }
            TextPlan::Drop => {
                warning!(
                    self,
                    ParserTextNotAllowed,
                    "Character data is not allowed here and is dropped."
                );
                self.pending_text.clear();
                self.state = self.text_next;
                Ok(None)
            }
        }
    }

    fn emit_pending_text(&mut self) {
        self.node.reset();
        self.node.node_type = NodeType::Text;
        self.node.value = take(&mut self.pending_text);
        self.node.depth = self.stack.count();
        self.state = ParserState::Text;
    }

    /// `xml:space` in effect at the current open element.
    fn frame_xml_space(&self) -> &str {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.xml_space.as_deref())
            .unwrap_or("")
    }

    // ---- CDATA-content elements -------------------------------------------

    /// Raw content of a CDATA/RCDATA declared-content element: only
    /// comments, processing instructions, and the matching end tag are
    /// markup. Nested `<![CDATA[`/`]]>` markers (with or without their
    /// `/*`…`*/` script guards) are stripped from the emitted text; any
    /// other `<` is content.
    fn parse_cdata(&mut self) -> Result<Option<bool>, SgmlError> {
        self.pending_text.clear();
        loop {
            let c = self.current.last_char();
            match c {
                EOF_CHAR => {
                    if !self.entity_stack.is_empty() {
                        self.pop_entity()?;
                        continue;
                    }
                    warning!(
                        self,
                        ParserUnexpectedEOF,
                        "The element '{}' is not closed before the end of input.",
                        self.stack.top().map(|f| f.name.as_str()).unwrap_or("?")
                    );
                    self.cdata_pending = Some(CDataPending::Eof);
                    break;
                }
                '<' => {
                    let c2 = self.current.read_char()?;
                    match c2 {
                        '/' => {
                            self.current.read_char()?;
                            let mut name = String::new();
                            let mut c = self.current.last_char();
                            while c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':') {
                                name.push(c);
                                c = self.current.read_char()?;
                            }
                            let is_match = self
                                .stack
                                .top()
                                .is_some_and(|f| f.name.eq_ignore_ascii_case(&name));
                            if is_match {
                                self.recover_to_gt()?;
                                self.cdata_pending = Some(CDataPending::EndTag);
                                break;
                            }
                            self.pending_text.push_str("</");
                            self.pending_text.push_str(&name);
                        }
                        '!' => {
                            let c3 = self.current.read_char()?;
                            if c3 == '-' {
                                if self.current.read_char()? == '-' {
                                    self.current.read_char()?;
                                    self.cdata_pending = Some(CDataPending::Comment);
                                    break;
                                }
                                self.pending_text.push_str("<!-");
                            } else if c3 == '[' {
                                self.current.read_char()?;
                                self.match_cdata_marker()?;
                            } else {
                                self.pending_text.push_str("<!");
                            }
                        }
                        '?' => {
                            self.current.read_char()?;
                            self.cdata_pending = Some(CDataPending::Pi);
                            break;
                        }
                        _ => self.pending_text.push('<'),
                    }
                }
                ']' => {
                    let c2 = self.current.read_char()?;
                    if c2 == ']' {
                        let c3 = self.current.read_char()?;
                        if c3 == '>' {
                            self.current.read_char()?;
                            self.strip_marker_guard()?;
                        } else {
                            self.pending_text.push_str("]]");
                        }
                    } else {
                        self.pending_text.push(']');
                    }
                }
                c => {
                    self.pending_text.push(c);
                    self.current.read_char()?;
                }
            }
        }

        if self.pending_text.is_empty() {
            return self.continue_cdata();
        }
        self.node.reset();
        self.node.node_type = NodeType::CData;
        self.node.value = take(&mut self.pending_text);
        self.node.depth = self.stack.count();
        // A matched end tag surfaces straight from the EndTag state; other
        // pending constructs re-enter through PartialText.
        self.state = if self.cdata_pending == Some(CDataPending::EndTag) {
            self.cdata_pending = None;
            ParserState::EndTag
        } else {
            ParserState::PartialText
        };
        Ok(Some(true))
    }

    /// `<![` has been consumed; expect `CDATA[` and strip the whole marker.
    /// Anything else is content.
    fn match_cdata_marker(&mut self) -> Result<(), SgmlError> {
        let mut consumed = String::new();
        for expected in "CDATA[".chars() {
            let c = self.current.last_char();
            if c != expected {
                self.pending_text.push_str("<![");
                self.pending_text.push_str(&consumed);
                return Ok(());
            }
            consumed.push(c);
            self.current.read_char()?;
        }
        self.strip_marker_guard()
    }

    /// Scripts routinely hide CDATA markers in comments, as in
    /// `/*<![CDATA[*/` … `/*]]>*/`; when the preceding content ends with the
    /// opening guard and the closing guard follows, remove both.
    fn strip_marker_guard(&mut self) -> Result<(), SgmlError> {
        if self.pending_text.ends_with("/*")
            && self.current.last_char() == '*'
            && self.current.peek() == '/'
        {
            self.pending_text
                .truncate(self.pending_text.len() - "/*".len());
            self.current.read_char()?;
            self.current.read_char()?;
        }
        Ok(())
    }

    /// Handle the markup construct that interrupted (or terminated) a CDATA
    /// text run.
    fn continue_cdata(&mut self) -> Result<Option<bool>, SgmlError> {
        match self.cdata_pending.take() {
            Some(CDataPending::Comment) => {
                let text = self.current.scan_to_end("-->")?;
                self.node.reset();
                self.node.node_type = NodeType::Comment;
                self.node.value = text;
                self.node.depth = self.stack.count();
                self.state = ParserState::CData;
                Ok(Some(true))
            }
            Some(CDataPending::Pi) => {
                let ready = self.parse_pi()?;
                self.state = ParserState::CData;
                Ok(ready)
            }
            Some(CDataPending::EndTag) => {
                self.pop_and_emit_end(false);
                self.state = ParserState::Markup;
                Ok(Some(true))
            }
            Some(CDataPending::Eof) => {
                self.state = ParserState::Eof;
                Ok(None)
            }
            None => {
                self.state = ParserState::CData;
                Ok(None)
            }
        }
    }

    // ---- element events ---------------------------------------------------

    /// Move the parsed start tag from the staging node to the current node,
    /// update the parent's model position, and open the element frame.
    fn emit_start_tag(&mut self) {
        std::mem::swap(&mut self.node, &mut self.partial);
        self.node.node_type = NodeType::Element;
        self.node.simulated = false;
        let upper = self.node.name.to_ascii_uppercase();
        self.advance_parent_position(&upper);
        self.node.depth = self.stack.count();
        self.root_emitted = true;

        let cdata_content = self
            .dtd
            .as_deref()
            .and_then(|d| d.find_element(&upper))
            .map(|d| {
                matches!(
                    d.content_model.declared,
                    DeclaredContent::Cdata | DeclaredContent::Rcdata
                )
            })
            .unwrap_or(false);

        if self.node.is_empty {
            self.state = ParserState::Markup;
        } else {
            self.push_frame_from_node();
            self.state = if cdata_content {
                ParserState::CData
            } else {
                ParserState::Markup
            };
        }
    }

    /// Surface a synthetic start tag produced by tag inference.
    fn apply_open(&mut self, name: String, simulated: bool) {
        let upper = name.to_ascii_uppercase();
        self.advance_parent_position(&upper);
        self.node.reset();
        self.node.node_type = NodeType::Element;
        self.node.name = name;
        self.node.simulated = simulated;
        if self
            .dtd
            .as_deref()
            .and_then(|d| d.find_element(&upper))
            .is_some()
        {
            self.node.dtd_type = Some(upper);
        }
        self.node.depth = self.stack.count();
        self.root_emitted = true;
        self.push_frame_from_node();
    }

    /// Pop the top frame and surface its end-element event.
    fn pop_and_emit_end(&mut self, simulated: bool) {
        let name = {
            let frame = self.stack.pop().expect("an element frame is open");
            take(&mut frame.name)
        };
        self.node.reset();
        self.node.node_type = NodeType::EndElement;
        self.node.name = name;
        self.node.simulated = simulated;
        self.node.depth = self.stack.count();
    }

    /// Open a stack frame mirroring the current node, inheriting the
    /// ancestors' inclusion/exclusion sets. An exclusion introduced at any
    /// depth wins over an inclusion at the same depth because membership is
    /// always tested against the exclusion set first.
    fn push_frame_from_node(&mut self) {
        let (mut included, mut excluded) = self
            .stack
            .top()
            .map(|parent| (parent.included.clone(), parent.excluded.clone()))
            .unwrap_or_default();
        if let Some(decl) = self
            .node
            .dtd_type
            .as_deref()
            .and_then(|key| self.dtd.as_deref().and_then(|d| d.find_element(key)))
        {
            included.extend(decl.inclusions.iter().cloned());
            excluded.extend(decl.exclusions.iter().cloned());
        }

        let name = self.node.name.clone();
        let dtd_type = self.node.dtd_type.clone();
        let xml_space = self.node.xml_space.clone();
        let xml_lang = self.node.xml_lang.clone();
        let simulated = self.node.simulated;
        let depth = self.node.depth;
        let attributes = self.node.attributes.clone();

        let frame = self.stack.push();
        frame.reset();
        frame.node_type = NodeType::Element;
        frame.name = name;
        frame.dtd_type = dtd_type;
        frame.xml_space = xml_space;
        frame.xml_lang = xml_lang;
        frame.simulated = simulated;
        frame.depth = depth;
        frame.included = included;
        frame.excluded = excluded;
        frame.attributes = attributes;
    }

    /// Advance the open element's sequence-model cursor past the member that
    /// accepted `child` (uppercase).
    fn advance_parent_position(&mut self, child: &str) {
        let Some(dtd) = self.dtd.clone() else {
            return;
        };
        let Some(frame) = self.stack.top_mut() else {
            return;
        };
        let Some(decl) = frame.dtd_type.as_deref().and_then(|k| dtd.find_element(k)) else {
            return;
        };
        let group = &decl.content_model.group;
        if group.connector != GroupConnector::Sequence {
            return;
        }
        for i in frame.model_pos..group.members.len() {
            if group.members[i].matches(child) {
                frame.model_pos = if group.members[i].occurrence().is_repeatable() {
                    i
                } else {
                    i + 1
                };
                return;
            }
        }
    }

    fn set_queue_state(&mut self) {
        self.state = match self.queue.front() {
            Some(Pending::Close { .. }) => ParserState::AutoClose,
            Some(Pending::Open { .. }) => ParserState::PseudoStartTag,
            None => match self.deferred {
                Deferred::StartTag => ParserState::ContinueStartTag,
                Deferred::Text => ParserState::ContinueTextNode,
                Deferred::None => ParserState::Markup,
            },
        };
    }

    // ---- entity stack -----------------------------------------------------

    fn push_general_entity(
        &mut self,
        name: &str,
        literal: &str,
        literal_type: Option<LiteralType>,
    ) -> Result<(), SgmlError> {
        let mut entity = match literal_type {
            Some(literal_type) => Entity::typed_literal(name, literal, literal_type),
            None => Entity::internal(name, literal),
        };
        entity.set_html(self.current.is_html());
        entity.open(self.resolver.as_ref(), None, None)?;
        self.entity_stack
            .push(std::mem::replace(&mut self.current, entity));
        Ok(())
    }

    fn pop_entity(&mut self) -> Result<(), SgmlError> {
        self.current.close();
        self.current = self.entity_stack.pop().ok_or(SgmlError::InternalError)?;
        Ok(())
    }

    /// Resynchronize by scanning past the next `>`.
    fn recover_to_gt(&mut self) -> Result<(), SgmlError> {
        while !matches!(self.current.last_char(), '>' | EOF_CHAR) {
            self.current.read_char()?;
        }
        if self.current.last_char() == '>' {
            self.current.read_char()?;
        }
        Ok(())
    }
}

/// XML Name check for attribute names surviving the forgiving scan.
fn is_valid_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | ':'))
}
