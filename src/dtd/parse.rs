use std::{collections::HashMap, mem::replace};

use url::Url;

use crate::{
    dtd::{
        AttDef, AttributePresence, AttributeType, ContentModel, DeclaredContent, Dtd,
        ElementDecl, EntityDef, Group, GroupConnector, GroupMember, Occurrence,
        is_builtin_html_uri,
    },
    entity::{EOF_CHAR, Entity, LiteralType, outermost_uri, render_context},
    error::{
        ErrorHandler, SgmlError, SgmlErrorLevel, SgmlParseError, error, fatal_error, warning,
    },
    resolver::EntityResolver,
};

impl Dtd {
    /// Parse a DTD identified by a document type `name`, optional external
    /// identifier, and optional internal subset text.
    ///
    /// The internal subset is parsed first, then any external subset is
    /// opened through `resolver` and parsed as a continuation, so internal
    /// declarations take precedence (the first declaration of a name wins).
    pub fn parse(
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        internal_subset: Option<&str>,
        resolver: &dyn EntityResolver,
        base_uri: Option<&Url>,
        handler: &dyn ErrorHandler,
    ) -> Result<Dtd, SgmlError> {
        let dtd = Dtd {
            name: name.to_owned(),
            public_id: public_id.map(str::to_owned),
            system_id: system_id.map(str::to_owned),
            ..Default::default()
        };
        let mut parser = DtdParser {
            dtd,
            current: Entity::internal("[dtd]", ""),
            stack: Vec::new(),
            entity_group_depths: Vec::new(),
            pending_attlists: HashMap::new(),
            resolver,
            handler,
            base_uri: base_uri.cloned(),
            group_depth: 0,
        };

        if let Some(subset) = internal_subset.filter(|s| !s.trim().is_empty()) {
            parser.current = Entity::internal("[internal subset]", subset);
            parser.current.set_html(name.eq_ignore_ascii_case("html"));
            parser.current.open(resolver, base_uri, None)?;
            parser.parse_subset(true)?;
            parser.current.close();
        }

        if let Some(system_id) = system_id {
            let mut external = if is_builtin_html_uri(name, system_id) {
                Entity::internal("html.dtd", super::html::HTML_DTD_TEXT)
            } else {
                Entity::external("[dtd]", public_id.map(str::to_owned), system_id)
            };
            external.set_html(name.eq_ignore_ascii_case("html"));
            external.open(resolver, base_uri, None)?;
            parser.current = external;
            parser.parse_subset(false)?;
            parser.current.close();
        }

        Ok(parser.finish())
    }

    /// Parse a DTD from declaration text alone.
    pub fn parse_str(
        name: &str,
        subset: &str,
        handler: &dyn ErrorHandler,
    ) -> Result<Dtd, SgmlError> {
        Self::parse(
            name,
            None,
            None,
            Some(subset),
            &crate::resolver::DefaultResolver,
            None,
            handler,
        )
    }
}

/// Recursive consumer of markup declarations, driven by the entity stack's
/// scanner primitives.
struct DtdParser<'a> {
    dtd: Dtd,
    current: Entity,
    stack: Vec<Entity>,
    /// Group depth recorded when each stacked entity was pushed; a content
    /// model may span an entity boundary only if the depth is back to this
    /// value when the entity ends.
    entity_group_depths: Vec<usize>,
    /// Attribute definitions seen before (or without) their element
    /// declaration, merged in `finish`.
    pending_attlists: HashMap<String, Vec<AttDef>>,
    resolver: &'a dyn EntityResolver,
    handler: &'a dyn ErrorHandler,
    base_uri: Option<Url>,
    group_depth: usize,
}

/// Errors that abort the whole DTD parse rather than one declaration.
fn is_fatal(error: &SgmlError) -> bool {
    matches!(
        error,
        SgmlError::IOError(_)
            | SgmlError::ResourceNotFound
            | SgmlError::UnsupportedScheme
            | SgmlError::UriError(_)
            | SgmlError::ScannerUnclosedBlock
            | SgmlError::DtdImproperEntityNesting
            | SgmlError::DtdUnexpectedEOF
            | SgmlError::InternalError
    )
}

impl DtdParser<'_> {
    fn report(&self, level: SgmlErrorLevel, error: SgmlError, message: String) {
        let record = SgmlParseError {
            error,
            level,
            line: self.current.line(),
            column: self.current.column(),
            context: render_context(&self.current, &self.stack),
            uri: outermost_uri(&self.current, &self.stack),
            message,
        };
        match level {
            SgmlErrorLevel::Warning => self.handler.warning(record),
            SgmlErrorLevel::Error => self.handler.error(record),
            SgmlErrorLevel::FatalError => self.handler.fatal_error(record),
        }
    }

    fn finish(mut self) -> Dtd {
        for (elem_name, defs) in self.pending_attlists.drain() {
            let decl = self
                .dtd
                .elements
                .entry(elem_name.clone())
                .or_insert_with(|| {
                    // An ATTLIST for an element that was never declared;
                    // record the attributes and skip structural validation.
                    ElementDecl {
                        name: elem_name,
                        content_model: ContentModel::any(),
                        ..Default::default()
                    }
                });
            for def in defs {
                decl.attributes.entry(def.name.clone()).or_insert(def);
            }
        }
        self.dtd
    }

    /// Top-level declaration loop. With `internal`, an unmatched `]` ends the
    /// subset.
    fn parse_subset(&mut self, internal: bool) -> Result<(), SgmlError> {
        let base_depth = self.stack.len();
        loop {
            let c = self.skip_ws_pe(base_depth)?;
            match c {
                EOF_CHAR => break Ok(()),
                ']' if internal => break Ok(()),
                '<' => {
                    let c = self.current.read_char()?;
                    if c == '?' {
                        // SGML processing instructions close with a plain '>'.
                        self.current.read_char()?;
                        self.current.scan_to_end(">")?;
                    } else if c == '!' {
                        self.current.read_char()?;
                        if let Err(err) = self.parse_declaration() {
                            if is_fatal(&err) {
                                self.report(
                                    SgmlErrorLevel::FatalError,
                                    err.clone(),
                                    format!("The DTD cannot be parsed further: {err}"),
                                );
                                return Err(err);
                            }
                            self.recover_declaration(base_depth);
                        }
                    } else {
                        warning!(
                            self,
                            DtdInvalidDeclaration,
                            "Markup declarations must start with '<!'."
                        );
                        self.recover_to_close();
                    }
                }
                c => {
                    warning!(
                        self,
                        ParserStrayCharacter,
                        "Unexpected character '{}' between markup declarations.",
                        c
                    );
                    self.current.read_char()?;
                }
            }
        }
    }

    /// Skip whitespace, transparently expanding `%name;` references and
    /// popping entity frames that reach EOF. Frames below `base_depth` are
    /// left alone.
    fn skip_ws_pe(&mut self, base_depth: usize) -> Result<char, SgmlError> {
        loop {
            let c = self.current.skip_whitespace()?;
            match c {
                '%' if self.current.peek().is_alphabetic() || self.current.peek() == '_' => {
                    self.current.read_char()?;
                    let name = self.current.scan_token("; \t\r\n%(|,&)>[", true)?;
                    if self.current.last_char() == ';' {
                        self.current.read_char()?;
                    }
                    self.push_parameter_entity(&name)?;
                }
                EOF_CHAR if self.stack.len() > base_depth => {
                    self.pop_entity()?;
                }
                c => return Ok(c),
            }
        }
    }

    fn push_parameter_entity(&mut self, name: &str) -> Result<(), SgmlError> {
        if self.stack.iter().any(|e| e.name() == name) || self.current.name() == name {
            error!(
                self,
                DtdImproperEntityNesting,
                "The parameter entity '%{};' references itself.",
                name
            );
            return Err(SgmlError::DtdImproperEntityNesting);
        }

        let mut entity = match self.dtd.parameter_entities.get(name) {
            Some(EntityDef::Internal { literal, .. }) => Entity::internal(name, literal.as_str()),
            Some(EntityDef::External {
                public_id,
                system_id,
            }) => Entity::external(name, public_id.clone(), system_id.as_str()),
            None => {
                error!(
                    self,
                    DtdUndefinedParameterEntity,
                    "The parameter entity '%{};' is not declared.",
                    name
                );
                return Err(SgmlError::DtdUndefinedParameterEntity);
            }
        };
        entity.set_html(self.current.is_html());
        let base = self
            .current
            .uri()
            .cloned()
            .or_else(|| self.base_uri.clone());
        entity.open(self.resolver, base.as_ref(), None)?;
        self.stack.push(replace(&mut self.current, entity));
        self.entity_group_depths.push(self.group_depth);
        Ok(())
    }

    fn pop_entity(&mut self) -> Result<(), SgmlError> {
        let depth = self.entity_group_depths.pop().unwrap_or(0);
        if depth != self.group_depth {
            fatal_error!(
                self,
                DtdImproperEntityNesting,
                "A model group is not properly nested within the parameter entity '%{};'.",
                self.current.name()
            );
            return Err(SgmlError::DtdImproperEntityNesting);
        }
        self.current.close();
        self.current = self.stack.pop().ok_or(SgmlError::InternalError)?;
        Ok(())
    }

    /// Resynchronize after a recoverable declaration error: drop any entity
    /// frames the declaration pushed, reset the group depth, and scan to the
    /// next `>`.
    fn recover_declaration(&mut self, base_depth: usize) {
        self.group_depth = 0;
        while self.stack.len() > base_depth {
            self.current.close();
            if let Some(outer) = self.stack.pop() {
                self.current = outer;
            }
            self.entity_group_depths.pop();
        }
        self.recover_to_close();
    }

    /// Scan to the next `>` in the current frame.
    fn recover_to_close(&mut self) {
        while !matches!(self.current.last_char(), '>' | EOF_CHAR) {
            if self.current.read_char().is_err() {
                return;
            }
        }
        if self.current.last_char() == '>' {
            self.current.read_char().ok();
        }
    }

    /// The character after `<!` has been read; dispatch on it.
    fn parse_declaration(&mut self) -> Result<(), SgmlError> {
        match self.current.last_char() {
            '-' => {
                if self.current.read_char()? != '-' {
                    warning!(
                        self,
                        ParserBadCommentSyntax,
                        "A declaration comment must open with '<!--'."
                    );
                    return Err(SgmlError::ParserBadCommentSyntax);
                }
                self.current.read_char()?;
                self.current.scan_to_end("-->")?;
                Ok(())
            }
            '[' => self.parse_marked_section(),
            _ => {
                let keyword = self.current.scan_token(" \t\r\n>[%", false)?;
                match keyword.to_ascii_uppercase().as_str() {
                    "ENTITY" => self.parse_entity_decl(),
                    "ELEMENT" => self.parse_element_decl(),
                    "ATTLIST" => self.parse_attlist_decl(),
                    "NOTATION" => {
                        warning!(
                            self,
                            ParserUnexpectedDeclaration,
                            "Notation declarations are ignored."
                        );
                        self.recover_to_close();
                        Ok(())
                    }
                    "DOCTYPE" => {
                        error!(
                            self,
                            ParserUnexpectedDeclaration,
                            "A document type declaration cannot appear inside a DTD."
                        );
                        Err(SgmlError::ParserUnexpectedDeclaration)
                    }
                    other => {
                        error!(
                            self,
                            ParserUnexpectedDeclaration,
                            "Unknown markup declaration '<!{}'.",
                            other
                        );
                        Err(SgmlError::ParserUnexpectedDeclaration)
                    }
                }
            }
        }
    }

    /// `<![ keyword [ ... ]]>` — only IGNORE is honored. INCLUDE sections are
    /// deliberately not implemented; skipping their *content* would silently
    /// drop declarations, so the section is reported and then skipped whole.
    fn parse_marked_section(&mut self) -> Result<(), SgmlError> {
        self.current.read_char()?;
        let base_depth = self.stack.len();
        self.skip_ws_pe(base_depth)?;
        let keyword = self.current.scan_token(" \t\r\n[", false)?;
        self.skip_ws_pe(base_depth)?;
        if self.current.last_char() != '[' {
            error!(
                self,
                DtdInvalidDeclaration,
                "A marked section keyword must be followed by '['."
            );
            return Err(SgmlError::DtdInvalidDeclaration);
        }
        self.current.read_char()?;

        match keyword.to_ascii_uppercase().as_str() {
            "IGNORE" => {
                self.current.scan_to_end("]]>")?;
            }
            "INCLUDE" => {
                error!(
                    self,
                    DtdMarkedSectionUnsupported,
                    "INCLUDE marked sections are not implemented."
                );
                self.current.scan_to_end("]]>")?;
            }
            other => {
                warning!(
                    self,
                    DtdMarkedSectionUnsupported,
                    "Marked section type '{}' is not supported; the section is skipped.",
                    other
                );
                self.current.scan_to_end("]]>")?;
            }
        }
        Ok(())
    }

    /// ```text
    /// <!ENTITY [%] name ( "literal"
    ///                   | (CDATA|SDATA|PI) "literal"
    ///                   | (PUBLIC pubid)? SYSTEM? syslit ) >
    /// ```
    fn parse_entity_decl(&mut self) -> Result<(), SgmlError> {
        let base_depth = self.stack.len();
        let mut c = self.skip_ws_pe(base_depth)?;
        let is_parameter = c == '%';
        if is_parameter {
            self.current.read_char()?;
            c = self.skip_ws_pe(base_depth)?;
        }
        if c == EOF_CHAR {
            return Err(SgmlError::DtdUnexpectedEOF);
        }

        let name = self.current.scan_token(" \t\r\n>", true)?;
        c = self.skip_ws_pe(base_depth)?;

        let def = match c {
            '"' | '\'' => EntityDef::Internal {
                literal: self.current.scan_literal(c)?,
                literal_type: None,
            },
            EOF_CHAR => return Err(SgmlError::DtdUnexpectedEOF),
            _ => {
                let keyword = self.current.scan_token(" \t\r\n>", false)?;
                match keyword.to_ascii_uppercase().as_str() {
                    kw @ ("CDATA" | "SDATA" | "PI") => {
                        let literal_type = match kw {
                            "CDATA" => LiteralType::Cdata,
                            "SDATA" => LiteralType::Sdata,
                            _ => LiteralType::Pi,
                        };
                        let quote = self.skip_ws_pe(base_depth)?;
                        if !matches!(quote, '"' | '\'') {
                            error!(
                                self,
                                DtdInvalidDeclaration,
                                "A literal is required after '{}' in the entity declaration for '{}'.",
                                kw,
                                name
                            );
                            return Err(SgmlError::DtdInvalidDeclaration);
                        }
                        EntityDef::Internal {
                            literal: self.current.scan_literal(quote)?,
                            literal_type: Some(literal_type),
                        }
                    }
                    "PUBLIC" => {
                        let quote = self.skip_ws_pe(base_depth)?;
                        if !matches!(quote, '"' | '\'') {
                            error!(
                                self,
                                DtdInvalidDeclaration,
                                "A public identifier literal is required after 'PUBLIC'."
                            );
                            return Err(SgmlError::DtdInvalidDeclaration);
                        }
                        let public_id = self.current.scan_literal(quote)?;
                        let quote = self.skip_ws_pe(base_depth)?;
                        if !matches!(quote, '"' | '\'') {
                            error!(
                                self,
                                DtdInvalidDeclaration,
                                "A system literal is required after the public identifier."
                            );
                            return Err(SgmlError::DtdInvalidDeclaration);
                        }
                        EntityDef::External {
                            public_id: Some(public_id),
                            system_id: self.current.scan_literal(quote)?,
                        }
                    }
                    "SYSTEM" => {
                        let quote = self.skip_ws_pe(base_depth)?;
                        if !matches!(quote, '"' | '\'') {
                            error!(
                                self,
                                DtdInvalidDeclaration,
                                "A system literal is required after 'SYSTEM'."
                            );
                            return Err(SgmlError::DtdInvalidDeclaration);
                        }
                        EntityDef::External {
                            public_id: None,
                            system_id: self.current.scan_literal(quote)?,
                        }
                    }
                    other => {
                        error!(
                            self,
                            DtdInvalidDeclaration,
                            "Unknown entity text keyword '{}' in the declaration of '{}'.",
                            other,
                            name
                        );
                        return Err(SgmlError::DtdInvalidDeclaration);
                    }
                }
            }
        };

        c = self.skip_ws_pe(base_depth)?;
        if c != '>' {
            warning!(
                self,
                DtdInvalidDeclaration,
                "Extra tokens at the end of the entity declaration for '{}'.",
                name
            );
            self.recover_to_close();
        } else {
            self.current.read_char()?;
        }

        // Names collide only within their own table; the first declaration
        // of an entity name is binding.
        let table = if is_parameter {
            &mut self.dtd.parameter_entities
        } else {
            &mut self.dtd.entities
        };
        if table.contains_key(&name) {
            warning!(
                self,
                DtdDuplicateDeclaration,
                "The entity '{}' is declared more than once.",
                name
            );
        } else {
            table.insert(name, def);
        }
        Ok(())
    }

    /// ```text
    /// <!ELEMENT (name | name-group) minimization content-model
    ///           (- exclusions)? (+ inclusions)? >
    /// ```
    fn parse_element_decl(&mut self) -> Result<(), SgmlError> {
        let base_depth = self.stack.len();
        self.skip_ws_pe(base_depth)?;
        let names = self.parse_name_group(base_depth)?;

        // Tag minimization: two tokens from {O, -} giving start/end tag
        // optionality.
        let mut c = self.skip_ws_pe(base_depth)?;
        let (start_optional, end_optional) = if matches!(c, 'O' | 'o' | '-') {
            let start = c != '-';
            self.current.read_char()?;
            c = self.skip_ws_pe(base_depth)?;
            if matches!(c, 'O' | 'o' | '-') {
                let end = c != '-';
                self.current.read_char()?;
                (start, end)
            } else {
                warning!(
                    self,
                    DtdInvalidDeclaration,
                    "Tag minimization requires two tokens from {{O, -}}."
                );
                (start, false)
            }
        } else {
            warning!(
                self,
                DtdInvalidDeclaration,
                "Missing tag minimization in the declaration of '{}'.",
                names.first().map(String::as_str).unwrap_or("?")
            );
            (false, false)
        };

        c = self.skip_ws_pe(base_depth)?;
        let content_model = if c == '(' {
            self.current.read_char()?;
            let group = self.parse_group(base_depth)?;
            ContentModel {
                declared: DeclaredContent::Default,
                any: false,
                group,
            }
        } else {
            let keyword = self.current.scan_token(" \t\r\n->+", false)?;
            match keyword.to_ascii_uppercase().as_str() {
                "EMPTY" => ContentModel::empty(),
                "ANY" => ContentModel::any(),
                "CDATA" => ContentModel {
                    declared: DeclaredContent::Cdata,
                    ..Default::default()
                },
                "RCDATA" => ContentModel {
                    declared: DeclaredContent::Rcdata,
                    ..Default::default()
                },
                other => {
                    error!(
                        self,
                        DtdInvalidContentModel,
                        "'{}' is not a content model.",
                        other
                    );
                    return Err(SgmlError::DtdInvalidContentModel);
                }
            }
        };

        // Optional exceptions, in either order.
        let mut exclusions = Vec::new();
        let mut inclusions = Vec::new();
        loop {
            c = self.skip_ws_pe(base_depth)?;
            if c == '-' && self.current.peek() == '(' {
                self.current.read_char()?;
                exclusions.extend(self.parse_name_group(base_depth)?);
            } else if c == '+' && self.current.peek() == '(' {
                self.current.read_char()?;
                inclusions.extend(self.parse_name_group(base_depth)?);
            } else {
                break;
            }
        }

        if c != '>' {
            warning!(
                self,
                DtdInvalidDeclaration,
                "Extra tokens at the end of the element declaration for '{}'.",
                names.first().map(String::as_str).unwrap_or("?")
            );
            self.recover_to_close();
        } else {
            self.current.read_char()?;
        }

        for name in names {
            if self.dtd.elements.contains_key(&name) {
                warning!(
                    self,
                    DtdDuplicateDeclaration,
                    "The element '{}' is declared more than once.",
                    name
                );
                continue;
            }
            self.dtd.elements.insert(
                name.clone(),
                ElementDecl {
                    name,
                    start_tag_optional: start_optional,
                    end_tag_optional: end_optional,
                    content_model: content_model.clone(),
                    inclusions: inclusions.iter().cloned().collect(),
                    exclusions: exclusions.iter().cloned().collect(),
                    attributes: HashMap::new(),
                },
            );
        }
        Ok(())
    }

    /// A single name, or a parenthesized group of names joined by any
    /// connector. Names come back uppercased.
    fn parse_name_group(&mut self, base_depth: usize) -> Result<Vec<String>, SgmlError> {
        let c = self.skip_ws_pe(base_depth)?;
        if c != '(' {
            let name = self.current.scan_token(" \t\r\n>()|,&", true)?;
            return Ok(vec![name.to_ascii_uppercase()]);
        }

        self.current.read_char()?;
        let mut names = Vec::new();
        loop {
            let c = self.skip_ws_pe(base_depth)?;
            match c {
                ')' => {
                    self.current.read_char()?;
                    return Ok(names);
                }
                '|' | ',' | '&' => {
                    self.current.read_char()?;
                }
                EOF_CHAR => return Err(SgmlError::DtdUnexpectedEOF),
                _ => {
                    let name = self.current.scan_token(" \t\r\n>()|,&", true)?;
                    names.push(name.to_ascii_uppercase());
                }
            }
        }
    }

    /// The opening `(` has been consumed. Parses members, the connector, and
    /// the occurrence suffix; `#PCDATA` sets the mixed flag.
    fn parse_group(&mut self, base_depth: usize) -> Result<Group, SgmlError> {
        self.group_depth += 1;
        let mut group = Group::default();
        let mut connector_fixed = false;
        loop {
            let c = self.skip_ws_pe(base_depth)?;
            match c {
                ')' => {
                    self.group_depth -= 1;
                    let c = self.current.read_char()?;
                    if let Some(occurrence) = Occurrence::from_suffix(c) {
                        group.occurrence = occurrence;
                        self.current.read_char()?;
                    }
                    return Ok(group);
                }
                '(' => {
                    self.current.read_char()?;
                    let nested = self.parse_group(base_depth)?;
                    group.members.push(GroupMember::Group(nested));
                }
                '#' => {
                    let token = self.current.scan_token(" \t\r\n|,&)>", false)?;
                    if token.eq_ignore_ascii_case("#PCDATA") {
                        group.mixed = true;
                    } else {
                        error!(
                            self,
                            DtdInvalidContentModel,
                            "Unknown reserved name '{}' in a model group.",
                            token
                        );
                    }
                }
                connector @ ('|' | ',' | '&') => {
                    let connector = match connector {
                        '|' => GroupConnector::Or,
                        ',' => GroupConnector::Sequence,
                        _ => GroupConnector::And,
                    };
                    if !connector_fixed {
                        group.connector = connector;
                        connector_fixed = true;
                    } else if group.connector != connector {
                        // The connector is uniform within a group; keep the
                        // first and report the mix.
                        error!(
                            self,
                            DtdMixedConnectors,
                            "Connectors may not be mixed within one model group."
                        );
                    }
                    self.current.read_char()?;
                }
                '>' | EOF_CHAR => {
                    error!(
                        self,
                        DtdInvalidContentModel,
                        "A model group is not closed before the end of the declaration."
                    );
                    self.group_depth -= 1;
                    return Err(SgmlError::DtdInvalidContentModel);
                }
                _ => {
                    let name = self.current.scan_token(" \t\r\n|,&)>?+*", true)?;
                    let occurrence =
                        Occurrence::from_suffix(self.current.last_char()).unwrap_or_default();
                    if occurrence != Occurrence::Required {
                        self.current.read_char()?;
                    }
                    group.members.push(GroupMember::Symbol {
                        name: name.to_ascii_uppercase(),
                        occurrence,
                    });
                }
            }
        }
    }

    /// ```text
    /// <!ATTLIST (name | name-group) (name type default)* >
    /// ```
    fn parse_attlist_decl(&mut self) -> Result<(), SgmlError> {
        let base_depth = self.stack.len();
        self.skip_ws_pe(base_depth)?;
        let names = self.parse_name_group(base_depth)?;

        let mut defs = Vec::new();
        loop {
            let c = self.skip_ws_pe(base_depth)?;
            if c == '>' {
                self.current.read_char()?;
                break;
            }
            if c == EOF_CHAR {
                return Err(SgmlError::DtdUnexpectedEOF);
            }

            let att_name = self
                .current
                .scan_token(" \t\r\n>", true)?
                .to_ascii_uppercase();
            let mut def = AttDef {
                name: att_name,
                ..Default::default()
            };

            // declared value
            let c = self.skip_ws_pe(base_depth)?;
            if c == '(' {
                self.current.read_char()?;
                def.att_type = AttributeType::Enumeration;
                def.enum_values = self.parse_token_group(base_depth)?;
            } else {
                let keyword = self.current.scan_token(" \t\r\n>", false)?;
                match AttributeType::from_keyword(&keyword) {
                    Some(AttributeType::Notation) => {
                        def.att_type = AttributeType::Notation;
                        let c = self.skip_ws_pe(base_depth)?;
                        if c == '(' {
                            self.current.read_char()?;
                            def.enum_values = self.parse_token_group(base_depth)?;
                        } else {
                            error!(
                                self,
                                DtdInvalidAttributeType,
                                "'NOTATION' must be followed by a name group."
                            );
                            return Err(SgmlError::DtdInvalidAttributeType);
                        }
                    }
                    Some(att_type) => def.att_type = att_type,
                    None => {
                        error!(
                            self,
                            DtdInvalidAttributeType,
                            "'{}' is not an attribute type; CDATA is assumed.",
                            keyword
                        );
                        def.att_type = AttributeType::Cdata;
                    }
                }
            }

            // default value declaration
            let c = self.skip_ws_pe(base_depth)?;
            match c {
                '#' => {
                    let keyword = self.current.scan_token(" \t\r\n>", false)?;
                    match keyword.to_ascii_uppercase().as_str() {
                        "#REQUIRED" => def.presence = AttributePresence::Required,
                        "#IMPLIED" => def.presence = AttributePresence::Implied,
                        "#FIXED" => {
                            def.presence = AttributePresence::Fixed;
                            let quote = self.skip_ws_pe(base_depth)?;
                            if matches!(quote, '"' | '\'') {
                                def.default_value = Some(self.current.scan_literal(quote)?);
                            } else {
                                error!(
                                    self,
                                    DtdInvalidAttributeDefault,
                                    "'#FIXED' must be followed by a literal."
                                );
                                return Err(SgmlError::DtdInvalidAttributeDefault);
                            }
                        }
                        other => {
                            error!(
                                self,
                                DtdInvalidAttributeDefault,
                                "'{}' is not a default value keyword.",
                                other
                            );
                            return Err(SgmlError::DtdInvalidAttributeDefault);
                        }
                    }
                }
                '"' | '\'' => {
                    def.default_value = Some(self.current.scan_literal(c)?);
                }
                EOF_CHAR => return Err(SgmlError::DtdUnexpectedEOF),
                _ => {
                    let token = self.current.scan_token(" \t\r\n>", false)?;
                    def.default_value = Some(token);
                }
            }

            defs.push(def);
        }

        for name in names {
            self.pending_attlists
                .entry(name)
                .or_default()
                .extend(defs.iter().cloned());
        }
        Ok(())
    }

    /// Enumeration tokens: names or number tokens joined by `|` inside
    /// parentheses. The opening `(` has been consumed.
    fn parse_token_group(&mut self, base_depth: usize) -> Result<Vec<String>, SgmlError> {
        let mut tokens = Vec::new();
        loop {
            let c = self.skip_ws_pe(base_depth)?;
            match c {
                ')' => {
                    self.current.read_char()?;
                    return Ok(tokens);
                }
                '|' | ',' => {
                    self.current.read_char()?;
                }
                EOF_CHAR => return Err(SgmlError::DtdUnexpectedEOF),
                _ => {
                    let token = self.current.scan_token(" \t\r\n|,)>", false)?;
                    tokens.push(token);
                }
            }
        }
    }
}
