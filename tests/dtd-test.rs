use std::sync::Mutex;

use anysgml::{
    dtd::{AttributePresence, AttributeType, DeclaredContent, Dtd, EntityDef, GroupConnector},
    error::{ErrorHandler, SgmlError, SgmlParseError, SilentErrorHandler},
};

#[derive(Default)]
struct CollectingHandler {
    log: Mutex<Vec<String>>,
}

impl CollectingHandler {
    fn contains(&self, needle: &str) -> bool {
        self.log.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

impl ErrorHandler for CollectingHandler {
    fn warning(&self, error: SgmlParseError) {
        self.log.lock().unwrap().push(error.to_string());
    }

    fn error(&self, error: SgmlParseError) {
        self.log.lock().unwrap().push(error.to_string());
    }

    fn fatal_error(&self, error: SgmlParseError) {
        self.log.lock().unwrap().push(error.to_string());
    }
}

#[test]
fn element_declarations() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!ELEMENT doc O O (head?, item+)>
         <!ELEMENT head - O (#PCDATA)>
         <!ELEMENT item - - (#PCDATA | sub)*>
         <!ELEMENT sub - - EMPTY>
         <!ELEMENT raw - - CDATA>",
        &SilentErrorHandler,
    )
    .unwrap();

    let doc = dtd.find_element("DOC").unwrap();
    assert!(doc.start_tag_optional);
    assert!(doc.end_tag_optional);
    assert_eq!(doc.content_model.group.connector, GroupConnector::Sequence);
    assert!(doc.content_model.can_contain("ITEM"));
    assert!(!doc.content_model.can_contain("SUB"));
    assert!(!doc.can_contain_text());

    let head = dtd.find_element("head").unwrap();
    assert!(!head.start_tag_optional);
    assert!(head.end_tag_optional);
    assert!(head.can_contain_text());

    let item = dtd.find_element("item").unwrap();
    assert!(item.content_model.can_contain("SUB"));
    assert!(item.can_contain_text());

    assert_eq!(
        dtd.find_element("sub").unwrap().content_model.declared,
        DeclaredContent::Empty
    );
    assert_eq!(
        dtd.find_element("raw").unwrap().content_model.declared,
        DeclaredContent::Cdata
    );
}

#[test]
fn name_groups_and_exceptions() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!ELEMENT doc - - (a | b)+>
         <!ELEMENT (a | b) - - (#PCDATA)* -(b) +(note)>
         <!ELEMENT note - O (#PCDATA)>",
        &SilentErrorHandler,
    )
    .unwrap();

    let a = dtd.find_element("a").unwrap();
    let b = dtd.find_element("b").unwrap();
    assert!(a.exclusions.contains("B"));
    assert!(a.inclusions.contains("NOTE"));
    assert_eq!(b.exclusions, a.exclusions);
    // Inclusions admit elements the content model does not.
    assert!(a.can_contain("NOTE"));
    assert!(!a.can_contain("B"));
}

#[test]
fn attlist_declarations() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!ELEMENT doc - - (#PCDATA)>
         <!ATTLIST doc
           id      ID      #IMPLIED
           version CDATA   #FIXED \"1.0\"
           kind    (x | y | z) x
           count   NUMBER  #REQUIRED>",
        &SilentErrorHandler,
    )
    .unwrap();

    let doc = dtd.find_element("doc").unwrap();
    let id = doc.find_attribute("id").unwrap();
    assert_eq!(id.att_type, AttributeType::Id);
    assert_eq!(id.presence, AttributePresence::Implied);

    let version = doc.find_attribute("VERSION").unwrap();
    assert_eq!(version.presence, AttributePresence::Fixed);
    assert_eq!(version.default_value.as_deref(), Some("1.0"));

    let kind = doc.find_attribute("kind").unwrap();
    assert_eq!(kind.att_type, AttributeType::Enumeration);
    assert_eq!(kind.enum_values, ["x", "y", "z"]);
    assert_eq!(kind.default_value.as_deref(), Some("x"));

    let count = doc.find_attribute("count").unwrap();
    assert_eq!(count.att_type, AttributeType::Number);
    assert_eq!(count.presence, AttributePresence::Required);
}

#[test]
fn attlist_may_precede_element() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!ATTLIST doc id ID #IMPLIED>
         <!ELEMENT doc - - (#PCDATA)>",
        &SilentErrorHandler,
    )
    .unwrap();
    assert!(dtd.find_element("doc").unwrap().find_attribute("id").is_some());
}

#[test]
fn entity_tables_are_separate() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!ENTITY % pe \"(#PCDATA)\">
         <!ENTITY pe \"general\">
         <!ENTITY copy CDATA \"&#169;\">
         <!ENTITY chapter SYSTEM \"chapter.sgml\">
         <!ENTITY pubbed PUBLIC \"-//Example//EN\" \"pubbed.sgml\">
         <!ELEMENT doc - - %pe;>",
        &SilentErrorHandler,
    )
    .unwrap();

    // The same name lives in both tables without collision.
    assert!(matches!(
        dtd.find_entity("pe"),
        Some(EntityDef::Internal { literal, .. }) if literal == "general"
    ));
    assert!(dtd.find_parameter_entity("pe").is_some());

    // Typed literals expand their numeric references at declaration time.
    assert!(matches!(
        dtd.find_entity("copy"),
        Some(EntityDef::Internal { literal, .. }) if literal == "\u{A9}"
    ));

    assert!(matches!(
        dtd.find_entity("chapter"),
        Some(EntityDef::External { public_id: None, system_id }) if system_id == "chapter.sgml"
    ));
    assert!(matches!(
        dtd.find_entity("pubbed"),
        Some(EntityDef::External { public_id: Some(p), .. }) if p == "-//Example//EN"
    ));

    // The parameter entity supplied the whole content model.
    assert!(dtd.find_element("doc").unwrap().can_contain_text());
}

#[test]
fn first_entity_declaration_wins() {
    let handler = CollectingHandler::default();
    let dtd = Dtd::parse_str(
        "doc",
        "<!ENTITY e \"first\">
         <!ENTITY e \"second\">
         <!ELEMENT doc - - (#PCDATA)>",
        &handler,
    )
    .unwrap();
    assert!(matches!(
        dtd.find_entity("e"),
        Some(EntityDef::Internal { literal, .. }) if literal == "first"
    ));
    assert!(handler.contains("declared more than once"));
}

#[test]
fn ignore_section_is_skipped() {
    let dtd = Dtd::parse_str(
        "doc",
        "<![ IGNORE [
           <!ELEMENT hidden - - (#PCDATA)>
         ]]>
         <!ELEMENT doc - - (#PCDATA)>",
        &SilentErrorHandler,
    )
    .unwrap();
    assert!(dtd.find_element("hidden").is_none());
    assert!(dtd.find_element("doc").is_some());
}

#[test]
fn include_section_is_unimplemented() {
    let handler = CollectingHandler::default();
    let dtd = Dtd::parse_str(
        "doc",
        "<![ INCLUDE [
           <!ELEMENT extra - - (#PCDATA)>
         ]]>
         <!ELEMENT doc - - (#PCDATA)>",
        &handler,
    )
    .unwrap();
    // The section is reported and skipped whole, not silently accepted.
    assert!(dtd.find_element("extra").is_none());
    assert!(handler.contains("INCLUDE"));
    assert!(dtd.find_element("doc").is_some());
}

#[test]
fn mixed_connectors_are_reported() {
    let handler = CollectingHandler::default();
    let dtd = Dtd::parse_str(
        "doc",
        "<!ELEMENT doc - - (a, b | c)>
         <!ELEMENT (a|b|c) - O (#PCDATA)>",
        &handler,
    )
    .unwrap();
    assert!(handler.contains("Connectors"));
    // The first connector is kept.
    assert_eq!(
        dtd.find_element("doc").unwrap().content_model.group.connector,
        GroupConnector::Sequence
    );
}

#[test]
fn pe_group_nesting_violation_is_fatal() {
    // The replacement text opens a group it does not close before the
    // entity ends.
    let result = Dtd::parse_str(
        "doc",
        "<!ENTITY % broken \"(a, \">
         <!ELEMENT doc - - %broken; b)>",
        &SilentErrorHandler,
    );
    assert!(matches!(result, Err(SgmlError::DtdImproperEntityNesting)));
}

#[test]
fn undefined_parameter_entity_aborts_declaration() {
    let handler = CollectingHandler::default();
    let dtd = Dtd::parse_str(
        "doc",
        "<!ELEMENT bad - - (%nope;)>
         <!ELEMENT doc - - (#PCDATA)>",
        &handler,
    )
    .unwrap();
    assert!(handler.contains("nope"));
    // The bad declaration is dropped; parsing continues.
    assert!(dtd.find_element("bad").is_none());
    assert!(dtd.find_element("doc").is_some());
}

#[test]
fn comments_inside_subset() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!-- leading comment, with -- tricky -- content -->
         <!ELEMENT doc - - (#PCDATA)>",
        &SilentErrorHandler,
    )
    .unwrap();
    assert!(dtd.find_element("doc").is_some());
}

#[test]
fn content_model_display() {
    let dtd = Dtd::parse_str(
        "doc",
        "<!ELEMENT doc - - (head?, (item | note)+)>
         <!ELEMENT (head|item|note) - O (#PCDATA)>",
        &SilentErrorHandler,
    )
    .unwrap();
    assert_eq!(
        dtd.find_element("doc").unwrap().content_model.to_string(),
        "(HEAD?,(ITEM|NOTE)+)"
    );
}

#[test]
fn builtin_dtd_is_shared() {
    let first = anysgml::dtd::html_dtd();
    let second = anysgml::dtd::html_dtd();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}
