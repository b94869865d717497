use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use anysgml::{
    CaseFolding, TextWhitespace, WhitespaceHandling,
    dtd::Dtd,
    error::{ErrorHandler, SgmlParseError, SilentErrorHandler},
    reader::{NodeType, SgmlReader, SgmlReaderBuilder},
};

#[derive(Default)]
struct CollectingHandler {
    log: Mutex<Vec<String>>,
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

fn html_reader(input: &str) -> SgmlReader {
    SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .input_str(input)
        .build()
}

/// Drive the reader to EOF and render one line per node, the shape the
/// expectations below are written against.
fn transcript(reader: &mut SgmlReader) -> String {
    let mut out = String::new();
    while reader.read().unwrap() {
        match reader.node_type() {
            NodeType::Element => {
                write!(out, "startElement({}", reader.name()).unwrap();
                if reader.is_simulated() {
                    out.push_str(", simulated");
                }
                if reader.is_empty_element() {
                    out.push_str(", empty");
                }
                out.push_str(")\n");
            }
            NodeType::EndElement => writeln!(out, "endElement({})", reader.name()).unwrap(),
            NodeType::Text => writeln!(out, "characters({})", reader.value()).unwrap(),
            NodeType::Whitespace => writeln!(out, "whitespace({:?})", reader.value()).unwrap(),
            NodeType::CData => writeln!(out, "cdata({})", reader.value()).unwrap(),
            NodeType::Comment => writeln!(out, "comment({})", reader.value()).unwrap(),
            NodeType::ProcessingInstruction => {
                writeln!(out, "processingInstruction({}, {})", reader.name(), reader.value())
                    .unwrap()
            }
            NodeType::DocumentType => {
                writeln!(out, "documentType({})", reader.name()).unwrap()
            }
            other => writeln!(out, "other({other:?})").unwrap(),
        }
    }
    out
}

#[test]
fn omitted_end_tags_are_inferred() {
    let mut reader = html_reader("<html><body><p>a<p>b</body></html>");
    assert_eq!(
        transcript(&mut reader),
        "startElement(html)\n\
         startElement(head, simulated)\n\
         endElement(head)\n\
         startElement(body)\n\
         startElement(p)\n\
         characters(a)\n\
         endElement(p)\n\
         startElement(p)\n\
         characters(b)\n\
         endElement(p)\n\
         endElement(body)\n\
         endElement(html)\n"
    );
}

#[test]
fn missing_root_is_simulated() {
    let mut reader = html_reader("<p>x");
    assert_eq!(
        transcript(&mut reader),
        "startElement(html, simulated)\n\
         startElement(head, simulated)\n\
         endElement(head)\n\
         startElement(body, simulated)\n\
         startElement(p)\n\
         characters(x)\n\
         endElement(p)\n\
         endElement(body)\n\
         endElement(html)\n"
    );
}

#[test]
fn script_content_is_cdata() {
    let mut reader = html_reader("<script>if (a<b) x;</script>");
    // SCRIPT lands in HEAD through the head.misc inclusions; the `<b` must
    // not open an element.
    assert_eq!(
        transcript(&mut reader),
        "startElement(html, simulated)\n\
         startElement(head, simulated)\n\
         startElement(script)\n\
         cdata(if (a<b) x;)\n\
         endElement(script)\n\
         endElement(head)\n\
         endElement(html)\n"
    );
}

#[test]
fn quote_inside_attribute_value() {
    let mut reader = html_reader("<a href='u\"1'>z</a>");
    assert!(reader.read().unwrap()); // html (simulated)
    assert!(reader.read().unwrap()); // head (simulated)
    assert!(reader.read().unwrap()); // /head
    assert!(reader.read().unwrap()); // body (simulated)
    assert!(reader.read().unwrap());
    assert_eq!(reader.node_type(), NodeType::Element);
    assert_eq!(reader.name(), "a");
    assert_eq!(reader.attribute_count(), 1);
    assert_eq!(reader.attribute("href"), Some("u\"1"));
    assert!(reader.move_to_attribute_named("href"));
    assert_eq!(reader.node_type(), NodeType::Attribute);
    assert_eq!(reader.quote_char(), '\'');
    assert!(reader.read_attribute_value());
    assert_eq!(reader.node_type(), NodeType::Text);
    assert_eq!(reader.value(), "u\"1");
    assert!(reader.move_to_element());

    assert!(reader.read().unwrap());
    assert_eq!(reader.node_type(), NodeType::Text);
    assert_eq!(reader.value(), "z");
    assert!(reader.read().unwrap());
    assert_eq!(reader.node_type(), NodeType::EndElement);
    assert_eq!(reader.name(), "a");
}

#[test]
fn named_and_numeric_references_agree() {
    let mut reader = html_reader("<p>caf\u{0026}eacute; &#233; &#xE9;</p>");
    let out = transcript(&mut reader);
    assert!(out.contains("characters(caf\u{E9} \u{E9} \u{E9})"), "{out}");
}

#[test]
fn windows_1252_remap_applies_to_html() {
    let mut reader = html_reader("<p>a&#151;b&#133;c</p>");
    let out = transcript(&mut reader);
    assert!(out.contains("characters(a\u{2014}b\u{2026}c)"), "{out}");
}

#[test]
fn unterminated_entity_reference_does_not_leak_eof() {
    let mut reader = html_reader("&test");
    let mut text = String::new();
    while reader.read().unwrap() {
        if reader.node_type() == NodeType::Text {
            text.push_str(reader.value());
        }
    }
    assert_eq!(text, "&test");
    assert!(!text.ends_with('\u{FFFF}'));
}

#[test]
fn list_items_auto_close() {
    let mut reader = html_reader("<html><body><ul><li>a<li>b</ul></body></html>");
    let out = transcript(&mut reader);
    assert!(out.contains(
        "startElement(ul)\n\
         startElement(li)\n\
         characters(a)\n\
         endElement(li)\n\
         startElement(li)\n\
         characters(b)\n\
         endElement(li)\n\
         endElement(ul)\n"
    ), "{out}");
}

#[test]
fn table_body_is_inferred() {
    let mut reader = html_reader("<html><body><table><tr><td>x</table></body></html>");
    let out = transcript(&mut reader);
    assert!(out.contains(
        "startElement(table)\n\
         startElement(tbody, simulated)\n\
         startElement(tr)\n\
         startElement(td)\n\
         characters(x)\n\
         endElement(td)\n\
         endElement(tr)\n\
         endElement(tbody)\n\
         endElement(table)\n"
    ), "{out}");
}

#[test]
fn anchor_exclusion_blocks_on_required_end_tag() {
    // A excludes A, but A's end tag is required, so the auto-close walk is
    // blocked and the second anchor stays nested.
    let mut reader = html_reader("<html><body><a>x<a>y</a></a></body></html>");
    let out = transcript(&mut reader);
    let opens = out.matches("startElement(a)").count();
    let closes = out.matches("endElement(a)").count();
    assert_eq!(opens, 2, "{out}");
    assert_eq!(closes, 2, "{out}");
}

#[test]
fn empty_elements_do_not_close() {
    let mut reader = html_reader("<html><body><p>a<br>b</p></body></html>");
    let out = transcript(&mut reader);
    assert!(out.contains("startElement(br, empty)\n"), "{out}");
    assert!(!out.contains("endElement(br)"), "{out}");
}

#[test]
fn mismatched_end_tag_closes_through() {
    let mut reader = html_reader("<html><body><div><p>a</div></body></html>");
    let out = transcript(&mut reader);
    assert!(out.contains(
        "characters(a)\n\
         endElement(p)\n\
         endElement(div)\n"
    ), "{out}");
}

#[test]
fn unmatched_end_tag_is_ignored() {
    let handler = Arc::new(CollectingHandler::default());
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .error_handler(handler.clone())
        .input_str("<html><body><p>a</nope></p></body></html>")
        .build();
    let out = transcript(&mut reader);
    assert!(!out.contains("nope"), "{out}");
    assert!(
        handler.log.lock().unwrap().iter().any(|m| m.contains("nope")),
        "expected a warning about the unmatched end tag"
    );
}

#[test]
fn duplicate_attributes_are_dropped() {
    let handler = Arc::new(CollectingHandler::default());
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .error_handler(handler.clone())
        .input_str("<html><body><p id=one id=two>a</p></body></html>")
        .build();
    while reader.read().unwrap() {
        if reader.node_type() == NodeType::Element && reader.name() == "p" {
            assert_eq!(reader.attribute_count(), 1);
            assert_eq!(reader.attribute("id"), Some("one"));
        }
    }
    assert!(!handler.log.lock().unwrap().is_empty());
}

#[test]
fn attribute_quirks() {
    let mut reader = html_reader("<html><body><input disabled , type=text></body></html>");
    while reader.read().unwrap() {
        if reader.node_type() == NodeType::Element && reader.name() == "input" {
            // Valueless attribute: the name doubles as the value.
            assert_eq!(reader.attribute("disabled"), Some("disabled"));
            // Unquoted value; spurious ',' dropped.
            assert_eq!(reader.attribute("type"), Some("text"));
            assert!(reader.is_empty_element());
        }
    }
}

#[test]
fn end_tags_match_start_tag_casing_without_folding() {
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::None)
        .whitespace_handling(WhitespaceHandling::None)
        .input_str("<HTML><BODY><DIV>x</div></BODY></HTML>")
        .build();
    let out = transcript(&mut reader);
    assert!(out.contains("startElement(DIV)"), "{out}");
    // The end tag is forced to the casing of its start tag.
    assert!(out.contains("endElement(DIV)"), "{out}");
}

#[test]
fn case_folding_is_idempotent() {
    let mut reader = html_reader("<HTML><BoDy><P ID=x>a</P></BoDy></HTML>");
    while reader.read().unwrap() {
        if matches!(reader.node_type(), NodeType::Element | NodeType::EndElement) {
            assert_eq!(reader.name(), reader.name().to_lowercase());
            for i in 0..reader.attribute_count() {
                let attr = reader.attribute_at(i).unwrap();
                assert_eq!(attr.name, attr.name.to_lowercase());
            }
        }
    }
}

#[test]
fn repeated_parses_are_stable() {
    let input = "<p>a<table><tr><td>x</table><p>b";
    let mut first = html_reader(input);
    let mut second = html_reader(input);
    assert_eq!(transcript(&mut first), transcript(&mut second));
}

#[test]
fn balanced_output_at_every_depth() {
    let inputs = [
        "<html><body><p>a<p>b<ul><li>c<li>d</ul>e",
        "<td>deep</td>",
        "<div><div><div>x",
        "<p>a</div></span>b",
    ];
    for input in inputs {
        let mut reader = html_reader(input);
        let mut depth = 0usize;
        let mut opens = 0usize;
        let mut closes = 0usize;
        while reader.read().unwrap() {
            match reader.node_type() {
                NodeType::Element if !reader.is_empty_element() => {
                    depth += 1;
                    assert_eq!(reader.depth(), depth, "input: {input}");
                    opens += 1;
                }
                NodeType::EndElement => {
                    assert_eq!(reader.depth(), depth, "input: {input}");
                    depth -= 1;
                    closes += 1;
                }
                _ => {}
            }
        }
        assert_eq!(depth, 0, "input: {input}");
        assert_eq!(opens, closes, "input: {input}");
    }
}

#[test]
fn whitespace_handling_modes() {
    let input = "<html><body><pre>  </pre></body></html>";
    let mut all = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::All)
        .input_str(input)
        .build();
    assert!(transcript(&mut all).contains("whitespace"), "All must surface whitespace");

    let mut none = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .input_str(input)
        .build();
    assert!(!transcript(&mut none).contains("whitespace"));
}

#[test]
fn text_whitespace_trimming() {
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .text_whitespace(TextWhitespace::new(
            TextWhitespace::TRIM_LEADING | TextWhitespace::TRIM_TRAILING,
        ))
        .input_str("<html><body><p>  a b  </p></body></html>")
        .build();
    let out = transcript(&mut reader);
    assert!(out.contains("characters(a b)"), "{out}");
}

#[test]
fn doctype_node_and_strip() {
    let input = "<!DOCTYPE html><html><body><p>x</p></body></html>";
    let mut kept = SgmlReaderBuilder::new()
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .input_str(input)
        .build();
    assert!(transcript(&mut kept).starts_with("documentType(html)\n"));

    let mut stripped = SgmlReaderBuilder::new()
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .strip_doc_type(true)
        .input_str(input)
        .build();
    assert!(transcript(&mut stripped).starts_with("startElement(html)\n"));
}

#[test]
fn comments_and_pis_surface() {
    let mut reader = html_reader("<html><!-- note --><body><?robots index?><p>x</p></body></html>");
    let out = transcript(&mut reader);
    assert!(out.contains("comment( note )"), "{out}");
    assert!(out.contains("processingInstruction(robots, index)"), "{out}");
}

#[test]
fn script_comment_interleaving() {
    let mut reader = html_reader("<script>a<!-- hidden -->b</script>");
    let out = transcript(&mut reader);
    assert!(out.contains("cdata(a)\n"), "{out}");
    assert!(out.contains("comment( hidden )\n"), "{out}");
    assert!(out.contains("cdata(b)\n"), "{out}");
}

#[test]
fn cdata_markers_are_stripped_from_script() {
    let mut reader = html_reader("<script>/*<![CDATA[*/var a;/*]]>*/</script>");
    let out = transcript(&mut reader);
    assert!(out.contains("cdata(var a;)"), "{out}");
}

#[test]
fn second_root_forces_eof_in_strict_mode() {
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .error_handler(Arc::new(SilentErrorHandler))
        .input_str("<html><body>a</body></html><html><body>b</body></html>")
        .build();
    let out = transcript(&mut reader);
    assert_eq!(out.matches("startElement(html)").count(), 1, "{out}");
    assert!(!out.contains("characters(b)"), "{out}");
}

#[test]
fn fragments_allow_multiple_roots() {
    let dtd = Arc::new(
        Dtd::parse_str(
            "item",
            "<!ELEMENT item - - (#PCDATA)>",
            &SilentErrorHandler,
        )
        .unwrap(),
    );
    let mut reader = SgmlReader::builder()
        .doc_type("item")
        .dtd(dtd)
        .fragment(true)
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .input_str("<item>a</item><item>b</item>")
        .build();
    let out = transcript(&mut reader);
    assert_eq!(out.matches("startElement(item)").count(), 2, "{out}");
    assert!(out.contains("characters(b)"), "{out}");
}

#[test]
fn namespaces_resolve_from_ancestors() {
    let mut reader = SgmlReader::builder()
        .ignore_dtd(true)
        .input_str(
            "<root xmlns=\"urn:default\" xmlns:x=\"urn:x\"><x:item><plain/><y:unknown/><z:unknown/></x:item></root>",
        )
        .build();

    let mut seen = Vec::new();
    while reader.read().unwrap() {
        if reader.node_type() == NodeType::Element {
            let name = reader.name().to_owned();
            let uri = reader.namespace_uri();
            seen.push((name, uri));
        }
    }
    assert_eq!(
        seen,
        vec![
            ("root".to_owned(), Some("urn:default".to_owned())),
            ("x:item".to_owned(), Some("urn:x".to_owned())),
            ("plain".to_owned(), Some("urn:default".to_owned())),
            ("y:unknown".to_owned(), Some("#unknown".to_owned())),
            ("z:unknown".to_owned(), Some("#unknown1".to_owned())),
        ]
    );
}

#[test]
fn xml_space_and_lang_inherit() {
    let mut reader = SgmlReader::builder()
        .ignore_dtd(true)
        .input_str("<root xml:space=\"preserve\" xml:lang=\"en\"><child>x</child></root>")
        .build();
    while reader.read().unwrap() {
        if reader.node_type() == NodeType::Element && reader.name() == "child" {
            assert_eq!(reader.xml_space(), "preserve");
            assert_eq!(reader.xml_lang(), "en");
        }
    }
}

#[test]
fn ofx_style_minimization() {
    let dtd_text = "\
<!ELEMENT OFX      - - (SIGNONMSGSRSV1)>
<!ELEMENT SIGNONMSGSRSV1 - O (SONRS)>
<!ELEMENT SONRS    - O (DTSERVER, LANGUAGE)>
<!ELEMENT DTSERVER - O (#PCDATA)>
<!ELEMENT LANGUAGE - O (#PCDATA)>
";
    let dtd = Arc::new(Dtd::parse_str("ofx", dtd_text, &SilentErrorHandler).unwrap());
    let mut reader = SgmlReader::builder()
        .doc_type("ofx")
        .dtd(dtd)
        .case_folding(CaseFolding::ToUpper)
        .whitespace_handling(WhitespaceHandling::None)
        .input_str("<OFX><SIGNONMSGSRSV1><SONRS><DTSERVER>20050102<LANGUAGE>ENG</OFX>")
        .build();
    assert_eq!(
        transcript(&mut reader),
        "startElement(OFX)\n\
         startElement(SIGNONMSGSRSV1)\n\
         startElement(SONRS)\n\
         startElement(DTSERVER)\n\
         characters(20050102)\n\
         endElement(DTSERVER)\n\
         startElement(LANGUAGE)\n\
         characters(ENG)\n\
         endElement(LANGUAGE)\n\
         endElement(SONRS)\n\
         endElement(SIGNONMSGSRSV1)\n\
         endElement(OFX)\n"
    );
}

#[test]
fn utf16_input_is_decoded() {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "<p>caf\u{E9}</p>".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .input_reader(std::io::Cursor::new(bytes))
        .build();
    let out = transcript(&mut reader);
    assert!(out.contains("characters(caf\u{E9})"), "{out}");
}

#[test]
fn stray_angle_bracket_is_text() {
    let mut reader = html_reader("<html><body><p>1 < 2</p></body></html>");
    let out = transcript(&mut reader);
    assert!(out.contains("characters(1 < 2)"), "{out}");
}

#[test]
fn text_in_element_content_is_dropped() {
    let handler = Arc::new(CollectingHandler::default());
    let mut reader = SgmlReader::builder()
        .doc_type("html")
        .case_folding(CaseFolding::ToLower)
        .whitespace_handling(WhitespaceHandling::None)
        .error_handler(handler.clone())
        .input_str("<html><body><ul>stray<li>a</ul></body></html>")
        .build();
    let out = transcript(&mut reader);
    assert!(!out.contains("characters(stray)"), "{out}");
    assert!(out.contains("characters(a)"), "{out}");
    assert!(!handler.log.lock().unwrap().is_empty());
}
