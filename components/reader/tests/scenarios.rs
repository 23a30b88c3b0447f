use std::rc::Rc;

use assert_matches::assert_matches;

use xtr_reader::{
    Conformance, DtdProcessing, EntityHandling, MemoryResolver, NodeKind, ReadState, Reader,
    ReaderSettings, Reason, Validation, ValidationKind, WhitespaceHandling, XmlSpace,
    XmlError, XML_NAMESPACE,
};

/// Kind, name and value of every node
fn nodes(reader: &mut Reader) -> Vec<(NodeKind, String, String)> {
    let mut nodes = Vec::new();
    while reader.read().unwrap() {
        nodes.push((
            reader.node_kind(),
            reader.name().to_string(),
            reader.value().to_string(),
        ));
    }
    nodes
}

fn node(kind: NodeKind, name: &str, value: &str) -> (NodeKind, String, String) {
    (kind, name.to_string(), value.to_string())
}

fn first_error(input: &str, settings: ReaderSettings) -> XmlError {
    let mut reader = Reader::from_str(input, settings);
    loop {
        match reader.read() {
            Ok(true) => {}
            Ok(false) => panic!("document was accepted"),
            Err(err) => return err,
        }
    }
}

const ENTITY_DOC: &str = r#"<!DOCTYPE r [<!ELEMENT r (#PCDATA)><!ENTITY e "abc">]><r>&e;def</r>"#;

#[test]
fn expanded_entity_joins_text() {
    let mut reader = Reader::from_str(ENTITY_DOC, ReaderSettings::default());
    assert_eq!(
        vec![
            node(NodeKind::DocumentType, "r", r#"<!ELEMENT r (#PCDATA)><!ENTITY e "abc">"#),
            node(NodeKind::Element, "r", ""),
            node(NodeKind::Text, "", "abcdef"),
            node(NodeKind::EndElement, "r", ""),
        ],
        nodes(&mut reader)
    );
}

#[test]
fn resolved_entity_reference() {
    let settings =
        ReaderSettings::default().with_entity_handling(EntityHandling::ExpandCharEntities);
    let mut reader = Reader::from_str(ENTITY_DOC, settings);
    assert!(reader.read().unwrap());
    assert!(reader.read().unwrap());
    assert!(reader.read().unwrap());
    assert_eq!(NodeKind::EntityReference, reader.node_kind());
    assert_eq!("e", reader.name());
    reader.resolve_entity().unwrap();

    assert_eq!(
        vec![
            node(NodeKind::Text, "", "abc"),
            node(NodeKind::EndEntity, "e", ""),
            node(NodeKind::Text, "", "def"),
            node(NodeKind::EndElement, "r", ""),
        ],
        nodes(&mut reader)
    );
}

#[test]
fn unresolved_entity_reference_is_skipped() {
    let settings =
        ReaderSettings::default().with_entity_handling(EntityHandling::ExpandCharEntities);
    let mut reader = Reader::from_str(ENTITY_DOC, settings);
    let kinds: Vec<NodeKind> = nodes(&mut reader).into_iter().map(|n| n.0).collect();
    assert_eq!(
        vec![
            NodeKind::DocumentType,
            NodeKind::Element,
            NodeKind::EntityReference,
            NodeKind::Text,
            NodeKind::EndElement,
        ],
        kinds
    );
}

#[test]
fn parameter_entity_in_content_model() {
    let mut reader = Reader::from_str(
        r#"<!DOCTYPE r [<!ENTITY % p "x"><!ELEMENT r (%p;)>]><r/>"#,
        ReaderSettings::default(),
    );
    assert!(reader.read().unwrap());
    let schema = reader.schema().unwrap();
    let content = schema.element("r").unwrap().content.as_ref().unwrap();
    assert_eq!("(x)", content.to_string());
    assert!(content.accepts(["x"]));
    assert!(!content.accepts(std::iter::empty()));
}

#[test]
fn content_models() {
    let mut reader = Reader::from_str(
        "<!DOCTYPE r [<!ELEMENT r (#PCDATA)><!ELEMENT s (a,b)><!ELEMENT t (a|b)*>]><r/>",
        ReaderSettings::default(),
    );
    assert!(reader.read().unwrap());
    let schema = reader.schema().unwrap();
    let model = |name: &str| schema.element(name).unwrap().content.clone().unwrap();

    assert!(model("r").accepts(std::iter::empty()));
    assert!(!model("r").accepts(["a"]));

    assert!(model("s").accepts(["a", "b"]));
    assert!(!model("s").accepts(["b", "a"]));
    assert!(!model("s").accepts(["a", "b", "b"]));

    let t = model("t");
    assert!(t.accepts(std::iter::empty()));
    assert!(t.accepts(["a"]));
    assert!(t.accepts(["b"]));
    assert!(t.accepts(["a", "b", "b", "a"]));
    assert!(!t.accepts(["c"]));
}

#[test]
fn recursion_is_detected() {
    for input in [
        r#"<!DOCTYPE r [<!ENTITY a "&a;">]><r>&a;</r>"#,
        r#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r>&a;</r>"#,
        r#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r x="&a;"/>"#,
    ] {
        assert_matches!(
            first_error(input, ReaderSettings::default()).reason(),
            Reason::RecursiveEntity(_)
        );
    }
}

#[test]
fn tag_mismatch_position() {
    let mut reader = Reader::from_str("<a>\n  <b>\n</a>", ReaderSettings::default());
    let err = loop {
        match reader.read() {
            Ok(true) => {}
            Ok(false) => panic!("document was accepted"),
            Err(err) => break err,
        }
    };
    assert_eq!(1, err.line());
    assert_eq!(2, err.column());
    assert_matches!(
        err.reason(),
        Reason::TagMismatch { found_open_at: Some(at), expected_at, .. }
            if at.line == 1 && at.column == 2 && expected_at.line == 2
    );
    assert_eq!(ReadState::Error, reader.read_state());
}

#[test]
fn char_refs_decode_alike() {
    let mut reader = Reader::from_str("<r>&#65;&#x41;&#x1F600;</r>", ReaderSettings::default());
    assert!(reader.read().unwrap());
    assert!(reader.read().unwrap());
    assert_eq!("AA\u{1F600}", reader.value());
}

#[test]
fn utf16_with_byte_order_mark() {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "<?xml version='1.0' encoding='UTF-16'?><r a='\u{e9}'>\u{1F600}</r>".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let mut reader = Reader::from_bytes(bytes, ReaderSettings::default().with_buffer_size(3));
    assert!(reader.read().unwrap());
    assert_eq!(NodeKind::XmlDeclaration, reader.node_kind());
    assert_eq!("UTF-16LE", reader.encoding());
    assert!(reader.read().unwrap());
    assert_eq!(Some("\u{e9}"), reader.get_attribute("a"));
    assert!(reader.read().unwrap());
    assert_eq!("\u{1F600}", reader.value());
}

#[test]
fn declared_single_byte_encoding() {
    let mut bytes = b"<?xml version='1.0' encoding='ISO-8859-1'?><r>".to_vec();
    bytes.push(0xE4);
    bytes.extend_from_slice(b"</r>");
    let mut reader = Reader::from_bytes(bytes, ReaderSettings::default());
    assert!(reader.read().unwrap());
    assert!(reader.read().unwrap());
    assert!(reader.read().unwrap());
    assert_eq!("\u{e4}", reader.value());
    assert_eq!("windows-1252", reader.encoding());
}

#[test]
fn conflicting_encoding_declaration() {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in "<?xml version='1.0' encoding='UTF-8'?><r/>".encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    let mut reader = Reader::from_bytes(bytes, ReaderSettings::default());
    assert_matches!(
        reader.read().unwrap_err().reason(),
        Reason::EncodingSwitch { .. }
    );
}

#[test]
fn external_subset_and_entity() {
    let resolver = MemoryResolver::new()
        .with_entity(
            "r.dtd",
            r#"<!ELEMENT r (#PCDATA)><!ATTLIST r a CDATA "from-dtd"><!ENTITY ext SYSTEM "ext.xml">"#,
        )
        .with_entity("ext.xml", "<?xml encoding='UTF-8'?>external");
    let settings = ReaderSettings::default()
        .with_resolver(Rc::new(resolver))
        .with_validation(Validation::Dtd);
    let mut reader = Reader::from_str(r#"<!DOCTYPE r SYSTEM "r.dtd"><r>&ext;</r>"#, settings);
    assert!(reader.read().unwrap());
    assert_eq!(Some("r.dtd"), reader.get_attribute("SYSTEM"));
    assert!(reader.read().unwrap());
    assert_eq!(Some("from-dtd"), reader.get_attribute("a"));
    assert!(reader.move_to_first_attribute());
    assert!(reader.is_default());
    assert!(reader.read().unwrap());
    assert_eq!("external", reader.value());
    assert!(reader.read().unwrap());
    assert_eq!(NodeKind::EndElement, reader.node_kind());
    assert!(!reader.read().unwrap());
    assert!(reader.validation_events().is_empty());
}

#[test]
fn external_entity_without_resolver() {
    let input = r#"<!DOCTYPE r [<!ENTITY ext SYSTEM "ext.xml">]><r>&ext;</r>"#;
    let kinds: Vec<NodeKind> = nodes(&mut Reader::from_str(input, ReaderSettings::default()))
        .into_iter()
        .map(|n| n.0)
        .collect();
    assert_eq!(
        vec![
            NodeKind::DocumentType,
            NodeKind::Element,
            NodeKind::EntityReference,
            NodeKind::EndElement,
        ],
        kinds
    );
}

#[test]
fn undeclared_entities() {
    assert_matches!(
        first_error("<r>&nope;</r>", ReaderSettings::default()).reason(),
        Reason::UndeclaredEntity(name) if name == "nope"
    );

    let settings = ReaderSettings::default().with_allow_undeclared_entities(true);
    let mut reader = Reader::from_str("<r>a&nope;b</r>", settings);
    let texts: String = nodes(&mut reader)
        .into_iter()
        .filter(|n| n.0 == NodeKind::Text)
        .map(|n| n.2)
        .collect();
    assert_eq!("ab", texts);
}

#[test]
fn entity_expansion_limit() {
    let input = r#"<!DOCTYPE r [
        <!ENTITY a "aaaaaaaaaa">
        <!ENTITY b "&a;&a;&a;&a;&a;&a;&a;&a;&a;&a;">
        <!ENTITY c "&b;&b;&b;&b;&b;&b;&b;&b;&b;&b;">
    ]><r>&c;&c;</r>"#;
    let settings = ReaderSettings::default().with_max_characters_from_entities(Some(1000));
    assert_matches!(first_error(input, settings).reason(), Reason::LimitExceeded { .. });

    let mut reader = Reader::from_str(input, ReaderSettings::default());
    let text = nodes(&mut reader)
        .into_iter()
        .find(|n| n.0 == NodeKind::Text)
        .unwrap()
        .2;
    assert_eq!(2000, text.len());
}

#[test]
fn document_size_limit() {
    let settings = ReaderSettings::default().with_max_characters_in_document(Some(10));
    assert_matches!(
        first_error("<r>0123456789</r>", settings).reason(),
        Reason::LimitExceeded { .. }
    );
}

#[test]
fn dtd_prohibited() {
    let settings = ReaderSettings::default().with_dtd_processing(DtdProcessing::Prohibit);
    assert_matches!(
        first_error("<!DOCTYPE r><r/>", settings).reason(),
        Reason::DtdProhibited
    );
}

#[test]
fn fragment_conformance() {
    let settings = ReaderSettings::default().with_conformance(Conformance::Fragment);
    let mut reader = Reader::from_str("text<a/>more<b>x</b>", settings);
    assert_eq!(6, nodes(&mut reader).len());
    assert_eq!(ReadState::EndOfFile, reader.read_state());
}

#[test]
fn namespaces() {
    let mut reader = Reader::from_str(
        r#"<r xmlns="urn:default" xmlns:p="urn:p"><p:a p:x="1" y="2" xml:lang="de"/></r>"#,
        ReaderSettings::default(),
    );
    assert!(reader.read().unwrap());
    assert_eq!("urn:default", reader.namespace_uri());
    assert!(reader.read().unwrap());
    assert_eq!("a", reader.local_name());
    assert_eq!("p", reader.prefix());
    assert_eq!("urn:p", reader.namespace_uri());
    assert_eq!(Some("1"), reader.get_attribute_ns("x", "urn:p"));
    assert!(reader.move_to_attribute("y"));
    assert_eq!("", reader.namespace_uri());
    assert!(reader.move_to_attribute("xml:lang"));
    assert_eq!(XML_NAMESPACE, reader.namespace_uri());
    assert_eq!("de", reader.xml_lang());
}

#[test]
fn undeclared_prefix_has_no_namespace() {
    let mut reader = Reader::from_str("<p:r/>", ReaderSettings::default());
    assert!(reader.read().unwrap());
    assert_eq!("r", reader.local_name());
    assert_eq!("", reader.namespace_uri());

    let settings = ReaderSettings::default().with_namespaces(false);
    let mut reader = Reader::from_str("<p:r/>", settings);
    assert!(reader.read().unwrap());
    assert_eq!("p:r", reader.local_name());
    assert_eq!("", reader.prefix());
}

#[test]
fn xml_space_scope() {
    let mut reader = Reader::from_str(
        r#"<r xml:space="preserve"><a> </a><b xml:space="default"> </b></r>"#,
        ReaderSettings::default(),
    );
    let mut seen = Vec::new();
    while reader.read().unwrap() {
        if reader.node_kind() == NodeKind::Element {
            seen.push((reader.name().to_string(), reader.xml_space()));
        }
        if reader.node_kind().is_text_like() {
            seen.push((format!("{:?}", reader.node_kind()), reader.xml_space()));
        }
    }
    assert_eq!(
        vec![
            ("r".to_string(), XmlSpace::Preserve),
            ("a".to_string(), XmlSpace::Preserve),
            ("SignificantWhitespace".to_string(), XmlSpace::Preserve),
            ("b".to_string(), XmlSpace::Default),
            ("Whitespace".to_string(), XmlSpace::Default),
        ],
        seen
    );
}

#[test]
fn significant_whitespace_only() {
    let settings = ReaderSettings::default().with_whitespace(WhitespaceHandling::Significant);
    let mut reader = Reader::from_str(
        r#"<r> <a xml:space="preserve"> </a> </r>"#,
        settings,
    );
    let kinds: Vec<NodeKind> = nodes(&mut reader).into_iter().map(|n| n.0).collect();
    assert_eq!(
        vec![
            NodeKind::Element,
            NodeKind::Element,
            NodeKind::SignificantWhitespace,
            NodeKind::EndElement,
            NodeKind::EndElement,
        ],
        kinds
    );
}

#[test]
fn attribute_navigation() {
    let mut reader = Reader::from_str(r#"<r a="1" b='2' c="3"/>"#, ReaderSettings::default());
    assert!(reader.read().unwrap());
    assert_eq!(3, reader.attribute_count());
    let mut seen = Vec::new();
    while reader.move_to_next_attribute() {
        seen.push((reader.name().to_string(), reader.value().to_string(), reader.quote_char()));
    }
    assert_eq!(
        vec![
            ("a".to_string(), "1".to_string(), '"'),
            ("b".to_string(), "2".to_string(), '\''),
            ("c".to_string(), "3".to_string(), '"'),
        ],
        seen
    );
    assert!(reader.move_to_element());
    assert_eq!("r", reader.name());
    assert!(reader.move_to_attribute_index(1));
    assert_eq!("b", reader.name());
    assert_eq!(1, reader.depth());
    assert!(!reader.move_to_attribute_index(3));
    assert!(!reader.move_to_attribute("d"));
}

#[test]
fn line_positions() {
    let mut reader = Reader::from_str("<r>\n  <a x='1'/>\n</r>", ReaderSettings::default());
    assert!(reader.read().unwrap());
    assert_eq!((1, 2), (reader.line_number(), reader.line_position()));
    assert!(reader.read().unwrap());
    assert!(reader.read().unwrap());
    assert_eq!((2, 4), (reader.line_number(), reader.line_position()));
    assert!(reader.move_to_first_attribute());
    assert_eq!((2, 6), (reader.line_number(), reader.line_position()));
    assert_eq!(9, reader.value_position().column);
}

#[test]
fn validation_events_are_collected() {
    let settings = ReaderSettings::default().with_validation(Validation::Dtd);
    let mut reader = Reader::from_str(
        "<!DOCTYPE r [<!ELEMENT r (a)><!ELEMENT a EMPTY>]><r><b/></r>",
        settings,
    );
    while reader.read().unwrap() {}
    let kinds: Vec<ValidationKind> = reader
        .take_validation_events()
        .into_iter()
        .map(|event| event.kind)
        .collect();
    assert!(kinds.contains(&ValidationKind::UndeclaredElement("b".to_string())));
    assert!(reader.validation_events().is_empty());
}

#[test]
fn strict_validation_fails() {
    let settings = ReaderSettings::default()
        .with_validation(Validation::Dtd)
        .with_strict_validation(true);
    assert_matches!(
        first_error("<!DOCTYPE r [<!ELEMENT r EMPTY>]><r>x</r>", settings).reason(),
        Reason::Validation(_)
    );
}

#[test]
fn close_ends_reading() {
    let mut reader = Reader::from_str("<r><a/></r>", ReaderSettings::default());
    assert!(reader.read().unwrap());
    reader.close();
    assert_eq!(ReadState::Closed, reader.read_state());
    assert!(!reader.read().unwrap());
    assert_eq!(NodeKind::None, reader.node_kind());
}
