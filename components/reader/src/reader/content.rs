//! Node state machine: one node per call to `advance`

use std::rc::Rc;

use log::debug;

use crate::dtd::parser::DtdParser;
use crate::error::{Position, Reason, Result};
use crate::node::{NodeKind, Value};
use crate::scanner::text::ScannedText;
use crate::settings::{DtdProcessing, WhitespaceHandling};

use super::{ParsingState, Reader, XmlSpace};

impl Reader {
    pub(crate) fn content_state(&self) -> ParsingState {
        if self.depth > 0 {
            ParsingState::ElementContent
        } else {
            ParsingState::DocumentContent
        }
    }

    /// Move to the next node. Returns `false` at the end of the document.
    pub(crate) fn advance(&mut self) -> Result<bool> {
        self.leave_partial_value();
        loop {
            let produced = match self.state {
                ParsingState::XmlDecl => self.read_xml_decl()?,
                ParsingState::DocumentContent | ParsingState::ElementContent => {
                    self.read_content()?
                }
                ParsingState::PopElement => {
                    self.pop_element()?;
                    false
                }
                ParsingState::PopEntity => {
                    self.leave_entity()?;
                    self.state = self.content_state();
                    false
                }
                ParsingState::EntityReference => {
                    // not resolved: the reference is skipped
                    self.state = self.content_state();
                    false
                }
                ParsingState::PartialText => {
                    while self.next_text_piece()? {}
                    false
                }
                ParsingState::AttributeValue
                | ParsingState::PartialValue
                | ParsingState::BinaryContent => {
                    self.state = self.resume;
                    false
                }
                ParsingState::Eof | ParsingState::Error | ParsingState::Closed => return Ok(false),
            };
            if produced {
                return Ok(true);
            }
        }
    }

    /// Drop a partially consumed value before moving on.
    fn leave_partial_value(&mut self) {
        self.attr_value = None;
        self.binary = None;
        self.chunk_offset = 0;
        if matches!(
            self.state,
            ParsingState::AttributeValue | ParsingState::PartialValue | ParsingState::BinaryContent
        ) {
            self.state = self.resume;
        }
    }

    /// Make `slot` the current node without attributes.
    fn emit(&mut self, slot: usize) -> bool {
        self.cur = slot;
        self.attr_base = slot;
        self.attr_count = 0;
        self.commit();
        true
    }

    fn read_xml_decl(&mut self) -> Result<bool> {
        if !self.at_xml_decl()? {
            self.buf.end_probe();
            self.state = ParsingState::DocumentContent;
            return Ok(false);
        }
        self.buf.pos += 2;
        let position = self.buf.position();
        self.buf.pos += 3;
        let info = self.parse_decl_body(false)?;
        if let Some(label) = &info.encoding {
            if let Err(reason) = self.buf.declare_encoding(label) {
                return Err(self.error(reason));
            }
        }
        self.buf.end_probe();
        if let Some(standalone) = info.standalone {
            self.doc.standalone = standalone;
        }
        if self.doc.fragment.is_none() {
            self.doc.fragment = Some(false);
        }

        let node = self.nodes.slot(0);
        node.reset(NodeKind::XmlDeclaration, 0, position);
        node.set_name("xml");
        node.value = Value::Owned(info.raw);
        for (i, pseudo) in info.pseudo.iter().enumerate() {
            let attr = self.nodes.slot(1 + i);
            attr.reset(NodeKind::Attribute, 1, pseudo.position);
            attr.set_name(pseudo.name);
            attr.value = Value::Owned(pseudo.value.clone());
            attr.quote = pseudo.quote;
            attr.value_position = pseudo.value_position;
        }
        self.state = ParsingState::DocumentContent;
        self.emit(0);
        self.attr_count = info.pseudo.len();
        Ok(true)
    }

    fn read_content(&mut self) -> Result<bool> {
        if let Some(reference) = self.pending_reference.take() {
            let slot = self.depth;
            let node = self.nodes.slot(slot);
            node.reset(NodeKind::EntityReference, slot, reference.position);
            node.set_name(&reference.name);
            self.state = ParsingState::EntityReference;
            return Ok(self.emit(slot));
        }

        if self.text.is_some() {
            // resume text that was cut by pending input
            return match self.scan_text()? {
                Some(text) => self.read_text(text),
                None => Ok(false),
            };
        }
        match self.peek()? {
            None => self.end_of_input(),
            Some(b'<') => self.read_markup(),
            Some(_) => match self.scan_text()? {
                Some(text) => self.read_text(text),
                None => Ok(false),
            },
        }
    }

    /// The current entity has no more input.
    fn end_of_input(&mut self) -> Result<bool> {
        if self.entities.depth() == 0 {
            return self.end_of_document();
        }
        if !self.entities.current().reported {
            self.leave_entity()?;
            return Ok(false);
        }
        let name = self
            .entities
            .current()
            .entity
            .as_ref()
            .map(|decl| decl.name.to_string())
            .unwrap_or_default();
        let slot = self.depth;
        let position = self.buf.position();
        let node = self.nodes.slot(slot);
        node.reset(NodeKind::EndEntity, slot, position);
        node.set_name(&name);
        self.state = ParsingState::PopEntity;
        Ok(self.emit(slot))
    }

    fn end_of_document(&mut self) -> Result<bool> {
        if self.depth > 0 {
            let (name, opened_at) = match self.nodes.get(self.depth - 1) {
                Some(node) => (node.name.clone(), node.position),
                None => (String::new(), Position::default()),
            };
            return Err(self.error(Reason::UnclosedElement { name, opened_at }));
        }
        if self.doc.fragment != Some(true) && !self.doc.seen_root {
            return Err(self.error(Reason::NoRootElement));
        }
        self.finish_validation()?;
        debug!("end of document");
        self.state = ParsingState::Eof;
        self.attr_count = 0;
        Ok(false)
    }

    /// Character data at depth 0 decides automatic conformance, and is an
    /// error in a document.
    fn top_level_content(&mut self, position: Position) -> Result<()> {
        match self.doc.fragment {
            None => {
                self.doc.fragment = Some(true);
                Ok(())
            }
            Some(true) => Ok(()),
            Some(false) => Err(self.error_at(Reason::TextOutsideRoot, position)),
        }
    }

    fn read_text(&mut self, text: ScannedText) -> Result<bool> {
        if self.depth == 0 && !text.whitespace {
            self.top_level_content(text.position)?;
        }
        self.validate_text(text.whitespace, text.position)?;
        let kind = if text.whitespace {
            self.whitespace_kind()
        } else {
            NodeKind::Text
        };
        let skip = match (kind, self.settings.whitespace) {
            (NodeKind::Whitespace, WhitespaceHandling::Significant) => true,
            (NodeKind::Whitespace | NodeKind::SignificantWhitespace, WhitespaceHandling::None) => {
                true
            }
            _ => false,
        };
        if skip {
            self.commit();
            return Ok(false);
        }
        let slot = self.depth;
        let node = self.nodes.slot(slot);
        node.reset(kind, slot, text.position);
        node.value = text.value;
        self.emit(slot);
        if !text.complete {
            self.state = ParsingState::PartialText;
        }
        Ok(true)
    }

    fn whitespace_kind(&self) -> NodeKind {
        if self.depth == 0 {
            return NodeKind::Whitespace;
        }
        if self.xml_space() == XmlSpace::Preserve {
            return NodeKind::SignificantWhitespace;
        }
        let declared_mixed = self
            .nodes
            .get(self.depth - 1)
            .and_then(|node| self.schema.as_ref()?.element(&node.name))
            .and_then(|decl| decl.content.as_ref())
            .map_or(false, |content| content.is_mixed());
        if declared_mixed && !self.in_element_only_content() {
            NodeKind::SignificantWhitespace
        } else {
            NodeKind::Whitespace
        }
    }

    fn read_markup(&mut self) -> Result<bool> {
        if self.eat("</")? {
            return self.read_end_tag();
        }
        if self.eat("<?")? {
            let position = self.buf.position();
            let (target, data) = self.scan_pi()?;
            if self.settings.ignore_processing_instructions {
                self.commit();
                return Ok(false);
            }
            let name = self.slice(target.0, target.1).to_string();
            let base = self.buf.base;
            let slot = self.depth;
            let node = self.nodes.slot(slot);
            node.reset(NodeKind::ProcessingInstruction, slot, position);
            node.set_name(&name);
            node.value = Value::Slice {
                start: data.0 - base,
                end: data.1 - base,
            };
            return Ok(self.emit(slot));
        }
        if self.eat("<!--")? {
            let position = self.buf.position();
            let (start, end) = self.scan_comment()?;
            if self.settings.ignore_comments {
                self.commit();
                return Ok(false);
            }
            return Ok(self.emit_slice(NodeKind::Comment, position, start, end));
        }
        if self.eat("<![CDATA[")? {
            let position = self.buf.position();
            if self.depth == 0 {
                self.top_level_content(position)?;
            }
            let (start, end) = self.scan_cdata()?;
            self.validate_text(false, position)?;
            return Ok(self.emit_slice(NodeKind::CData, position, start, end));
        }
        if self.eat("<!DOCTYPE")? {
            return self.read_doctype();
        }
        if self.at("<!")? {
            self.buf.pos += 2;
            return Err(self.unexpected("declaration"));
        }
        self.buf.pos += 1;
        self.read_start_tag()
    }

    fn emit_slice(&mut self, kind: NodeKind, position: Position, start: usize, end: usize) -> bool {
        let base = self.buf.base;
        let slot = self.depth;
        let node = self.nodes.slot(slot);
        node.reset(kind, slot, position);
        node.value = Value::Slice {
            start: start - base,
            end: end - base,
        };
        self.emit(slot)
    }

    fn read_start_tag(&mut self) -> Result<bool> {
        let position = self.buf.position();
        if self.depth == 0 {
            if self.doc.fragment.is_none() {
                self.doc.fragment = Some(true);
            }
            if self.doc.root_closed && self.doc.fragment == Some(false) {
                return Err(self.error_at(Reason::MultipleRoots, position));
            }
            self.doc.seen_root = true;
        }
        let slot = self.depth;
        let (count, empty) = self.scan_start_tag(slot, position)?;
        let count = self.finish_start_tag(slot, count)?;
        if empty {
            self.state = ParsingState::PopElement;
        } else {
            self.depth += 1;
            self.state = ParsingState::ElementContent;
        }
        self.emit(slot);
        self.attr_count = count;
        Ok(true)
    }

    fn read_end_tag(&mut self) -> Result<bool> {
        let position = self.buf.position();
        let (start, end) = self.scan_end_tag()?;
        let name = self.slice(start, end).to_string();
        if self.depth == 0 {
            return Err(self.error_at(Reason::UnexpectedEndTag(name), position));
        }
        let slot = self.depth - 1;
        let (expected, expected_at, entity_id) = match self.nodes.get(slot) {
            Some(node) => (node.name.clone(), node.position, node.entity_id),
            None => return Err(self.error_at(Reason::UnexpectedEndTag(name), position)),
        };
        if expected != name {
            let found_open_at = (0..slot)
                .rev()
                .filter_map(|i| self.nodes.get(i))
                .find(|node| node.name == name)
                .map(|node| node.position);
            // the matching start tag is the point of failure when there is one
            let at = found_open_at.unwrap_or(expected_at);
            return Err(self.error_at(
                Reason::TagMismatch {
                    expected,
                    expected_at,
                    found: name,
                    found_open_at,
                },
                at,
            ));
        }
        if entity_id != self.entities.current_id() {
            return Err(self.error_at(Reason::EntityNesting("element"), position));
        }

        let node = self.nodes.slot(slot);
        node.kind = NodeKind::EndElement;
        node.position = position;
        node.value = Value::default();
        node.empty = false;
        self.depth = slot;
        self.state = ParsingState::PopElement;
        Ok(self.emit(slot))
    }

    /// Leave the scope of the element that was just reported as ended.
    fn pop_element(&mut self) -> Result<()> {
        let (context_pushed, scope_pushed) = match self.nodes.get(self.depth) {
            Some(node) => (node.context_pushed, node.scope_pushed),
            None => (false, false),
        };
        if context_pushed {
            self.contexts.pop();
        }
        if scope_pushed {
            self.namespaces.pop_scope();
        }
        self.validate_end_element()?;
        if self.depth == 0 {
            self.doc.root_closed = true;
        }
        self.state = self.content_state();
        self.commit();
        Ok(())
    }

    fn read_doctype(&mut self) -> Result<bool> {
        let position = self.buf.position();
        if self.settings.dtd_processing == DtdProcessing::Prohibit {
            return Err(self.error_at(Reason::DtdProhibited, position));
        }
        if self.doc.fragment == Some(true) || self.doc.seen_doctype || self.doc.seen_root {
            return Err(self.error_at(Reason::MisplacedDoctype, position));
        }
        self.prescan_doctype()?;
        self.doc.fragment = Some(false);
        self.doc.seen_doctype = true;

        self.doctype_literals.clear();
        self.in_dtd = true;
        let load_external = self.settings.dtd_processing == DtdProcessing::Parse;
        let res = DtdParser::new().parse_doctype(self, load_external);
        self.in_dtd = false;
        let schema = match res {
            Ok(schema) => schema,
            Err(err) if err.is_pending() => {
                return Err(self.error(Reason::UnexpectedEof("document type declaration")))
            }
            Err(err) => return Err(err),
        };

        if self.settings.dtd_processing == DtdProcessing::Ignore {
            debug!("document type {} ignored", schema.name());
            self.commit();
            return Ok(false);
        }
        debug!(
            "document type {}: {} elements, {} entities",
            schema.name(),
            schema.elements.len(),
            schema.entities.len()
        );

        let node = self.nodes.slot(0);
        node.reset(NodeKind::DocumentType, 0, position);
        node.set_name(schema.name());
        node.value = Value::Owned(schema.internal_subset().to_string());
        let literals = std::mem::take(&mut self.doctype_literals);
        for (i, (keyword, literal, literal_position)) in literals.iter().enumerate() {
            let attr = self.nodes.slot(1 + i);
            attr.reset(NodeKind::Attribute, 1, *literal_position);
            attr.set_name(keyword);
            attr.value = Value::Owned(literal.clone());
            attr.value_position = *literal_position;
        }
        self.schema = Some(Rc::new(schema));
        self.start_validation();
        self.emit(0);
        self.attr_count = literals.len();
        Ok(true)
    }

    /// Use declarations given as text as if they were the internal subset
    /// of a document type named `name`. Only allowed before the first read.
    pub fn set_document_type(&mut self, name: &str, internal_subset: &str) -> Result<()> {
        if self.state != ParsingState::XmlDecl || self.schema.is_some() {
            return Err(self.error(Reason::InvalidOperation(
                "document type must be set before reading",
            )));
        }
        self.in_dtd = true;
        let res = DtdParser::new().parse_text(self, name, internal_subset);
        self.in_dtd = false;
        let schema = self.outcome(res)?;
        self.schema = Some(Rc::new(schema));
        self.start_validation();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::error::Reason;
    use crate::node::NodeKind;
    use crate::reader::{ReadState, Reader};
    use crate::settings::{Conformance, DtdProcessing, ReaderSettings, WhitespaceHandling};

    fn nodes(input: &str, settings: ReaderSettings) -> Vec<(NodeKind, String, String)> {
        let mut reader = Reader::from_str(input, settings);
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

    #[test]
    fn element_sequence() {
        assert_eq!(
            vec![
                node(NodeKind::XmlDeclaration, "xml", "version='1.0'"),
                node(NodeKind::Element, "a", ""),
                node(NodeKind::Element, "b", ""),
                node(NodeKind::Text, "", "x"),
                node(NodeKind::EndElement, "b", ""),
                node(NodeKind::Comment, "", " c "),
                node(NodeKind::ProcessingInstruction, "pi", "data"),
                node(NodeKind::CData, "", "<y>"),
                node(NodeKind::Element, "e", ""),
                node(NodeKind::EndElement, "a", ""),
            ],
            nodes(
                "<?xml version='1.0'?><a><b>x</b><!-- c --><?pi data?><![CDATA[<y>]]><e/></a>",
                ReaderSettings::default()
            )
        );
    }

    #[test]
    fn depths() {
        let mut reader = Reader::from_str("<a><b>t</b></a>", ReaderSettings::default());
        let mut depths = Vec::new();
        while reader.read().unwrap() {
            depths.push(reader.depth());
        }
        assert_eq!(vec![0, 1, 2, 1, 0], depths);
    }

    #[test]
    fn empty_element() {
        let mut reader = Reader::from_str("<a x='1'/>", ReaderSettings::default());
        assert!(reader.read().unwrap());
        assert!(reader.is_empty_element());
        assert_eq!(1, reader.attribute_count());
        assert!(!reader.read().unwrap());
        assert_eq!(ReadState::EndOfFile, reader.read_state());
    }

    #[test]
    fn tag_mismatch_points_to_start_tags() {
        let mut reader = Reader::from_str("<a>\n <b></a>", ReaderSettings::default());
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        let err = reader.read().unwrap_err();
        assert_matches!(
            err.reason(),
            Reason::TagMismatch { expected, found, found_open_at: Some(at), .. }
                if expected == "b" && found == "a" && at.line == 1
        );
        assert_eq!(1, err.line());
        assert_eq!(2, err.column());
        assert_eq!(ReadState::Error, reader.read_state());
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn unknown_end_tag_points_to_open_element() {
        let mut reader = Reader::from_str("<a>\n <b></c>", ReaderSettings::default());
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        let err = reader.read().unwrap_err();
        assert_matches!(
            err.reason(),
            Reason::TagMismatch { expected, found_open_at: None, .. } if expected == "b"
        );
        assert_eq!(2, err.line());
        assert_eq!(3, err.column());
    }

    #[test]
    fn document_structure_errors() {
        for (input, check) in [
            ("<a/><b/>", "multiple"),
            ("text<a/>", "text"),
            ("<a/>text", "text"),
            ("", "root"),
            ("<a>", "unclosed"),
        ] {
            let mut reader = Reader::from_str(input, ReaderSettings::default());
            let err = loop {
                match reader.read() {
                    Ok(true) => continue,
                    Ok(false) => panic!("{:?} was accepted", input),
                    Err(err) => break err,
                }
            };
            match check {
                "multiple" => assert_matches!(err.reason(), Reason::MultipleRoots),
                "text" => assert_matches!(err.reason(), Reason::TextOutsideRoot),
                "root" => assert_matches!(err.reason(), Reason::NoRootElement),
                _ => assert_matches!(err.reason(), Reason::UnclosedElement { .. }),
            }
        }
    }

    #[test]
    fn fragments() {
        let settings = ReaderSettings::default().with_conformance(Conformance::Fragment);
        assert_eq!(
            vec![
                node(NodeKind::Text, "", "t"),
                node(NodeKind::Element, "a", ""),
                node(NodeKind::Element, "b", ""),
            ],
            nodes("t<a/><b/>", settings.clone())
        );
        let mut reader = Reader::from_str("<!DOCTYPE a><a/>", settings);
        assert_matches!(reader.read().unwrap_err().reason(), Reason::MisplacedDoctype);
    }

    #[test]
    fn auto_conformance() {
        let settings = ReaderSettings::default().with_conformance(Conformance::Auto);
        assert_eq!(2, nodes("<a/><b/>", settings.clone()).len());
        let mut reader = Reader::from_str("<?xml version='1.0'?><a/><b/>", settings);
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert_matches!(reader.read().unwrap_err().reason(), Reason::MultipleRoots);
    }

    #[test]
    fn whitespace_handling() {
        let input = "<a> <b/> </a>";
        assert_eq!(5, nodes(input, ReaderSettings::default()).len());
        assert_eq!(
            3,
            nodes(
                input,
                ReaderSettings::default().with_whitespace(WhitespaceHandling::None)
            )
            .len()
        );
        let mixed = "<!DOCTYPE a [<!ELEMENT a (#PCDATA|b)*>]><a> <b/></a>";
        assert_eq!(
            node(NodeKind::SignificantWhitespace, "", " "),
            nodes(mixed, ReaderSettings::default())[2]
        );
    }

    #[test]
    fn doctype_node() {
        let mut reader = Reader::from_str(
            "<!DOCTYPE r PUBLIC '-//A//B' 'r.dtd' [<!ELEMENT r ANY>]><r/>",
            ReaderSettings::default(),
        );
        assert!(reader.read().unwrap());
        assert_eq!(NodeKind::DocumentType, reader.node_kind());
        assert_eq!("r", reader.name());
        assert_eq!("<!ELEMENT r ANY>", reader.value());
        assert_eq!(Some("-//A//B"), reader.get_attribute("PUBLIC"));
        assert_eq!(Some("r.dtd"), reader.get_attribute("SYSTEM"));
        assert!(reader.read().unwrap());
        assert_eq!(NodeKind::Element, reader.node_kind());
    }

    #[test]
    fn doctype_processing() {
        let input = "<!DOCTYPE r [<!ENTITY e 'x'>]><r/>";
        let mut reader = Reader::from_str(
            input,
            ReaderSettings::default().with_dtd_processing(DtdProcessing::Prohibit),
        );
        assert_matches!(reader.read().unwrap_err().reason(), Reason::DtdProhibited);

        let kinds: Vec<NodeKind> = nodes(
            input,
            ReaderSettings::default().with_dtd_processing(DtdProcessing::Ignore),
        )
        .into_iter()
        .map(|n| n.0)
        .collect();
        assert_eq!(vec![NodeKind::Element], kinds);
    }

    #[test]
    fn ignored_comments_and_pis() {
        let settings = ReaderSettings::default()
            .with_ignore_comments(true)
            .with_ignore_processing_instructions(true);
        assert_eq!(
            vec![node(NodeKind::Element, "a", ""), node(NodeKind::EndElement, "a", "")],
            nodes("<!--x--><a><?p?><!--y--></a>", settings)
        );
    }

    #[test]
    fn document_type_from_text() {
        let mut reader = Reader::from_str(
            "<r>&e;</r>",
            ReaderSettings::default().with_conformance(Conformance::Fragment),
        );
        reader.set_document_type("r", "<!ENTITY e 'value'>").unwrap();
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert_eq!("value", reader.value());
    }
}
