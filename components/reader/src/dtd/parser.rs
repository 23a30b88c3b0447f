//! Declarations of the internal and external subsets

use std::cell::Cell;
use std::rc::Rc;

use log::{debug, warn};
use xtr_chars::{is_name, XmlChar};

use super::content_model::{ContentModel, ContentModelBuilder, Occurrence};
use super::host::DtdHost;
use super::scanner::{ScanState, Token};
use super::{predefined_entity, AttDef, AttDefault, AttType, EntityDecl, NotationDecl, SchemaInfo};
use crate::error::{Position, Reason, Result, ValidationKind};
use crate::resolve::parse_char_ref_body;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Subset {
    /// Between `[` and `]` of the document type declaration
    Internal,
    External,
    /// Internal subset handed over as text
    Text,
}

/// Expected part of a content model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ModelExpect {
    Item,
    ConnectorOrClose,
}

/// Expected part of an attribute list declaration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttlistState {
    AttributeName,
    Type,
    Default,
}

pub(crate) struct DtdParser {
    pub(super) schema: SchemaInfo,
    pub(super) state: ScanState,
    /// Entity depth of the subset being read; parameter entities above it
    /// are left when they end
    pub(super) base_depth: usize,
    /// Open INCLUDE sections with the entity each was opened in
    includes: Vec<u32>,
}

/// Report a validity violation when the host collects them.
fn report<H: DtdHost>(host: &mut H, kind: ValidationKind, position: Position) -> Result<()> {
    if host.supports_validation() {
        host.validation_event(kind, position)
    } else {
        Ok(())
    }
}

impl DtdParser {
    pub fn new() -> Self {
        Self {
            schema: SchemaInfo::default(),
            state: ScanState::Subset,
            base_depth: 0,
            includes: Vec::new(),
        }
    }

    /// Parse a document type declaration after `<!DOCTYPE`, including the
    /// external subset when `load_external` is set.
    pub fn parse_doctype<H: DtdHost>(mut self, host: &mut H, load_external: bool) -> Result<SchemaInfo> {
        self.schema.standalone = host.standalone();
        self.base_depth = host.entity_depth();
        self.require_ws(host)?;
        self.schema.name = self.raw_name(host)?;

        let had_ws = self.skip_ws(host)?;
        if matches!(self.peek_char(host)?, Some('S' | 'P')) {
            if !had_ws {
                return Err(host.fatal(Reason::ExpectedWhitespace));
            }
            self.external_id(host, true)?;
            self.skip_ws(host)?;
        }

        if self.eat(host, "[")? {
            let start = host.cursor();
            self.parse_subset(host, Subset::Internal)?;
            self.schema.internal_subset = host.text_since(start).to_string();
            host.advance(1);
            self.skip_ws(host)?;
        }
        if !self.eat(host, ">")? {
            return Err(self.unexpected(host, ">"));
        }

        if let Some(system_id) = self.schema.system_id.clone() {
            self.schema.has_external_declarations = true;
            if load_external {
                let public_id = self.schema.public_id.clone();
                if host.push_external_subset(public_id.as_deref(), &system_id)? {
                    self.base_depth = host.entity_depth();
                    self.parse_subset(host, Subset::External)?;
                    host.pop_entity()?;
                    self.base_depth = host.entity_depth();
                } else {
                    warn!("external subset {} not read", system_id);
                }
            }
        }
        self.finish(host)?;
        Ok(self.schema)
    }

    /// Parse declarations given as text, as if they were the internal subset
    /// of a document type named `name`.
    pub fn parse_text<H: DtdHost>(mut self, host: &mut H, name: &str, subset: &str) -> Result<SchemaInfo> {
        self.schema.name = name.to_string();
        self.schema.standalone = host.standalone();
        self.schema.internal_subset = subset.to_string();
        host.push_internal_subset(subset);
        self.base_depth = host.entity_depth();
        self.parse_subset(host, Subset::Text)?;
        host.pop_entity()?;
        self.finish(host)?;
        Ok(self.schema)
    }

    /// `SYSTEM literal` or `PUBLIC pubid literal`. The system literal of a
    /// notation may be missing.
    fn external_id<H: DtdHost>(&mut self, host: &mut H, doctype: bool) -> Result<(Option<String>, Option<String>)> {
        let keyword = self.raw_name(host)?;
        match keyword.as_str() {
            "SYSTEM" => {
                self.require_ws(host)?;
                let (system_id, position) = self.system_literal(host)?;
                if doctype {
                    host.on_literal("SYSTEM", &system_id, position);
                    self.schema.system_id = Some(system_id.clone());
                }
                Ok((None, Some(system_id)))
            }
            "PUBLIC" => {
                self.require_ws(host)?;
                let (public_id, position) = self.pubid_literal(host)?;
                if doctype {
                    host.on_literal("PUBLIC", &public_id, position);
                    self.schema.public_id = Some(public_id.clone());
                }
                let had_ws = self.skip_ws(host)?;
                match self.peek_char(host)? {
                    Some('"' | '\'') if had_ws => {
                        let (system_id, position) = self.system_literal(host)?;
                        if doctype {
                            host.on_literal("SYSTEM", &system_id, position);
                            self.schema.system_id = Some(system_id.clone());
                        }
                        Ok((Some(public_id), Some(system_id)))
                    }
                    Some('"' | '\'') => Err(host.fatal(Reason::ExpectedWhitespace)),
                    _ if doctype => Err(self.unexpected(host, "system literal")),
                    _ => Ok((Some(public_id), None)),
                }
            }
            _ => Err(host.fatal(Reason::InvalidDeclaration("external identifier"))),
        }
    }

    fn parse_subset<H: DtdHost>(&mut self, host: &mut H, subset: Subset) -> Result<()> {
        loop {
            self.state = ScanState::Subset;
            self.skip_ws(host)?;
            let c = match self.peek_char(host)? {
                Some(c) => c,
                None => {
                    if subset == Subset::Internal {
                        return Err(host.fatal(Reason::UnexpectedEof("internal subset")));
                    }
                    if !self.includes.is_empty() {
                        return Err(host.fatal(Reason::UnterminatedConditionalSection));
                    }
                    return Ok(());
                }
            };
            match c {
                ']' if subset == Subset::Internal
                    && self.includes.is_empty()
                    && host.entity_depth() == self.base_depth =>
                {
                    return Ok(());
                }
                ']' => {
                    if !self.eat(host, "]]>")? {
                        return Err(self.unexpected(host, "]]>"));
                    }
                    let position = host.position();
                    match self.includes.pop() {
                        Some(entity) if entity != host.entity_id() => report(
                            host,
                            ValidationKind::ImproperNesting("conditional section"),
                            position,
                        )?,
                        Some(_) => {}
                        None => return Err(host.fatal(Reason::InvalidDeclaration("conditional section"))),
                    }
                }
                '<' => self.markup_decl(host)?,
                _ => return Err(self.unexpected(host, "markup declaration")),
            }
        }
    }

    fn markup_decl<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        let entity = host.entity_id();
        let position = host.position();
        if self.eat(host, "<!--")? {
            return host.skip_comment();
        }
        if self.eat(host, "<?")? {
            return host.skip_pi();
        }
        if self.eat(host, "<![")? {
            return self.conditional_section(host, entity);
        }
        if self.eat(host, "<!ELEMENT")? {
            self.element_decl(host)?;
        } else if self.eat(host, "<!ATTLIST")? {
            self.attlist_decl(host)?;
        } else if self.eat(host, "<!ENTITY")? {
            self.entity_decl(host, position)?;
        } else if self.eat(host, "<!NOTATION")? {
            self.notation_decl(host)?;
        } else {
            return Err(host.fatal(Reason::InvalidDeclaration("markup declaration")));
        }
        if host.entity_id() != entity {
            report(host, ValidationKind::ImproperNesting("markup declaration"), position)?;
        }
        Ok(())
    }

    fn expect_close<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        self.state = ScanState::DeclBody;
        match self.next_token(host)? {
            Token::Close => Ok(()),
            _ => Err(host.fatal(Reason::ExpectedToken(">"))),
        }
    }

    fn element_decl<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        self.require_ws(host)?;
        let position = host.position();
        let name = self.raw_name(host)?;
        self.require_ws(host)?;
        self.state = ScanState::DeclBody;
        let content = match self.next_token(host)? {
            Token::Name(keyword) if keyword == "EMPTY" => ContentModel::Empty,
            Token::Name(keyword) if keyword == "ANY" => ContentModel::Any,
            Token::LParen => self.content_model(host)?,
            _ => return Err(host.fatal(Reason::InvalidDeclaration("element"))),
        };
        self.expect_close(host)?;

        let name = host.intern(&name);
        let external = host.in_external_declarations();
        debug!("element {} {}", name, content);
        if !self.schema.declare_element(&name, content, external) {
            report(
                host,
                ValidationKind::DuplicateElementDeclaration(name.to_string()),
                position,
            )?;
        }
        Ok(())
    }

    /// Occurrence indicator right at the cursor
    fn occurrence_suffix<H: DtdHost>(&mut self, host: &mut H) -> Result<Option<Occurrence>> {
        let occurrence = match self.peek_char(host)? {
            Some('?') => Occurrence::Optional,
            Some('*') => Occurrence::ZeroOrMore,
            Some('+') => Occurrence::OneOrMore,
            _ => return Ok(None),
        };
        host.advance(1);
        Ok(Some(occurrence))
    }

    /// Content model after its opening `(`.
    fn content_model<H: DtdHost>(&mut self, host: &mut H) -> Result<ContentModel> {
        let mut builder = ContentModelBuilder::new();
        builder.open_group(host.entity_id());
        let mut expect = ModelExpect::Item;
        loop {
            if self.state != ScanState::Occurrence {
                self.state = ScanState::ContentModel;
            }
            let token = self.next_token(host)?;
            let res = match (expect, token) {
                (ModelExpect::Item, Token::HashName(keyword)) if keyword == "PCDATA" => {
                    expect = ModelExpect::ConnectorOrClose;
                    builder.pcdata()
                }
                (ModelExpect::Item, Token::LParen) if !builder.is_mixed() => {
                    builder.open_group(host.entity_id());
                    Ok(())
                }
                (ModelExpect::Item, Token::Name(name)) => {
                    expect = ModelExpect::ConnectorOrClose;
                    self.state = ScanState::Occurrence;
                    builder.name(host.intern(&name))
                }
                (ModelExpect::ConnectorOrClose, Token::Pipe) => {
                    expect = ModelExpect::Item;
                    builder.connector(true)
                }
                (ModelExpect::ConnectorOrClose, Token::Comma) => {
                    expect = ModelExpect::Item;
                    builder.connector(false)
                }
                (ModelExpect::ConnectorOrClose, Token::Occurrence(occurrence)) => {
                    builder.occurrence(occurrence)
                }
                (ModelExpect::ConnectorOrClose, Token::RParen) => {
                    if let Err(reason) = builder.close_group(host.entity_id()) {
                        return Err(host.fatal(reason));
                    }
                    if builder.depth() == 0 {
                        let suffix = self.occurrence_suffix(host)?;
                        let star = if builder.is_mixed() {
                            match suffix {
                                None => false,
                                Some(Occurrence::ZeroOrMore) => true,
                                Some(_) => {
                                    return Err(host.fatal(Reason::InvalidDeclaration("element")))
                                }
                            }
                        } else {
                            if let Some(occurrence) = suffix {
                                if let Err(reason) = builder.occurrence(occurrence) {
                                    return Err(host.fatal(reason));
                                }
                            }
                            false
                        };
                        return builder.finish(star).map_err(|reason| host.fatal(reason));
                    }
                    self.state = ScanState::Occurrence;
                    Ok(())
                }
                _ => Err(Reason::InvalidDeclaration("element")),
            };
            if let Err(reason) = res {
                return Err(host.fatal(reason));
            }
        }
    }

    fn attlist_decl<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        self.require_ws(host)?;
        let element = self.raw_name(host)?;
        let element = host.intern(&element);
        let external = host.in_external_declarations();

        let mut state = AttlistState::AttributeName;
        let mut name = String::new();
        let mut position = host.position();
        let mut att_type = AttType::CData;
        loop {
            match state {
                AttlistState::AttributeName => {
                    self.state = ScanState::Name;
                    position = host.position();
                    match self.next_token(host)? {
                        Token::Close => return Ok(()),
                        Token::Name(n) => name = n,
                        _ => return Err(host.fatal(Reason::ExpectedName)),
                    }
                    state = AttlistState::Type;
                }
                AttlistState::Type => {
                    self.state = ScanState::Name;
                    att_type = match self.next_token(host)? {
                        Token::Name(keyword) => match keyword.as_str() {
                            "CDATA" => AttType::CData,
                            "ID" => AttType::Id,
                            "IDREF" => AttType::IdRef,
                            "IDREFS" => AttType::IdRefs,
                            "ENTITY" => AttType::Entity,
                            "ENTITIES" => AttType::Entities,
                            "NMTOKEN" => AttType::NmToken,
                            "NMTOKENS" => AttType::NmTokens,
                            "NOTATION" => {
                                self.require_ws(host)?;
                                if !self.eat(host, "(")? {
                                    return Err(self.unexpected(host, "("));
                                }
                                let names = self.enumeration(host, ScanState::Name)?;
                                let position = host.position();
                                let names: Vec<Rc<str>> =
                                    names.iter().map(|n| host.intern(n)).collect();
                                for n in &names {
                                    self.schema.reference_notation(n.clone(), position);
                                }
                                AttType::Notation(names)
                            }
                            _ => return Err(host.fatal(Reason::InvalidDeclaration("attribute type"))),
                        },
                        Token::LParen => AttType::Enumeration(self.enumeration(host, ScanState::NmToken)?),
                        _ => return Err(host.fatal(Reason::InvalidDeclaration("attribute type"))),
                    };
                    state = AttlistState::Default;
                }
                AttlistState::Default => {
                    self.state = ScanState::DeclBody;
                    let (presence, default_value) = match self.next_token(host)? {
                        Token::HashName(keyword) if keyword == "REQUIRED" => (AttDefault::Required, None),
                        Token::HashName(keyword) if keyword == "IMPLIED" => (AttDefault::Implied, None),
                        Token::HashName(keyword) if keyword == "FIXED" => {
                            self.require_ws(host)?;
                            (AttDefault::Fixed, Some(self.att_value(host)?))
                        }
                        Token::Quote(_) => (AttDefault::Default, Some(self.att_value(host)?)),
                        _ => return Err(host.fatal(Reason::InvalidDeclaration("attribute default"))),
                    };
                    if att_type == AttType::Id && default_value.is_some() {
                        report(
                            host,
                            ValidationKind::InvalidAttributeValue {
                                attribute: name.clone(),
                                value: default_value.clone().unwrap_or_default(),
                            },
                            position,
                        )?;
                    }
                    let def = AttDef {
                        name: host.intern(&name),
                        att_type: std::mem::replace(&mut att_type, AttType::CData),
                        presence,
                        default_value,
                        declared_externally: external,
                        position,
                    };
                    if !self.schema.declare_attribute(&element, def) {
                        debug!("attribute {} of {} already declared", name, element);
                        report(
                            host,
                            ValidationKind::DuplicateAttributeDeclaration {
                                element: element.to_string(),
                                attribute: name.clone(),
                            },
                            position,
                        )?;
                    }
                    state = AttlistState::AttributeName;
                }
            }
        }
    }

    /// `a | b | c )` of an enumeration or notation type.
    fn enumeration<H: DtdHost>(&mut self, host: &mut H, tokens: ScanState) -> Result<Vec<String>> {
        let mut values: Vec<String> = Vec::new();
        loop {
            self.state = tokens;
            match self.next_token(host)? {
                Token::Name(value) => {
                    if values.contains(&value) {
                        let position = host.position();
                        report(
                            host,
                            ValidationKind::DuplicateEnumerationToken(value.clone()),
                            position,
                        )?;
                    }
                    values.push(value);
                }
                _ => return Err(host.fatal(Reason::ExpectedName)),
            }
            self.state = ScanState::DeclBody;
            match self.next_token(host)? {
                Token::Pipe => {}
                Token::RParen => return Ok(values),
                _ => return Err(host.fatal(Reason::ExpectedToken(")"))),
            }
        }
    }

    /// Default value literal of an attribute, normalized like a CDATA
    /// attribute value.
    fn att_value<H: DtdHost>(&mut self, host: &mut H) -> Result<String> {
        let quote = match self.peek_char(host)? {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.unexpected(host, "quote")),
        };
        host.advance(1);
        let mut value = String::new();
        loop {
            match self.peek_char(host)? {
                Some(c) if c == quote => {
                    host.advance(1);
                    return Ok(value);
                }
                Some('<') => return Err(host.fatal(Reason::LtInAttributeValue)),
                Some('&') => {
                    self.lookahead(host, 2)?;
                    if host.window().starts_with("&#") {
                        let c = host.parse_char_ref()?;
                        value.push(c);
                    } else {
                        host.advance(1);
                        let name = self.raw_name(host)?;
                        if !self.eat(host, ";")? {
                            return Err(self.unexpected(host, ";"));
                        }
                        self.expand_default_reference(host, &name, &mut value)?;
                    }
                }
                Some('\t' | '\n' | '\r') => {
                    value.push(' ');
                    host.advance(1);
                }
                Some(c) => {
                    if host.settings().check_characters && !c.is_xml_char() {
                        return Err(host.fatal(Reason::IllegalChar(c as u32)));
                    }
                    value.push(c);
                    host.advance(c.len_utf8());
                }
                None => return Err(host.fatal(Reason::UnexpectedEof("attribute default"))),
            }
        }
    }

    fn expand_default_reference<H: DtdHost>(&mut self, host: &mut H, name: &str, out: &mut String) -> Result<()> {
        if let Some(c) = predefined_entity(name) {
            out.push(c);
            return Ok(());
        }
        let decl = match self.schema.entities.get(name) {
            Some(decl) => decl.clone(),
            None => {
                if host.settings().allow_undeclared_entities {
                    return Ok(());
                }
                if self.schema.undeclared_entity_is_fatal() {
                    return Err(host.fatal(Reason::UndeclaredEntity(name.to_string())));
                }
                let position = host.position();
                return report(host, ValidationKind::UndeclaredEntity(name.to_string()), position);
            }
        };
        if decl.is_unparsed() {
            return Err(host.fatal(Reason::UnparsedEntityReference(name.to_string())));
        }
        if decl.is_external() {
            return Err(host.fatal(Reason::ExternalEntityInAttribute(name.to_string())));
        }
        if decl.is_expanding() {
            return Err(host.fatal(Reason::RecursiveEntity(name.to_string())));
        }
        decl.expanding.set(true);
        let text = decl.value.clone().unwrap_or_default();
        let res = self.expand_default_text(host, &text, out);
        decl.expanding.set(false);
        res
    }

    fn expand_default_text<H: DtdHost>(&mut self, host: &mut H, text: &str, out: &mut String) -> Result<()> {
        let mut rest = text;
        while let Some(i) = rest.find(|c| matches!(c, '&' | '<' | '\t' | '\n' | '\r')) {
            out.push_str(&rest[..i]);
            match rest.as_bytes()[i] {
                b'<' => return Err(host.fatal(Reason::LtInAttributeValue)),
                b'&' => {
                    let len = match rest[i..].find(';') {
                        Some(len) => len,
                        None => return Err(host.fatal(Reason::ExpectedToken(";"))),
                    };
                    let body = &rest[i + 1..i + len];
                    if let Some(char_ref) = body.strip_prefix('#') {
                        let c = parse_char_ref_body(char_ref).map_err(|reason| host.fatal(reason))?;
                        out.push(c);
                    } else if is_name(body) {
                        self.expand_default_reference(host, body, out)?;
                    } else {
                        return Err(host.fatal(Reason::InvalidName(body.to_string())));
                    }
                    rest = &rest[i + len + 1..];
                    continue;
                }
                _ => out.push(' '),
            }
            rest = &rest[i + 1..];
        }
        out.push_str(rest);
        Ok(())
    }

    fn entity_decl<H: DtdHost>(&mut self, host: &mut H, position: Position) -> Result<()> {
        self.require_ws(host)?;
        self.state = ScanState::EntityName;
        let mut is_parameter = false;
        let mut token = self.next_token(host)?;
        if token == Token::Percent {
            is_parameter = true;
            self.require_ws(host)?;
            self.state = ScanState::Name;
            token = self.next_token(host)?;
        }
        let name = match token {
            Token::Name(name) => name,
            _ => return Err(host.fatal(Reason::ExpectedName)),
        };
        self.require_ws(host)?;

        let mut decl = EntityDecl {
            name: host.intern(&name),
            is_parameter,
            value: None,
            public_id: None,
            system_id: None,
            notation: None,
            declared_externally: host.in_external_declarations(),
            base_uri: host.base_uri(),
            position,
            expanding: Cell::new(false),
        };
        match self.peek_char(host)? {
            Some('"' | '\'') => decl.value = Some(self.entity_value(host)?),
            Some('S' | 'P') => {
                let (public_id, system_id) = self.external_id(host, false)?;
                decl.public_id = public_id;
                decl.system_id = system_id;
                let had_ws = self.skip_ws(host)?;
                if self.at(host, "NDATA")? {
                    if !had_ws {
                        return Err(host.fatal(Reason::ExpectedWhitespace));
                    }
                    if is_parameter {
                        return Err(host.fatal(Reason::InvalidDeclaration("parameter entity")));
                    }
                    host.advance(5);
                    self.require_ws(host)?;
                    let notation = self.raw_name(host)?;
                    let notation = host.intern(&notation);
                    self.schema.reference_notation(notation.clone(), position);
                    decl.notation = Some(notation);
                }
            }
            _ => return Err(host.fatal(Reason::InvalidDeclaration("entity"))),
        }
        self.expect_close(host)?;
        if !self.schema.declare_entity(decl) {
            debug!("entity {} already declared", name);
        }
        Ok(())
    }

    fn notation_decl<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        self.require_ws(host)?;
        let name = self.raw_name(host)?;
        self.require_ws(host)?;
        let (public_id, system_id) = self.external_id(host, false)?;
        self.expect_close(host)?;
        let name = host.intern(&name);
        if !self.schema.declare_notation(NotationDecl {
            name: name.clone(),
            public_id,
            system_id,
        }) {
            debug!("notation {} already declared", name);
        }
        Ok(())
    }

    /// Conditional section after `<![`, opened in entity `entity`.
    fn conditional_section<H: DtdHost>(&mut self, host: &mut H, entity: u32) -> Result<()> {
        if !host.in_external_declarations() {
            return Err(host.fatal(Reason::ConditionalSectionInInternalSubset));
        }
        self.state = ScanState::Name;
        let keyword = match self.next_token(host)? {
            Token::Name(keyword) => keyword,
            _ => return Err(host.fatal(Reason::InvalidDeclaration("conditional section"))),
        };
        self.skip_ws(host)?;
        if !self.eat(host, "[")? {
            return Err(self.unexpected(host, "["));
        }
        if host.entity_id() != entity {
            let position = host.position();
            report(host, ValidationKind::ImproperNesting("conditional section"), position)?;
        }
        match keyword.as_str() {
            "INCLUDE" => {
                self.includes.push(host.entity_id());
                Ok(())
            }
            "IGNORE" => self.skip_ignored(host),
            _ => Err(host.fatal(Reason::InvalidDeclaration("conditional section"))),
        }
    }

    /// Skip the content of an IGNORE section, including nested sections.
    fn skip_ignored<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        let mut depth = 1usize;
        loop {
            self.lookahead(host, 3)?;
            let window = host.window();
            if window.is_empty() {
                return Err(host.fatal(Reason::UnterminatedConditionalSection));
            }
            if window.starts_with("<![") {
                depth += 1;
                host.advance(3);
            } else if window.starts_with("]]>") {
                host.advance(3);
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            } else {
                let len = window.chars().next().map_or(1, char::len_utf8);
                host.advance(len);
            }
        }
    }

    /// Checks that need the whole document type.
    fn finish<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        for (name, position) in self.schema.undeclared_notations() {
            report(host, ValidationKind::UndeclaredNotation(name.to_string()), position)?;
        }
        Ok(())
    }
}
