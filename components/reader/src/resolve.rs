//! Character and entity references

use std::rc::Rc;

use log::warn;
use xtr_chars::{is_name, is_xml_char_code, XmlChar};

use crate::buffer::BufferState;
use crate::dtd::{predefined_entity, EntityDecl};
use crate::entity::FrameKind;
use crate::error::{Position, Reason, Result, ValidationKind};
use crate::reader::Reader;

/// Reference scanned at the cursor
pub(crate) enum Reference {
    Char(char),
    /// Absolute range of the entity name
    Named(usize, usize),
}

/// Where a general entity reference occurs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RefContext {
    Content,
    Attribute,
}

/// What to do with a general entity reference
pub(crate) enum EntityOutcome {
    /// Replacement text is read in place; `None` for an undeclared entity
    /// that is treated as empty
    Expanded(Option<Rc<EntityDecl>>),
    /// Internal entity whose replacement text goes into an attribute value
    ExpandedInAttribute(Rc<EntityDecl>),
    /// Reported as entity reference node
    Unexpanded,
    /// Predefined entity
    Character(char),
    /// External entity that cannot be read and stays a reference
    Skipped,
}

/// Reference that ended character data and is reported on the next read
pub(crate) struct PendingReference {
    pub name: String,
    pub position: Position,
}

/// Decode the part of a character reference after `&#` and before `;`.
pub(crate) fn parse_char_ref_body(body: &str) -> std::result::Result<char, Reason> {
    let invalid = || Reason::InvalidCharRef(format!("&#{};", body));
    let (digits, radix) = match body.strip_prefix('x') {
        Some(hex) => (hex, 16),
        None => (body, 10),
    };
    if digits.is_empty() {
        return Err(invalid());
    }
    let mut code: u32 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(radix).ok_or_else(invalid)?;
        code = code
            .checked_mul(radix)
            .and_then(|code| code.checked_add(digit))
            .ok_or_else(invalid)?;
    }
    if !is_xml_char_code(code) {
        return Err(invalid());
    }
    char::from_u32(code).ok_or_else(invalid)
}

impl Reader {
    /// Make the whole reference at the cursor available before anything of
    /// it is consumed.
    fn buffer_reference(&mut self) -> Result<()> {
        loop {
            let window = self.buf.window();
            if window.len() > 1
                && window[1..]
                    .find(|c: char| !(c.is_xml_name_char() || c == '#'))
                    .is_some()
            {
                return Ok(());
            }
            if self.refill()? == 0 {
                return Ok(());
            }
        }
    }

    /// Scan `&#...;` or `&name;` at the cursor.
    pub(crate) fn scan_reference(&mut self) -> Result<Reference> {
        self.buffer_reference()?;
        let amp = self.buf.abs_pos();
        self.buf.pos += 1;
        if self.eat("#")? {
            let start = self.buf.abs_pos();
            let n = self
                .buf
                .window()
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric())
                .count();
            self.buf.pos += n;
            if !self.eat(";")? {
                return Err(self.unexpected(";"));
            }
            let body = self.slice(start, start + n).to_string();
            return match parse_char_ref_body(&body) {
                Ok(c) => Ok(Reference::Char(c)),
                Err(reason) => {
                    let position = self.buf.position_of(amp);
                    Err(self.error_at(reason, position))
                }
            };
        }
        let (start, end) = self.scan_name()?;
        self.expect(";")?;
        Ok(Reference::Named(start, end))
    }

    /// Decide how to treat a reference to the general entity `name`.
    pub(crate) fn resolve_general(
        &mut self,
        name: &str,
        context: RefContext,
    ) -> Result<EntityOutcome> {
        if let Some(c) = predefined_entity(name) {
            return Ok(EntityOutcome::Character(c));
        }
        let decl = match self.schema.as_ref().and_then(|schema| schema.entity(name)) {
            Some(decl) => decl.clone(),
            None => return self.undeclared_entity(name),
        };
        if decl.is_unparsed() {
            return Err(self.error(Reason::UnparsedEntityReference(name.to_string())));
        }
        if self.doc.standalone && decl.declared_externally {
            return Err(self.error(Reason::StandaloneExternalEntity(name.to_string())));
        }
        if decl.is_expanding() {
            return Err(self.error(Reason::RecursiveEntity(name.to_string())));
        }

        if !decl.is_external() {
            return Ok(match context {
                RefContext::Attribute => EntityOutcome::ExpandedInAttribute(decl),
                RefContext::Content if self.settings.expand_entities() => {
                    EntityOutcome::Expanded(Some(decl))
                }
                RefContext::Content => EntityOutcome::Unexpanded,
            });
        }

        if context == RefContext::Attribute {
            return Err(self.error(Reason::ExternalEntityInAttribute(name.to_string())));
        }
        if !self.settings.expand_entities() {
            return Ok(EntityOutcome::Unexpanded);
        }
        if self.settings.resolver.is_none() {
            if self.settings.substitute_unresolved_externals {
                warn!("external entity {} left unexpanded: no resolver", name);
                return Ok(EntityOutcome::Skipped);
            }
            let system_id = decl.system_id.clone().unwrap_or_default();
            return Err(self.error(Reason::Resource {
                system_id,
                cause: None,
            }));
        }
        Ok(EntityOutcome::Expanded(Some(decl)))
    }

    fn undeclared_entity(&mut self, name: &str) -> Result<EntityOutcome> {
        if self.settings.allow_undeclared_entities {
            return Ok(EntityOutcome::Expanded(None));
        }
        let fatal = self
            .schema
            .as_ref()
            .map_or(true, |schema| schema.undeclared_entity_is_fatal());
        if fatal {
            return Err(self.error(Reason::UndeclaredEntity(name.to_string())));
        }
        self.validation_event(ValidationKind::UndeclaredEntity(name.to_string()))?;
        Ok(EntityOutcome::Unexpanded)
    }

    /// Open an external entity through the configured resolver.
    ///
    /// `Ok(None)` when there is no resolver.
    pub(crate) fn open_external(
        &mut self,
        public_id: Option<&str>,
        system_id: &str,
        base_uri: Option<&str>,
    ) -> Result<Option<BufferState>> {
        let resolver = match &self.settings.resolver {
            Some(resolver) => resolver.clone(),
            None => return Ok(None),
        };
        let base_uri = base_uri.map(str::to_string).or_else(|| self.buf.base_uri.clone());
        let resolved = match resolver.resolve(public_id, system_id, base_uri.as_deref()) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                return Err(self.error(Reason::Resource {
                    system_id: system_id.to_string(),
                    cause: None,
                }))
            }
            Err(err) => {
                return Err(self.error(Reason::Resource {
                    system_id: system_id.to_string(),
                    cause: Some(err),
                }))
            }
        };
        let entity_base = resolved.base_uri.or_else(|| Some(system_id.to_string()));
        let size = self.settings.buffer_size;
        Ok(Some(match resolved.source {
            crate::resolver::EntitySource::Bytes(read) => {
                BufferState::from_reader(read, size, entity_base, None)
            }
            crate::resolver::EntitySource::Text(text) => {
                BufferState::from_text(text, size, entity_base, false)
            }
        }))
    }

    /// Buffer with the replacement text of a parsed entity.
    pub(crate) fn entity_buffer(&mut self, decl: &Rc<EntityDecl>) -> Result<BufferState> {
        match &decl.value {
            Some(value) => {
                if let Some(max) = self.settings.max_characters_from_entities {
                    let len = value.chars().count() as u64;
                    if self.counters.entities + len > max {
                        return Err(self.error(Reason::LimitExceeded {
                            limit: "characters from entities",
                            max,
                        }));
                    }
                }
                let base_uri = decl.base_uri.clone().or_else(|| self.buf.base_uri.clone());
                Ok(BufferState::from_text(
                    value.clone(),
                    self.settings.buffer_size,
                    base_uri,
                    true,
                ))
            }
            None => {
                let system_id = decl.system_id.clone().unwrap_or_default();
                match self.open_external(
                    decl.public_id.as_deref(),
                    &system_id,
                    decl.base_uri.as_deref(),
                )? {
                    Some(buffer) => Ok(buffer),
                    None => Err(self.error(Reason::Resource {
                        system_id,
                        cause: None,
                    })),
                }
            }
        }
    }

    /// Continue reading inside the replacement text of `decl`.
    pub(crate) fn enter_entity(&mut self, decl: &Rc<EntityDecl>, reported: bool) -> Result<()> {
        let fresh = self.entity_buffer(decl)?;
        let kind = if decl.is_parameter {
            FrameKind::ParameterEntity
        } else {
            FrameKind::GeneralEntity
        };
        self.enter_buffer(fresh, Some(decl.clone()), kind, reported)
    }

    pub(crate) fn enter_buffer(
        &mut self,
        fresh: BufferState,
        decl: Option<Rc<EntityDecl>>,
        kind: FrameKind,
        reported: bool,
    ) -> Result<()> {
        let external = decl.as_ref().map_or(true, |decl| decl.is_external());
        self.nodes.materialize(&self.buf.text);
        self.entities.push(&mut self.buf, fresh, decl, kind, reported);
        if external {
            self.parse_text_decl()?;
        }
        self.commit();
        Ok(())
    }

    /// Return to the entity that referenced the current one.
    pub(crate) fn leave_entity(&mut self) -> Result<()> {
        let id = self.entities.current_id();
        let open_here = self.depth > 0
            && self
                .nodes
                .get(self.depth - 1)
                .map_or(false, |node| node.entity_id == id);
        if open_here {
            return Err(self.error(Reason::EntityNesting("element")));
        }
        self.nodes.materialize(&self.buf.text);
        self.entities.pop(&mut self.buf);
        self.commit();
        Ok(())
    }

    /// Append the replacement text of an internal entity referenced from an
    /// attribute value, normalized the way attribute values are.
    pub(crate) fn expand_in_attribute(
        &mut self,
        decl: &Rc<EntityDecl>,
        out: &mut String,
    ) -> Result<()> {
        let text = decl.value.clone().unwrap_or_default();
        self.account_entity(text.chars().count() as u64)?;
        decl.expanding.set(true);
        let res = self.expand_attribute_str(&text, out);
        decl.expanding.set(false);
        res
    }

    fn expand_attribute_str(&mut self, text: &str, out: &mut String) -> Result<()> {
        let mut rest = text;
        while let Some(i) = rest.find(|c| matches!(c, '&' | '<' | '\t' | '\n' | '\r')) {
            out.push_str(&rest[..i]);
            match rest.as_bytes()[i] {
                b'<' => return Err(self.error(Reason::LtInAttributeValue)),
                b'&' => {
                    let len = match rest[i..].find(';') {
                        Some(len) => len,
                        None => return Err(self.error(Reason::ExpectedToken(";"))),
                    };
                    let body = &rest[i + 1..i + len];
                    if let Some(char_ref) = body.strip_prefix('#') {
                        let c = parse_char_ref_body(char_ref).map_err(|r| self.error(r))?;
                        out.push(c);
                    } else {
                        if !is_name(body) {
                            return Err(self.error(Reason::InvalidName(body.to_string())));
                        }
                        match self.resolve_general(body, RefContext::Attribute)? {
                            EntityOutcome::Character(c) => out.push(c),
                            EntityOutcome::ExpandedInAttribute(decl) => {
                                self.expand_in_attribute(&decl, out)?
                            }
                            _ => {}
                        }
                    }
                    rest = &rest[i + len + 1..];
                    continue;
                }
                ws => out.push(if self.settings.normalization {
                    ' '
                } else {
                    ws as char
                }),
            }
            rest = &rest[i + 1..];
        }
        out.push_str(rest);
        Ok(())
    }
}
