//! The reader drives the document type parser over its own entity stack

use std::rc::Rc;

use crate::buffer::BufferState;
use crate::dtd::host::DtdHost;
use crate::dtd::EntityDecl;
use crate::entity::FrameKind;
use crate::error::{Position, Reason, Result, ValidationKind, XmlError};
use crate::resolve::Reference;
use crate::settings::ReaderSettings;

use super::Reader;

impl DtdHost for Reader {
    fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    fn supports_validation(&self) -> bool {
        self.settings.validating()
    }

    fn standalone(&self) -> bool {
        self.doc.standalone
    }

    fn intern(&mut self, name: &str) -> Rc<str> {
        self.names.intern(name)
    }

    fn window(&self) -> &str {
        self.buf.window()
    }

    fn advance(&mut self, n: usize) {
        self.buf.pos += n;
    }

    fn cursor(&self) -> usize {
        self.buf.abs_pos()
    }

    fn text_since(&self, start: usize) -> &str {
        self.slice_to_cursor(start)
    }

    fn refill(&mut self) -> Result<usize> {
        Reader::refill(self)
    }

    fn entity_depth(&self) -> usize {
        self.entities.depth()
    }

    fn entity_id(&self) -> u32 {
        self.entities.current_id()
    }

    fn in_external_declarations(&self) -> bool {
        self.entities.in_external_declarations()
    }

    fn position(&mut self) -> Position {
        self.buf.position()
    }

    fn base_uri(&self) -> Option<String> {
        self.buf.base_uri.clone()
    }

    fn parse_char_ref(&mut self) -> Result<char> {
        match self.scan_reference()? {
            Reference::Char(c) => Ok(c),
            Reference::Named(..) => Err(self.error(Reason::ExpectedToken("&#"))),
        }
    }

    fn skip_comment(&mut self) -> Result<()> {
        self.scan_comment().map(|_| ())
    }

    fn skip_pi(&mut self) -> Result<()> {
        self.scan_pi().map(|_| ())
    }

    fn push_entity(&mut self, decl: &Rc<EntityDecl>, padded: bool) -> Result<bool> {
        let fresh = match &decl.value {
            Some(value) => {
                let text = if padded {
                    format!(" {} ", value)
                } else {
                    value.clone()
                };
                let base_uri = decl.base_uri.clone().or_else(|| self.buf.base_uri.clone());
                BufferState::from_text(text, self.settings.buffer_size, base_uri, true)
            }
            None => {
                let system_id = decl.system_id.clone().unwrap_or_default();
                match self.open_external(
                    decl.public_id.as_deref(),
                    &system_id,
                    decl.base_uri.as_deref(),
                )? {
                    Some(fresh) => fresh,
                    None => return Ok(false),
                }
            }
        };
        self.enter_buffer(fresh, Some(decl.clone()), FrameKind::ParameterEntity, false)?;
        Ok(true)
    }

    fn pop_entity(&mut self) -> Result<bool> {
        if self.entities.depth() == 0 {
            return Ok(false);
        }
        self.nodes.materialize(&self.buf.text);
        self.entities.pop(&mut self.buf);
        Ok(true)
    }

    fn push_external_subset(&mut self, public_id: Option<&str>, system_id: &str) -> Result<bool> {
        let base_uri = self.buf.base_uri.clone();
        match self.open_external(public_id, system_id, base_uri.as_deref())? {
            Some(fresh) => {
                self.enter_buffer(fresh, None, FrameKind::ExternalSubset, false)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn push_internal_subset(&mut self, text: &str) {
        let fresh = BufferState::from_text(
            text.to_string(),
            self.settings.buffer_size,
            self.buf.base_uri.clone(),
            false,
        );
        self.nodes.materialize(&self.buf.text);
        self.entities
            .push(&mut self.buf, fresh, None, FrameKind::ParameterEntity, false);
    }

    fn fatal(&mut self, reason: Reason) -> XmlError {
        self.error(reason)
    }

    fn fatal_at(&self, reason: Reason, position: Position) -> XmlError {
        self.error_at(reason, position)
    }

    fn on_literal(&mut self, keyword: &'static str, literal: &str, position: Position) {
        self.doctype_literals
            .push((keyword, literal.to_string(), position));
    }

    fn validation_event(&mut self, kind: ValidationKind, position: Position) -> Result<()> {
        self.validation_event_at(kind, position)
    }
}
