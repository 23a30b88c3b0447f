//! Character level scanning of the entity being read
//!
//! All positions handed between scanning functions are absolute offsets of
//! the current buffer, so they survive refills that compact the buffer.

use log::trace;
use xtr_chars::{XmlAsciiChar, XmlChar};

use crate::entity::FrameKind;
use crate::error::{Reason, Result, XmlError};
use crate::reader::Reader;

pub(crate) mod markup;
pub(crate) mod text;

impl Reader {
    /// Decode the next chunk of the current entity into its buffer.
    ///
    /// Returns the number of bytes added, 0 once the entity is exhausted.
    pub(crate) fn refill(&mut self) -> Result<usize> {
        let chunk = match self.buf.fetch() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Ok(0),
            Err(reason) => return Err(self.error(reason)),
        };
        if self.buf.needs_room(chunk.len()) {
            self.nodes.materialize(&self.buf.text);
            let keep_from = self.buf.mark.saturating_sub(self.buf.base);
            self.buf.make_room(chunk.len(), keep_from);
        }
        self.account(chunk.chars().count() as u64)?;
        trace!(
            "refill {} bytes at offset {}",
            chunk.len(),
            self.buf.abs(self.buf.text.len())
        );
        self.buf.append(&chunk);
        Ok(chunk.len())
    }

    /// Count characters against the configured limits.
    pub(crate) fn account(&mut self, chars: u64) -> Result<()> {
        if self.entities.current_kind() == FrameKind::Document {
            self.counters.document += chars;
            if let Some(max) = self.settings.max_characters_in_document {
                if self.counters.document > max {
                    return Err(self.error(Reason::LimitExceeded {
                        limit: "characters in document",
                        max,
                    }));
                }
            }
        } else {
            self.account_entity(chars)?;
        }
        Ok(())
    }

    pub(crate) fn account_entity(&mut self, chars: u64) -> Result<()> {
        self.counters.entities += chars;
        if let Some(max) = self.settings.max_characters_from_entities {
            if self.counters.entities > max {
                return Err(self.error(Reason::LimitExceeded {
                    limit: "characters from entities",
                    max,
                }));
            }
        }
        Ok(())
    }

    /// Make at least `n` bytes available after the cursor. Returns `false`
    /// when the entity ends before.
    pub(crate) fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.buf.remaining() < n {
            if self.refill()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn peek(&mut self) -> Result<Option<u8>> {
        if !self.ensure(1)? {
            return Ok(None);
        }
        Ok(Some(self.buf.text.as_bytes()[self.buf.pos]))
    }

    pub(crate) fn peek_char(&mut self) -> Result<Option<char>> {
        if !self.ensure(1)? {
            return Ok(None);
        }
        Ok(self.buf.window().chars().next())
    }

    /// Cursor is in front of `s`.
    pub(crate) fn at(&mut self, s: &str) -> Result<bool> {
        Ok(self.ensure(s.len())? && self.buf.window().starts_with(s))
    }

    /// Consume `s` if the cursor is in front of it.
    pub(crate) fn eat(&mut self, s: &str) -> Result<bool> {
        if self.at(s)? {
            self.buf.pos += s.len();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn expect(&mut self, s: &'static str) -> Result<()> {
        if self.eat(s)? {
            Ok(())
        } else {
            Err(self.unexpected(s))
        }
    }

    /// Error for whatever is at the cursor when `expected` was needed.
    pub(crate) fn unexpected(&mut self, expected: &'static str) -> XmlError {
        match self.buf.window().chars().next() {
            Some(found) => self.error(Reason::UnexpectedChar { found, expected }),
            None => self.error(Reason::UnexpectedEof(expected)),
        }
    }

    /// Skip whitespace, returns `true` when there was any.
    pub(crate) fn skip_whitespace(&mut self) -> Result<bool> {
        let mut skipped = false;
        loop {
            let bytes = &self.buf.text.as_bytes()[self.buf.pos..];
            let n = bytes.iter().take_while(|b| b.is_xml_whitespace()).count();
            self.buf.pos += n;
            skipped |= n > 0;
            if self.buf.remaining() > 0 || self.refill()? == 0 {
                return Ok(skipped);
            }
        }
    }

    pub(crate) fn require_whitespace(&mut self) -> Result<()> {
        if self.skip_whitespace()? {
            Ok(())
        } else if self.buf.remaining() == 0 {
            Err(self.error(Reason::UnexpectedEof("whitespace")))
        } else {
            Err(self.error(Reason::ExpectedWhitespace))
        }
    }

    /// Scan a name starting at the cursor. Returns its absolute range; the
    /// cursor is left behind the name.
    pub(crate) fn scan_name(&mut self) -> Result<(usize, usize)> {
        let start = self.buf.abs_pos();
        match self.peek_char()? {
            Some(c) if c.is_xml_name_start_char() => {}
            Some(_) => return Err(self.error(Reason::ExpectedName)),
            None => return Err(self.error(Reason::UnexpectedEof("name"))),
        }
        self.scan_name_chars()?;
        Ok((start, self.buf.abs_pos()))
    }

    fn scan_name_chars(&mut self) -> Result<()> {
        loop {
            let window = self.buf.window();
            let n = window
                .char_indices()
                .find(|(_, c)| !c.is_xml_name_char())
                .map_or(window.len(), |(i, _)| i);
            self.buf.pos += n;
            if self.buf.remaining() > 0 || self.refill()? == 0 {
                return Ok(());
            }
        }
    }

    /// Text of an absolute range of the current buffer
    pub(crate) fn slice(&self, start: usize, end: usize) -> &str {
        &self.buf.text[start - self.buf.base..end - self.buf.base]
    }

    /// Text from an absolute offset up to the cursor
    pub(crate) fn slice_to_cursor(&self, start: usize) -> &str {
        &self.buf.text[start - self.buf.base..self.buf.pos]
    }

    /// Everything before the cursor is consumed for good.
    pub(crate) fn commit(&mut self) {
        if !self.in_dtd {
            self.buf.mark = self.buf.abs_pos();
        }
    }

    /// Return to the last commit point.
    pub(crate) fn rollback(&mut self) {
        self.buf.pos = self.buf.mark.saturating_sub(self.buf.base);
    }

    /// Reject characters outside the XML character range.
    #[inline]
    pub(crate) fn check_char(&mut self, c: char) -> Result<()> {
        if self.settings.check_characters && !c.is_xml_char() {
            Err(self.error(Reason::IllegalChar(c as u32)))
        } else {
            Ok(())
        }
    }

    /// Consume one character, checking it.
    pub(crate) fn next_char(&mut self) -> Result<Option<char>> {
        match self.peek_char()? {
            Some(c) => {
                self.check_char(c)?;
                self.buf.pos += c.len_utf8();
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }}
