//! Tokens of the document type grammar
//!
//! The parser sets `state` to tell which token shapes are legal next; the
//! scanner skips whitespace and expands parameter entity references in
//! front of every token except occurrence indicators and literal content.

use log::warn;
use xtr_chars::{XmlAsciiChar, XmlChar};

use super::content_model::Occurrence;
use super::host::DtdHost;
use super::parser::DtdParser;
use crate::error::{Position, Reason, Result, ValidationKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScanState {
    /// Between declarations
    Subset,
    /// Name or keyword inside a declaration
    Name,
    /// Name token of an enumeration
    NmToken,
    /// Name of an entity declaration; a lone `%` marks a parameter entity
    EntityName,
    /// Inside a content model group
    ContentModel,
    /// Right behind a name or `)` of a content model
    Occurrence,
    /// Keyword, literal or end of a declaration
    DeclBody,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Token {
    Name(String),
    /// `#PCDATA`, `#REQUIRED`, `#IMPLIED` or `#FIXED` without `#`
    HashName(String),
    /// Opening quote of a literal; the literal itself is not consumed
    Quote(char),
    LParen,
    RParen,
    Pipe,
    Comma,
    Occurrence(Occurrence),
    Percent,
    Close,
    /// End of the entity the subset is read from
    End,
}

impl DtdParser {
    pub(super) fn peek_char<H: DtdHost>(&mut self, host: &mut H) -> Result<Option<char>> {
        if host.window().is_empty() && host.refill()? == 0 {
            return Ok(None);
        }
        Ok(host.window().chars().next())
    }

    /// Make `n` bytes available in the current entity if it has them.
    pub(super) fn lookahead<H: DtdHost>(&mut self, host: &mut H, n: usize) -> Result<bool> {
        while host.window().len() < n {
            if host.refill()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(super) fn at<H: DtdHost>(&mut self, host: &mut H, s: &str) -> Result<bool> {
        self.lookahead(host, s.len())?;
        Ok(host.window().starts_with(s))
    }

    pub(super) fn eat<H: DtdHost>(&mut self, host: &mut H, s: &str) -> Result<bool> {
        if self.at(host, s)? {
            host.advance(s.len());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(super) fn unexpected<H: DtdHost>(&mut self, host: &mut H, expected: &'static str) -> crate::error::XmlError {
        match host.window().chars().next() {
            Some(found) => host.fatal(Reason::UnexpectedChar { found, expected }),
            None => host.fatal(Reason::UnexpectedEof(expected)),
        }
    }

    /// Skip whitespace, leaving finished parameter entities and expanding
    /// parameter entity references. Returns `true` when anything was
    /// skipped.
    pub(super) fn skip_ws<H: DtdHost>(&mut self, host: &mut H) -> Result<bool> {
        let mut skipped = false;
        loop {
            let n = host
                .window()
                .bytes()
                .take_while(|b| b.is_xml_whitespace())
                .count();
            if n > 0 {
                host.advance(n);
                skipped = true;
            }
            if host.window().is_empty() {
                if host.refill()? > 0 {
                    continue;
                }
                if host.entity_depth() > self.base_depth {
                    host.pop_entity()?;
                    skipped = true;
                    continue;
                }
                return Ok(skipped);
            }
            if host.window().starts_with('%') && self.lookahead(host, 2)? {
                let next = host.window()[1..].chars().next();
                if next.map_or(false, |c| c.is_xml_name_start_char()) {
                    self.expand_parameter_reference(host, true)?;
                    skipped = true;
                    continue;
                }
            }
            return Ok(skipped);
        }
    }

    pub(super) fn require_ws<H: DtdHost>(&mut self, host: &mut H) -> Result<()> {
        if self.skip_ws(host)? {
            Ok(())
        } else {
            Err(host.fatal(Reason::ExpectedWhitespace))
        }
    }

    /// `%name;` at the cursor. With `padded` the replacement text is read
    /// as if surrounded by spaces.
    pub(super) fn expand_parameter_reference<H: DtdHost>(
        &mut self,
        host: &mut H,
        padded: bool,
    ) -> Result<()> {
        let position = host.position();
        host.advance(1);
        let name = self.raw_name(host)?;
        if !self.eat(host, ";")? {
            return Err(self.unexpected(host, ";"));
        }
        self.schema.has_external_declarations = true;
        let decl = match self.schema.parameter_entities.get(name.as_str()) {
            Some(decl) => decl.clone(),
            None => {
                self.schema.skipped_parameter_entities = true;
                if self.schema.standalone {
                    return Err(host.fatal_at(Reason::UndeclaredEntity(name), position));
                }
                host.validation_event(ValidationKind::UndeclaredParameterEntity(name), position)?;
                return Ok(());
            }
        };
        if decl.is_expanding() {
            return Err(host.fatal_at(Reason::RecursiveEntity(name), position));
        }
        if !host.push_entity(&decl, padded)? {
            warn!("parameter entity {} could not be read", name);
            self.schema.skipped_parameter_entities = true;
        }
        Ok(())
    }

    /// Name at the cursor without skipping anything before it.
    pub(super) fn raw_name<H: DtdHost>(&mut self, host: &mut H) -> Result<String> {
        match self.peek_char(host)? {
            Some(c) if c.is_xml_name_start_char() => {}
            Some(_) => return Err(host.fatal(Reason::ExpectedName)),
            None => return Err(host.fatal(Reason::UnexpectedEof("name"))),
        }
        self.raw_name_chars(host)
    }

    fn raw_name_chars<H: DtdHost>(&mut self, host: &mut H) -> Result<String> {
        let mut name = String::new();
        loop {
            let window = host.window();
            let n = window
                .char_indices()
                .find(|(_, c)| !c.is_xml_name_char())
                .map_or(window.len(), |(i, _)| i);
            name.push_str(&window[..n]);
            host.advance(n);
            if !host.window().is_empty() || host.refill()? == 0 {
                return Ok(name);
            }
        }
    }

    /// Next token, as allowed by `state`.
    pub(super) fn next_token<H: DtdHost>(&mut self, host: &mut H) -> Result<Token> {
        if self.state == ScanState::Occurrence {
            self.state = ScanState::ContentModel;
            let occurrence = match self.peek_char(host)? {
                Some('?') => Some(Occurrence::Optional),
                Some('*') => Some(Occurrence::ZeroOrMore),
                Some('+') => Some(Occurrence::OneOrMore),
                _ => None,
            };
            if let Some(occurrence) = occurrence {
                host.advance(1);
                return Ok(Token::Occurrence(occurrence));
            }
        }
        self.skip_ws(host)?;
        let c = match self.peek_char(host)? {
            Some(c) => c,
            None => return Ok(Token::End),
        };
        let punct = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '|' => Some(Token::Pipe),
            ',' => Some(Token::Comma),
            '>' => Some(Token::Close),
            '%' if self.state == ScanState::EntityName => Some(Token::Percent),
            _ => None,
        };
        if let Some(token) = punct {
            host.advance(1);
            return Ok(token);
        }
        match c {
            '"' | '\'' => Ok(Token::Quote(c)),
            '#' => {
                host.advance(1);
                Ok(Token::HashName(self.raw_name(host)?))
            }
            c if self.state == ScanState::NmToken && c.is_xml_name_char() => {
                self.raw_name_chars(host).map(Token::Name)
            }
            c if c.is_xml_name_start_char() => self.raw_name(host).map(Token::Name),
            found => Err(host.fatal(Reason::UnexpectedChar {
                found,
                expected: "declaration",
            })),
        }
    }

    /// Consume the opening quote at the cursor and return it.
    fn open_quote<H: DtdHost>(&mut self, host: &mut H) -> Result<char> {
        match self.peek_char(host)? {
            Some(q @ ('"' | '\'')) => {
                host.advance(1);
                Ok(q)
            }
            _ => Err(self.unexpected(host, "quote")),
        }
    }

    /// System literal; returns its text and the position of its first
    /// character.
    pub(super) fn system_literal<H: DtdHost>(&mut self, host: &mut H) -> Result<(String, Position)> {
        let quote = self.open_quote(host)?;
        let position = host.position();
        let mut literal = String::new();
        loop {
            match self.peek_char(host)? {
                Some(c) if c == quote => {
                    host.advance(1);
                    return Ok((literal, position));
                }
                Some(c) => {
                    if host.settings().check_characters && !c.is_xml_char() {
                        return Err(host.fatal(Reason::IllegalChar(c as u32)));
                    }
                    literal.push(c);
                    host.advance(c.len_utf8());
                }
                None => return Err(host.fatal(Reason::UnexpectedEof("system literal"))),
            }
        }
    }

    /// Public identifier literal with whitespace normalized.
    pub(super) fn pubid_literal<H: DtdHost>(&mut self, host: &mut H) -> Result<(String, Position)> {
        let quote = self.open_quote(host)?;
        let position = host.position();
        let mut literal = String::new();
        loop {
            match self.peek_char(host)? {
                Some(c) if c == quote => {
                    host.advance(1);
                    let normalized = literal.split_ascii_whitespace().collect::<Vec<_>>().join(" ");
                    return Ok((normalized, position));
                }
                Some(c) if c.is_xml_pubid_char() => {
                    literal.push(c);
                    host.advance(1);
                }
                Some(c) => return Err(host.fatal(Reason::InvalidPublicId(c))),
                None => return Err(host.fatal(Reason::UnexpectedEof("public identifier"))),
            }
        }
    }

    /// Entity value literal. Parameter entity and character references are
    /// replaced, general entity references are kept.
    pub(super) fn entity_value<H: DtdHost>(&mut self, host: &mut H) -> Result<String> {
        let quote = self.open_quote(host)?;
        let depth = host.entity_depth();
        let mut value = String::new();
        loop {
            let c = match self.peek_char(host)? {
                Some(c) => c,
                None if host.entity_depth() > depth => {
                    host.pop_entity()?;
                    continue;
                }
                None => return Err(host.fatal(Reason::UnexpectedEof("entity value"))),
            };
            match c {
                c if c == quote && host.entity_depth() == depth => {
                    host.advance(1);
                    return Ok(value);
                }
                '%' => {
                    if !host.in_external_declarations() {
                        host.advance(1);
                        let name = self.raw_name(host)?;
                        return Err(host.fatal(Reason::ParameterEntityInInternalSubset(name)));
                    }
                    self.expand_parameter_reference(host, false)?;
                }
                '&' => {
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
                        value.push('&');
                        value.push_str(&name);
                        value.push(';');
                    }
                }
                c => {
                    if host.settings().check_characters && !c.is_xml_char() {
                        return Err(host.fatal(Reason::IllegalChar(c as u32)));
                    }
                    value.push(c);
                    host.advance(c.len_utf8());
                }
            }
        }
    }
}
