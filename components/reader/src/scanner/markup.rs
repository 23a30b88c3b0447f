//! Markup of the document entity: declarations, tags, comments, processing
//! instructions and CDATA sections

use xtr_chars::{XmlAsciiChar, XmlChar};

use crate::error::{Position, Reason, Result};
use crate::node::{AttrChunk, NodeKind, Value};
use crate::reader::Reader;
use crate::resolve::{EntityOutcome, RefContext, Reference};

/// Pseudo attribute of an XML or text declaration
pub(crate) struct PseudoAttr {
    pub name: &'static str,
    pub value: String,
    pub quote: char,
    pub position: Position,
    pub value_position: Position,
}

pub(crate) struct DeclInfo {
    /// Text between `<?xml` and `?>`, trimmed
    pub raw: String,
    pub encoding: Option<String>,
    pub standalone: Option<bool>,
    pub pseudo: Vec<PseudoAttr>,
}

/// Attribute value as scanned
pub(crate) struct ScannedValue {
    pub value: Value,
    /// Text and entity reference parts, when references stay unexpanded
    pub chunks: Vec<AttrChunk>,
}

fn is_enc_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_supported_version(version: &str) -> bool {
    match version.strip_prefix("1.") {
        Some(minor) => !minor.is_empty() && minor.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

impl Reader {
    /// Cursor is at `<?xml` followed by whitespace.
    pub(crate) fn at_xml_decl(&mut self) -> Result<bool> {
        Ok(self.ensure(6)?
            && self.buf.window().starts_with("<?xml")
            && self.buf.window().as_bytes()[5].is_xml_whitespace())
    }

    /// Parse the pseudo attributes of an XML declaration, or of a text
    /// declaration when `text_decl` is set. The cursor is behind `<?xml`.
    pub(crate) fn parse_decl_body(&mut self, text_decl: bool) -> Result<DeclInfo> {
        let raw_start = self.buf.abs_pos();
        let mut info = DeclInfo {
            raw: String::new(),
            encoding: None,
            standalone: None,
            pseudo: Vec::new(),
        };
        // 0: nothing yet, 1: version, 2: encoding, 3: standalone
        let mut order = 0u8;
        let raw_end;
        loop {
            let had_space = self.skip_whitespace()?;
            let end = self.buf.abs_pos();
            if self.eat("?>")? {
                raw_end = end;
                break;
            }
            if !had_space {
                return Err(self.unexpected("?>"));
            }
            let position = self.buf.position();
            let (start, end) = self.scan_name()?;
            let name = self.slice(start, end).to_string();
            self.skip_whitespace()?;
            self.expect("=")?;
            self.skip_whitespace()?;
            let quote = match self.peek()? {
                Some(q @ (b'"' | b'\'')) => q,
                _ => return Err(self.unexpected("quote")),
            };
            self.buf.pos += 1;
            let value_position = self.buf.position();
            let value_start = self.buf.abs_pos();
            loop {
                match self.peek()? {
                    Some(b) if b == quote => break,
                    Some(b'<') | Some(b'&') => return Err(self.unexpected("quote")),
                    Some(_) => {
                        self.next_char()?;
                    }
                    None => return Err(self.error(Reason::UnexpectedEof("declaration"))),
                }
            }
            let value = self.slice_to_cursor(value_start).to_string();
            self.buf.pos += 1;

            let name: &'static str = match name.as_str() {
                "version" if order < 1 => {
                    if !is_supported_version(&value) {
                        return Err(self.error_at(Reason::UnsupportedVersion(value), value_position));
                    }
                    order = 1;
                    "version"
                }
                "encoding" if order < 2 => {
                    if order == 0 && !text_decl {
                        return Err(self.error_at(
                            Reason::InvalidXmlDecl("version must come first"),
                            position,
                        ));
                    }
                    if !is_enc_name(&value) {
                        return Err(self.error_at(
                            Reason::InvalidXmlDecl("invalid encoding name"),
                            value_position,
                        ));
                    }
                    info.encoding = Some(value.clone());
                    order = 2;
                    "encoding"
                }
                "standalone" if order < 3 && !text_decl => {
                    if order == 0 {
                        return Err(self.error_at(
                            Reason::InvalidXmlDecl("version must come first"),
                            position,
                        ));
                    }
                    info.standalone = match value.as_str() {
                        "yes" => Some(true),
                        "no" => Some(false),
                        _ => {
                            return Err(self.error_at(
                                Reason::InvalidXmlDecl("standalone must be yes or no"),
                                value_position,
                            ))
                        }
                    };
                    order = 3;
                    "standalone"
                }
                _ => {
                    return Err(self.error_at(
                        Reason::InvalidXmlDecl("unexpected pseudo attribute"),
                        position,
                    ))
                }
            };
            info.pseudo.push(PseudoAttr {
                name,
                value,
                quote: quote as char,
                position,
                value_position,
            });
        }
        if text_decl && info.encoding.is_none() {
            return Err(self.error(Reason::InvalidXmlDecl(
                "text declaration requires an encoding",
            )));
        }
        if !text_decl && order == 0 {
            return Err(self.error(Reason::InvalidXmlDecl("version is required")));
        }
        info.raw = self.slice(raw_start, raw_end).trim().to_string();
        Ok(info)
    }

    /// Consume an optional text declaration at the start of an external
    /// entity and apply its encoding.
    pub(crate) fn parse_text_decl(&mut self) -> Result<()> {
        if self.at_xml_decl()? {
            self.buf.pos += 5;
            let info = self.parse_decl_body(true)?;
            if let Some(label) = &info.encoding {
                if let Err(reason) = self.buf.declare_encoding(label) {
                    return Err(self.error(reason));
                }
            }
        }
        self.buf.end_probe();
        Ok(())
    }

    /// Scan up to `delim`, checking characters. Returns the absolute range
    /// of the content; the cursor is left in front of `delim`.
    pub(crate) fn scan_until(&mut self, delim: &str, what: &'static str) -> Result<(usize, usize)> {
        let start = self.buf.abs_pos();
        loop {
            let window = self.buf.window();
            let found_at = memchr::memmem::find(window.as_bytes(), delim.as_bytes());
            let (checked, found) = match found_at {
                Some(i) => (i, true),
                None => {
                    let mut safe = window.len().saturating_sub(delim.len() - 1);
                    while !window.is_char_boundary(safe) {
                        safe -= 1;
                    }
                    (safe, false)
                }
            };
            if self.settings.check_characters {
                if let Some((offset, c)) = window[..checked]
                    .char_indices()
                    .find(|(_, c)| !c.is_xml_char())
                {
                    self.buf.pos += offset;
                    return Err(self.error(Reason::IllegalChar(c as u32)));
                }
            }
            self.buf.pos += checked;
            if found {
                return Ok((start, self.buf.abs_pos()));
            }
            if self.refill()? == 0 {
                return Err(self.error(Reason::UnexpectedEof(what)));
            }
        }
    }

    /// Comment after `<!--`. Returns the absolute range of its text.
    pub(crate) fn scan_comment(&mut self) -> Result<(usize, usize)> {
        let range = self.scan_until("--", "comment")?;
        if !self.eat("-->")? {
            return Err(self.error(Reason::DoubleHyphenInComment));
        }
        Ok(range)
    }

    /// Processing instruction after `<?`. Returns the absolute ranges of
    /// target and data.
    pub(crate) fn scan_pi(&mut self) -> Result<((usize, usize), (usize, usize))> {
        let target = self.scan_name()?;
        if self.slice(target.0, target.1).eq_ignore_ascii_case("xml") {
            let reason = if self.slice(target.0, target.1) == "xml" {
                Reason::MisplacedXmlDecl
            } else {
                Reason::ReservedPiTarget
            };
            let position = self.buf.position_of(target.0);
            return Err(self.error_at(reason, position));
        }
        let data_start = self.buf.abs_pos();
        if self.eat("?>")? {
            return Ok((target, (data_start, data_start)));
        }
        self.require_whitespace()?;
        let data = self.scan_until("?>", "processing instruction")?;
        self.buf.pos += 2;
        Ok((target, data))
    }

    /// CDATA section after `<![CDATA[`.
    pub(crate) fn scan_cdata(&mut self) -> Result<(usize, usize)> {
        let range = self.scan_until("]]>", "CDATA section")?;
        self.buf.pos += 3;
        Ok(range)
    }

    /// End tag after `</`. Returns the absolute range of the name.
    pub(crate) fn scan_end_tag(&mut self) -> Result<(usize, usize)> {
        let name = self.scan_name()?;
        self.skip_whitespace()?;
        self.expect(">")?;
        Ok(name)
    }

    /// Start tag after `<`. The element goes into slot `slot`, its
    /// attributes into the following slots. Returns the attribute count and
    /// whether the element is empty.
    pub(crate) fn scan_start_tag(&mut self, slot: usize, position: Position) -> Result<(usize, bool)> {
        let (start, end) = self.scan_name()?;
        let entity_id = self.entities.current_id();
        {
            let name = self.slice(start, end).to_string();
            let node = self.nodes.slot(slot);
            node.reset(NodeKind::Element, slot, position);
            node.set_name(&name);
            node.entity_id = entity_id;
        }
        let mut count = 0;
        loop {
            let had_space = self.skip_whitespace()?;
            match self.peek()? {
                Some(b'>') => {
                    self.buf.pos += 1;
                    return Ok((count, false));
                }
                Some(b'/') => {
                    self.expect("/>")?;
                    self.nodes.slot(slot).empty = true;
                    return Ok((count, true));
                }
                Some(_) if had_space => {}
                Some(_) => return Err(self.unexpected(">")),
                None => return Err(self.error(Reason::UnexpectedEof("start tag"))),
            }

            let attr_position = self.buf.position();
            let (name_start, name_end) = self.scan_name()?;
            let name = self.slice(name_start, name_end).to_string();
            for i in 0..count {
                if self.nodes.get(slot + 1 + i).map_or(false, |n| n.name == name) {
                    return Err(self.error_at(Reason::DuplicateAttribute(name), attr_position));
                }
            }
            self.skip_whitespace()?;
            self.expect("=")?;
            self.skip_whitespace()?;
            let quote = match self.peek()? {
                Some(q @ (b'"' | b'\'')) => q,
                _ => return Err(self.unexpected("quote")),
            };
            self.buf.pos += 1;
            let value_position = self.buf.position();
            let scanned = self.scan_attribute_value(quote)?;

            let attr = self.nodes.slot(slot + 1 + count);
            attr.reset(NodeKind::Attribute, slot + 1, attr_position);
            attr.set_name(&name);
            attr.quote = quote as char;
            attr.value = scanned.value;
            attr.value_position = value_position;
            attr.chunks = scanned.chunks;
            count += 1;
        }
    }

    /// Attribute value after the opening quote; consumes the closing quote.
    pub(crate) fn scan_attribute_value(&mut self, quote: u8) -> Result<ScannedValue> {
        let start = self.buf.abs_pos();
        let mut run_start = start;
        let mut acc: Option<String> = None;
        let mut chunks = Vec::new();
        let mut chunk_from = 0;
        let keep_chunks = !self.settings.expand_entities();

        loop {
            let bytes = self.buf.text.as_bytes();
            let mut i = self.buf.pos;
            while i < bytes.len() && bytes[i].is_xml_attr_run() {
                i += 1;
            }
            self.buf.pos = i;
            if self.buf.remaining() == 0 {
                if self.refill()? == 0 {
                    return Err(self.error(Reason::UnexpectedEof("attribute value")));
                }
                continue;
            }

            match self.buf.text.as_bytes()[self.buf.pos] {
                b if b == quote => break,
                b'"' | b'\'' => self.buf.pos += 1,
                b'<' => return Err(self.error(Reason::LtInAttributeValue)),
                b'&' => {
                    let amp = self.buf.abs_pos();
                    let reference = self.scan_reference()?;
                    let out = acc.get_or_insert_with(String::new);
                    out.push_str(&self.buf.text[run_start - self.buf.base..amp - self.buf.base]);
                    match reference {
                        Reference::Char(c) => out.push(c),
                        Reference::Named(name_start, name_end) => {
                            let name = self.slice(name_start, name_end).to_string();
                            let mut out = acc.take().unwrap_or_default();
                            match self.resolve_general(&name, RefContext::Attribute)? {
                                EntityOutcome::Character(c) => out.push(c),
                                EntityOutcome::ExpandedInAttribute(decl) => {
                                    if keep_chunks {
                                        if out.len() > chunk_from {
                                            chunks.push(AttrChunk::Text(out[chunk_from..].to_string()));
                                        }
                                        chunks.push(AttrChunk::EntityRef(name));
                                    }
                                    self.expand_in_attribute(&decl, &mut out)?;
                                    if keep_chunks {
                                        chunk_from = out.len();
                                    }
                                }
                                EntityOutcome::Unexpanded | EntityOutcome::Skipped => {
                                    if out.len() > chunk_from {
                                        chunks.push(AttrChunk::Text(out[chunk_from..].to_string()));
                                    }
                                    chunks.push(AttrChunk::EntityRef(name));
                                    chunk_from = out.len();
                                }
                                EntityOutcome::Expanded(_) => {}
                            }
                            acc = Some(out);
                        }
                    }
                    run_start = self.buf.abs_pos();
                }
                b'\t' | b'\n' | b'\r' => {
                    if self.settings.normalization {
                        let here = self.buf.abs_pos();
                        let out = acc.get_or_insert_with(String::new);
                        out.push_str(&self.buf.text[run_start - self.buf.base..here - self.buf.base]);
                        out.push(' ');
                        self.buf.pos += 1;
                        run_start = self.buf.abs_pos();
                    } else {
                        self.buf.pos += 1;
                    }
                }
                b if b.is_ascii() => {
                    self.check_char(b as char)?;
                    self.buf.pos += 1;
                }
                _ => {
                    self.next_char()?;
                }
            }
        }

        let end = self.buf.abs_pos();
        self.buf.pos += 1;
        let value = match acc {
            Some(mut out) => {
                out.push_str(&self.buf.text[run_start - self.buf.base..end - self.buf.base]);
                if !chunks.is_empty() && out.len() > chunk_from {
                    chunks.push(AttrChunk::Text(out[chunk_from..].to_string()));
                }
                Value::Owned(out)
            }
            None => Value::Slice {
                start: start - self.buf.base,
                end: end - self.buf.base,
            },
        };
        Ok(ScannedValue { value, chunks })
    }

    /// Make sure the whole document type declaration is buffered, so that
    /// its parser never runs out of pushed input. The cursor is behind
    /// `<!DOCTYPE` and is not moved.
    pub(crate) fn prescan_doctype(&mut self) -> Result<()> {
        let mut i = self.buf.abs_pos();
        let mut quote: Option<u8> = None;
        let mut brackets = 0usize;
        loop {
            if !self.available_from(i, 4)? && i - self.buf.base >= self.buf.text.len() {
                return Ok(());
            }
            let idx = i - self.buf.base;
            let rest = &self.buf.text.as_bytes()[idx..];
            let b = rest[0];
            if let Some(q) = quote {
                if b == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match b {
                b'"' | b'\'' => quote = Some(b),
                b'[' => brackets += 1,
                b']' => brackets = brackets.saturating_sub(1),
                b'>' if brackets == 0 => return Ok(()),
                b'<' if rest.starts_with(b"<!--") => {
                    i = self.find_from(i + 4, "-->")?;
                    continue;
                }
                b'<' if rest.starts_with(b"<?") => {
                    i = self.find_from(i + 2, "?>")?;
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Refill until `n` bytes from absolute offset `abs` are buffered.
    /// Returns `false` if the entity ends before.
    fn available_from(&mut self, abs: usize, n: usize) -> Result<bool> {
        while self.buf.base + self.buf.text.len() < abs + n {
            if self.refill()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Absolute offset behind the next `pat` at or after `abs`, or the end
    /// of the entity.
    fn find_from(&mut self, abs: usize, pat: &str) -> Result<usize> {
        let mut from = abs;
        loop {
            let idx = from - self.buf.base;
            if idx <= self.buf.text.len() {
                if let Some(found) = self.buf.text[idx..].find(pat) {
                    return Ok(from + found + pat.len());
                }
                from = (self.buf.base + self.buf.text.len()).saturating_sub(pat.len()).max(from);
            }
            if self.refill()? == 0 {
                return Ok(self.buf.base + self.buf.text.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_names() {
        assert!(is_enc_name("UTF-8"));
        assert!(is_enc_name("ISO-8859-1"));
        assert!(is_enc_name("x.y_z"));
        assert!(!is_enc_name("8bit"));
        assert!(!is_enc_name(""));
    }

    #[test]
    fn versions() {
        assert!(is_supported_version("1.0"));
        assert!(is_supported_version("1.1"));
        assert!(is_supported_version("1.10"));
        assert!(!is_supported_version("2.0"));
        assert!(!is_supported_version("1."));
    }
}
