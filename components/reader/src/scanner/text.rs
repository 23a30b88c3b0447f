//! Character data between markup

use xtr_chars::{XmlAsciiChar, XmlChar};

use crate::error::{Position, Reason, Result};
use crate::node::Value;
use crate::reader::Reader;
use crate::resolve::{EntityOutcome, PendingReference, RefContext, Reference};

/// Bits of `' '`, `'\t'`, `'\n'` and `'\r'`
const WHITESPACE_BITS: u8 = 0x2F;

/// Character data scanned so far; survives a pending input error so the
/// scan resumes where it stopped.
pub(crate) struct TextProgress {
    /// Characters from earlier entities and replaced references
    acc: String,
    owned: bool,
    /// Absolute start of the run of the current buffer not yet in `acc`
    run_start: usize,
    /// OR of all characters
    mask: u8,
    position: Position,
    /// Absolute end of the text when it was cut by a reference
    cut: Option<usize>,
}

/// Why scanning character data stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextEnd {
    Markup,
    /// Entity reference that is reported as its own node; it was consumed
    /// and waits in `pending_reference`
    Reference,
    /// End of an entity whose end is reported as its own node
    EntityEnd,
    Eof,
    /// Buffered input ran out inside character data that is reported in
    /// pieces
    Buffered,
}

pub(crate) struct ScannedText {
    pub value: Value,
    pub position: Position,
    pub whitespace: bool,
    /// `false` when more of the same character data follows
    pub complete: bool,
}

impl TextProgress {
    fn flush(&mut self, text: &str) {
        self.acc.push_str(text);
        self.owned = true;
    }
}

impl Reader {
    /// Scan character data starting at the cursor, expanding references
    /// that are replaced in place. Returns `None` when there is none.
    ///
    /// With partial text enabled, scanning stops at the end of the buffered
    /// input once the data is known not to be whitespace; the next call
    /// continues behind the returned piece.
    pub(crate) fn scan_text(&mut self) -> Result<Option<ScannedText>> {
        let mut progress = match self.text.take() {
            Some(progress) => progress,
            None => {
                let position = self.buf.position();
                TextProgress {
                    acc: String::new(),
                    owned: false,
                    run_start: self.buf.abs_pos(),
                    mask: 0,
                    position,
                    cut: None,
                }
            }
        };
        let end = match self.scan_text_from(&mut progress) {
            Ok(end) => end,
            Err(err) if err.is_pending() => {
                self.text = Some(progress);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let run_end = progress.cut.unwrap_or_else(|| self.buf.abs_pos());
        let run = self.slice(progress.run_start, run_end);
        let value = if progress.owned {
            progress.acc.push_str(run);
            if progress.acc.is_empty() {
                return Ok(None);
            }
            Value::Owned(progress.acc)
        } else {
            if run.is_empty() {
                return Ok(None);
            }
            Value::Slice {
                start: progress.run_start - self.buf.base,
                end: run_end - self.buf.base,
            }
        };
        let whitespace = progress.mask & !WHITESPACE_BITS == 0
            && value.as_str(&self.buf.text).bytes().all(|b| b.is_xml_whitespace());
        let complete = end != TextEnd::Buffered;
        if !complete {
            self.text = Some(TextProgress {
                acc: String::new(),
                owned: false,
                run_start: run_end,
                mask: progress.mask,
                position: progress.position,
                cut: None,
            });
        }
        Ok(Some(ScannedText {
            value,
            position: progress.position,
            whitespace,
            complete,
        }))
    }

    fn scan_text_from(&mut self, progress: &mut TextProgress) -> Result<TextEnd> {
        loop {
            let bytes = self.buf.text.as_bytes();
            let mut i = self.buf.pos;
            let mut mask = 0u8;
            while i < bytes.len() && bytes[i].is_xml_text_run() {
                mask |= bytes[i];
                i += 1;
            }
            self.buf.pos = i;
            progress.mask |= mask;

            if self.buf.remaining() == 0 {
                if self.settings.partial_text
                    && progress.mask & !WHITESPACE_BITS != 0
                    && (!progress.acc.is_empty() || self.buf.abs_pos() > progress.run_start)
                {
                    return Ok(TextEnd::Buffered);
                }
                if self.refill()? > 0 {
                    continue;
                }
                if self.entities.depth() == 0 {
                    return Ok(TextEnd::Eof);
                }
                if self.entities.current().reported {
                    return Ok(TextEnd::EntityEnd);
                }
                let run = self.slice_to_cursor(progress.run_start).to_string();
                progress.flush(&run);
                self.leave_entity()?;
                progress.run_start = self.buf.abs_pos();
                continue;
            }

            match self.buf.text.as_bytes()[self.buf.pos] {
                b'<' => return Ok(TextEnd::Markup),
                b'&' => {
                    let start = self.buf.abs_pos();
                    match self.scan_reference()? {
                        Reference::Char(c) => {
                            let run = self.slice(progress.run_start, start).to_string();
                            progress.flush(&run);
                            progress.acc.push(c);
                            progress.run_start = self.buf.abs_pos();
                            progress.mask |= if c.is_ascii() { c as u8 } else { 0x80 };
                        }
                        Reference::Named(name_start, name_end) => {
                            let name = self.slice(name_start, name_end).to_string();
                            let outcome = self.resolve_general(&name, RefContext::Content)?;
                            match outcome {
                                EntityOutcome::Character(c) => {
                                    let run = self.slice(progress.run_start, start).to_string();
                                    progress.flush(&run);
                                    progress.acc.push(c);
                                    progress.run_start = self.buf.abs_pos();
                                    progress.mask |= c as u8;
                                }
                                EntityOutcome::Expanded(decl) => {
                                    let run = self.slice(progress.run_start, start).to_string();
                                    progress.flush(&run);
                                    if let Some(decl) = decl {
                                        self.enter_entity(&decl, false)?;
                                    }
                                    progress.run_start = self.buf.abs_pos();
                                }
                                EntityOutcome::Unexpanded | EntityOutcome::Skipped => {
                                    let position = self.buf.position_of(name_start);
                                    self.pending_reference = Some(PendingReference {
                                        name,
                                        position,
                                    });
                                    progress.cut = Some(start);
                                    return Ok(TextEnd::Reference);
                                }
                                EntityOutcome::ExpandedInAttribute(_) => {
                                    return Err(self.error(Reason::InvalidOperation(
                                        "attribute expansion in content",
                                    )))
                                }
                            }
                        }
                    }
                }
                b']' => {
                    if self.at("]]>")? {
                        return Err(self.error(Reason::CDataEndInContent));
                    }
                    self.buf.pos += 1;
                    progress.mask |= b']';
                }
                b if b.is_ascii() => {
                    // '\r' only survives in entity text from character references
                    if b != b'\r' {
                        self.check_char(b as char)?;
                    }
                    self.buf.pos += 1;
                    progress.mask |= b;
                }
                _ => {
                    if let Some(c) = self.buf.window().chars().next() {
                        if self.settings.check_characters && !c.is_xml_char() {
                            return Err(self.error(Reason::IllegalChar(c as u32)));
                        }
                        self.buf.pos += c.len_utf8();
                    }
                    progress.mask |= 0x80;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::node::NodeKind;
    use crate::reader::Reader;
    use crate::settings::ReaderSettings;

    fn text_of(input: &str, buffer_size: usize) -> (NodeKind, String) {
        let mut reader = Reader::from_str(
            input,
            ReaderSettings::default().with_buffer_size(buffer_size),
        );
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        (reader.node_kind(), reader.value().to_string())
    }

    #[test]
    fn text_across_refills() {
        for size in [1, 2, 3, 7, 64] {
            assert_eq!(
                (NodeKind::Text, "hello wörld".to_string()),
                text_of("<a>hello wörld</a>", size)
            );
        }
    }

    #[test]
    fn references_in_text() {
        assert_eq!(
            (NodeKind::Text, "a<b&c\u{10000}".to_string()),
            text_of("<a>a&lt;b&amp;c&#x10000;</a>", 4)
        );
    }

    #[test]
    fn replaced_references_are_not_repeated() {
        for size in [1, 2, 5, 64] {
            assert_eq!(
                (NodeKind::Text, "xAy<zA".to_string()),
                text_of("<a>x&#65;y&lt;z&#x41;</a>", size)
            );
        }
        let mut reader = Reader::from_str(
            "<!DOCTYPE r [<!ENTITY e 'a&#x10000;b'>]><r>&e;&#65;&#x41;</r>",
            ReaderSettings::default(),
        );
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert_eq!("a\u{10000}bAA", reader.value());
    }

    #[test]
    fn whitespace_is_classified() {
        let (kind, value) = text_of("<a> \n\t</a>", 64);
        assert_eq!(NodeKind::Whitespace, kind);
        assert_eq!(" \n\t", value);
        assert_eq!(NodeKind::Text, text_of("<a> ! </a>", 64).0);
    }

    #[test]
    fn cdata_end_is_rejected() {
        let mut reader = Reader::from_str("<a>x]]>y</a>", ReaderSettings::default());
        assert!(reader.read().unwrap());
        assert!(reader.read().is_err());
    }
}
