//! Reading node values in pieces: plain character chunks, base64 and
//! hex-binary decoded content

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use log::trace;
use xtr_chars::XmlAsciiChar;

use crate::error::{Reason, Result};
use crate::node::{NodeKind, Value};

use super::{ParsingState, Reader};

/// Standard alphabet; the final quantum may be padded or not
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryKind {
    Base64,
    Hex,
}

impl BinaryKind {
    fn name(self) -> &'static str {
        match self {
            BinaryKind::Base64 => "base64",
            BinaryKind::Hex => "hex-binary",
        }
    }

    /// Characters that decode to a whole number of bytes
    fn unit(self) -> usize {
        match self {
            BinaryKind::Base64 => 4,
            BinaryKind::Hex => 2,
        }
    }
}

/// Decoder state of a binary read that spans several calls
pub(crate) struct BinaryRead {
    kind: BinaryKind,
    /// Reading the content of an element, which ends at its end tag
    element: Option<usize>,
    /// Characters not decoded yet, whitespace removed
    pending: String,
    decoded: Vec<u8>,
    offset: usize,
    /// Padding was seen; only whitespace may follow
    padded: bool,
    /// All content was decoded
    done: bool,
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl BinaryRead {
    fn new(kind: BinaryKind, element: Option<usize>) -> Self {
        Self {
            kind,
            element,
            pending: String::new(),
            decoded: Vec::new(),
            offset: 0,
            padded: false,
            done: false,
        }
    }

    /// Add content characters and decode every complete unit.
    fn feed(&mut self, text: &str) -> std::result::Result<(), Reason> {
        for c in text.chars() {
            if c.is_ascii() && (c as u8).is_xml_whitespace() {
                continue;
            }
            if !c.is_ascii() || (self.padded && c != '=') {
                return Err(Reason::InvalidBinaryContent(self.kind.name()));
            }
            if c == '=' && self.kind == BinaryKind::Base64 {
                self.padded = true;
            }
            self.pending.push(c);
        }
        let unit = self.kind.unit();
        let complete = self.pending.len() / unit * unit;
        if complete > 0 && !self.padded {
            self.decode(complete)?;
        }
        Ok(())
    }

    /// Decode what is left at the end of the content.
    fn finish(&mut self) -> std::result::Result<(), Reason> {
        if !self.pending.is_empty() {
            self.decode(self.pending.len())?;
        }
        self.done = true;
        Ok(())
    }

    fn decode(&mut self, len: usize) -> std::result::Result<(), Reason> {
        if self.offset == self.decoded.len() {
            self.decoded.clear();
            self.offset = 0;
        }
        let input = &self.pending[..len];
        match self.kind {
            BinaryKind::Base64 => BASE64
                .decode_vec(input, &mut self.decoded)
                .map_err(|_| Reason::InvalidBinaryContent("base64"))?,
            BinaryKind::Hex => {
                if len % 2 != 0 {
                    return Err(Reason::InvalidBinaryContent("hex-binary"));
                }
                for pair in input.as_bytes().chunks(2) {
                    match (hex_digit(pair[0]), hex_digit(pair[1])) {
                        (Some(hi), Some(lo)) => self.decoded.push(hi << 4 | lo),
                        _ => return Err(Reason::InvalidBinaryContent("hex-binary")),
                    }
                }
            }
        }
        self.pending.drain(..len);
        Ok(())
    }

    /// Copy decoded bytes into `out`.
    fn drain(&mut self, out: &mut [u8]) -> usize {
        let n = (self.decoded.len() - self.offset).min(out.len());
        out[..n].copy_from_slice(&self.decoded[self.offset..self.offset + n]);
        self.offset += n;
        n
    }
}

impl Reader {
    /// Copy up to `max_chars` characters of the value of the current node
    /// into `out`, continuing where the previous call stopped. Returns the
    /// number of characters copied; zero once the value is exhausted.
    ///
    /// Character data reported in pieces is scanned on demand, so only the
    /// piece being copied is held in memory.
    pub fn read_value_chunk(&mut self, max_chars: usize, out: &mut String) -> Result<usize> {
        if self.binary.is_some() {
            return Err(self.error(Reason::InvalidOperation(
                "binary read in progress",
            )));
        }
        let mut count = 0;
        let res = self.read_value_chunk_inner(max_chars, out, &mut count);
        match res {
            Err(err) if err.is_pending() && count > 0 => {
                // copied characters are not lost; the next call resumes
                self.suspend();
                Ok(count)
            }
            res => self.outcome(res).map(|_| count),
        }
    }

    fn read_value_chunk_inner(
        &mut self,
        max_chars: usize,
        out: &mut String,
        count: &mut usize,
    ) -> Result<()> {
        loop {
            let rest = match self.current_node() {
                Some(node) if node.kind.has_value() => {
                    &node.value.as_str(&self.buf.text)[self.chunk_offset..]
                }
                _ => return Ok(()),
            };
            let (n, len) = rest
                .char_indices()
                .take(max_chars - *count)
                .fold((0, 0), |(n, _), (i, c)| (n + 1, i + c.len_utf8()));
            let exhausted = len == rest.len();
            out.push_str(&rest[..len]);
            self.chunk_offset += len;
            *count += n;
            if matches!(
                self.state,
                ParsingState::DocumentContent | ParsingState::ElementContent
            ) {
                self.resume = self.state;
                self.state = ParsingState::PartialValue;
            }
            if *count == max_chars || !exhausted || !self.next_text_piece()? {
                return Ok(());
            }
        }
    }

    /// Replace the value of the current text node by the next piece of its
    /// character data. Returns `false` when the character data has ended.
    pub(crate) fn next_text_piece(&mut self) -> Result<bool> {
        if self.state != ParsingState::PartialText {
            return Ok(false);
        }
        let scanned = self.scan_text()?;
        let slot = self.cur;
        self.chunk_offset = 0;
        let piece = match scanned {
            Some(text) => {
                if text.complete {
                    self.state = self.content_state();
                }
                trace!("text piece of {} bytes", text.value.as_str(&self.buf.text).len());
                self.nodes.slot(slot).value = text.value;
                true
            }
            None => {
                self.state = self.content_state();
                self.nodes.slot(slot).value = Value::default();
                false
            }
        };
        self.commit();
        Ok(piece)
    }

    /// Decode base64 content starting at the current text node or
    /// attribute. Text nodes are read until a node that is neither text nor
    /// a comment, processing instruction or entity boundary; the reader
    /// stays on that node. Returns zero when the content is exhausted.
    pub fn read_content_as_base64(&mut self, out: &mut [u8]) -> Result<usize> {
        let res = self.read_binary(BinaryKind::Base64, false, out);
        self.outcome(res)
    }

    pub fn read_content_as_bin_hex(&mut self, out: &mut [u8]) -> Result<usize> {
        let res = self.read_binary(BinaryKind::Hex, false, out);
        self.outcome(res)
    }

    /// Decode the base64 content of the element the reader is positioned
    /// on. Once the content is exhausted the reader is behind its end tag.
    pub fn read_element_content_as_base64(&mut self, out: &mut [u8]) -> Result<usize> {
        let res = self.read_binary(BinaryKind::Base64, true, out);
        self.outcome(res)
    }

    pub fn read_element_content_as_bin_hex(&mut self, out: &mut [u8]) -> Result<usize> {
        let res = self.read_binary(BinaryKind::Hex, true, out);
        self.outcome(res)
    }

    fn read_binary(&mut self, kind: BinaryKind, element: bool, out: &mut [u8]) -> Result<usize> {
        let mut read = match self.binary.take() {
            Some(read) if read.kind == kind && read.element.is_some() == element => read,
            Some(_) => {
                return Err(self.error(Reason::InvalidOperation(
                    "binary read of another kind in progress",
                )))
            }
            None => match self.start_binary(kind, element)? {
                Some(read) => read,
                None => return Ok(0),
            },
        };

        let mut written = 0;
        let res = loop {
            written += read.drain(&mut out[written..]);
            if written == out.len() || read.done {
                break Ok(());
            }
            if let Err(err) = self.next_binary_node(&mut read) {
                break Err(err);
            }
        };
        let done = read.done;
        self.binary = Some(read);
        match res {
            Ok(()) => {
                if !done && self.state != ParsingState::BinaryContent {
                    self.resume = self.state;
                    self.state = ParsingState::BinaryContent;
                }
                Ok(written)
            }
            Err(err) if err.is_pending() && written > 0 => {
                // delivered bytes are not lost; the next call resumes
                self.suspend();
                Ok(written)
            }
            Err(err) => Err(err),
        }
    }

    /// Check the current node and feed its value. `None` when there is
    /// nothing to decode.
    fn start_binary(&mut self, kind: BinaryKind, element: bool) -> Result<Option<BinaryRead>> {
        let node_kind = self.node_kind();
        if element {
            if node_kind != NodeKind::Element {
                return Err(self.error(Reason::InvalidOperation(
                    "element content read requires an element",
                )));
            }
            let depth = self.depth();
            if self.is_empty_element() {
                self.advance()?;
                return Ok(None);
            }
            trace!("{} read of element {}", kind.name(), self.name());
            let mut read = BinaryRead::new(kind, Some(depth));
            self.next_binary_node(&mut read)?;
            return Ok(Some(read));
        }

        match node_kind {
            NodeKind::Attribute => {
                let mut read = BinaryRead::new(kind, None);
                let value = &self.value()[self.chunk_offset..];
                read.feed(value)
                    .and_then(|_| read.finish())
                    .map_err(|reason| self.error_at(reason, self.value_position()))?;
                Ok(Some(read))
            }
            k if k.is_text_like() => {
                let mut read = BinaryRead::new(kind, None);
                let position = self.current_node().map(|node| node.position);
                let value = &self.value()[self.chunk_offset..];
                if let Err(reason) = read.feed(value) {
                    let position = position.unwrap_or_default();
                    return Err(self.error_at(reason, position));
                }
                Ok(Some(read))
            }
            NodeKind::Element => Err(self.error(Reason::InvalidOperation(
                "content read on an element; use the element content reader",
            ))),
            _ => Ok(None),
        }
    }

    /// Move to the next node of the content and feed it, or finish decoding
    /// when the content ends.
    fn next_binary_node(&mut self, read: &mut BinaryRead) -> Result<()> {
        loop {
            if self.state == ParsingState::BinaryContent {
                self.state = self.resume;
            }
            if self.next_text_piece()? {
                let position = self.current_node().map(|node| node.position);
                if let Err(reason) = read.feed(self.value()) {
                    return Err(self.error_at(reason, position.unwrap_or_default()));
                }
                return Ok(());
            }
            if !self.advance()? {
                return self.end_binary(read);
            }
            match self.node_kind() {
                k if k.is_text_like() => {
                    let position = self.current_node().map(|node| node.position);
                    if let Err(reason) = read.feed(self.value()) {
                        return Err(self.error_at(reason, position.unwrap_or_default()));
                    }
                    return Ok(());
                }
                NodeKind::Comment | NodeKind::ProcessingInstruction | NodeKind::EndEntity => {}
                NodeKind::EntityReference => self.resolve_entity_inner()?,
                _ => return self.end_binary(read),
            }
        }
    }

    fn end_binary(&mut self, read: &mut BinaryRead) -> Result<()> {
        if let Some(depth) = read.element {
            if self.node_kind() != NodeKind::EndElement || self.depth() != depth {
                return Err(self.error(Reason::InvalidOperation(
                    "element content is not text only",
                )));
            }
        }
        if let Err(reason) = read.finish() {
            return Err(self.error(reason));
        }
        if read.element.is_some() {
            self.advance()?;
        }
        Ok(())
    }
}
