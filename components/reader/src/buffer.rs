//! Refillable character buffer of one entity

use std::collections::VecDeque;
use std::io::{self, Read};

use log::{debug, trace};

use crate::encoding::{self, Family, TextDecoder};
use crate::error::{Position, Reason};

/// Raw bytes kept back while probing for an XML declaration before decoding
/// is forced anyway.
const MAX_PROBE: usize = 1 << 16;

/// Where the characters of an entity come from
pub(crate) enum Source {
    /// Already decoded text, handed out in chunks
    Text { text: String, pos: usize },
    Bytes(Box<dyn Read>),
    /// Bytes fed by the caller
    Push(PushInput),
}

#[derive(Default)]
pub(crate) struct PushInput {
    data: VecDeque<u8>,
    finished: bool,
}

impl PushInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() {
            return if self.finished {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Source {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Bytes(reader) => loop {
                match reader.read(buf) {
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    res => return res,
                }
            },
            Source::Push(push) => push.read(buf),
            Source::Text { .. } => Ok(0),
        }
    }
}

/// State of the buffer of the entity being read
///
/// Positions handed out to other modules are either indices into `text` or
/// absolute offsets (`base` + index); the latter stay valid across
/// compaction.
pub(crate) struct BufferState {
    pub text: String,
    /// Read cursor, index into `text`
    pub pos: usize,
    /// Number of bytes discarded from the front of `text`
    pub base: usize,
    /// Absolute offset of the last committed node boundary; text from here
    /// on survives compaction
    pub mark: usize,

    line: usize,
    /// Absolute offset of the first character of the current line
    line_start: usize,
    /// Line feeds before this absolute offset are counted in `line`
    line_scan: usize,
    /// Column offset of `text[0]` within its line
    base_column: usize,

    source: Source,
    chunk_size: usize,
    decoder: Option<TextDecoder>,
    family: Family,
    has_bom: bool,
    forced_encoding: Option<String>,
    raw: Vec<u8>,
    source_done: bool,
    /// Decoding stops after the first `>` until the XML declaration was seen
    probing: bool,
    pending_cr: bool,
    /// Text has no carriage returns left to normalize
    pub normalized: bool,
    pub base_uri: Option<String>,
}

impl BufferState {
    fn with_source(source: Source, chunk_size: usize, base_uri: Option<String>) -> Self {
        Self {
            text: String::new(),
            pos: 0,
            base: 0,
            mark: 0,
            line: 1,
            line_start: 0,
            line_scan: 0,
            base_column: 0,
            source,
            chunk_size: chunk_size.max(1),
            decoder: None,
            family: Family::AsciiCompatible,
            has_bom: false,
            forced_encoding: None,
            raw: Vec::new(),
            source_done: false,
            probing: false,
            pending_cr: false,
            normalized: false,
            base_uri,
        }
    }

    pub fn from_text(
        text: String,
        chunk_size: usize,
        base_uri: Option<String>,
        normalized: bool,
    ) -> Self {
        let mut state = Self::with_source(Source::Text { text, pos: 0 }, chunk_size, base_uri);
        state.normalized = normalized;
        state
    }

    pub fn from_reader(
        reader: Box<dyn Read>,
        chunk_size: usize,
        base_uri: Option<String>,
        encoding: Option<String>,
    ) -> Self {
        let mut state = Self::with_source(Source::Bytes(reader), chunk_size, base_uri);
        state.probing = true;
        state.forced_encoding = encoding;
        state
    }

    pub fn for_push(chunk_size: usize, base_uri: Option<String>, encoding: Option<String>) -> Self {
        let mut state =
            Self::with_source(Source::Push(PushInput::default()), chunk_size, base_uri);
        state.probing = true;
        state.forced_encoding = encoding;
        state
    }

    /// Empty state used as a placeholder while frames are swapped.
    pub fn empty() -> Self {
        let mut state = Self::from_text(String::new(), 1, None, true);
        state.source_done = true;
        state
    }

    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        match &mut self.source {
            Source::Push(push) if !push.finished => {
                push.data.extend(bytes);
                true
            }
            _ => false,
        }
    }

    pub fn finish_input(&mut self) {
        if let Source::Push(push) = &mut self.source {
            push.finished = true;
        }
    }

    #[inline]
    pub fn window(&self) -> &str {
        &self.text[self.pos..]
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.text.len() - self.pos
    }

    #[inline]
    pub fn abs(&self, idx: usize) -> usize {
        self.base + idx
    }

    #[inline]
    pub fn abs_pos(&self) -> usize {
        self.base + self.pos
    }

    pub fn encoding_name(&self) -> &'static str {
        match &self.decoder {
            Some(decoder) => decoder.name(),
            None => "UTF-8",
        }
    }

    /// Stop holding back bytes for an XML declaration.
    pub fn end_probe(&mut self) {
        self.probing = false;
    }

    /// Apply the encoding named in an XML or text declaration.
    pub fn declare_encoding(&mut self, label: &str) -> Result<(), Reason> {
        self.probing = false;
        if self.forced_encoding.is_some() {
            return Ok(());
        }
        let decoder = match &self.decoder {
            Some(decoder) => decoder,
            // decoded text source: nothing to switch
            None => return Ok(()),
        };
        if let Some(next) = encoding::switch_encoding(self.family, self.has_bom, decoder, label)? {
            debug!("switching decoder from {} to {}", decoder.name(), next.name());
            self.decoder = Some(next);
        }
        Ok(())
    }

    /// Decode the next chunk without touching `text`.
    ///
    /// Returns `Ok(None)` when the source is exhausted, otherwise a chunk
    /// that is never empty.
    pub fn fetch(&mut self) -> Result<Option<String>, Reason> {
        loop {
            match self.fetch_chunk()? {
                // only a held back carriage return
                Some(chunk) if chunk.is_empty() => continue,
                res => return Ok(res),
            }
        }
    }

    fn fetch_chunk(&mut self) -> Result<Option<String>, Reason> {
        if let Source::Text { text, pos } = &mut self.source {
            if *pos >= text.len() {
                self.source_done = true;
                return Ok(self.finish_pending_cr());
            }
            let mut end = (*pos + self.chunk_size).min(text.len());
            while !text.is_char_boundary(end) {
                end += 1;
            }
            let chunk = text[*pos..end].to_string();
            *pos = end;
            let last = end >= text.len();
            return Ok(Some(self.normalize_newlines(chunk, last)));
        }

        loop {
            if self.decoder.is_none() {
                if self.raw.len() < 4 && !self.source_done {
                    self.read_raw()?;
                    continue;
                }
                self.start_decoding()?;
            }

            if !self.raw.is_empty() {
                let limit = if self.probing && !self.source_done {
                    match encoding::probe_len(self.family, &self.raw) {
                        Some(len) => len,
                        None if self.raw.len() < MAX_PROBE => {
                            self.read_raw()?;
                            continue;
                        }
                        None => {
                            self.probing = false;
                            self.raw.len()
                        }
                    }
                } else {
                    self.raw.len()
                };

                let mut out = String::new();
                let last = self.source_done && limit == self.raw.len();
                if let Some(decoder) = &mut self.decoder {
                    decoder.decode(&self.raw[..limit], &mut out, last)?;
                }
                self.raw.drain(..limit);
                if !out.is_empty() {
                    return Ok(Some(self.normalize_newlines(out, last)));
                }
                continue;
            }

            if self.source_done {
                return Ok(self.finish_pending_cr());
            }
            self.read_raw()?;
        }
    }

    fn start_decoding(&mut self) -> Result<(), Reason> {
        let sniffed = encoding::sniff(&self.raw)?;
        self.has_bom = sniffed.bom_len > 0;
        self.raw.drain(..sniffed.bom_len);
        if let Some(label) = &self.forced_encoding {
            let (family, decoder) = encoding::decoder_for_label(label)?;
            self.family = family;
            self.decoder = Some(decoder);
            self.probing = false;
        } else {
            self.family = sniffed.family;
            self.decoder = Some(TextDecoder::for_family(sniffed.family));
        }
        debug!("detected encoding {}", self.encoding_name());
        Ok(())
    }

    fn read_raw(&mut self) -> Result<(), Reason> {
        let start = self.raw.len();
        self.raw.resize(start + self.chunk_size, 0);
        let res = self.source.read_bytes(&mut self.raw[start..]);
        let n = match res {
            Ok(n) => n,
            Err(err) => {
                self.raw.truncate(start);
                return Err(if err.kind() == io::ErrorKind::WouldBlock {
                    Reason::InputPending
                } else {
                    Reason::Io(err)
                });
            }
        };
        self.raw.truncate(start + n);
        if n == 0 {
            self.source_done = true;
        }
        trace!("read {} bytes", n);
        Ok(())
    }

    fn finish_pending_cr(&mut self) -> Option<String> {
        if self.pending_cr {
            self.pending_cr = false;
            Some("\n".to_string())
        } else {
            None
        }
    }

    /// Replace `\r\n` and lone `\r` by `\n`. A carriage return at the end of
    /// a non-final chunk is held back until the next chunk shows whether a
    /// line feed follows.
    fn normalize_newlines(&mut self, mut chunk: String, last: bool) -> String {
        if self.normalized {
            return chunk;
        }
        if self.pending_cr {
            chunk.insert(0, '\r');
            self.pending_cr = false;
        }
        if memchr::memchr(b'\r', chunk.as_bytes()).is_none() {
            return chunk;
        }
        let mut out = String::with_capacity(chunk.len());
        let mut chars = chunk.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\r' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('\n') => {}
                Some(_) => out.push('\n'),
                None if last => out.push('\n'),
                None => self.pending_cr = true,
            }
        }
        out
    }

    pub fn needs_room(&self, incoming: usize) -> bool {
        self.text.len() + incoming > self.text.capacity()
    }

    /// Discard text before `keep_from` and grow capacity so `incoming` more
    /// bytes fit. Indices into `text` are invalid afterwards.
    pub fn make_room(&mut self, incoming: usize, keep_from: usize) {
        let keep_from = keep_from.min(self.pos);
        if keep_from > 0 {
            self.compact(keep_from);
        }
        if self.needs_room(incoming) {
            let wanted = (self.text.capacity() * 2).max(self.text.len() + incoming);
            self.text.reserve(wanted - self.text.len());
        }
    }

    fn compact(&mut self, keep_from: usize) {
        let cut = self.base + keep_from;
        self.sync_lines(cut);
        self.base_column = if self.line_start < cut {
            self.column_in_line(cut) - 1
        } else {
            0
        };
        self.text.drain(..keep_from);
        self.pos -= keep_from;
        self.base += keep_from;
    }

    pub fn append(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    fn sync_lines(&mut self, abs: usize) {
        if abs <= self.line_scan {
            return;
        }
        let from = self.line_scan - self.base;
        let to = abs - self.base;
        for i in memchr::memchr_iter(b'\n', &self.text.as_bytes()[from..to]) {
            self.line += 1;
            self.line_start = self.base + from + i + 1;
        }
        self.line_scan = abs;
    }

    /// Line and column of an absolute offset inside the buffered text.
    pub fn position_of(&mut self, abs: usize) -> Position {
        let abs = abs.max(self.base).min(self.base + self.text.len());
        if abs >= self.line_scan {
            self.sync_lines(abs);
            return Position::new(self.line, self.column_in_line(abs));
        }
        let idx = abs - self.base;
        let scanned = self.line_scan - self.base;
        let bytes = self.text.as_bytes();
        let back = memchr::memchr_iter(b'\n', &bytes[idx..scanned]).count();
        if back == 0 {
            return Position::new(self.line, self.column_in_line(abs));
        }
        let column = match memchr::memrchr(b'\n', &bytes[..idx]) {
            Some(nl) => self.text[nl + 1..idx].chars().count() + 1,
            None => self.base_column + self.text[..idx].chars().count() + 1,
        };
        Position::new(self.line - back, column)
    }

    fn column_in_line(&self, abs: usize) -> usize {
        let idx = abs - self.base;
        if self.line_start >= self.base {
            self.text[self.line_start - self.base..idx].chars().count() + 1
        } else {
            self.base_column + self.text[..idx].chars().count() + 1
        }
    }

    pub fn position(&mut self) -> Position {
        self.position_of(self.abs_pos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(state: &mut BufferState) -> String {
        let mut all = String::new();
        while let Some(chunk) = state.fetch().unwrap() {
            all.push_str(&chunk);
        }
        all
    }

    #[test]
    fn text_source_in_chunks() {
        let mut state = BufferState::from_text("héllo".to_string(), 2, None, false);
        assert_eq!(Some("hé".to_string()), state.fetch().unwrap());
        assert_eq!("héllo", format!("hé{}", drain(&mut state)));
    }

    #[test]
    fn crlf_split_across_chunks() {
        for size in 1..6 {
            let mut state = BufferState::from_text("a\r\nb\rc\r".to_string(), size, None, false);
            assert_eq!("a\nb\nc\n", drain(&mut state), "chunk size {}", size);
        }
    }

    #[test]
    fn lone_carriage_return_chunk() {
        let mut state = BufferState::from_text("a\r\nb".to_string(), 1, None, false);
        assert_eq!(Some("a".to_string()), state.fetch().unwrap());
        assert_eq!(Some("\n".to_string()), state.fetch().unwrap());
        assert_eq!(Some("b".to_string()), state.fetch().unwrap());
        assert_eq!(None, state.fetch().unwrap());

        let mut state = BufferState::for_push(16, None, None);
        state.end_probe();
        state.feed(b"<a>\r");
        assert_eq!(Some("<a>".to_string()), state.fetch().unwrap());
        assert!(matches!(state.fetch(), Err(Reason::InputPending)));
        state.feed(b"\nb");
        state.finish_input();
        assert_eq!("\nb", drain(&mut state));
    }

    #[test]
    fn normalized_text_untouched() {
        let mut state = BufferState::from_text("a\rb".to_string(), 8, None, true);
        assert_eq!("a\rb", drain(&mut state));
    }

    #[test]
    fn bytes_with_bom() {
        let bytes = b"\xEF\xBB\xBF<a>\xC3\xA9</a>".to_vec();
        let mut state = BufferState::from_reader(Box::new(io::Cursor::new(bytes)), 2, None, None);
        assert_eq!("<a>é</a>", drain(&mut state));
        assert_eq!("UTF-8", state.encoding_name());
    }

    #[test]
    fn probing_stops_at_first_gt() {
        let bytes = b"<?xml version='1.0'?><a>\xE9</a>".to_vec();
        let mut state =
            BufferState::from_reader(Box::new(io::Cursor::new(bytes)), 4096, None, None);
        assert_eq!(
            Some("<?xml version='1.0'?>".to_string()),
            state.fetch().unwrap()
        );
        state.declare_encoding("ISO-8859-1").unwrap();
        assert_eq!("<a>é</a>", drain(&mut state));
    }

    #[test]
    fn push_would_block() {
        let mut state = BufferState::for_push(16, None, None);
        assert!(matches!(state.fetch(), Err(Reason::InputPending)));
        state.feed(b"<a/>");
        state.end_probe();
        state.finish_input();
        assert_eq!("<a/>", drain(&mut state));
        assert_eq!(None, state.fetch().unwrap());
    }

    #[test]
    fn positions_survive_compaction() {
        let mut state = BufferState::from_text("ab\ncd\nef".to_string(), 64, None, true);
        let chunk = state.fetch().unwrap().unwrap();
        state.append(&chunk);
        state.pos = 4;
        assert_eq!(Position::new(2, 2), state.position());
        state.make_room(100, 4);
        assert_eq!(4, state.base);
        assert_eq!(Position::new(2, 2), state.position());
        state.pos = 2;
        assert_eq!(Position::new(3, 1), state.position());
        assert_eq!(Position::new(2, 2), state.position_of(4));
    }
}
