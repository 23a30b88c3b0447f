//! Pull reader over XML documents

use std::io::Read;
use std::rc::Rc;
use std::task::Poll;

use log::debug;

use crate::buffer::BufferState;
use crate::dtd::SchemaInfo;
use crate::entity::EntityStack;
use crate::error::{Position, Reason, Result, ValidationEvent, XmlError};
use crate::names::NameTable;
use crate::namespace::{self, NamespaceStack};
use crate::node::{AttrChunk, Node, NodeArena, NodeKind};
use crate::resolve::PendingReference;
use crate::scanner::text::TextProgress;
use crate::settings::{Conformance, ReaderSettings};

use self::binary::BinaryRead;
use self::validate::Validator;

mod attributes;
mod binary;
mod content;
mod host;
mod validate;

/// What the next call to `read` has to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ParsingState {
    /// Nothing read yet: XML declaration and encoding switch
    XmlDecl,
    DocumentContent,
    ElementContent,
    /// End tag or empty element was reported; its scope is left on the
    /// next read
    PopElement,
    /// End of a resolved entity was reported; its frame is left on the next
    /// read
    PopEntity,
    /// Positioned on an entity reference that was not expanded
    EntityReference,
    /// Iterating over the parts of an attribute value
    AttributeValue,
    /// Value of the current node was partially consumed
    PartialValue,
    /// Positioned on character data whose end was not scanned yet; the rest
    /// is skipped on the next read
    PartialText,
    /// Content is being decoded as binary data
    BinaryContent,
    Eof,
    Error,
    Closed,
}

/// Coarse state of a reader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    Initial,
    Interactive,
    Error,
    EndOfFile,
    Closed,
}

/// Value of `xml:space` in scope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XmlSpace {
    /// No `xml:space` attribute in scope
    None,
    Default,
    Preserve,
}

#[derive(Clone, Debug)]
pub(crate) struct XmlContext {
    pub space: XmlSpace,
    pub lang: String,
}

#[derive(Default)]
pub(crate) struct DocumentState {
    pub seen_root: bool,
    pub root_closed: bool,
    pub seen_doctype: bool,
    /// `None` while automatic conformance has not decided yet
    pub fragment: Option<bool>,
    pub standalone: bool,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub document: u64,
    pub entities: u64,
}

/// Iteration over the text and entity reference parts of an attribute value
pub(crate) struct AttrValueIter {
    pub chunks: Vec<AttrChunk>,
    pub next: usize,
    pub node: Node,
    /// Replacement text of a resolved reference still to report, then the
    /// end of the entity
    pub expansion: Option<(Option<String>, String)>,
}

/// Streaming XML reader
///
/// The reader is positioned on one node at a time. `read` moves to the next
/// node in document order; the accessors describe the current node.
pub struct Reader {
    pub(crate) settings: ReaderSettings,
    pub(crate) buf: BufferState,
    pub(crate) entities: EntityStack,
    pub(crate) names: NameTable,
    pub(crate) state: ParsingState,
    /// State to return to after attribute value iteration or a partial value
    pub(crate) resume: ParsingState,
    pub(crate) nodes: NodeArena,
    /// Slot of the current node
    pub(crate) cur: usize,
    /// Slot of the node that owns the attributes in `attr_base + 1..`
    pub(crate) attr_base: usize,
    pub(crate) attr_count: usize,
    pub(crate) attr_value: Option<AttrValueIter>,
    /// Number of open elements
    pub(crate) depth: usize,
    pub(crate) text: Option<TextProgress>,
    pub(crate) schema: Option<Rc<SchemaInfo>>,
    pub(crate) contexts: Vec<XmlContext>,
    pub(crate) namespaces: NamespaceStack,
    pub(crate) validator: Option<Validator>,
    pub(crate) events: Vec<ValidationEvent>,
    pub(crate) doc: DocumentState,
    pub(crate) counters: Counters,
    /// Consumed part of the current value, for chunked reads
    pub(crate) chunk_offset: usize,
    pub(crate) binary: Option<BinaryRead>,
    /// Commits are suspended while a document type declaration is parsed
    pub(crate) in_dtd: bool,
    /// `PUBLIC` and `SYSTEM` literals of the document type with their
    /// positions
    pub(crate) doctype_literals: Vec<(&'static str, String, Position)>,
    /// Reference that ended the text node just reported
    pub(crate) pending_reference: Option<PendingReference>,
}

impl Reader {
    fn with_buffer(buf: BufferState, settings: ReaderSettings) -> Self {
        let fragment = match settings.conformance {
            Conformance::Document => Some(false),
            Conformance::Fragment => Some(true),
            Conformance::Auto => None,
        };
        Self {
            settings,
            buf,
            entities: EntityStack::default(),
            names: NameTable::new(),
            state: ParsingState::XmlDecl,
            resume: ParsingState::XmlDecl,
            nodes: NodeArena::default(),
            cur: 0,
            attr_base: 0,
            attr_count: 0,
            attr_value: None,
            depth: 0,
            text: None,
            schema: None,
            contexts: Vec::new(),
            namespaces: NamespaceStack::new(),
            validator: None,
            events: Vec::new(),
            doc: DocumentState {
                fragment,
                ..DocumentState::default()
            },
            counters: Counters::default(),
            chunk_offset: 0,
            binary: None,
            in_dtd: false,
            doctype_literals: Vec::new(),
            pending_reference: None,
        }
    }

    /// Read from already decoded text. Encoding declarations are checked for
    /// syntax only.
    pub fn from_str(text: &str, settings: ReaderSettings) -> Self {
        Self::from_string(text.to_string(), settings)
    }

    pub fn from_string(text: String, settings: ReaderSettings) -> Self {
        let buf = BufferState::from_text(
            text,
            settings.buffer_size,
            settings.base_uri.clone(),
            false,
        );
        Self::with_buffer(buf, settings)
    }

    /// Read from encoded bytes; the encoding is detected from a byte order
    /// mark, the first bytes and the XML declaration.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, settings: ReaderSettings) -> Self {
        Self::from_reader(std::io::Cursor::new(bytes.into()), settings)
    }

    pub fn from_reader<R: Read + 'static>(reader: R, settings: ReaderSettings) -> Self {
        let buf = BufferState::from_reader(
            Box::new(reader),
            settings.buffer_size,
            settings.base_uri.clone(),
            settings.encoding.clone(),
        );
        Self::with_buffer(buf, settings)
    }

    /// Reader fed with `feed`. `read` fails with a pending error whenever it
    /// needs more input than was fed so far.
    pub fn new_push(settings: ReaderSettings) -> Self {
        let buf = BufferState::for_push(
            settings.buffer_size,
            settings.base_uri.clone(),
            settings.encoding.clone(),
        );
        Self::with_buffer(buf, settings)
    }

    /// Append input for a push reader. Returns `false` when the reader does
    /// not accept input (not a push reader, or input was finished).
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        self.entities.document_buffer(&mut self.buf).feed(bytes)
    }

    /// No more input will be fed.
    pub fn finish_input(&mut self) {
        self.entities.document_buffer(&mut self.buf).finish_input()
    }

    /// Move to the next node. Returns `false` at the end of the document.
    ///
    /// Errors are fatal except for pending input (see `XmlError::is_pending`),
    /// after which `read` can be called again once more input is available.
    pub fn read(&mut self) -> Result<bool> {
        match self.state {
            ParsingState::Error | ParsingState::Closed => return Ok(false),
            _ => {}
        }
        let res = self.advance();
        self.outcome(res)
    }

    /// Suspend on pending input, enter the error state on any other error.
    pub(crate) fn outcome<T>(&mut self, res: Result<T>) -> Result<T> {
        match res {
            Err(err) if err.is_pending() => {
                self.suspend();
                Err(err)
            }
            Err(err) => {
                self.fail();
                Err(err)
            }
            ok => ok,
        }
    }

    /// Non-blocking flavor of `read` for push readers.
    pub fn poll_read(&mut self) -> Poll<Result<bool>> {
        match self.read() {
            Err(err) if err.is_pending() => Poll::Pending,
            res => Poll::Ready(res),
        }
    }

    /// Release all input. Every read afterwards returns `false`.
    pub fn close(&mut self) {
        self.entities.unwind(&mut self.buf);
        self.buf = BufferState::empty();
        self.state = ParsingState::Closed;
        self.attr_value = None;
        self.binary = None;
        self.text = None;
        self.attr_count = 0;
    }

    pub fn read_state(&self) -> ReadState {
        match self.state {
            ParsingState::XmlDecl => ReadState::Initial,
            ParsingState::Eof => ReadState::EndOfFile,
            ParsingState::Error => ReadState::Error,
            ParsingState::Closed => ReadState::Closed,
            _ => ReadState::Interactive,
        }
    }

    pub(crate) fn current_node(&self) -> Option<&Node> {
        if let Some(iter) = &self.attr_value {
            return Some(&iter.node);
        }
        match self.state {
            ParsingState::XmlDecl
            | ParsingState::Eof
            | ParsingState::Error
            | ParsingState::Closed => None,
            _ => self.nodes.get(self.cur),
        }
    }

    pub fn node_kind(&self) -> NodeKind {
        self.current_node().map_or(NodeKind::None, |node| node.kind)
    }

    /// Qualified name of the current node
    pub fn name(&self) -> &str {
        self.current_node().map_or("", |node| node.name.as_str())
    }

    pub fn local_name(&self) -> &str {
        match self.current_node() {
            Some(node) if self.settings.namespaces => node.local_name(),
            Some(node) => &node.name,
            None => "",
        }
    }

    pub fn prefix(&self) -> &str {
        match self.current_node() {
            Some(node) if self.settings.namespaces => node.prefix(),
            _ => "",
        }
    }

    pub fn namespace_uri(&self) -> &str {
        if !self.settings.namespaces || self.attr_value.is_some() {
            return "";
        }
        match self.current_node() {
            Some(node) => match node.kind {
                NodeKind::Element | NodeKind::EndElement => {
                    namespace::namespace_of(&self.namespaces, &node.name, node.prefix(), false)
                }
                NodeKind::Attribute if self.nodes.get(self.attr_base).map(|n| n.kind)
                    == Some(NodeKind::Element) =>
                {
                    namespace::namespace_of(&self.namespaces, &node.name, node.prefix(), true)
                }
                _ => "",
            },
            None => "",
        }
    }

    /// Value of the current node; empty for nodes without value.
    pub fn value(&self) -> &str {
        match self.current_node() {
            Some(node) => node.value.as_str(&self.buf.text),
            None => "",
        }
    }

    pub fn has_value(&self) -> bool {
        self.node_kind().has_value()
    }

    pub fn depth(&self) -> usize {
        self.current_node().map_or(0, |node| node.depth)
    }

    /// Line of the start of the current node
    pub fn line_number(&self) -> usize {
        self.current_node().map_or(0, |node| node.position.line)
    }

    /// Column of the start of the current node. For elements and attributes
    /// this is the start of the name.
    pub fn line_position(&self) -> usize {
        self.current_node().map_or(0, |node| node.position.column)
    }

    /// Position of the first character of an attribute value
    pub fn value_position(&self) -> Position {
        self.current_node()
            .map_or(Position::default(), |node| node.value_position)
    }

    pub fn is_empty_element(&self) -> bool {
        self.current_node()
            .map_or(false, |node| node.kind == NodeKind::Element && node.empty)
    }

    /// Attribute was not present in the document but added from a declared
    /// default
    pub fn is_default(&self) -> bool {
        self.current_node().map_or(false, |node| node.is_default)
    }

    pub fn quote_char(&self) -> char {
        self.current_node().map_or('"', |node| node.quote)
    }

    /// Number of attributes of the current element, XML declaration or
    /// document type, also while positioned on one of the attributes
    pub fn attribute_count(&self) -> usize {
        match self.state {
            ParsingState::XmlDecl
            | ParsingState::Eof
            | ParsingState::Error
            | ParsingState::Closed => 0,
            _ => self.attr_count,
        }
    }

    fn attribute_node(&self, index: usize) -> Option<&Node> {
        if index < self.attribute_count() {
            self.nodes.get(self.attr_base + 1 + index)
        } else {
            None
        }
    }

    fn find_attribute(&self, name: &str) -> Option<usize> {
        (0..self.attribute_count()).find(|&i| {
            self.attribute_node(i)
                .map_or(false, |node| node.name == name)
        })
    }

    fn find_attribute_ns(&self, local_name: &str, namespace_uri: &str) -> Option<usize> {
        (0..self.attribute_count()).find(|&i| {
            self.attribute_node(i).map_or(false, |node| {
                node.local_name() == local_name
                    && namespace::namespace_of(&self.namespaces, &node.name, node.prefix(), true)
                        == namespace_uri
            })
        })
    }

    /// Value of the attribute with the given qualified name
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        let index = self.find_attribute(name)?;
        self.get_attribute_at(index)
    }

    pub fn get_attribute_ns(&self, local_name: &str, namespace_uri: &str) -> Option<&str> {
        let index = self.find_attribute_ns(local_name, namespace_uri)?;
        self.get_attribute_at(index)
    }

    pub fn get_attribute_at(&self, index: usize) -> Option<&str> {
        self.attribute_node(index)
            .map(|node| node.value.as_str(&self.buf.text))
    }

    /// Qualified name of the attribute at `index`
    pub fn attribute_name_at(&self, index: usize) -> Option<&str> {
        self.attribute_node(index).map(|node| node.name.as_str())
    }

    fn leave_attribute_value(&mut self) {
        if self.attr_value.take().is_some() && self.state == ParsingState::AttributeValue {
            self.state = self.resume;
        }
    }

    pub fn move_to_attribute_index(&mut self, index: usize) -> bool {
        if index >= self.attribute_count() {
            return false;
        }
        self.leave_attribute_value();
        self.cur = self.attr_base + 1 + index;
        self.chunk_offset = 0;
        true
    }

    pub fn move_to_attribute(&mut self, name: &str) -> bool {
        match self.find_attribute(name) {
            Some(index) => self.move_to_attribute_index(index),
            None => false,
        }
    }

    pub fn move_to_attribute_ns(&mut self, local_name: &str, namespace_uri: &str) -> bool {
        match self.find_attribute_ns(local_name, namespace_uri) {
            Some(index) => self.move_to_attribute_index(index),
            None => false,
        }
    }

    pub fn move_to_first_attribute(&mut self) -> bool {
        self.move_to_attribute_index(0)
    }

    pub fn move_to_next_attribute(&mut self) -> bool {
        if self.attribute_count() == 0 {
            return false;
        }
        if self.cur == self.attr_base {
            return self.move_to_first_attribute();
        }
        let next = self.cur - self.attr_base;
        self.move_to_attribute_index(next)
    }

    /// Move back from an attribute to the node that owns it.
    pub fn move_to_element(&mut self) -> bool {
        if self.attribute_count() == 0 || (self.cur == self.attr_base && self.attr_value.is_none()) {
            return false;
        }
        self.leave_attribute_value();
        self.cur = self.attr_base;
        true
    }

    /// Validity violations collected so far
    pub fn validation_events(&self) -> &[ValidationEvent] {
        &self.events
    }

    pub fn take_validation_events(&mut self) -> Vec<ValidationEvent> {
        std::mem::take(&mut self.events)
    }

    /// Declarations of the document type, once it was read
    pub fn schema(&self) -> Option<&SchemaInfo> {
        self.schema.as_deref()
    }

    /// Name of the encoding of the document
    pub fn encoding(&self) -> &'static str {
        self.entities.document_buffer_ref(&self.buf).encoding_name()
    }

    /// Base URI of the entity being read
    pub fn base_uri(&self) -> Option<&str> {
        self.buf.base_uri.as_deref()
    }

    pub fn xml_space(&self) -> XmlSpace {
        self.contexts.last().map_or(XmlSpace::None, |ctx| ctx.space)
    }

    pub fn xml_lang(&self) -> &str {
        self.contexts.last().map_or("", |ctx| ctx.lang.as_str())
    }

    /// Document declared `standalone="yes"`
    pub fn is_standalone(&self) -> bool {
        self.doc.standalone
    }

    /// Names of declarations interned while reading the document type
    pub fn name_table(&self) -> &NameTable {
        &self.names
    }

    pub(crate) fn suspend(&mut self) {
        if self.text.is_none() {
            self.rollback();
        }
        debug!("input pending at offset {}", self.buf.abs_pos());
    }

    pub(crate) fn fail(&mut self) {
        self.nodes.materialize(&self.buf.text);
        self.entities.unwind(&mut self.buf);
        self.state = ParsingState::Error;
        self.attr_value = None;
        self.binary = None;
        self.text = None;
        self.attr_count = 0;
    }

    /// Error at the cursor
    pub(crate) fn error(&mut self, reason: Reason) -> XmlError {
        let position = self.buf.position();
        self.error_at(reason, position)
    }

    pub(crate) fn error_at(&self, reason: Reason, position: Position) -> XmlError {
        XmlError::new(reason, position, self.buf.base_uri.clone())
    }
}
