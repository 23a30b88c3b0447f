use std::fmt;

use crate::error::Position;

/// Type of the node the reader is positioned on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Not positioned on any node: before the first read or after the end
    None,
    Element,
    Attribute,
    Text,
    CData,
    EntityReference,
    EndEntity,
    ProcessingInstruction,
    Comment,
    DocumentType,
    Whitespace,
    SignificantWhitespace,
    EndElement,
    XmlDeclaration,
}

impl NodeKind {
    /// Node carries character data that value readers can consume.
    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            NodeKind::Text
                | NodeKind::CData
                | NodeKind::Whitespace
                | NodeKind::SignificantWhitespace
        )
    }

    pub fn has_value(self) -> bool {
        matches!(
            self,
            NodeKind::Attribute
                | NodeKind::Text
                | NodeKind::CData
                | NodeKind::ProcessingInstruction
                | NodeKind::Comment
                | NodeKind::DocumentType
                | NodeKind::Whitespace
                | NodeKind::SignificantWhitespace
                | NodeKind::XmlDeclaration
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Node value: owned, or a range of the buffer of the entity being read
#[derive(Clone, Debug)]
pub(crate) enum Value {
    Owned(String),
    Slice { start: usize, end: usize },
}

impl Default for Value {
    fn default() -> Self {
        Value::Owned(String::new())
    }
}

impl Value {
    pub fn as_str<'a>(&'a self, text: &'a str) -> &'a str {
        match self {
            Value::Owned(s) => s,
            Value::Slice { start, end } => &text[*start..*end],
        }
    }

    /// Copy a buffer range into an owned string.
    pub fn materialize(&mut self, text: &str) {
        if let Value::Slice { start, end } = *self {
            *self = Value::Owned(text[start..end].to_string());
        }
    }

    pub fn clear(&mut self) {
        match self {
            Value::Owned(s) => s.clear(),
            Value::Slice { .. } => *self = Value::default(),
        }
    }
}

/// Piece of an attribute value that contains unexpanded entity references
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AttrChunk {
    Text(String),
    EntityRef(String),
}

/// Slot of the node arena
///
/// Slot `d` holds the element opened at depth `d` while it is open, or the
/// node last read at that depth. The attributes of an element at depth `d`
/// occupy the following slots while the reader stays on the element.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    /// Qualified name
    pub name: String,
    pub colon: Option<usize>,
    pub value: Value,
    pub depth: usize,
    pub position: Position,
    /// Start of the value, for attributes
    pub value_position: Position,
    pub empty: bool,
    pub quote: char,
    /// Attribute was injected from a declared default
    pub is_default: bool,
    /// Entity that was active when the element was opened
    pub entity_id: u32,
    /// Element pushed an xml:space/xml:lang context
    pub context_pushed: bool,
    /// Element pushed a namespace scope
    pub scope_pushed: bool,
    /// Attribute value chunks, only filled when the value contains
    /// unexpanded entity references
    pub chunks: Vec<AttrChunk>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            kind: NodeKind::None,
            name: String::new(),
            colon: None,
            value: Value::default(),
            depth: 0,
            position: Position::default(),
            value_position: Position::default(),
            empty: false,
            quote: '"',
            is_default: false,
            entity_id: 0,
            context_pushed: false,
            scope_pushed: false,
            chunks: Vec::new(),
        }
    }
}

impl Node {
    /// Prepare the slot for a new node, keeping allocations.
    pub fn reset(&mut self, kind: NodeKind, depth: usize, position: Position) {
        self.kind = kind;
        self.name.clear();
        self.colon = None;
        self.value.clear();
        self.depth = depth;
        self.position = position;
        self.value_position = position;
        self.empty = false;
        self.quote = '"';
        self.is_default = false;
        self.entity_id = 0;
        self.context_pushed = false;
        self.scope_pushed = false;
        self.chunks.clear();
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
        self.colon = name.find(':');
    }

    pub fn prefix(&self) -> &str {
        match self.colon {
            Some(i) => &self.name[..i],
            None => "",
        }
    }

    pub fn local_name(&self) -> &str {
        match self.colon {
            Some(i) => &self.name[i + 1..],
            None => &self.name,
        }
    }
}

/// Arena of nodes indexed by depth
#[derive(Default)]
pub(crate) struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn slot(&mut self, index: usize) -> &mut Node {
        if index >= self.nodes.len() {
            self.nodes.resize_with(index + 1, Node::default);
        }
        &mut self.nodes[index]
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Turn every buffer-backed value into an owned string.
    pub fn materialize(&mut self, text: &str) {
        for node in &mut self.nodes {
            node.value.materialize(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_materialize() {
        let text = "<a>hello</a>";
        let mut value = Value::Slice { start: 3, end: 8 };
        assert_eq!("hello", value.as_str(text));
        value.materialize(text);
        assert!(matches!(value, Value::Owned(_)));
        assert_eq!("hello", value.as_str(""));
    }

    #[test]
    fn arena_reuses_slots() {
        let mut arena = NodeArena::default();
        arena.slot(2).set_name("p:x");
        assert_eq!("p", arena.get(2).unwrap().prefix());
        assert_eq!("x", arena.get(2).unwrap().local_name());
        arena
            .slot(2)
            .reset(NodeKind::Text, 2, Position::new(1, 1));
        assert_eq!("", arena.get(2).unwrap().name);
        assert!(arena.get(0).is_some());
    }

    #[test]
    fn materialize_all() {
        let mut arena = NodeArena::default();
        arena.slot(0).value = Value::Slice { start: 0, end: 2 };
        arena.slot(1).value = Value::Owned("x".to_string());
        arena.materialize("abc");
        assert!(matches!(arena.get(0).unwrap().value, Value::Owned(_)));
        assert_eq!("ab", arena.get(0).unwrap().value.as_str(""));
    }
}
