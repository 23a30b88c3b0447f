//! Streaming pull reader for XML 1.0 documents
//!
//! The [`Reader`] moves through a document one node at a time. It detects the
//! encoding of its input, reads internal and external document type
//! declarations, expands entities and optionally validates the document
//! against its declarations.
//!
//! ```
//! use xtr_reader::{NodeKind, Reader, ReaderSettings};
//!
//! let mut reader = Reader::from_str("<greeting>hello</greeting>", ReaderSettings::default());
//! let mut text = String::new();
//! while reader.read().unwrap() {
//!     if reader.node_kind() == NodeKind::Text {
//!         text.push_str(reader.value());
//!     }
//! }
//! assert_eq!("hello", text);
//! ```

mod buffer;
mod dtd;
mod encoding;
mod entity;
mod error;
mod names;
mod namespace;
mod node;
mod reader;
mod resolve;
mod resolver;
mod scanner;
mod settings;

pub use crate::dtd::content_model::{ContentModel, Occurrence, Particle, ParticleKind};
pub use crate::dtd::{AttDef, AttDefault, AttType, ElementDecl, EntityDecl, NotationDecl, SchemaInfo};
pub use crate::error::{Position, Reason, Result, ValidationEvent, ValidationKind, XmlError};
pub use crate::names::NameTable;
pub use crate::namespace::{XMLNS_NAMESPACE, XML_NAMESPACE};
pub use crate::node::NodeKind;
pub use crate::reader::{ReadState, Reader, XmlSpace};
pub use crate::resolver::{
    EntityResolver, EntitySource, FileResolver, MemoryResolver, ResolvedEntity,
};
pub use crate::settings::{
    Conformance, DtdProcessing, EntityHandling, ReaderSettings, Validation, WhitespaceHandling,
    DEFAULT_BUFFER_SIZE,
};
