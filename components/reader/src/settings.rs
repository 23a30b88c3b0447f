use std::fmt;
use std::rc::Rc;

use crate::resolver::EntityResolver;

/// Which kind of input the reader accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conformance {
    /// Well-formed document: prolog, exactly one root element, epilog
    Document,
    /// Well-formed external parsed entity: any number of top-level elements
    /// and character data, no document type declaration
    Fragment,
    /// Decided by the first construct: an XML or document type declaration
    /// selects `Document`, anything else `Fragment`
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DtdProcessing {
    /// A document type declaration is a fatal error
    Prohibit,
    /// The declaration is skipped and reported nowhere
    Ignore,
    Parse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validation {
    None,
    Dtd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityHandling {
    /// General entity references are replaced by their content
    ExpandEntities,
    /// Only character references are replaced; general entity references are
    /// reported as nodes and expanded on request
    ExpandCharEntities,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WhitespaceHandling {
    All,
    Significant,
    None,
}

/// Reader configuration
#[derive(Clone)]
pub struct ReaderSettings {
    pub conformance: Conformance,
    pub dtd_processing: DtdProcessing,
    pub validation: Validation,
    /// Turn validation events into fatal errors
    pub strict_validation: bool,
    pub entity_handling: EntityHandling,
    pub whitespace: WhitespaceHandling,
    /// Attribute value normalization
    pub normalization: bool,
    pub namespaces: bool,
    pub ignore_comments: bool,
    pub ignore_processing_instructions: bool,
    pub check_characters: bool,
    pub max_characters_in_document: Option<u64>,
    pub max_characters_from_entities: Option<u64>,
    /// Encoding label forced by the caller; disables detection
    pub encoding: Option<String>,
    pub base_uri: Option<String>,
    pub resolver: Option<Rc<dyn EntityResolver>>,
    /// Leave external entities unexpanded when no resolver is configured
    /// instead of failing
    pub substitute_unresolved_externals: bool,
    /// References to undeclared entities expand to nothing
    pub allow_undeclared_entities: bool,
    /// Number of bytes pulled from a byte source per refill
    pub buffer_size: usize,
    /// Report character data as soon as it is known not to be whitespace,
    /// even if its end is not buffered yet. `value` then holds the part
    /// scanned so far; `read_value_chunk` and the binary readers pull the
    /// rest on demand, and `read` skips whatever was not consumed.
    pub partial_text: bool,
}

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            conformance: Conformance::Document,
            dtd_processing: DtdProcessing::Parse,
            validation: Validation::None,
            strict_validation: false,
            entity_handling: EntityHandling::ExpandEntities,
            whitespace: WhitespaceHandling::All,
            normalization: true,
            namespaces: true,
            ignore_comments: false,
            ignore_processing_instructions: false,
            check_characters: true,
            max_characters_in_document: None,
            max_characters_from_entities: Some(10_000_000),
            encoding: None,
            base_uri: None,
            resolver: None,
            substitute_unresolved_externals: true,
            allow_undeclared_entities: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            partial_text: false,
        }
    }
}

impl ReaderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conformance(mut self, conformance: Conformance) -> Self {
        self.conformance = conformance;
        self
    }

    pub fn with_dtd_processing(mut self, dtd_processing: DtdProcessing) -> Self {
        self.dtd_processing = dtd_processing;
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    pub fn with_entity_handling(mut self, entity_handling: EntityHandling) -> Self {
        self.entity_handling = entity_handling;
        self
    }

    pub fn with_whitespace(mut self, whitespace: WhitespaceHandling) -> Self {
        self.whitespace = whitespace;
        self
    }

    pub fn with_normalization(mut self, normalization: bool) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_namespaces(mut self, namespaces: bool) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_ignore_comments(mut self, ignore: bool) -> Self {
        self.ignore_comments = ignore;
        self
    }

    pub fn with_ignore_processing_instructions(mut self, ignore: bool) -> Self {
        self.ignore_processing_instructions = ignore;
        self
    }

    pub fn with_check_characters(mut self, check: bool) -> Self {
        self.check_characters = check;
        self
    }

    pub fn with_max_characters_in_document(mut self, max: Option<u64>) -> Self {
        self.max_characters_in_document = max;
        self
    }

    pub fn with_max_characters_from_entities(mut self, max: Option<u64>) -> Self {
        self.max_characters_from_entities = max;
        self
    }

    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = Some(label.into());
        self
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn with_resolver(mut self, resolver: Rc<dyn EntityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_substitute_unresolved_externals(mut self, substitute: bool) -> Self {
        self.substitute_unresolved_externals = substitute;
        self
    }

    pub fn with_allow_undeclared_entities(mut self, allow: bool) -> Self {
        self.allow_undeclared_entities = allow;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn with_partial_text(mut self, partial: bool) -> Self {
        self.partial_text = partial;
        self
    }

    pub(crate) fn expand_entities(&self) -> bool {
        self.entity_handling == EntityHandling::ExpandEntities
    }

    pub(crate) fn validating(&self) -> bool {
        self.validation == Validation::Dtd && self.dtd_processing == DtdProcessing::Parse
    }
}

impl fmt::Debug for ReaderSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReaderSettings")
            .field("conformance", &self.conformance)
            .field("dtd_processing", &self.dtd_processing)
            .field("validation", &self.validation)
            .field("entity_handling", &self.entity_handling)
            .field("whitespace", &self.whitespace)
            .field("normalization", &self.normalization)
            .field("resolver", &self.resolver.is_some())
            .field("buffer_size", &self.buffer_size)
            .field("partial_text", &self.partial_text)
            .finish()
    }
}
