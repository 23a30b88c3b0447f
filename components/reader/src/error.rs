use std::fmt;
use std::io;

/// Line and column of a location in the active entity, both 1-based.
///
/// Columns count characters, not bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Fatal parsing error
///
/// After an error was returned, the reader stays in its error state.
pub struct XmlError(Box<ErrorImpl>);

/// struct to reduce size of `XmlError`
struct ErrorImpl {
    reason: Reason,
    position: Position,
    base_uri: Option<String>,
}

impl XmlError {
    pub(crate) fn new(reason: Reason, position: Position, base_uri: Option<String>) -> Self {
        Self(Box::new(ErrorImpl {
            reason,
            position,
            base_uri,
        }))
    }

    pub(crate) fn bare(reason: Reason) -> Self {
        Self::new(reason, Position::default(), None)
    }

    pub fn reason(&self) -> &Reason {
        &self.0.reason
    }

    pub fn position(&self) -> Position {
        self.0.position
    }

    pub fn line(&self) -> usize {
        self.0.position.line
    }

    pub fn column(&self) -> usize {
        self.0.position.column
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.0.base_uri.as_deref()
    }

    /// More input is needed before the reader can continue.
    ///
    /// Not a terminal error: feed more data and call `read` again.
    pub fn is_pending(&self) -> bool {
        matches!(self.0.reason, Reason::InputPending)
    }
}

impl From<io::Error> for XmlError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock {
            XmlError::bare(Reason::InputPending)
        } else {
            XmlError::bare(Reason::Io(err))
        }
    }
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.position.line == 0 {
            return write!(f, "{}", self.0.reason);
        }
        match &self.0.base_uri {
            Some(uri) => write!(f, "{} at {} in {}", self.0.reason, self.0.position, uri),
            None => write!(f, "{} at {}", self.0.reason, self.0.position),
        }
    }
}

impl fmt::Debug for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("XmlError")
            .field("reason", &self.0.reason)
            .field("line", &self.0.position.line)
            .field("column", &self.0.position.column)
            .finish()
    }
}

impl std::error::Error for XmlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0.reason {
            Reason::Io(err) => Some(err),
            Reason::Resource { cause: Some(err), .. } => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Reason {
    Io(io::Error),
    /// Source has no data right now (non-blocking source or push input)
    InputPending,
    UnexpectedEof(&'static str),
    UnexpectedChar {
        found: char,
        expected: &'static str,
    },
    /// Character outside of `Char` production
    IllegalChar(u32),
    ExpectedName,
    ExpectedToken(&'static str),
    ExpectedWhitespace,
    InvalidName(String),

    // 2.8 Prolog
    InvalidXmlDecl(&'static str),
    MisplacedXmlDecl,
    UnsupportedVersion(String),
    UnsupportedEncoding(String),
    /// Declared encoding contradicts the detected one
    EncodingSwitch {
        detected: &'static str,
        declared: String,
    },
    /// Malformed byte sequence for the active encoding
    InvalidBytes(&'static str),
    MisplacedDoctype,
    DtdProhibited,

    // 3 Logical structures
    TagMismatch {
        expected: String,
        expected_at: Position,
        found: String,
        found_open_at: Option<Position>,
    },
    UnexpectedEndTag(String),
    UnclosedElement {
        name: String,
        opened_at: Position,
    },
    DuplicateAttribute(String),
    LtInAttributeValue,
    CDataEndInContent,
    DoubleHyphenInComment,
    ReservedPiTarget,
    MultipleRoots,
    TextOutsideRoot,
    NoRootElement,

    // 4 Physical structures
    UndeclaredEntity(String),
    RecursiveEntity(String),
    UnparsedEntityReference(String),
    ExternalEntityInAttribute(String),
    StandaloneExternalEntity(String),
    InvalidCharRef(String),
    /// Construct started inside one entity and ended inside another
    EntityNesting(&'static str),
    LimitExceeded {
        limit: &'static str,
        max: u64,
    },
    Resource {
        system_id: String,
        cause: Option<io::Error>,
    },

    // Document type grammar
    InvalidDeclaration(&'static str),
    MixedConnectors,
    DuplicateInModel(String),
    ConditionalSectionInInternalSubset,
    UnterminatedConditionalSection,
    InvalidPublicId(char),
    ParameterEntityInInternalSubset(String),

    /// Validity constraint violation with strict validation enabled
    Validation(ValidationKind),
    /// Operation not allowed on the current node or state
    InvalidOperation(&'static str),
    InvalidBinaryContent(&'static str),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reason::Io(err) => write!(f, "I/O error: {}", err),
            Reason::InputPending => write!(f, "more input needed"),
            Reason::UnexpectedEof(context) => write!(f, "unexpected end of input in {}", context),
            Reason::UnexpectedChar { found, expected } => {
                write!(f, "unexpected character {:?}, expected {}", found, expected)
            }
            Reason::IllegalChar(code) => write!(f, "illegal character U+{:04X}", code),
            Reason::ExpectedName => write!(f, "expected a name"),
            Reason::ExpectedToken(token) => write!(f, "expected `{}`", token),
            Reason::ExpectedWhitespace => write!(f, "expected whitespace"),
            Reason::InvalidName(name) => write!(f, "invalid name `{}`", name),
            Reason::InvalidXmlDecl(what) => write!(f, "invalid XML declaration: {}", what),
            Reason::MisplacedXmlDecl => {
                write!(f, "XML declaration allowed only at the start of the document")
            }
            Reason::UnsupportedVersion(v) => write!(f, "unsupported XML version `{}`", v),
            Reason::UnsupportedEncoding(e) => write!(f, "unsupported encoding `{}`", e),
            Reason::EncodingSwitch { detected, declared } => write!(
                f,
                "declared encoding `{}` does not match detected encoding {}",
                declared, detected
            ),
            Reason::InvalidBytes(enc) => write!(f, "invalid byte sequence for {}", enc),
            Reason::MisplacedDoctype => write!(f, "document type declaration not allowed here"),
            Reason::DtdProhibited => write!(f, "document type declarations are prohibited"),
            Reason::TagMismatch {
                expected,
                expected_at,
                found,
                found_open_at,
            } => {
                write!(
                    f,
                    "start tag `{}` opened at {} does not match end tag `{}`",
                    expected, expected_at, found
                )?;
                if let Some(at) = found_open_at {
                    write!(f, " (`{}` opened at {})", found, at)?;
                }
                Ok(())
            }
            Reason::UnexpectedEndTag(name) => write!(f, "unexpected end tag `{}`", name),
            Reason::UnclosedElement { name, opened_at } => {
                write!(f, "element `{}` opened at {} is not closed", name, opened_at)
            }
            Reason::DuplicateAttribute(name) => write!(f, "duplicate attribute `{}`", name),
            Reason::LtInAttributeValue => write!(f, "`<` not allowed in attribute value"),
            Reason::CDataEndInContent => write!(f, "`]]>` not allowed in character data"),
            Reason::DoubleHyphenInComment => write!(f, "`--` not allowed in comment"),
            Reason::ReservedPiTarget => {
                write!(f, "processing instruction target `xml` is reserved")
            }
            Reason::MultipleRoots => write!(f, "multiple root elements"),
            Reason::TextOutsideRoot => write!(f, "character data outside of the root element"),
            Reason::NoRootElement => write!(f, "missing root element"),
            Reason::UndeclaredEntity(name) => write!(f, "undeclared entity `{}`", name),
            Reason::RecursiveEntity(name) => write!(f, "recursive reference to entity `{}`", name),
            Reason::UnparsedEntityReference(name) => {
                write!(f, "reference to unparsed entity `{}`", name)
            }
            Reason::ExternalEntityInAttribute(name) => write!(
                f,
                "reference to external entity `{}` in attribute value",
                name
            ),
            Reason::StandaloneExternalEntity(name) => write!(
                f,
                "standalone document references externally declared entity `{}`",
                name
            ),
            Reason::InvalidCharRef(r) => write!(f, "invalid character reference `{}`", r),
            Reason::EntityNesting(what) => {
                write!(f, "{} must start and end in the same entity", what)
            }
            Reason::LimitExceeded { limit, max } => {
                write!(f, "limit of {} {} exceeded", max, limit)
            }
            Reason::Resource { system_id, cause } => match cause {
                Some(err) => write!(f, "cannot open `{}`: {}", system_id, err),
                None => write!(f, "cannot open `{}`", system_id),
            },
            Reason::InvalidDeclaration(what) => write!(f, "invalid {} declaration", what),
            Reason::MixedConnectors => write!(f, "`,` and `|` mixed in one content group"),
            Reason::DuplicateInModel(name) => {
                write!(f, "`{}` appears twice in the same content group", name)
            }
            Reason::ConditionalSectionInInternalSubset => {
                write!(f, "conditional sections are not allowed in the internal subset")
            }
            Reason::UnterminatedConditionalSection => write!(f, "unterminated conditional section"),
            Reason::InvalidPublicId(c) => {
                write!(f, "character {:?} not allowed in public identifier", c)
            }
            Reason::ParameterEntityInInternalSubset(name) => write!(
                f,
                "reference to parameter entity `{}` not allowed here",
                name
            ),
            Reason::Validation(kind) => write!(f, "validation error: {}", kind),
            Reason::InvalidOperation(what) => write!(f, "invalid operation: {}", what),
            Reason::InvalidBinaryContent(what) => write!(f, "invalid {} content", what),
        }
    }
}

/// Violation of a validity constraint
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationKind {
    NoDocumentType,
    RootMismatch { declared: String, found: String },
    UndeclaredElement(String),
    UndeclaredAttribute { element: String, attribute: String },
    UndeclaredEntity(String),
    UndeclaredNotation(String),
    UndeclaredParameterEntity(String),
    /// Child element not allowed by the content model at this point
    InvalidContent { element: String, child: String },
    /// Element ended before its content model was satisfied
    IncompleteContent(String),
    TextNotAllowed(String),
    EmptyElementNotEmpty(String),
    RequiredAttribute { element: String, attribute: String },
    FixedAttribute { attribute: String, expected: String },
    InvalidAttributeValue { attribute: String, value: String },
    DuplicateId(String),
    UndefinedIdRef(String),
    /// External default or normalization change in a standalone document
    StandaloneDeclaration(String),
    /// Grouping or declaration split across parameter entity boundaries
    ImproperNesting(&'static str),
    DuplicateElementDeclaration(String),
    /// Attribute declared again for the same element; the first one is used
    DuplicateAttributeDeclaration { element: String, attribute: String },
    DuplicateEnumerationToken(String),
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationKind::NoDocumentType => write!(f, "no document type declaration"),
            ValidationKind::RootMismatch { declared, found } => write!(
                f,
                "root element `{}` does not match document type `{}`",
                found, declared
            ),
            ValidationKind::UndeclaredElement(name) => write!(f, "undeclared element `{}`", name),
            ValidationKind::UndeclaredAttribute { element, attribute } => write!(
                f,
                "undeclared attribute `{}` on element `{}`",
                attribute, element
            ),
            ValidationKind::UndeclaredEntity(name) => write!(f, "undeclared entity `{}`", name),
            ValidationKind::UndeclaredNotation(name) => {
                write!(f, "undeclared notation `{}`", name)
            }
            ValidationKind::UndeclaredParameterEntity(name) => {
                write!(f, "undeclared parameter entity `{}`", name)
            }
            ValidationKind::InvalidContent { element, child } => write!(
                f,
                "element `{}` not allowed here in content of `{}`",
                child, element
            ),
            ValidationKind::IncompleteContent(name) => {
                write!(f, "content of element `{}` is incomplete", name)
            }
            ValidationKind::TextNotAllowed(name) => {
                write!(f, "element `{}` cannot contain text", name)
            }
            ValidationKind::EmptyElementNotEmpty(name) => {
                write!(f, "element `{}` is declared EMPTY", name)
            }
            ValidationKind::RequiredAttribute { element, attribute } => write!(
                f,
                "required attribute `{}` missing on element `{}`",
                attribute, element
            ),
            ValidationKind::FixedAttribute {
                attribute,
                expected,
            } => write!(
                f,
                "attribute `{}` must have the fixed value `{}`",
                attribute, expected
            ),
            ValidationKind::InvalidAttributeValue { attribute, value } => write!(
                f,
                "value `{}` is not valid for attribute `{}`",
                value, attribute
            ),
            ValidationKind::DuplicateId(id) => write!(f, "duplicate ID `{}`", id),
            ValidationKind::UndefinedIdRef(id) => write!(f, "reference to undefined ID `{}`", id),
            ValidationKind::StandaloneDeclaration(name) => write!(
                f,
                "standalone document depends on external declaration of `{}`",
                name
            ),
            ValidationKind::ImproperNesting(what) => {
                write!(f, "{} is not properly nested in parameter entities", what)
            }
            ValidationKind::DuplicateElementDeclaration(name) => {
                write!(f, "element type `{}` declared more than once", name)
            }
            ValidationKind::DuplicateAttributeDeclaration { element, attribute } => write!(
                f,
                "attribute `{}` of element `{}` declared more than once",
                attribute, element
            ),
            ValidationKind::DuplicateEnumerationToken(token) => {
                write!(f, "token `{}` appears more than once in the enumeration", token)
            }
        }
    }
}

/// Validity finding reported without stopping the reader
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationEvent {
    pub kind: ValidationKind,
    pub position: Position,
    pub base_uri: Option<String>,
}

impl fmt::Display for ValidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.position)
    }
}

pub type Result<T> = std::result::Result<T, XmlError>;
