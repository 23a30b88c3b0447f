use std::rc::Rc;

use crate::dtd::EntityDecl;
use crate::error::{Position, Reason, Result, ValidationKind, XmlError};
use crate::settings::ReaderSettings;

/// What the document type parser needs from the reader that drives it
///
/// Offsets are absolute offsets of the buffer of the current entity.
pub(crate) trait DtdHost {
    fn settings(&self) -> &ReaderSettings;

    /// Validity violations are collected
    fn supports_validation(&self) -> bool;

    fn standalone(&self) -> bool;

    fn intern(&mut self, name: &str) -> Rc<str>;

    /// Buffered text of the current entity after the cursor
    fn window(&self) -> &str;

    fn advance(&mut self, n: usize);

    fn cursor(&self) -> usize;

    /// Buffered text from `start` up to the cursor
    fn text_since(&self, start: usize) -> &str;

    /// Buffer more of the current entity; 0 at its end.
    fn refill(&mut self) -> Result<usize>;

    fn entity_depth(&self) -> usize;

    fn entity_id(&self) -> u32;

    /// Declarations read right now come from outside the internal subset
    fn in_external_declarations(&self) -> bool;

    fn position(&mut self) -> Position;

    fn base_uri(&self) -> Option<String>;

    /// Character reference at the cursor, starting with `&#`
    fn parse_char_ref(&mut self) -> Result<char>;

    /// Comment after `<!--`
    fn skip_comment(&mut self) -> Result<()>;

    /// Processing instruction after `<?`
    fn skip_pi(&mut self) -> Result<()>;

    /// Continue in the replacement text of a parameter entity. With
    /// `padded`, the text is surrounded by spaces. Returns `false` when an
    /// external entity cannot be read.
    fn push_entity(&mut self, decl: &Rc<EntityDecl>, padded: bool) -> Result<bool>;

    /// Leave the current entity. Returns `false` in the document entity.
    fn pop_entity(&mut self) -> Result<bool>;

    /// Continue in the external subset. Returns `false` when it cannot be
    /// read.
    fn push_external_subset(&mut self, public_id: Option<&str>, system_id: &str) -> Result<bool>;

    /// Continue in an internal subset given as text.
    fn push_internal_subset(&mut self, text: &str);

    fn fatal(&mut self, reason: Reason) -> XmlError;

    fn fatal_at(&self, reason: Reason, position: Position) -> XmlError;

    /// `PUBLIC` or `SYSTEM` literal of the document type declaration
    fn on_literal(&mut self, keyword: &'static str, literal: &str, position: Position);

    fn validation_event(&mut self, kind: ValidationKind, position: Position) -> Result<()>;
}
