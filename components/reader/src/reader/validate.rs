//! Validity checks of the document against its document type

use std::collections::HashSet;
use std::rc::Rc;

use log::warn;
use xtr_chars::{is_name, is_nmtoken};

use crate::dtd::content_model::ModelState;
use crate::dtd::{AttDef, AttDefault, AttType, SchemaInfo};
use crate::error::{Position, Reason, Result, ValidationEvent, ValidationKind};
use crate::node::NodeKind;

use super::Reader;

/// Element open in the validated document
struct OpenElement {
    name: String,
    /// `None` for undeclared elements, whose content is not checked
    model: Option<ModelState>,
}

#[derive(Default)]
pub(crate) struct Validator {
    elements: Vec<OpenElement>,
    ids: HashSet<String>,
    idrefs: Vec<(String, Position)>,
    seen_root: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reader {
    /// Report a validity violation at the cursor.
    pub(crate) fn validation_event(&mut self, kind: ValidationKind) -> Result<()> {
        let position = self.buf.position();
        self.validation_event_at(kind, position)
    }

    /// Report a validity violation. Without validation it is dropped; with
    /// strict validation it is fatal.
    pub(crate) fn validation_event_at(&mut self, kind: ValidationKind, position: Position) -> Result<()> {
        if !self.settings.validating() {
            return Ok(());
        }
        if self.settings.strict_validation {
            return Err(self.error_at(Reason::Validation(kind), position));
        }
        let event = ValidationEvent {
            kind,
            position,
            base_uri: self.buf.base_uri.clone(),
        };
        warn!("{}", event);
        self.events.push(event);
        Ok(())
    }

    /// Start validating, once the document type was read or found missing.
    pub(crate) fn start_validation(&mut self) {
        if self.settings.validating() && self.validator.is_none() {
            self.validator = Some(Validator::new());
        }
    }

    /// Check the element in `slot` and its `count` attributes.
    pub(crate) fn validate_start_element(&mut self, slot: usize, count: usize) -> Result<()> {
        if !self.settings.validating() {
            return Ok(());
        }
        self.start_validation();
        let mut validator = match self.validator.take() {
            Some(validator) => validator,
            None => return Ok(()),
        };
        let res = self.check_start_element(&mut validator, slot, count);
        self.validator = Some(validator);
        res
    }

    fn check_start_element(&mut self, validator: &mut Validator, slot: usize, count: usize) -> Result<()> {
        let (name, position) = match self.nodes.get(slot) {
            Some(node) => (node.name.clone(), node.position),
            None => return Ok(()),
        };
        let schema = self.schema.clone();

        if !validator.seen_root {
            validator.seen_root = true;
            match &schema {
                None => self.validation_event_at(ValidationKind::NoDocumentType, position)?,
                Some(schema) if schema.name() != name => self.validation_event_at(
                    ValidationKind::RootMismatch {
                        declared: schema.name().to_string(),
                        found: name.clone(),
                    },
                    position,
                )?,
                Some(_) => {}
            }
        }

        if let Some(parent) = validator.elements.last_mut() {
            if let Some(model) = &mut parent.model {
                if !model.push(&name) {
                    let kind = match model {
                        ModelState::Empty => ValidationKind::EmptyElementNotEmpty(parent.name.clone()),
                        _ => ValidationKind::InvalidContent {
                            element: parent.name.clone(),
                            child: name.clone(),
                        },
                    };
                    self.validation_event_at(kind, position)?;
                }
            }
        }

        let schema = match schema {
            Some(schema) => schema,
            None => {
                validator.elements.push(OpenElement { name, model: None });
                return Ok(());
            }
        };
        let decl = match schema.element(&name) {
            Some(decl) => decl,
            None => {
                self.validation_event_at(ValidationKind::UndeclaredElement(name.clone()), position)?;
                validator.elements.push(OpenElement { name, model: None });
                return Ok(());
            }
        };
        let model = match &decl.content {
            Some(content) => Some(ModelState::new(content)),
            None => {
                self.validation_event_at(ValidationKind::UndeclaredElement(name.clone()), position)?;
                None
            }
        };

        for i in 0..count {
            let (attr_name, value, attr_position) = match self.nodes.get(slot + 1 + i) {
                Some(node) => (
                    node.name.clone(),
                    node.value.as_str(&self.buf.text).to_string(),
                    node.position,
                ),
                None => continue,
            };
            if attr_name == "xmlns" || attr_name.starts_with("xmlns:") {
                if decl.attribute(&attr_name).is_none() {
                    continue;
                }
            }
            match decl.attribute(&attr_name) {
                Some(def) => self.check_attribute(validator, &schema, def, &value, attr_position)?,
                None => self.validation_event_at(
                    ValidationKind::UndeclaredAttribute {
                        element: name.clone(),
                        attribute: attr_name,
                    },
                    attr_position,
                )?,
            }
        }

        for def in decl.attributes.iter().filter(|def| def.presence == AttDefault::Required) {
            let present = (0..count).any(|i| {
                self.nodes
                    .get(slot + 1 + i)
                    .map_or(false, |node| node.name == &*def.name)
            });
            if !present {
                self.validation_event_at(
                    ValidationKind::RequiredAttribute {
                        element: name.clone(),
                        attribute: def.name.to_string(),
                    },
                    position,
                )?;
            }
        }

        validator.elements.push(OpenElement { name, model });
        Ok(())
    }

    fn check_attribute(
        &mut self,
        validator: &mut Validator,
        schema: &Rc<SchemaInfo>,
        def: &AttDef,
        value: &str,
        position: Position,
    ) -> Result<()> {
        let invalid = || ValidationKind::InvalidAttributeValue {
            attribute: def.name.to_string(),
            value: value.to_string(),
        };
        if def.presence == AttDefault::Fixed {
            let expected = def.default_value.as_deref().unwrap_or("");
            if value != expected {
                self.validation_event_at(
                    ValidationKind::FixedAttribute {
                        attribute: def.name.to_string(),
                        expected: expected.to_string(),
                    },
                    position,
                )?;
            }
        }
        let valid = match &def.att_type {
            AttType::CData => true,
            AttType::Id => {
                if !is_name(value) {
                    false
                } else if !validator.ids.insert(value.to_string()) {
                    return self.validation_event_at(ValidationKind::DuplicateId(value.to_string()), position);
                } else {
                    true
                }
            }
            AttType::IdRef => {
                validator.idrefs.push((value.to_string(), position));
                is_name(value)
            }
            AttType::IdRefs => {
                for token in value.split(' ') {
                    validator.idrefs.push((token.to_string(), position));
                }
                !value.is_empty() && value.split(' ').all(is_name)
            }
            AttType::Entity => is_unparsed_entity(schema, value),
            AttType::Entities => {
                !value.is_empty() && value.split(' ').all(|token| is_unparsed_entity(schema, token))
            }
            AttType::NmToken => is_nmtoken(value),
            AttType::NmTokens => !value.is_empty() && value.split(' ').all(is_nmtoken),
            AttType::Enumeration(values) => values.iter().any(|v| v == value),
            AttType::Notation(names) => names.iter().any(|n| &**n == value),
        };
        if !valid {
            self.validation_event_at(invalid(), position)?;
        }
        Ok(())
    }

    /// Check character data in the current element.
    pub(crate) fn validate_text(&mut self, whitespace: bool, position: Position) -> Result<()> {
        let kind = match self.validator.as_ref().and_then(|v| v.elements.last()) {
            Some(OpenElement {
                name,
                model: Some(model),
            }) => match model {
                ModelState::Empty => ValidationKind::EmptyElementNotEmpty(name.clone()),
                _ if !whitespace && !model.allows_text() => ValidationKind::TextNotAllowed(name.clone()),
                _ => return Ok(()),
            },
            _ => return Ok(()),
        };
        self.validation_event_at(kind, position)
    }

    /// Check that the content of the element being closed is complete.
    pub(crate) fn validate_end_element(&mut self) -> Result<()> {
        let open = match self.validator.as_mut().and_then(|v| v.elements.pop()) {
            Some(open) => open,
            None => return Ok(()),
        };
        if let Some(model) = &open.model {
            if !model.is_complete() {
                let position = self.buf.position();
                return self.validation_event_at(ValidationKind::IncompleteContent(open.name), position);
            }
        }
        Ok(())
    }

    /// Checks that need the whole document: references to IDs.
    pub(crate) fn finish_validation(&mut self) -> Result<()> {
        let validator = match self.validator.take() {
            Some(validator) => validator,
            None => return Ok(()),
        };
        for (id, position) in &validator.idrefs {
            if !validator.ids.contains(id) {
                self.validation_event_at(ValidationKind::UndefinedIdRef(id.clone()), *position)?;
            }
        }
        Ok(())
    }

    /// Content of the current element is element-only, so whitespace in it
    /// is insignificant.
    pub(crate) fn in_element_only_content(&self) -> bool {
        if self.depth == 0 {
            return false;
        }
        let name = match self.nodes.get(self.depth - 1) {
            Some(node) if node.kind == NodeKind::Element => &node.name,
            _ => return false,
        };
        self.schema
            .as_ref()
            .and_then(|schema| schema.element(name))
            .and_then(|decl| decl.content.as_ref())
            .map_or(false, |content| ModelState::new(content).is_element_only())
    }
}

fn is_unparsed_entity(schema: &SchemaInfo, name: &str) -> bool {
    schema.entity(name).map_or(false, |decl| decl.is_unparsed())
}

#[cfg(test)]
mod tests {
    use crate::error::ValidationKind;
    use crate::reader::Reader;
    use crate::settings::{ReaderSettings, Validation};

    fn events(input: &str) -> Vec<ValidationKind> {
        let mut reader = Reader::from_str(
            input,
            ReaderSettings::default().with_validation(Validation::Dtd),
        );
        while reader.read().unwrap() {}
        reader
            .take_validation_events()
            .into_iter()
            .map(|event| event.kind)
            .collect()
    }

    #[test]
    fn valid_document() {
        let input = "<!DOCTYPE r [<!ELEMENT r (a,b)><!ELEMENT a EMPTY><!ELEMENT b (#PCDATA)>]>\
                     <r><a/><b>text</b></r>";
        assert_eq!(Vec::<ValidationKind>::new(), events(input));
    }

    #[test]
    fn wrong_order() {
        let input = "<!DOCTYPE r [<!ELEMENT r (a,b)><!ELEMENT a EMPTY><!ELEMENT b EMPTY>]>\
                     <r><b/><a/></r>";
        assert_eq!(
            vec![
                ValidationKind::InvalidContent {
                    element: "r".to_string(),
                    child: "b".to_string()
                },
                ValidationKind::InvalidContent {
                    element: "r".to_string(),
                    child: "a".to_string()
                },
                ValidationKind::IncompleteContent("r".to_string()),
            ],
            events(input)
        );
    }

    #[test]
    fn ids() {
        let input = "<!DOCTYPE r [<!ELEMENT r ANY><!ATTLIST r id ID #IMPLIED ref IDREF #IMPLIED>]>\
                     <r id='a'><r id='a'/><r ref='b'/></r>";
        assert_eq!(
            vec![
                ValidationKind::DuplicateId("a".to_string()),
                ValidationKind::UndefinedIdRef("b".to_string()),
            ],
            events(input)
        );
    }

    #[test]
    fn attributes() {
        let input = "<!DOCTYPE r [<!ELEMENT r EMPTY>\
                     <!ATTLIST r need CDATA #REQUIRED kind (x|y) 'x' v CDATA #FIXED '1'>]>\
                     <r kind='z' v='2' other=''/>";
        assert_eq!(
            vec![
                ValidationKind::InvalidAttributeValue {
                    attribute: "kind".to_string(),
                    value: "z".to_string()
                },
                ValidationKind::FixedAttribute {
                    attribute: "v".to_string(),
                    expected: "1".to_string()
                },
                ValidationKind::UndeclaredAttribute {
                    element: "r".to_string(),
                    attribute: "other".to_string()
                },
                ValidationKind::RequiredAttribute {
                    element: "r".to_string(),
                    attribute: "need".to_string()
                },
            ],
            events(input)
        );
    }

    #[test]
    fn repeated_declarations() {
        let input = "<!DOCTYPE r [<!ELEMENT r ANY><!ELEMENT r EMPTY>\
                     <!ATTLIST r a CDATA 'x'><!ATTLIST r a CDATA 'y' b (p|q|p) 'p'>]>\
                     <r/>";
        assert_eq!(
            vec![
                ValidationKind::DuplicateElementDeclaration("r".to_string()),
                ValidationKind::DuplicateAttributeDeclaration {
                    element: "r".to_string(),
                    attribute: "a".to_string()
                },
                ValidationKind::DuplicateEnumerationToken("p".to_string()),
            ],
            events(input)
        );

        let mut reader = Reader::from_str(input, ReaderSettings::default());
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert_eq!(Some("x"), reader.get_attribute("a"));
    }

    #[test]
    fn declarations_unchecked_without_validation() {
        let mut reader = Reader::from_str(
            "<!DOCTYPE r [<!ELEMENT r ANY><!ELEMENT r EMPTY>]><r/>",
            ReaderSettings::default().with_strict_validation(true),
        );
        while reader.read().unwrap() {}
        assert!(reader.validation_events().is_empty());
    }

    #[test]
    fn missing_document_type() {
        assert_eq!(vec![ValidationKind::NoDocumentType], events("<r/>"));
    }

    #[test]
    fn text_in_element_content() {
        let input = "<!DOCTYPE r [<!ELEMENT r (a*)><!ELEMENT a EMPTY>]><r> <a/>x</r>";
        assert_eq!(
            vec![ValidationKind::TextNotAllowed("r".to_string())],
            events(input)
        );
    }

    #[test]
    fn events_are_fatal_when_strict() {
        let mut reader = Reader::from_str(
            "<!DOCTYPE r [<!ELEMENT r EMPTY>]><x/>",
            ReaderSettings::default()
                .with_validation(Validation::Dtd)
                .with_strict_validation(true),
        );
        assert!(reader.read().unwrap());
        assert!(reader.read().is_err());
    }
}
