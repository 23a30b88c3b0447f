//! Document type definitions: declaration tables and their parser

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::Position;

use self::content_model::ContentModel;

pub(crate) mod content_model;
pub(crate) mod host;
pub(crate) mod parser;
pub(crate) mod scanner;

/// Declared attribute type
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttType {
    CData,
    Id,
    IdRef,
    IdRefs,
    Entity,
    Entities,
    NmToken,
    NmTokens,
    Notation(Vec<Rc<str>>),
    Enumeration(Vec<String>),
}

impl AttType {
    pub fn is_cdata(&self) -> bool {
        matches!(self, AttType::CData)
    }
}

impl fmt::Display for AttType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttType::CData => write!(f, "CDATA"),
            AttType::Id => write!(f, "ID"),
            AttType::IdRef => write!(f, "IDREF"),
            AttType::IdRefs => write!(f, "IDREFS"),
            AttType::Entity => write!(f, "ENTITY"),
            AttType::Entities => write!(f, "ENTITIES"),
            AttType::NmToken => write!(f, "NMTOKEN"),
            AttType::NmTokens => write!(f, "NMTOKENS"),
            AttType::Notation(names) => {
                write!(f, "NOTATION (")?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", name)?;
                }
                write!(f, ")")
            }
            AttType::Enumeration(values) => write!(f, "({})", values.join("|")),
        }
    }
}

/// Presence of a declared attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttDefault {
    Required,
    Implied,
    Fixed,
    Default,
}

#[derive(Clone, Debug)]
pub struct AttDef {
    pub name: Rc<str>,
    pub att_type: AttType,
    pub presence: AttDefault,
    /// Normalized default value for `Fixed` and `Default`
    pub default_value: Option<String>,
    pub declared_externally: bool,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub struct ElementDecl {
    pub name: Rc<str>,
    /// `None` when only attributes were declared for the element
    pub content: Option<ContentModel>,
    /// Attribute definitions in declaration order
    pub attributes: Vec<AttDef>,
    pub declared_externally: bool,
}

impl ElementDecl {
    fn new(name: Rc<str>) -> Self {
        Self {
            name,
            content: None,
            attributes: Vec::new(),
            declared_externally: false,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttDef> {
        self.attributes.iter().find(|def| &*def.name == name)
    }
}

/// General or parameter entity
#[derive(Debug)]
pub struct EntityDecl {
    pub name: Rc<str>,
    pub is_parameter: bool,
    /// Replacement text of an internal entity
    pub value: Option<String>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    /// Notation of an unparsed entity
    pub notation: Option<Rc<str>>,
    /// Declared in the external subset or in an external parameter entity
    pub declared_externally: bool,
    /// Base URI of the declaration, used to resolve the system identifier
    pub base_uri: Option<String>,
    pub position: Position,
    /// Replacement text is being expanded right now
    pub(crate) expanding: Cell<bool>,
}

impl EntityDecl {
    pub fn is_external(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_unparsed(&self) -> bool {
        self.notation.is_some()
    }

    pub fn is_expanding(&self) -> bool {
        self.expanding.get()
    }

    /// Empty stand-in for an entity whose text cannot be read
    pub(crate) fn placeholder(name: Rc<str>) -> Rc<EntityDecl> {
        Rc::new(EntityDecl {
            name,
            is_parameter: false,
            value: Some(String::new()),
            public_id: None,
            system_id: None,
            notation: None,
            declared_externally: false,
            base_uri: None,
            position: Position::default(),
            expanding: Cell::new(false),
        })
    }
}

#[derive(Clone, Debug)]
pub struct NotationDecl {
    pub name: Rc<str>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

/// Declarations of a document type
#[derive(Debug, Default)]
pub struct SchemaInfo {
    pub(crate) name: String,
    pub(crate) public_id: Option<String>,
    pub(crate) system_id: Option<String>,
    pub(crate) internal_subset: String,
    pub(crate) elements: HashMap<Rc<str>, Rc<ElementDecl>>,
    pub(crate) entities: HashMap<Rc<str>, Rc<EntityDecl>>,
    pub(crate) parameter_entities: HashMap<Rc<str>, Rc<EntityDecl>>,
    pub(crate) notations: HashMap<Rc<str>, NotationDecl>,
    /// Notations referenced before their declaration
    pub(crate) pending_notations: Vec<(Rc<str>, Position)>,
    /// External subset was declared or parameter entities were referenced,
    /// so not every declaration may have been read
    pub(crate) has_external_declarations: bool,
    /// A parameter entity reference could not be expanded
    pub(crate) skipped_parameter_entities: bool,
    pub(crate) standalone: bool,
}

impl SchemaInfo {
    /// Name of the document type, which is the expected root element
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    /// Verbatim text of the internal subset
    pub fn internal_subset(&self) -> &str {
        &self.internal_subset
    }

    pub fn element(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.get(name).map(|decl| &**decl)
    }

    pub fn entity(&self, name: &str) -> Option<&Rc<EntityDecl>> {
        self.entities.get(name)
    }

    pub fn parameter_entity(&self, name: &str) -> Option<&Rc<EntityDecl>> {
        self.parameter_entities.get(name)
    }

    pub fn notation(&self, name: &str) -> Option<&NotationDecl> {
        self.notations.get(name)
    }

    pub fn attribute(&self, element: &str, attribute: &str) -> Option<&AttDef> {
        self.elements.get(element)?.attribute(attribute)
    }

    /// Undeclared entities are errors only when every declaration was read.
    pub(crate) fn undeclared_entity_is_fatal(&self) -> bool {
        self.standalone || !(self.has_external_declarations || self.skipped_parameter_entities)
    }

    fn element_mut(&mut self, name: &Rc<str>) -> &mut ElementDecl {
        let decl = self
            .elements
            .entry(name.clone())
            .or_insert_with(|| Rc::new(ElementDecl::new(name.clone())));
        Rc::make_mut(decl)
    }

    /// Returns `false` when the element type was already declared.
    pub(crate) fn declare_element(
        &mut self,
        name: &Rc<str>,
        content: ContentModel,
        external: bool,
    ) -> bool {
        let decl = self.element_mut(name);
        if decl.content.is_some() {
            return false;
        }
        decl.content = Some(content);
        decl.declared_externally = external;
        true
    }

    /// First definition of an attribute wins.
    pub(crate) fn declare_attribute(&mut self, element: &Rc<str>, def: AttDef) -> bool {
        let decl = self.element_mut(element);
        if decl.attribute(&def.name).is_some() {
            return false;
        }
        decl.attributes.push(def);
        true
    }

    /// First declaration of an entity wins.
    pub(crate) fn declare_entity(&mut self, decl: EntityDecl) -> bool {
        let table = if decl.is_parameter {
            &mut self.parameter_entities
        } else {
            &mut self.entities
        };
        if table.contains_key(&decl.name) {
            return false;
        }
        table.insert(decl.name.clone(), Rc::new(decl));
        true
    }

    pub(crate) fn declare_notation(&mut self, decl: NotationDecl) -> bool {
        if self.notations.contains_key(&decl.name) {
            return false;
        }
        self.notations.insert(decl.name.clone(), decl);
        true
    }

    pub(crate) fn reference_notation(&mut self, name: Rc<str>, position: Position) {
        if !self.notations.contains_key(&name) {
            self.pending_notations.push((name, position));
        }
    }

    /// Notations still undeclared after the whole document type was read.
    pub(crate) fn undeclared_notations(&mut self) -> Vec<(Rc<str>, Position)> {
        let pending = std::mem::take(&mut self.pending_notations);
        pending
            .into_iter()
            .filter(|(name, _)| !self.notations.contains_key(name))
            .collect()
    }
}

/// Predefined entities `lt`, `gt`, `amp`, `apos` and `quot`
pub(crate) fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}
