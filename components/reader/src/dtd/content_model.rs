//! Content models of element declarations
//!
//! Element content is compiled into a position automaton: every name in the
//! model is a position, and `follow` lists which positions may come next.

use std::fmt;
use std::rc::Rc;

use crate::error::Reason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occurrence {
    Once,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Occurrence {
    fn suffix(self) -> &'static str {
        match self {
            Occurrence::Once => "",
            Occurrence::Optional => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParticleKind {
    Name(Rc<str>),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Particle {
    pub kind: ParticleKind,
    pub occurrence: Occurrence,
}

impl fmt::Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (items, sep) = match &self.kind {
            ParticleKind::Name(name) => return write!(f, "{}{}", name, self.occurrence.suffix()),
            ParticleKind::Sequence(items) => (items, ","),
            ParticleKind::Choice(items) => (items, "|"),
        };
        write!(f, "(")?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", sep)?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "){}", self.occurrence.suffix())
    }
}

/// Compiled element content
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Automaton {
    symbols: Vec<Rc<str>>,
    first: Vec<usize>,
    last: Vec<usize>,
    follow: Vec<Vec<usize>>,
    nullable: bool,
}

/// What an element may contain
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentModel {
    Empty,
    Any,
    /// Text mixed with the listed elements in any order
    Mixed(Vec<Rc<str>>),
    Children(Particle, Rc<Automaton>),
}

impl fmt::Display for ContentModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContentModel::Empty => write!(f, "EMPTY"),
            ContentModel::Any => write!(f, "ANY"),
            ContentModel::Mixed(names) if names.is_empty() => write!(f, "(#PCDATA)"),
            ContentModel::Mixed(names) => {
                write!(f, "(#PCDATA")?;
                for name in names {
                    write!(f, "|{}", name)?;
                }
                write!(f, ")*")
            }
            ContentModel::Children(root, _) => write!(f, "{}", root),
        }
    }
}

impl ContentModel {
    pub fn is_mixed(&self) -> bool {
        matches!(self, ContentModel::Mixed(_) | ContentModel::Any)
    }

    /// Check a complete sequence of child element names.
    pub fn accepts<'a>(&self, children: impl IntoIterator<Item = &'a str>) -> bool {
        let mut state = ModelState::new(self);
        children.into_iter().all(|child| state.push(child)) && state.is_complete()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Connector {
    Sequence,
    Choice,
}

/// Group opened by `(` and not closed yet
#[derive(Debug)]
struct GroupFrame {
    connector: Option<Connector>,
    items: Vec<Particle>,
    entity_id: u32,
}

/// Builds a content model from grammar tokens
#[derive(Debug, Default)]
pub(crate) struct ContentModelBuilder {
    stack: Vec<GroupFrame>,
    mixed: bool,
    mixed_names: Vec<Rc<str>>,
    root: Option<Particle>,
}

impl ContentModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_mixed(&self) -> bool {
        self.mixed
    }

    /// `(`
    pub fn open_group(&mut self, entity_id: u32) {
        self.stack.push(GroupFrame {
            connector: None,
            items: Vec::new(),
            entity_id,
        });
    }

    /// `#PCDATA`, allowed only as the first item of the outermost group.
    pub fn pcdata(&mut self) -> Result<(), Reason> {
        match self.stack.as_slice() {
            [frame] if frame.items.is_empty() && !self.mixed => {
                self.mixed = true;
                Ok(())
            }
            _ => Err(Reason::InvalidDeclaration("element")),
        }
    }

    pub fn name(&mut self, name: Rc<str>) -> Result<(), Reason> {
        if self.mixed {
            if self.mixed_names.contains(&name) {
                return Err(Reason::DuplicateInModel(name.to_string()));
            }
            self.mixed_names.push(name);
            return Ok(());
        }
        let frame = self
            .stack
            .last_mut()
            .ok_or(Reason::InvalidDeclaration("element"))?;
        if frame.connector == Some(Connector::Choice) {
            let duplicate = frame
                .items
                .iter()
                .any(|item| matches!(&item.kind, ParticleKind::Name(n) if *n == name));
            if duplicate {
                return Err(Reason::DuplicateInModel(name.to_string()));
            }
        }
        frame.items.push(Particle {
            kind: ParticleKind::Name(name),
            occurrence: Occurrence::Once,
        });
        Ok(())
    }

    /// `,` or `|` between items
    pub fn connector(&mut self, choice: bool) -> Result<(), Reason> {
        let connector = if choice {
            Connector::Choice
        } else {
            Connector::Sequence
        };
        if self.mixed {
            return if choice {
                Ok(())
            } else {
                Err(Reason::InvalidDeclaration("element"))
            };
        }
        let frame = self
            .stack
            .last_mut()
            .ok_or(Reason::InvalidDeclaration("element"))?;
        match frame.connector {
            None => {
                frame.connector = Some(connector);
                Ok(())
            }
            Some(existing) if existing == connector => Ok(()),
            Some(_) => Err(Reason::MixedConnectors),
        }
    }

    /// `?`, `*` or `+` after a name or group
    pub fn occurrence(&mut self, occurrence: Occurrence) -> Result<(), Reason> {
        let target = match self.stack.last_mut() {
            Some(frame) => frame.items.last_mut(),
            None => self.root.as_mut(),
        };
        match target {
            Some(item) if item.occurrence == Occurrence::Once => {
                item.occurrence = occurrence;
                Ok(())
            }
            _ => Err(Reason::InvalidDeclaration("element")),
        }
    }

    /// `)`; the group must close in the entity it was opened in.
    pub fn close_group(&mut self, entity_id: u32) -> Result<(), Reason> {
        let frame = self
            .stack
            .pop()
            .ok_or(Reason::InvalidDeclaration("element"))?;
        if frame.entity_id != entity_id {
            return Err(Reason::EntityNesting("content model group"));
        }
        if self.mixed {
            return Ok(());
        }
        if frame.items.is_empty() {
            return Err(Reason::InvalidDeclaration("element"));
        }
        let kind = match frame.connector {
            Some(Connector::Choice) => ParticleKind::Choice(frame.items),
            _ => ParticleKind::Sequence(frame.items),
        };
        let group = Particle {
            kind,
            occurrence: Occurrence::Once,
        };
        match self.stack.last_mut() {
            Some(parent) => parent.items.push(group),
            None => self.root = Some(group),
        }
        Ok(())
    }

    /// Finish the model. `star` tells whether the outermost group of a mixed
    /// model was followed by `*`.
    pub fn finish(self, star: bool) -> Result<ContentModel, Reason> {
        if !self.stack.is_empty() {
            return Err(Reason::InvalidDeclaration("element"));
        }
        if self.mixed {
            if !self.mixed_names.is_empty() && !star {
                return Err(Reason::ExpectedToken(")*"));
            }
            return Ok(ContentModel::Mixed(self.mixed_names));
        }
        let root = self.root.ok_or(Reason::InvalidDeclaration("element"))?;
        let automaton = Rc::new(compile(&root));
        Ok(ContentModel::Children(root, automaton))
    }
}

struct Summary {
    nullable: bool,
    first: Vec<usize>,
    last: Vec<usize>,
}

fn union(into: &mut Vec<usize>, from: &[usize]) {
    for &p in from {
        if !into.contains(&p) {
            into.push(p);
        }
    }
}

fn compile(root: &Particle) -> Automaton {
    let mut symbols = Vec::new();
    let mut follow = Vec::new();
    let summary = summarize(root, &mut symbols, &mut follow);
    Automaton {
        symbols,
        first: summary.first,
        last: summary.last,
        follow,
        nullable: summary.nullable,
    }
}

fn summarize(
    particle: &Particle,
    symbols: &mut Vec<Rc<str>>,
    follow: &mut Vec<Vec<usize>>,
) -> Summary {
    let mut summary = match &particle.kind {
        ParticleKind::Name(name) => {
            let pos = symbols.len();
            symbols.push(name.clone());
            follow.push(Vec::new());
            Summary {
                nullable: false,
                first: vec![pos],
                last: vec![pos],
            }
        }
        ParticleKind::Sequence(items) => {
            let mut acc = Summary {
                nullable: true,
                first: Vec::new(),
                last: Vec::new(),
            };
            for item in items {
                let s = summarize(item, symbols, follow);
                for &l in &acc.last {
                    union(&mut follow[l], &s.first);
                }
                if acc.nullable {
                    union(&mut acc.first, &s.first);
                }
                if s.nullable {
                    union(&mut acc.last, &s.last);
                } else {
                    acc.last = s.last;
                }
                acc.nullable &= s.nullable;
            }
            acc
        }
        ParticleKind::Choice(items) => {
            let mut acc = Summary {
                nullable: false,
                first: Vec::new(),
                last: Vec::new(),
            };
            for item in items {
                let s = summarize(item, symbols, follow);
                acc.nullable |= s.nullable;
                union(&mut acc.first, &s.first);
                union(&mut acc.last, &s.last);
            }
            acc
        }
    };

    match particle.occurrence {
        Occurrence::Once => {}
        Occurrence::Optional => summary.nullable = true,
        Occurrence::ZeroOrMore | Occurrence::OneOrMore => {
            for &l in &summary.last {
                let first = summary.first.clone();
                union(&mut follow[l], &first);
            }
            if particle.occurrence == Occurrence::ZeroOrMore {
                summary.nullable = true;
            }
        }
    }
    summary
}

/// Incremental matcher of child elements against a content model
#[derive(Clone, Debug)]
pub(crate) enum ModelState {
    Any,
    Empty,
    Mixed(Vec<Rc<str>>),
    Children {
        automaton: Rc<Automaton>,
        /// Positions reached so far; `None` before the first child
        current: Option<Vec<usize>>,
        failed: bool,
    },
}

impl ModelState {
    pub fn new(model: &ContentModel) -> Self {
        match model {
            ContentModel::Any => ModelState::Any,
            ContentModel::Empty => ModelState::Empty,
            ContentModel::Mixed(names) => ModelState::Mixed(names.clone()),
            ContentModel::Children(_, automaton) => ModelState::Children {
                automaton: automaton.clone(),
                current: None,
                failed: false,
            },
        }
    }

    /// Advance by a child element. Returns `false` if it is not allowed.
    pub fn push(&mut self, name: &str) -> bool {
        match self {
            ModelState::Any => true,
            ModelState::Empty => false,
            ModelState::Mixed(names) => names.iter().any(|n| &**n == name),
            ModelState::Children {
                automaton,
                current,
                failed,
            } => {
                if *failed {
                    return false;
                }
                let candidates: Vec<usize> = match current {
                    None => automaton.first.clone(),
                    Some(positions) => {
                        let mut next = Vec::new();
                        for &p in positions.iter() {
                            union(&mut next, &automaton.follow[p]);
                        }
                        next
                    }
                };
                let reached: Vec<usize> = candidates
                    .into_iter()
                    .filter(|&q| &*automaton.symbols[q] == name)
                    .collect();
                if reached.is_empty() {
                    *failed = true;
                    return false;
                }
                *current = Some(reached);
                true
            }
        }
    }

    /// Character data other than whitespace is allowed here.
    pub fn allows_text(&self) -> bool {
        matches!(self, ModelState::Any | ModelState::Mixed(_))
    }

    /// Whitespace is insignificant for element-only content.
    pub fn is_element_only(&self) -> bool {
        matches!(self, ModelState::Children { .. } | ModelState::Empty)
    }

    pub fn is_complete(&self) -> bool {
        match self {
            ModelState::Any | ModelState::Empty | ModelState::Mixed(_) => true,
            ModelState::Children {
                automaton,
                current,
                failed,
            } => {
                !*failed
                    && match current {
                        None => automaton.nullable,
                        Some(positions) => positions.iter().any(|p| automaton.last.contains(p)),
                    }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    /// Build a model from a compact description: names are single letters,
    /// `#` stands for `#PCDATA`.
    fn model(spec: &str) -> Result<ContentModel, Reason> {
        let mut builder = ContentModelBuilder::new();
        let mut star = false;
        for c in spec.chars() {
            match c {
                '(' => builder.open_group(0),
                ')' => builder.close_group(0)?,
                '#' => builder.pcdata()?,
                ',' => builder.connector(false)?,
                '|' => builder.connector(true)?,
                '?' => builder.occurrence(Occurrence::Optional)?,
                '*' if builder.is_mixed() && builder.depth() == 0 => star = true,
                '*' => builder.occurrence(Occurrence::ZeroOrMore)?,
                '+' => builder.occurrence(Occurrence::OneOrMore)?,
                c => builder.name(Rc::from(c.to_string().as_str()))?,
            }
        }
        builder.finish(star)
    }

    fn accepts(model: &ContentModel, children: &str) -> bool {
        model.accepts(children.split_whitespace())
    }

    #[test]
    fn pcdata_only() {
        let m = model("(#)").unwrap();
        assert_eq!("(#PCDATA)", m.to_string());
        assert!(accepts(&m, ""));
        assert!(!accepts(&m, "a"));
        assert!(ModelState::new(&m).allows_text());
    }

    #[test]
    fn sequence() {
        let m = model("(a,b)").unwrap();
        assert_eq!("(a,b)", m.to_string());
        assert!(accepts(&m, "a b"));
        assert!(!accepts(&m, "b a"));
        assert!(!accepts(&m, "a b a b"));
        assert!(!accepts(&m, "a"));
        assert!(!accepts(&m, ""));
    }

    #[test]
    fn repeated_choice() {
        let m = model("(a|b)*").unwrap();
        assert_eq!("(a|b)*", m.to_string());
        assert!(accepts(&m, ""));
        assert!(accepts(&m, "a"));
        assert!(accepts(&m, "b"));
        assert!(accepts(&m, "a b b a"));
        assert!(!accepts(&m, "c"));
        assert!(!accepts(&m, "a c"));
    }

    #[test]
    fn nested_groups() {
        let m = model("(a,(b|c)+,d?)").unwrap();
        assert_eq!("(a,(b|c)+,d?)", m.to_string());
        assert!(accepts(&m, "a b"));
        assert!(accepts(&m, "a c b d"));
        assert!(!accepts(&m, "a d"));
        assert!(!accepts(&m, "a b d d"));
    }

    #[test]
    fn mixed() {
        let m = model("(#|a|b)*").unwrap();
        assert_eq!("(#PCDATA|a|b)*", m.to_string());
        assert!(accepts(&m, "b a a"));
        assert!(!accepts(&m, "c"));
        assert_matches!(model("(#|a)"), Err(Reason::ExpectedToken(_)));
        assert_matches!(model("(#|a|a)*"), Err(Reason::DuplicateInModel(_)));
        assert_matches!(model("(a|#)"), Err(Reason::InvalidDeclaration(_)));
    }

    #[test]
    fn mixed_connectors() {
        assert_matches!(model("(a,b|c)"), Err(Reason::MixedConnectors));
        assert_matches!(model("(a|b,c)"), Err(Reason::MixedConnectors));
    }

    #[test]
    fn duplicate_in_choice() {
        assert_matches!(model("(a|a)"), Err(Reason::DuplicateInModel(_)));
    }

    #[test]
    fn group_closed_in_other_entity() {
        let mut builder = ContentModelBuilder::new();
        builder.open_group(1);
        builder.name(Rc::from("a")).unwrap();
        assert_matches!(builder.close_group(2), Err(Reason::EntityNesting(_)));
    }

    #[test]
    fn single_name_group() {
        let m = model("(x)").unwrap();
        assert_eq!("(x)", m.to_string());
        assert!(accepts(&m, "x"));
        assert!(!accepts(&m, "x x"));
    }
}
