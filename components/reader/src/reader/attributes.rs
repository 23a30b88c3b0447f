//! Attributes of start tags: declared defaults, reserved attributes and
//! iteration over the parts of a value

use crate::dtd::{AttDefault, EntityDecl};
use crate::error::{Reason, Result, ValidationKind};
use crate::node::{AttrChunk, Node, NodeKind, Value};

use super::{AttrValueIter, ParsingState, Reader, XmlContext, XmlSpace};

/// Collapse runs of spaces and trim, as for attributes of a type other than
/// CDATA.
fn collapse_spaces(value: &str) -> String {
    value.split(' ').filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ")
}

impl Reader {
    /// Complete the start tag in `slot` with `count` scanned attributes.
    /// Returns the attribute count including injected defaults.
    pub(crate) fn finish_start_tag(&mut self, slot: usize, count: usize) -> Result<usize> {
        let count = self.apply_declarations(slot, count)?;
        self.validate_start_element(slot, count)?;
        self.push_xml_context(slot, count);
        if self.settings.namespaces {
            self.push_namespace_scope(slot, count);
        }
        Ok(count)
    }

    /// Normalize declared non-CDATA values and add missing defaults in
    /// declaration order.
    fn apply_declarations(&mut self, slot: usize, mut count: usize) -> Result<usize> {
        let schema = match &self.schema {
            Some(schema) => schema.clone(),
            None => return Ok(count),
        };
        let (name, position) = match self.nodes.get(slot) {
            Some(node) => (node.name.clone(), node.position),
            None => return Ok(count),
        };
        let decl = match schema.element(&name) {
            Some(decl) => decl,
            None => return Ok(count),
        };

        for i in 0..count {
            let index = slot + 1 + i;
            let (attr_name, attr_position) = match self.nodes.get(index) {
                Some(node) => (node.name.clone(), node.position),
                None => continue,
            };
            let def = match decl.attribute(&attr_name) {
                Some(def) if !def.att_type.is_cdata() => def,
                _ => continue,
            };
            let value = match self.nodes.get(index) {
                Some(node) => node.value.as_str(&self.buf.text).to_string(),
                None => continue,
            };
            let collapsed = collapse_spaces(&value);
            if collapsed != value {
                if self.doc.standalone && def.declared_externally {
                    self.validation_event_at(
                        ValidationKind::StandaloneDeclaration(attr_name.clone()),
                        attr_position,
                    )?;
                }
                self.nodes.slot(index).value = Value::Owned(collapsed);
            }
        }

        for def in &decl.attributes {
            let default = match (&def.default_value, def.presence) {
                (Some(default), AttDefault::Default | AttDefault::Fixed) => default,
                _ => continue,
            };
            let present = (0..count).any(|i| {
                self.nodes
                    .get(slot + 1 + i)
                    .map_or(false, |node| node.name == &*def.name)
            });
            if present {
                continue;
            }
            if self.doc.standalone && def.declared_externally {
                self.validation_event_at(
                    ValidationKind::StandaloneDeclaration(def.name.to_string()),
                    position,
                )?;
            }
            let value = if def.att_type.is_cdata() {
                default.clone()
            } else {
                collapse_spaces(default)
            };
            let node = self.nodes.slot(slot + 1 + count);
            node.reset(NodeKind::Attribute, slot + 1, position);
            node.set_name(&def.name);
            node.value = Value::Owned(value);
            node.is_default = true;
            count += 1;
        }
        Ok(count)
    }

    /// Push a new `xml:space`/`xml:lang` context if the element sets one.
    fn push_xml_context(&mut self, slot: usize, count: usize) {
        let mut context: Option<XmlContext> = None;
        for i in 0..count {
            let node = match self.nodes.get(slot + 1 + i) {
                Some(node) => node,
                None => continue,
            };
            let value = node.value.as_str(&self.buf.text);
            match node.name.as_str() {
                "xml:space" => {
                    let space = match value {
                        "preserve" => XmlSpace::Preserve,
                        "default" => XmlSpace::Default,
                        _ => continue,
                    };
                    context
                        .get_or_insert_with(|| self.inherited_context())
                        .space = space;
                }
                "xml:lang" => {
                    let lang = value.to_string();
                    context.get_or_insert_with(|| self.inherited_context()).lang = lang;
                }
                _ => {}
            }
        }
        if let Some(context) = context {
            self.contexts.push(context);
            self.nodes.slot(slot).context_pushed = true;
        }
    }

    fn inherited_context(&self) -> XmlContext {
        self.contexts.last().cloned().unwrap_or(XmlContext {
            space: XmlSpace::None,
            lang: String::new(),
        })
    }

    fn push_namespace_scope(&mut self, slot: usize, count: usize) {
        let declarations: Vec<(String, String)> = (0..count)
            .filter_map(|i| self.nodes.get(slot + 1 + i))
            .filter_map(|node| {
                let prefix = if node.name == "xmlns" {
                    ""
                } else if node.prefix() == "xmlns" {
                    node.local_name()
                } else {
                    return None;
                };
                Some((prefix.to_string(), node.value.as_str(&self.buf.text).to_string()))
            })
            .collect();
        if declarations.is_empty() {
            return;
        }
        let mut scope = self.namespaces.build_scope();
        for (prefix, uri) in declarations {
            scope.add_prefix(prefix, uri);
        }
        scope.finish();
        self.nodes.slot(slot).scope_pushed = true;
    }

    /// Step through the text and entity reference parts of the value of the
    /// current attribute. Returns `false` when there are no more parts.
    pub fn read_attribute_value(&mut self) -> bool {
        if self.attr_value.is_none() {
            let attr = match self.nodes.get(self.cur) {
                Some(node) if node.kind == NodeKind::Attribute && self.cur > self.attr_base => node,
                _ => return false,
            };
            let chunks = if attr.chunks.is_empty() {
                vec![AttrChunk::Text(attr.value.as_str(&self.buf.text).to_string())]
            } else {
                attr.chunks.clone()
            };
            let mut node = Node::default();
            node.reset(NodeKind::Text, attr.depth + 1, attr.value_position);
            self.attr_value = Some(AttrValueIter {
                chunks,
                next: 0,
                node,
                expansion: None,
            });
            if self.state != ParsingState::AttributeValue {
                self.resume = self.state;
            }
            self.state = ParsingState::AttributeValue;
        }

        let iter = match &mut self.attr_value {
            Some(iter) => iter,
            None => return false,
        };
        let depth = iter.node.depth;
        match iter.expansion.take() {
            Some((Some(text), name)) => {
                iter.node.kind = NodeKind::Text;
                iter.node.name.clear();
                iter.node.colon = None;
                iter.node.depth = depth + 1;
                iter.node.value = Value::Owned(text);
                iter.expansion = Some((None, name));
                return true;
            }
            Some((None, name)) => {
                if iter.node.kind == NodeKind::Text {
                    iter.node.depth = depth.saturating_sub(1);
                }
                iter.node.kind = NodeKind::EndEntity;
                iter.node.set_name(&name);
                iter.node.value = Value::default();
                return true;
            }
            None => {}
        }
        let chunk = match iter.chunks.get(iter.next) {
            Some(chunk) => chunk.clone(),
            None => return false,
        };
        iter.next += 1;
        match chunk {
            AttrChunk::Text(text) => {
                iter.node.kind = NodeKind::Text;
                iter.node.name.clear();
                iter.node.colon = None;
                iter.node.value = Value::Owned(text);
            }
            AttrChunk::EntityRef(name) => {
                iter.node.kind = NodeKind::EntityReference;
                iter.node.set_name(&name);
                iter.node.value = Value::default();
            }
        }
        iter.node.depth = depth;
        true
    }

    /// Expand the entity reference the reader is positioned on. Its content
    /// follows on the next reads, closed by an `EndEntity` node.
    pub fn resolve_entity(&mut self) -> Result<()> {
        let res = self.resolve_entity_inner();
        self.outcome(res)
    }

    pub(super) fn resolve_entity_inner(&mut self) -> Result<()> {
        if let Some(iter) = &self.attr_value {
            if iter.node.kind != NodeKind::EntityReference || iter.expansion.is_some() {
                return Err(self.error(Reason::InvalidOperation(
                    "not positioned on an entity reference",
                )));
            }
            let name = iter.node.name.clone();
            let decl = self
                .schema
                .as_ref()
                .and_then(|schema| schema.entity(&name))
                .filter(|decl| !decl.is_external())
                .cloned();
            let mut text = String::new();
            if let Some(decl) = decl {
                if decl.is_expanding() {
                    return Err(self.error(Reason::RecursiveEntity(name)));
                }
                self.expand_in_attribute(&decl, &mut text)?;
            }
            if let Some(iter) = &mut self.attr_value {
                let text = if text.is_empty() { None } else { Some(text) };
                iter.expansion = Some((text, name));
            }
            return Ok(());
        }

        if self.state != ParsingState::EntityReference {
            return Err(self.error(Reason::InvalidOperation(
                "not positioned on an entity reference",
            )));
        }
        let name = self.name().to_string();
        let declared = self
            .schema
            .as_ref()
            .and_then(|schema| schema.entity(&name))
            .cloned();
        let decl = match declared {
            Some(decl) if decl.is_external() && self.settings.resolver.is_none() => {
                EntityDecl::placeholder(decl.name.clone())
            }
            Some(decl) => decl,
            None => EntityDecl::placeholder(self.names.intern(&name)),
        };
        if decl.is_expanding() {
            return Err(self.error(Reason::RecursiveEntity(name)));
        }
        self.enter_entity(&decl, true)?;
        self.state = self.content_state();
        Ok(())
    }
}
