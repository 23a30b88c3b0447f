//! Namespace bindings in scope

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

#[derive(Clone, Debug)]
pub(crate) struct NamespaceDecl {
    /// Empty for the default namespace
    prefix: String,
    /// Empty when the declaration undeclares the default namespace
    uri: String,
}

/// Stack of namespace declarations, one scope per element that declares
/// at least one namespace
#[derive(Default)]
pub(crate) struct NamespaceStack {
    namespaces: Vec<NamespaceDecl>,
    stack: Vec<usize>,
}

impl NamespaceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_scope(&mut self) -> NamespaceStackScopeBuilder {
        NamespaceStackScopeBuilder {
            stack: self,
            size: 0,
        }
    }

    pub fn pop_scope(&mut self) {
        if let Some(size) = self.stack.pop() {
            self.namespaces.truncate(self.namespaces.len() - size);
        }
    }

    /// URI bound to `prefix`; the empty prefix looks up the default
    /// namespace.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => return Some(XML_NAMESPACE),
            "xmlns" => return Some(XMLNS_NAMESPACE),
            _ => {}
        }
        self.namespaces
            .iter()
            .rev()
            .find(|decl| decl.prefix == prefix)
            .map(|decl| decl.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }
}

pub(crate) struct NamespaceStackScopeBuilder<'a> {
    stack: &'a mut NamespaceStack,
    size: usize,
}

impl<'a> NamespaceStackScopeBuilder<'a> {
    pub fn add_prefix(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.stack.namespaces.push(NamespaceDecl {
            prefix: prefix.into(),
            uri: uri.into(),
        });
        self.size += 1;
    }

    pub fn finish(self) -> &'a mut NamespaceStack {
        self.stack.stack.push(self.size);
        self.stack
    }
}

/// Namespace URI of a node with the given qualified name parts.
///
/// Attributes without prefix are in no namespace; `xmlns` attributes are in
/// the xmlns namespace.
pub(crate) fn namespace_of<'a>(
    stack: &'a NamespaceStack,
    name: &str,
    prefix: &str,
    is_attribute: bool,
) -> &'a str {
    if is_attribute {
        if name == "xmlns" {
            return XMLNS_NAMESPACE;
        }
        if prefix.is_empty() {
            return "";
        }
    }
    stack.resolve(prefix).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes() {
        let mut stack = NamespaceStack::new();
        {
            let mut scope = stack.build_scope();
            scope.add_prefix("", "urn:default");
            scope.add_prefix("p", "urn:p");
            scope.finish();
        }
        {
            let mut scope = stack.build_scope();
            scope.add_prefix("p", "urn:inner");
            scope.add_prefix("", "");
            scope.finish();
        }
        assert_eq!(Some("urn:inner"), stack.resolve("p"));
        assert_eq!(None, stack.resolve(""));
        stack.pop_scope();
        assert_eq!(Some("urn:p"), stack.resolve("p"));
        assert_eq!(Some("urn:default"), stack.resolve(""));
        stack.pop_scope();
        assert_eq!(None, stack.resolve("p"));
        assert_eq!(Some(XML_NAMESPACE), stack.resolve("xml"));
    }

    #[test]
    fn attributes_without_prefix() {
        let mut stack = NamespaceStack::new();
        let mut scope = stack.build_scope();
        scope.add_prefix("", "urn:d");
        scope.finish();
        assert_eq!("", namespace_of(&stack, "a", "", true));
        assert_eq!("urn:d", namespace_of(&stack, "e", "", false));
        assert_eq!(XMLNS_NAMESPACE, namespace_of(&stack, "xmlns", "", true));
    }
}
