use std::collections::HashSet;
use std::rc::Rc;

/// Interning table for names used in declarations
#[derive(Default)]
pub struct NameTable {
    names: HashSet<Rc<str>>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Rc<str> {
        if let Some(interned) = self.names.get(name) {
            return interned.clone();
        }
        let interned: Rc<str> = Rc::from(name);
        self.names.insert(interned.clone());
        interned
    }

    pub fn get(&self, name: &str) -> Option<Rc<str>> {
        self.names.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
