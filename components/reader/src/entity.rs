//! Stack of entities being read

use std::mem;
use std::rc::Rc;

use log::debug;

use crate::buffer::BufferState;
use crate::dtd::EntityDecl;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Document,
    GeneralEntity,
    ParameterEntity,
    ExternalSubset,
}

/// Entity that owns a buffer
pub(crate) struct FrameInfo {
    pub entity: Option<Rc<EntityDecl>>,
    /// Never reused; 0 is the document
    pub id: u32,
    pub kind: FrameKind,
    /// End of the entity is reported as a node
    pub reported: bool,
}

/// Suspended entity below the current one
pub(crate) struct EntityFrame {
    pub buffer: BufferState,
    pub info: FrameInfo,
}

pub(crate) struct EntityStack {
    frames: Vec<EntityFrame>,
    current: FrameInfo,
    next_id: u32,
}

impl Default for EntityStack {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            current: FrameInfo {
                entity: None,
                id: 0,
                kind: FrameKind::Document,
                reported: false,
            },
            next_id: 1,
        }
    }
}

impl EntityStack {
    /// Save `buffer` and make `fresh` the current buffer. Returns the id of
    /// the new frame.
    pub fn push(
        &mut self,
        buffer: &mut BufferState,
        fresh: BufferState,
        entity: Option<Rc<EntityDecl>>,
        kind: FrameKind,
        reported: bool,
    ) -> u32 {
        if let Some(decl) = &entity {
            decl.expanding.set(true);
            debug!("entering entity {}", decl.name);
        }
        let id = self.next_id;
        self.next_id += 1;
        let saved = mem::replace(buffer, fresh);
        let info = mem::replace(
            &mut self.current,
            FrameInfo {
                entity,
                id,
                kind,
                reported,
            },
        );
        self.frames.push(EntityFrame {
            buffer: saved,
            info,
        });
        id
    }

    /// Restore the buffer below the current one. Returns the info of the
    /// frame that was left, or `None` in the document frame.
    pub fn pop(&mut self, buffer: &mut BufferState) -> Option<FrameInfo> {
        let frame = self.frames.pop()?;
        *buffer = frame.buffer;
        let left = mem::replace(&mut self.current, frame.info);
        if let Some(decl) = &left.entity {
            decl.expanding.set(false);
            debug!("leaving entity {}", decl.name);
        }
        Some(left)
    }

    /// Drop every entity frame and restore the document buffer.
    pub fn unwind(&mut self, buffer: &mut BufferState) {
        while self.pop(buffer).is_some() {}
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current(&self) -> &FrameInfo {
        &self.current
    }

    pub fn current_id(&self) -> u32 {
        self.current.id
    }

    pub fn current_kind(&self) -> FrameKind {
        self.current.kind
    }

    /// Current frame belongs to the external subset or an entity declared
    /// outside of the internal subset.
    pub fn in_external_declarations(&self) -> bool {
        std::iter::once(&self.current)
            .chain(self.frames.iter().map(|f| &f.info))
            .any(|info| {
                info.kind == FrameKind::ExternalSubset
                    || info
                        .entity
                        .as_ref()
                        .map_or(false, |e| e.is_external() || e.declared_externally)
            })
    }

    pub fn document_buffer_ref<'a>(&'a self, current: &'a BufferState) -> &'a BufferState {
        match self.frames.first() {
            Some(frame) => &frame.buffer,
            None => current,
        }
    }

    /// Buffer of the document itself, wherever it is on the stack.
    pub fn document_buffer<'a>(&'a mut self, current: &'a mut BufferState) -> &'a mut BufferState {
        match self.frames.first_mut() {
            Some(frame) => &mut frame.buffer,
            None => current,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::Position;

    fn decl(name: &str) -> Rc<EntityDecl> {
        Rc::new(EntityDecl {
            name: Rc::from(name),
            is_parameter: false,
            value: Some("x".to_string()),
            public_id: None,
            system_id: None,
            notation: None,
            declared_externally: false,
            base_uri: None,
            position: Position::default(),
            expanding: Cell::new(false),
        })
    }

    #[test]
    fn push_pop_restores() {
        let mut stack = EntityStack::default();
        let mut buffer = BufferState::from_text("doc".to_string(), 8, None, false);
        buffer.pos = 2;
        let e = decl("e");
        let id = stack.push(
            &mut buffer,
            BufferState::from_text("x".to_string(), 8, None, true),
            Some(e.clone()),
            FrameKind::GeneralEntity,
            false,
        );
        assert_eq!(1, id);
        assert!(e.is_expanding());
        assert_eq!(1, stack.depth());
        assert_eq!(0, buffer.pos);

        let left = stack.pop(&mut buffer).unwrap();
        assert_eq!(1, left.id);
        assert!(!e.is_expanding());
        assert_eq!(2, buffer.pos);
        assert_eq!(0, stack.current_id());
        assert!(stack.pop(&mut buffer).is_none());
    }

    #[test]
    fn ids_are_not_reused() {
        let mut stack = EntityStack::default();
        let mut buffer = BufferState::empty();
        let a = stack.push(&mut buffer, BufferState::empty(), None, FrameKind::ParameterEntity, false);
        stack.pop(&mut buffer);
        let b = stack.push(&mut buffer, BufferState::empty(), None, FrameKind::ParameterEntity, false);
        assert!(b > a);
    }

    #[test]
    fn unwind_clears_flags() {
        let mut stack = EntityStack::default();
        let mut buffer = BufferState::empty();
        let a = decl("a");
        let b = decl("b");
        stack.push(&mut buffer, BufferState::empty(), Some(a.clone()), FrameKind::GeneralEntity, false);
        stack.push(&mut buffer, BufferState::empty(), Some(b.clone()), FrameKind::GeneralEntity, false);
        stack.unwind(&mut buffer);
        assert_eq!(0, stack.depth());
        assert!(!a.is_expanding());
        assert!(!b.is_expanding());
    }
}
