//! In-memory element mapper

use crate::{ElementMapper, Result, TreeError};

/// Mapper holding payloads in a slot vector keyed by insertion order.
///
/// Keys survive for the lifetime of the mapper instance only; use
/// [`crate::FileMapper`] when payloads must outlive the process.
#[derive(Debug, Default)]
pub struct MemoryMapper<E: Clone> {
    slots: Vec<Option<E>>,
    closed: bool,
}

impl<E: Clone> MemoryMapper<E> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TreeError::Closed);
        }
        Ok(())
    }
}

impl<E: Clone> ElementMapper for MemoryMapper<E> {
    type Element = E;

    fn element(&mut self, key: u64) -> Result<E> {
        self.ensure_open()?;
        self.slots
            .get(key as usize)
            .and_then(|s| s.clone())
            .ok_or(TreeError::NotFound(key))
    }

    fn assign_key(&mut self, element: &E) -> Result<u64> {
        self.ensure_open()?;
        let key = self.slots.len() as u64;
        self.slots.push(Some(element.clone()));
        Ok(key)
    }

    fn clear(&mut self, key: u64) -> Result<()> {
        self.ensure_open()?;
        match self.slots.get_mut(key as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(TreeError::NotFound(key)),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_get() {
        let mut mapper = MemoryMapper::new();
        let a = mapper.assign_key(&"alpha".to_string()).unwrap();
        let b = mapper.assign_key(&"beta".to_string()).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(mapper.element(a).unwrap(), "alpha");
        assert_eq!(mapper.element(b).unwrap(), "beta");
        assert_eq!(mapper.len(), 2);
    }

    #[test]
    fn test_clear_then_not_found() {
        let mut mapper = MemoryMapper::new();
        let key = mapper.assign_key(&7u32).unwrap();
        mapper.clear(key).unwrap();
        assert!(matches!(mapper.element(key), Err(TreeError::NotFound(0))));
        assert!(matches!(mapper.clear(key), Err(TreeError::NotFound(0))));
        assert!(matches!(mapper.element(99), Err(TreeError::NotFound(99))));
    }

    #[test]
    fn test_closed_rejects_operations() {
        let mut mapper = MemoryMapper::new();
        let key = mapper.assign_key(&1u8).unwrap();
        mapper.close().unwrap();
        mapper.close().unwrap();
        assert!(mapper.is_closed());
        assert!(matches!(mapper.element(key), Err(TreeError::Closed)));
        assert!(matches!(mapper.assign_key(&2u8), Err(TreeError::Closed)));
    }
}
