//! Reference sequences and the reference library

use crate::{nucleotide, UmivarError, UmivarResult};
use std::collections::HashMap;
use std::sync::Arc;

/// A target genomic sequence, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    index: usize,
    name: String,
    sequence: Vec<u8>,
}

impl Reference {
    pub fn new(index: usize, name: &str, sequence: &str) -> UmivarResult<Self> {
        if sequence.is_empty() {
            return Err(UmivarError::InvalidSequence(format!(
                "Reference {} has an empty sequence",
                name
            )));
        }

        Ok(Self {
            index,
            name: name.to_string(),
            sequence: nucleotide::encode(sequence)?,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nucleotide codes of the whole sequence
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn code_at(&self, pos: usize) -> u8 {
        self.sequence[pos]
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// An indexed collection of references shared by all tables and callers
#[derive(Debug, Clone, Default)]
pub struct ReferenceLibrary {
    references: Vec<Arc<Reference>>,
    by_name: HashMap<String, usize>,
}

impl ReferenceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a library from (name, sequence) pairs, assigning indices in order
    pub fn from_sequences<'a, I>(entries: I) -> UmivarResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut library = Self::new();
        for (name, sequence) in entries {
            library.add(name, sequence)?;
        }
        Ok(library)
    }

    pub fn add(&mut self, name: &str, sequence: &str) -> UmivarResult<Arc<Reference>> {
        if self.by_name.contains_key(name) {
            return Err(UmivarError::InvalidSequence(format!(
                "Duplicate reference name: {}",
                name
            )));
        }

        let index = self.references.len();
        let reference = Arc::new(Reference::new(index, name, sequence)?);
        self.by_name.insert(name.to_string(), index);
        self.references.push(Arc::clone(&reference));
        Ok(reference)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Reference>> {
        self.references.get(index)
    }

    pub fn by_name(&self, name: &str) -> UmivarResult<&Arc<Reference>> {
        self.by_name
            .get(name)
            .and_then(|&i| self.references.get(i))
            .ok_or_else(|| UmivarError::UnknownReference(name.to_string()))
    }

    pub fn references(&self) -> &[Arc<Reference>] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_indexing() {
        let library =
            ReferenceLibrary::from_sequences([("amp1", "ACGTACGT"), ("amp2", "GGGCCC")]).unwrap();

        assert_eq!(library.len(), 2);
        assert_eq!(library.by_name("amp2").unwrap().index(), 1);
        assert_eq!(library.get(0).unwrap().name(), "amp1");
        assert_eq!(library.get(0).unwrap().code_at(1), nucleotide::C);
        assert!(matches!(
            library.by_name("missing"),
            Err(UmivarError::UnknownReference(_))
        ));
    }

    #[test]
    fn test_duplicate_and_empty_references() {
        let mut library = ReferenceLibrary::new();
        library.add("amp1", "ACGT").unwrap();
        assert!(library.add("amp1", "ACGT").is_err());
        assert!(library.add("amp2", "").is_err());
    }
}
