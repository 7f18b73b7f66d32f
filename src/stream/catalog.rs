use serde::Serialize;

use crate::config::SourceEntry;

pub const NONE_LABEL: &str = "None";

/// Named sources offered to the user. Index 0 is always "None" (no stream).
#[derive(Clone, Debug)]
pub struct SourceCatalog {
    entries: Vec<SourceEntry>,
}

/// One catalog row as exposed over the API.
#[derive(Clone, Debug, Serialize)]
pub struct CatalogItem<'a> {
    pub index: usize,
    pub name: &'a str,
    pub uri: &'a str,
}

impl SourceCatalog {
    pub fn new(sources: Vec<SourceEntry>) -> Self {
        let mut entries = Vec::with_capacity(sources.len() + 1);
        entries.push(SourceEntry::new(NONE_LABEL, ""));
        entries.extend(sources);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: usize) -> Option<&SourceEntry> {
        self.entries.get(index)
    }

    pub fn name(&self, index: usize) -> &str {
        self.entries
            .get(index)
            .map(|entry| entry.name.as_str())
            .unwrap_or(NONE_LABEL)
    }

    pub fn items(&self) -> Vec<CatalogItem<'_>> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| CatalogItem {
                index,
                name: &entry.name,
                uri: &entry.uri,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_none() {
        let catalog = SourceCatalog::new(vec![SourceEntry::new("Webcam", "0")]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.name(0), "None");
        assert_eq!(catalog.name(1), "Webcam");
        assert_eq!(catalog.name(9), "None");
        assert!(!catalog.is_empty());
        assert!(SourceCatalog::new(Vec::new()).is_empty());
    }
}
