//! The (language, category) → detector table.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::finding::Category;
use crate::language::Lang;

use super::Detector;

/// Table of detectors keyed by language and category.
#[derive(Default)]
pub struct Catalog {
    detectors: BTreeMap<(Lang, Category), Arc<dyn Detector>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every built-in detector.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        super::overflow::register(&mut catalog);
        super::reentrancy::register(&mut catalog);
        super::call_safety::register(&mut catalog);
        super::access_control::register(&mut catalog);
        super::logic_defect::register(&mut catalog);
        super::randomness::register(&mut catalog);
        super::freeze_bypass::register(&mut catalog);
        catalog
    }

    /// Add or replace the detector for `(lang, detector.category())`.
    pub fn insert(&mut self, lang: Lang, detector: impl Detector + 'static) {
        self.detectors
            .insert((lang, detector.category()), Arc::new(detector));
    }

    pub fn get(&self, lang: Lang, category: Category) -> Option<Arc<dyn Detector>> {
        self.detectors.get(&(lang, category)).cloned()
    }

    /// Detectors for one language, in category order.
    pub fn for_language(&self, lang: Lang) -> Vec<Arc<dyn Detector>> {
        Category::ALL
            .iter()
            .filter_map(|c| self.get(lang, *c))
            .collect()
    }

    /// Categories with no detector for `lang`.
    pub fn missing(&self, lang: Lang) -> Vec<Category> {
        Category::ALL
            .iter()
            .copied()
            .filter(|c| !self.detectors.contains_key(&(lang, *c)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}
