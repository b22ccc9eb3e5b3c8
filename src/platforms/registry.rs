use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::RegistryError;
use super::descriptor::{Category, PlatformDescriptor, PlatformSpec};

static BUILTIN_CATALOG: &str = include_str!("catalog.json");

/// Read-only catalog of platform descriptors, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: Vec<Arc<PlatformDescriptor>>,
    index: HashMap<String, usize>,
}

impl PlatformRegistry {
    /// Catalog shipped with the crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let specs: Vec<PlatformSpec> = serde_json::from_str(raw)?;
        Self::from_specs(specs)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_specs<I>(specs: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = PlatformSpec>,
    {
        let mut registry = Self::default();
        for spec in specs {
            let descriptor = PlatformDescriptor::try_from(spec)?;
            if registry.index.contains_key(&descriptor.id) {
                return Err(RegistryError::Duplicate(descriptor.id));
            }
            registry
                .index
                .insert(descriptor.id.clone(), registry.platforms.len());
            registry.platforms.push(Arc::new(descriptor));
        }
        log::debug!("loaded {} platform descriptors", registry.platforms.len());
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<PlatformDescriptor>> {
        self.index
            .get(id)
            .map(|&idx| Arc::clone(&self.platforms[idx]))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.platforms.iter().map(|platform| platform.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PlatformDescriptor>> + '_ {
        self.platforms.iter()
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn by_category(&self, category: Category) -> Vec<Arc<PlatformDescriptor>> {
        self.platforms
            .iter()
            .filter(|platform| platform.category == category)
            .cloned()
            .collect()
    }

    /// Resolves ids in request order; any unknown id fails the whole lookup.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Arc<PlatformDescriptor>>, RegistryError> {
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                self.get(id)
                    .ok_or_else(|| RegistryError::UnknownPlatform(id.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::StrategyKind;

    #[test]
    fn builtin_catalog_loads() {
        let registry = PlatformRegistry::builtin().unwrap();
        assert!(registry.len() >= 20);
        let github = registry.get("github").unwrap();
        assert_eq!(github.strategies[0], StrategyKind::HttpBasic);
        assert!(github.ceiling(StrategyKind::HttpBasic) >= 0.9);
        assert!(!registry.by_category(Category::Tech).is_empty());
    }

    #[test]
    fn select_preserves_order_and_rejects_unknown() {
        let registry = PlatformRegistry::builtin().unwrap();
        let selected = registry.select(&["reddit", "github"]).unwrap();
        assert_eq!(selected[0].id, "reddit");
        assert_eq!(selected[1].id, "github");

        match registry.select(&["github", "myspace2"]) {
            Err(RegistryError::UnknownPlatform(id)) => assert_eq!(id, "myspace2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicates_and_bad_json() {
        let raw = r#"[
            {"id":"a","name":"A","probe":"https://a.test/{username}","strategies":["http_basic"],"parse":{"type":"status_code"}},
            {"id":"a","name":"A","probe":"https://a.test/{username}","strategies":["http_basic"],"parse":{"type":"status_code"}}
        ]"#;
        assert!(matches!(
            PlatformRegistry::from_json_str(raw),
            Err(RegistryError::Duplicate(_))
        ));
        assert!(matches!(
            PlatformRegistry::from_json_str("{not json"),
            Err(RegistryError::Parse(_))
        ));
    }
}
