use std::collections::HashMap;

use super::provider::ResourceProvider;
use super::shader::ShaderKey;
use super::ProgramHandle;
use crate::error::Result;

/// Memoises program loads by key so permutations shared between stages are
/// only requested from the provider once.
pub struct ProgramCache {
    programs: HashMap<ShaderKey, ProgramHandle>,
    hits: usize,
    misses: usize,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_load(
        &mut self,
        key: &ShaderKey,
        provider: &dyn ResourceProvider,
    ) -> Result<ProgramHandle> {
        if let Some(program) = self.programs.get(key) {
            self.hits += 1;
            return Ok(*program);
        }

        let program = provider.load_program(key)?;
        log::debug!("Loaded program {} as {}", key, key.cache_name());
        self.misses += 1;
        self.programs.insert(key.clone(), program);
        Ok(program)
    }

    pub fn get(&self, key: &ShaderKey) -> Option<ProgramHandle> {
        self.programs.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeResources;

    #[test]
    fn second_request_is_served_from_cache() {
        let provider = FakeResources::default();
        let mut cache = ProgramCache::new();
        let key = ShaderKey::new("shaders/Bloom.frag");

        let first = cache.get_or_load(&key, &provider).expect("first load");
        let second = cache.get_or_load(&key, &provider).expect("cached load");

        assert_eq!(first, second);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
        assert_eq!(provider.load_count(), 1);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let provider = FakeResources::failing_on("shaders/Broken.frag");
        let mut cache = ProgramCache::new();
        let key = ShaderKey::new("shaders/Broken.frag");

        assert!(cache.get_or_load(&key, &provider).is_err());
        assert!(cache.is_empty());
    }
}
