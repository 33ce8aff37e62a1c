use crate::core::builtin_personas::{load_builtin_personas, PersonaConfig};

/// Credential override persisted for one persona.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct KeyOverride {
    pub id: String,
    pub api_key: String,
}

/// Manages the persona catalog and per-persona credential overrides.
///
/// Resolution never fails: an unknown id degrades to the first catalog
/// entry so the chat is never left without a usable persona.
pub struct PersonaRegistry {
    personas: Vec<PersonaConfig>,
}

impl PersonaRegistry {
    /// Build the registry from the built-in catalog.
    pub fn builtin() -> Self {
        let personas = load_builtin_personas();
        assert!(!personas.is_empty(), "builtin persona catalog is empty");
        Self { personas }
    }

    #[cfg(test)]
    pub fn from_personas(personas: Vec<PersonaConfig>) -> Self {
        assert!(!personas.is_empty());
        Self { personas }
    }

    pub fn list(&self) -> &[PersonaConfig] {
        &self.personas
    }

    pub fn find_by_id(&self, id: &str) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Resolve an id to a persona, falling back to the first catalog entry
    /// when the id is unknown.
    pub fn resolve(&self, id: &str) -> &PersonaConfig {
        self.find_by_id(id).unwrap_or(&self.personas[0])
    }

    /// Set or clear the credential override for one persona. Returns false
    /// when the id is unknown.
    pub fn set_user_api_key(&mut self, id: &str, key: &str) -> bool {
        match self.personas.iter_mut().find(|p| p.id == id) {
            Some(persona) => {
                let trimmed = key.trim();
                persona.user_api_key = if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                };
                true
            }
            None => false,
        }
    }

    /// Merge persisted credential overrides onto the catalog. Every other
    /// persona field keeps its catalog value; overrides for unknown ids are
    /// dropped.
    pub fn apply_key_overrides(&mut self, overrides: &[KeyOverride]) {
        for entry in overrides {
            self.set_user_api_key(&entry.id, &entry.api_key);
        }
    }

    /// Snapshot of the overrides worth persisting.
    pub fn key_overrides(&self) -> Vec<KeyOverride> {
        self.personas
            .iter()
            .filter_map(|p| {
                p.user_api_key.as_ref().map(|key| KeyOverride {
                    id: p.id.clone(),
                    api_key: key.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_personas() -> Vec<PersonaConfig> {
        vec![
            PersonaConfig {
                id: "first".to_string(),
                display_name: "First".to_string(),
                provider: "Test".to_string(),
                description: String::new(),
                supports_search: true,
                supports_thinking: false,
                model: "model-a".to_string(),
                system_instruction: None,
                user_api_key: None,
                tags: vec![],
            },
            PersonaConfig {
                id: "second".to_string(),
                display_name: "Second".to_string(),
                provider: "Test".to_string(),
                description: String::new(),
                supports_search: false,
                supports_thinking: true,
                model: "model-b".to_string(),
                system_instruction: Some("be terse".to_string()),
                user_api_key: None,
                tags: vec!["t".to_string()],
            },
        ]
    }

    #[test]
    fn resolve_returns_the_named_persona() {
        let registry = PersonaRegistry::from_personas(test_personas());
        assert_eq!(registry.resolve("second").id, "second");
    }

    #[test]
    fn unknown_id_degrades_to_the_first_entry() {
        let registry = PersonaRegistry::from_personas(test_personas());
        assert_eq!(registry.resolve("no-such-persona").id, "first");
    }

    #[test]
    fn key_override_merge_preserves_catalog_fields() {
        let mut registry = PersonaRegistry::from_personas(test_personas());
        registry.apply_key_overrides(&[
            KeyOverride {
                id: "second".to_string(),
                api_key: "sk-user".to_string(),
            },
            KeyOverride {
                id: "ghost".to_string(),
                api_key: "dropped".to_string(),
            },
        ]);

        let second = registry.find_by_id("second").unwrap();
        assert_eq!(second.user_api_key.as_deref(), Some("sk-user"));
        assert_eq!(second.system_instruction.as_deref(), Some("be terse"));
        assert!(second.supports_thinking);
        assert!(registry.find_by_id("first").unwrap().user_api_key.is_none());
    }

    #[test]
    fn blank_key_clears_the_override() {
        let mut registry = PersonaRegistry::from_personas(test_personas());
        assert!(registry.set_user_api_key("first", "sk-abc"));
        assert!(registry.set_user_api_key("first", "   "));
        assert!(registry.find_by_id("first").unwrap().user_api_key.is_none());
        assert!(registry.key_overrides().is_empty());
    }

    #[test]
    fn key_overrides_snapshot_only_set_keys() {
        let mut registry = PersonaRegistry::from_personas(test_personas());
        registry.set_user_api_key("second", "sk-xyz");

        let overrides = registry.key_overrides();
        assert_eq!(
            overrides,
            vec![KeyOverride {
                id: "second".to_string(),
                api_key: "sk-xyz".to_string(),
            }]
        );
    }

    #[test]
    fn builtin_registry_resolves_its_first_entry_as_fallback() {
        let registry = PersonaRegistry::builtin();
        let fallback = registry.resolve("definitely-unknown");
        assert_eq!(fallback.id, registry.list()[0].id);
    }
}
