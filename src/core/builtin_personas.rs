//! Built-in persona catalog
//!
//! Loads the persona catalog embedded from builtin_personas.toml at build
//! time. Persona differences are entirely data-driven: an instruction plus
//! capability flags over one of the backing models.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaConfig {
    pub id: String,
    pub display_name: String,
    pub provider: String,
    pub description: String,
    pub supports_search: bool,
    pub supports_thinking: bool,
    /// Identifier of the backing model the request is issued against.
    pub model: String,
    #[serde(default)]
    pub system_instruction: Option<String>,
    /// User-supplied credential override, merged in from local storage.
    #[serde(default)]
    pub user_api_key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BuiltinPersonasConfig {
    personas: Vec<PersonaConfig>,
}

/// Load the built-in personas from the embedded configuration.
pub fn load_builtin_personas() -> Vec<PersonaConfig> {
    const CONFIG_CONTENT: &str = include_str!("../builtin_personas.toml");

    let config: BuiltinPersonasConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_personas.toml");

    config.personas
}
