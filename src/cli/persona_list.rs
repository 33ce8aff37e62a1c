//! Non-interactive listing of the persona catalog.

use crate::core::persona::PersonaRegistry;
use crate::core::storage::{load_key_overrides, StoragePaths};

pub fn list_personas() {
    let mut registry = PersonaRegistry::builtin();
    if let Ok(paths) = StoragePaths::resolve() {
        registry.apply_key_overrides(&load_key_overrides(&paths.keys));
    }

    println!("Available personas:\n");
    println!(
        "  {:<16} {:<26} {:<22} {:<18} {}",
        "ID", "PERSONA", "MODEL", "CAPABILITIES", "KEY"
    );
    for persona in registry.list() {
        let mut caps = Vec::new();
        if persona.supports_search {
            caps.push("search");
        }
        if persona.supports_thinking {
            caps.push("thinking");
        }
        let key = if persona.user_api_key.is_some() {
            "set"
        } else {
            "env"
        };
        println!(
            "  {:<16} {:<26} {:<22} {:<18} {}",
            persona.id,
            persona.display_name,
            persona.model,
            caps.join(", "),
            key
        );
    }
    println!("\nKEY \"env\" means the persona falls back to GEMINI_API_KEY.");
}
