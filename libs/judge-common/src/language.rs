//! The Language Registry: a process-wide, read-only table of per-language
//! recipes, loaded once at startup from a JSON document and looked up by
//! [`LanguageId`] thereafter.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::LanguageId;

/// The immutable per-language recipe: image, file layout, and the exact
/// compile/run commands to invoke inside a container.
///
/// `compile_command` and `run_command` are already-resolved token
/// sequences: the registry is the one place that knows how to turn a
/// recipe into exact argv for the Container Driver, so nothing downstream
/// needs to special-case a language by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageRecipe {
    pub language_id: LanguageId,
    pub image: String,
    pub source_filename: String,
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    pub default_run_timeout_ms: u64,
    pub default_compile_timeout_ms: u64,
    pub default_memory_limit_mib: u64,
    pub default_cpu_quota: f64,
}

impl LanguageRecipe {
    /// Whether this language requires a compile step before running.
    pub fn requires_compile(&self) -> bool {
        self.compile_command.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageRecipe>,
}

/// A process-wide, read-only table initialized at startup. Lookup by
/// [`LanguageId`] is a `HashMap` get — constant-time.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    recipes: HashMap<LanguageId, LanguageRecipe>,
}

impl LanguageRegistry {
    /// Load recipes from a JSON document at `path` (default
    /// `config/languages.json`, via `LANGUAGES_CONFIG_PATH`).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::LanguageConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::load_from_str(&content)
    }

    fn load_from_str(content: &str) -> Result<Self, Error> {
        let parsed: LanguagesFile = serde_json::from_str(content)
            .map_err(|e| Error::LanguageConfig(format!("failed to parse languages.json: {e}")))?;

        if parsed.languages.is_empty() {
            return Err(Error::LanguageConfig(
                "languages.json declares no languages".to_string(),
            ));
        }

        let mut recipes = HashMap::with_capacity(parsed.languages.len());
        for recipe in parsed.languages {
            recipes.insert(recipe.language_id, recipe);
        }
        Ok(Self { recipes })
    }

    /// Look up the recipe for `language_id`. Unknown identifiers cause the
    /// Submission API to reject the request.
    pub fn get(&self, language_id: LanguageId) -> Option<&LanguageRecipe> {
        self.recipes.get(&language_id)
    }

    pub fn contains(&self, language_id: LanguageId) -> bool {
        self.recipes.contains_key(&language_id)
    }

    pub fn language_ids(&self) -> Vec<LanguageId> {
        self.recipes.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "languages": [
            {
                "language_id": "python3",
                "image": "judge-python3:latest",
                "source_filename": "main.py",
                "compile_command": null,
                "run_command": ["python3", "main.py"],
                "default_run_timeout_ms": 5000,
                "default_compile_timeout_ms": 10000,
                "default_memory_limit_mib": 256,
                "default_cpu_quota": 0.5
            },
            {
                "language_id": "cpp",
                "image": "judge-cpp:latest",
                "source_filename": "main.cpp",
                "compile_command": ["g++", "-O2", "-o", "main", "main.cpp"],
                "run_command": ["./main"],
                "default_run_timeout_ms": 5000,
                "default_compile_timeout_ms": 10000,
                "default_memory_limit_mib": 256,
                "default_cpu_quota": 0.5
            }
        ]
    }"#;

    #[test]
    fn loads_recipes_keyed_by_language_id() {
        let registry = LanguageRegistry::load_from_str(SAMPLE).unwrap();
        assert!(registry.contains(LanguageId::Python3));
        assert!(registry.contains(LanguageId::Cpp));
        assert!(!registry.contains(LanguageId::Java));
    }

    #[test]
    fn python_recipe_has_no_compile_step() {
        let registry = LanguageRegistry::load_from_str(SAMPLE).unwrap();
        let recipe = registry.get(LanguageId::Python3).unwrap();
        assert!(!recipe.requires_compile());
        assert_eq!(recipe.run_command, vec!["python3", "main.py"]);
    }

    #[test]
    fn cpp_recipe_requires_compile() {
        let registry = LanguageRegistry::load_from_str(SAMPLE).unwrap();
        let recipe = registry.get(LanguageId::Cpp).unwrap();
        assert!(recipe.requires_compile());
        assert_eq!(recipe.compile_command.as_ref().unwrap()[0], "g++");
    }

    #[test]
    fn empty_language_list_is_rejected() {
        let err = LanguageRegistry::load_from_str(r#"{"languages": []}"#).unwrap_err();
        assert!(matches!(err, Error::LanguageConfig(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = LanguageRegistry::load_from_str("not json").unwrap_err();
        assert!(matches!(err, Error::LanguageConfig(_)));
    }
}
