use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::ExecutionProfile;

/// Static mapping of language name to execution profile. Pure lookup,
/// populated once at startup.
#[derive(Debug)]
pub struct CompilerRegistry {
    profiles: HashMap<String, Arc<ExecutionProfile>>,
}

impl CompilerRegistry {
    /// The minimum viable set of supported languages.
    pub fn with_default_profiles() -> Self {
        Self::new(vec![
            ExecutionProfile {
                language: "python".to_string(),
                entry_command: "python".to_string(),
                interpreted: true,
                additional_arguments: String::new(),
                image: "virtual_machine_python".to_string(),
                stdout_file: "standard.out".to_string(),
                stderr_file: "error.out".to_string(),
            },
            ExecutionProfile {
                language: "javascript".to_string(),
                entry_command: "node".to_string(),
                interpreted: true,
                additional_arguments: String::new(),
                image: "virtual_machine_node".to_string(),
                stdout_file: "standard.out".to_string(),
                stderr_file: "error.out".to_string(),
            },
        ])
    }

    pub fn new(profiles: Vec<ExecutionProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|profile| (profile.language.clone(), Arc::new(profile)))
                .collect(),
        }
    }

    pub fn get(&self, language: &str) -> Option<Arc<ExecutionProfile>> {
        self.profiles.get(language).cloned()
    }
}
