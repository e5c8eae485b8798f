//! Operator commands exposed by modules
//!
//! A module offers verbs; the host registers each one under a qualified name
//! `{base_path}.{verb}` (lowercase, whitespace replaced with '_').

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

use crate::module::traits::ModuleError;
use crate::utils::error::panic_message;

/// Command action; receives the arguments after the command name
pub type CommandAction = Arc<dyn Fn(&[String]) -> Result<(), ModuleError> + Send + Sync>;

/// A command offered by a module
#[derive(Clone)]
pub struct ModuleCommand {
    pub verb: String,
    pub help: String,
    action: CommandAction,
}

impl std::fmt::Debug for ModuleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCommand")
            .field("verb", &self.verb)
            .field("help", &self.help)
            .finish()
    }
}

impl ModuleCommand {
    pub fn new<F>(verb: impl Into<String>, help: impl Into<String>, action: F) -> Self
    where
        F: Fn(&[String]) -> Result<(), ModuleError> + Send + Sync + 'static,
    {
        Self {
            verb: verb.into(),
            help: help.into(),
            action: Arc::new(action),
        }
    }
}

/// Qualified command name, or `None` for a blank verb
pub fn qualified_name(base_path: &str, verb: &str) -> Option<String> {
    if verb.trim().is_empty() {
        return None;
    }
    let prefix = base_path.to_lowercase().replace(' ', "_");
    let verb = verb.trim().to_lowercase().replace([' ', '\t'], "_");
    Some(format!("{}.{}", prefix, verb))
}

/// A registered command
#[derive(Clone)]
pub struct RegisteredCommand {
    pub name: String,
    pub base_path: String,
    pub help: String,
    action: CommandAction,
}

/// Registry of all module commands
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the commands of the module at `base_path`
    ///
    /// Returns the number registered. Blank verbs and name collisions are
    /// logged and skipped.
    pub fn register_module(&mut self, base_path: &str, commands: Vec<ModuleCommand>) -> usize {
        let mut registered = 0;
        for command in commands {
            let Some(name) = qualified_name(base_path, &command.verb) else {
                warn!("Module {} offers a command without a verb, skipping", base_path);
                continue;
            };
            if command.verb.contains([' ', '\t']) {
                warn!(
                    "Command verb '{}' of module {} contains whitespace, registered as {}",
                    command.verb, base_path, name
                );
            }
            if self.commands.contains_key(&name) {
                warn!("Command {} already registered, skipping", name);
                continue;
            }
            self.commands.insert(
                name.clone(),
                RegisteredCommand {
                    name,
                    base_path: base_path.to_string(),
                    help: command.help,
                    action: command.action,
                },
            );
            registered += 1;
        }
        registered
    }

    /// Drop every command of the module at `base_path`
    pub fn unregister_module(&mut self, base_path: &str) {
        self.commands.retain(|_, c| c.base_path != base_path);
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn help(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(|c| c.help.as_str())
    }

    /// Clone out a command so it can run without holding the registry
    pub fn get(&self, name: &str) -> Option<RegisteredCommand> {
        self.commands.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl RegisteredCommand {
    /// Run the action; a panic is reported as an operation error
    pub fn execute(&self, args: &[String]) -> Result<(), ModuleError> {
        info!("Executing command {}", self.name);
        match catch_unwind(AssertUnwindSafe(|| (self.action)(args))) {
            Ok(result) => result,
            Err(payload) => Err(ModuleError::OperationError(format!(
                "command {} panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            ))),
        }
    }
}
