// Profiles: a user-authored script plus the state it accumulates.

mod sandbox;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::library::ScriptLibrary;
use crate::message::{FilterDefinition, Message, Value};

/// The display slot a failed evaluation writes its error text into.
const ERROR_SLOT: &str = "error";

/// Everything a client sends to define a profile. Identity is `id`; all
/// other fields are replaceable through [`ProfileUpdate`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub eval_script: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub filter: FilterDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
}

/// Partial update of a definition; supplied fields are replaced wholesale.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub eval_script: Option<String>,
    pub is_local: Option<bool>,
    pub filter: Option<FilterDefinition>,
    pub library_id: Option<String>,
}

impl ProfileDefinition {
    pub fn apply(&mut self, update: ProfileUpdate) {
        if let Some(eval_script) = update.eval_script {
            self.eval_script = eval_script;
        }
        if let Some(is_local) = update.is_local {
            self.is_local = is_local;
        }
        if let Some(filter) = update.filter {
            self.filter = filter;
        }
        if let Some(library_id) = update.library_id {
            self.library_id = Some(library_id);
        }
    }
}

/// The viewer-facing snapshot of a profile. The store is working memory and
/// is never part of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileState {
    pub definition: ProfileDefinition,
    pub display: HashMap<String, Value>,
}

/// A scripted aggregation over the measurement stream.
///
/// `store` survives evaluations and process restarts; `display` is rebuilt
/// from scratch by every accepted evaluation. The whole triple is what the
/// durable store persists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub definition: ProfileDefinition,
    #[serde(default)]
    pub store: HashMap<String, Value>,
    #[serde(default)]
    pub display: HashMap<String, Value>,
}

impl Profile {
    pub fn new(definition: ProfileDefinition) -> Self {
        Self {
            definition,
            store: HashMap::new(),
            display: HashMap::new(),
        }
    }

    /// Evaluate one measurement against this profile.
    ///
    /// A message rejected by the filter leaves both store and display
    /// exactly as the previous evaluation left them. An accepted message
    /// resets the display, runs the script in a fresh sandbox, and on any
    /// script failure replaces the display with a single `error` slot;
    /// store writes made before the failure are kept.
    pub fn eval(&mut self, message: &Message, library: &ScriptLibrary) {
        if !self.definition.filter.accepts(&message.name) {
            return;
        }
        self.display.clear();

        let script = match self.resolve_script(library) {
            Ok(script) => script.to_string(),
            Err(text) => {
                warn!(profile = %self.definition.id, error = %text, "profile script unavailable");
                self.display.insert(ERROR_SLOT.to_string(), Value::Text(text));
                return;
            }
        };

        let outcome = sandbox::execute(&script, std::mem::take(&mut self.store), message);
        self.store = outcome.store;
        match outcome.error {
            Some(text) => {
                warn!(profile = %self.definition.id, error = %text, "profile script failed");
                self.display.insert(ERROR_SLOT.to_string(), Value::Text(text));
            }
            None => self.display = outcome.display,
        }
    }

    /// Current state of the profile as viewers see it.
    pub fn value(&self) -> ProfileState {
        ProfileState {
            definition: self.definition.clone(),
            display: self.display.clone(),
        }
    }

    fn resolve_script<'a>(
        &'a self,
        library: &'a ScriptLibrary,
    ) -> std::result::Result<&'a str, String> {
        if !self.definition.eval_script.is_empty() {
            return Ok(&self.definition.eval_script);
        }
        match &self.definition.library_id {
            Some(id) => library
                .get(id)
                .ok_or_else(|| format!("unknown library script {:?}", id)),
            None => Err("profile has no evaluation script".to_string()),
        }
    }
}
