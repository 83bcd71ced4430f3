// Per-evaluation script sandbox.
//
// Each evaluation gets a fresh Rhai engine bound to the five host functions
// and a read-only projection of the triggering message. Nothing survives
// between runs except what the script writes through `set`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rhai::{Dynamic, Engine, Map, Scope};

use crate::message::{Message, Value};

/// What one sandbox run produced. `display` holds whatever the script wrote
/// before a failure; the caller decides to discard it when `error` is set.
pub(crate) struct Outcome {
    pub store: HashMap<String, Value>,
    pub display: HashMap<String, Value>,
    pub error: Option<String>,
}

struct SandboxState {
    store: HashMap<String, Value>,
    display: HashMap<String, Value>,
}

pub(crate) fn execute(script: &str, store: HashMap<String, Value>, message: &Message) -> Outcome {
    let state = Rc::new(RefCell::new(SandboxState {
        store,
        display: HashMap::new(),
    }));

    let engine = build_engine(&state);
    let mut scope = Scope::new();
    scope.push_constant("message", project_message(message));

    let error = engine
        .run_with_scope(&mut scope, script)
        .err()
        .map(|e| e.to_string());

    drop(engine);
    let state = state.borrow();
    Outcome {
        store: state.store.clone(),
        display: state.display.clone(),
        error,
    }
}

fn build_engine(state: &Rc<RefCell<SandboxState>>) -> Engine {
    let mut engine = Engine::new();

    let cell = state.clone();
    engine.register_fn("get", move |key: &str| -> Dynamic {
        if key.is_empty() {
            return Dynamic::UNIT;
        }
        cell.borrow()
            .store
            .get(key)
            .map(to_dynamic)
            .unwrap_or(Dynamic::UNIT)
    });

    let cell = state.clone();
    engine.register_fn("get", move |key: &str, default: Dynamic| -> Dynamic {
        if key.is_empty() {
            return Dynamic::UNIT;
        }
        match cell.borrow().store.get(key) {
            Some(value) => to_dynamic(value),
            None => default,
        }
    });

    let cell = state.clone();
    engine.register_fn("set", move |key: &str, value: Dynamic| {
        if key.is_empty() {
            return;
        }
        if let Some(value) = from_dynamic(&value) {
            cell.borrow_mut().store.insert(key.to_string(), value);
        }
    });

    for slot in ["title", "description", "action"] {
        let cell = state.clone();
        engine.register_fn(slot, move |value: Dynamic| {
            if let Some(value) = from_dynamic(&value) {
                cell.borrow_mut().display.insert(slot.to_string(), value);
            }
        });
    }

    engine
}

/// Read-only view of the message. Absent fields (empty name, zero
/// timestamp, no value) are omitted entirely; reading them from the script
/// yields unit, not a null placeholder.
fn project_message(message: &Message) -> Map {
    let mut map = Map::new();
    if !message.name.is_empty() {
        map.insert("name".into(), message.name.clone().into());
    }
    if message.timestamp != 0 {
        map.insert("timestamp".into(), Dynamic::from(message.timestamp));
    }
    if let Some(value) = &message.value {
        map.insert("value".into(), to_dynamic(value));
    }
    map
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Text(s) => Dynamic::from(s.clone()),
    }
}

/// Scalars only; unit and structured values map to `None` so the host
/// no-ops on them.
fn from_dynamic(value: &Dynamic) -> Option<Value> {
    if value.is_unit() {
        return None;
    }
    if let Ok(b) = value.as_bool() {
        return Some(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Some(Value::Float(f));
    }
    value.clone().into_string().ok().map(Value::Text)
}
