//! Keyboard listeners

use std::time::Instant;

use psyflow_core::{FlowResult, InputRegistrationError};

use crate::{key_code, KeyCode, ListenerId};

/// One entry of an allow-list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeySpec {
    Name(String),
    Code(KeyCode),
}

impl KeySpec {
    pub fn resolve(&self) -> FlowResult<KeyCode> {
        match self {
            KeySpec::Code(code) => Ok(*code),
            KeySpec::Name(name) => key_code(name)
                .ok_or_else(|| InputRegistrationError::UnknownKey(name.clone()).into()),
        }
    }
}

impl From<&str> for KeySpec {
    fn from(name: &str) -> Self {
        KeySpec::Name(name.to_string())
    }
}

impl From<String> for KeySpec {
    fn from(name: String) -> Self {
        KeySpec::Name(name)
    }
}

impl From<u32> for KeySpec {
    fn from(code: u32) -> Self {
        KeySpec::Code(KeyCode(code))
    }
}

impl From<KeyCode> for KeySpec {
    fn from(code: KeyCode) -> Self {
        KeySpec::Code(code)
    }
}

/// Keyboard listener configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyboardConfig {
    /// Allowed keys; empty accepts any key
    pub valid_responses: Vec<KeySpec>,
    /// Keep listening after the first response
    pub persist: bool,
    /// Accept a key that was already down when it was pressed again
    pub allow_held_key: bool,
}

impl KeyboardConfig {
    /// Accept any key
    pub fn any() -> Self {
        KeyboardConfig::default()
    }

    pub fn keys<K: Into<KeySpec>>(keys: impl IntoIterator<Item = K>) -> Self {
        KeyboardConfig {
            valid_responses: keys.into_iter().map(Into::into).collect(),
            ..KeyboardConfig::default()
        }
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn allow_held_key(mut self, allow: bool) -> Self {
        self.allow_held_key = allow;
        self
    }
}

/// Armed keyboard listener with a resolved allow-list
#[derive(Clone, Debug)]
pub struct KeyboardListener {
    pub id: ListenerId,
    pub start: Instant,
    allowed: Option<Vec<KeyCode>>,
    pub persist: bool,
    pub allow_held_key: bool,
}

impl KeyboardListener {
    /// Resolve the allow-list. Unknown key names fail here, not on the
    /// first key press.
    pub fn new(id: ListenerId, config: &KeyboardConfig, start: Instant) -> FlowResult<Self> {
        let allowed = if config.valid_responses.is_empty() {
            None
        } else {
            Some(
                config
                    .valid_responses
                    .iter()
                    .map(KeySpec::resolve)
                    .collect::<FlowResult<Vec<_>>>()?,
            )
        };

        Ok(KeyboardListener {
            id,
            start,
            allowed,
            persist: config.persist,
            allow_held_key: config.allow_held_key,
        })
    }

    pub fn accepts(&self, code: KeyCode) -> bool {
        match &self.allowed {
            None => true,
            Some(keys) => keys.contains(&code),
        }
    }
}
