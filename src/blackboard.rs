//! Scoped blackboard with staleness tracking.
//!
//! The blackboard is an arena of scopes. Each scope points at its parent, so
//! a lookup walks from the innermost scope outwards and inner definitions
//! shadow outer ones. Scopes are created by nodes like `DefineBlackboard` and
//! destroyed when that node finishes; a [`ScopeId`] carries a generation so a
//! handle to a destroyed scope never aliases a scope created later in the
//! same slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{error::BlackboardError, format, node::NodeIndex, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    index: u32,
    generation: u32,
}

/// A variable slot: the value, when it was written (mission time) and by which node.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub written_at: Duration,
    pub writer: Option<NodeIndex>,
}

/// What a reader does with a value older than its allowed age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    #[default]
    ReadAnyway,
    BlockUntilFresh,
    FailIfStale,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FreshnessRequirement {
    pub policy: Freshness,
    /// `None` means values never go stale.
    pub max_age: Option<Duration>,
}

impl FreshnessRequirement {
    pub const ANY: Self = Self {
        policy: Freshness::ReadAnyway,
        max_age: None,
    };

    pub fn new(policy: Freshness, max_age: Duration) -> Self {
        Self {
            policy,
            max_age: Some(max_age),
        }
    }
}

/// Result of a successful resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Value(Value),
    /// The value exists but is too old; the reader should report `Running`.
    Blocked,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    vars: HashMap<String, Entry>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    scope: Option<Scope>,
}

#[derive(Debug)]
pub struct Blackboard {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                scope: Some(Scope::default()),
            }],
            free: vec![],
        }
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scope owned by the mission runner. It is never destroyed.
    pub fn root(&self) -> ScopeId {
        ScopeId {
            index: 0,
            generation: self.slots[0].generation,
        }
    }

    fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.scope.as_ref())
    }

    fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.scope.as_mut())
    }

    pub fn is_alive(&self, id: ScopeId) -> bool {
        self.scope(id).is_some()
    }

    pub fn create_scope(&mut self, parent: ScopeId) -> Result<ScopeId, BlackboardError> {
        if !self.is_alive(parent) {
            return Err(BlackboardError::ScopeGone);
        }
        let scope = Scope {
            parent: Some(parent),
            vars: HashMap::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.scope = Some(scope);
            Ok(ScopeId {
                index,
                generation: slot.generation,
            })
        } else {
            self.slots.push(Slot {
                generation: 0,
                scope: Some(scope),
            });
            Ok(ScopeId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            })
        }
    }

    /// Tears down a scope and everything defined in it. The root scope survives.
    pub fn destroy_scope(&mut self, id: ScopeId) -> bool {
        if id.index == 0 || !self.is_alive(id) {
            return false;
        }
        let slot = &mut self.slots[id.index as usize];
        slot.scope = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        true
    }

    /// Destroys every scope except the root.
    pub fn clear_nested_scopes(&mut self) {
        for index in 1..self.slots.len() as u32 {
            let generation = self.slots[index as usize].generation;
            self.destroy_scope(ScopeId { index, generation });
        }
    }

    pub fn define(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
        now: Duration,
        writer: Option<NodeIndex>,
    ) -> Result<(), BlackboardError> {
        let scope = self.scope_mut(scope).ok_or(BlackboardError::ScopeGone)?;
        if scope.vars.contains_key(name) {
            return Err(BlackboardError::DuplicateDefinition(name.to_owned()));
        }
        scope.vars.insert(
            name.to_owned(),
            Entry {
                value,
                written_at: now,
                writer,
            },
        );
        Ok(())
    }

    /// Walks outwards from `scope` and returns the scope that defines `name`.
    fn defining_scope(&self, scope: ScopeId, name: &str) -> Result<ScopeId, BlackboardError> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let current = self.scope(id).ok_or(BlackboardError::ScopeGone)?;
            if current.vars.contains_key(name) {
                return Ok(id);
            }
            cursor = current.parent;
        }
        Err(BlackboardError::NotFound(name.to_owned()))
    }

    /// Mutates the nearest existing definition of `name`.
    pub fn write(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
        now: Duration,
        writer: Option<NodeIndex>,
    ) -> Result<(), BlackboardError> {
        let owner = self.defining_scope(scope, name).map_err(|e| match e {
            BlackboardError::NotFound(name) => BlackboardError::UndefinedVariable(name),
            e => e,
        })?;
        let entry = self
            .scope_mut(owner)
            .and_then(|scope| scope.vars.get_mut(name))
            .ok_or(BlackboardError::ScopeGone)?;
        *entry = Entry {
            value,
            written_at: now,
            writer,
        };
        Ok(())
    }

    pub fn entry(&self, scope: ScopeId, name: &str) -> Result<&Entry, BlackboardError> {
        let owner = self.defining_scope(scope, name)?;
        self.scope(owner)
            .and_then(|scope| scope.vars.get(name))
            .ok_or(BlackboardError::ScopeGone)
    }

    pub fn get(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        self.entry(scope, name).ok().map(|entry| &entry.value)
    }

    /// Resolves a variable or a dotted field path like `state.power_state.charge`.
    ///
    /// Staleness is judged on the timestamp of the variable itself, since a
    /// structured value is always written as a whole.
    pub fn resolve(
        &self,
        scope: ScopeId,
        path: &str,
        freshness: FreshnessRequirement,
        now: Duration,
    ) -> Result<Lookup, BlackboardError> {
        let mut segments = path.split('.');
        let name = segments.next().unwrap_or_default();
        let entry = self.entry(scope, name)?;

        if let Some(max_age) = freshness.max_age {
            let age = now.saturating_sub(entry.written_at);
            if age > max_age {
                match freshness.policy {
                    Freshness::ReadAnyway => (),
                    Freshness::BlockUntilFresh => return Ok(Lookup::Blocked),
                    Freshness::FailIfStale => {
                        return Err(BlackboardError::StaleValue {
                            name: name.to_owned(),
                            age,
                            max_age,
                        })
                    }
                }
            }
        }

        let rest: Vec<&str> = segments.collect();
        entry
            .value
            .field(&rest)
            .map(Lookup::Value)
            .map_err(|i| BlackboardError::InvalidPath {
                name: name.to_owned(),
                segment: rest[i].to_owned(),
            })
    }

    /// Resolves ignoring staleness.
    pub fn resolve_value(&self, scope: ScopeId, path: &str) -> Result<Value, BlackboardError> {
        match self.resolve(scope, path, FreshnessRequirement::ANY, Duration::ZERO)? {
            Lookup::Value(value) => Ok(value),
            Lookup::Blocked => Err(BlackboardError::NotFound(path.to_owned())),
        }
    }

    /// Renders a template with `{name}` / `{name:.Nf}` placeholders.
    pub fn format(&self, scope: ScopeId, template: &str) -> Result<String, BlackboardError> {
        format::render(template, |path| self.resolve_value(scope, path))
    }

    /// Names visible from `scope`, innermost definitions first.
    pub fn visible(&self, scope: ScopeId) -> Vec<(&str, &Entry)> {
        let mut ret: Vec<(&str, &Entry)> = vec![];
        let mut cursor = Some(scope);
        while let Some(current) = cursor.and_then(|id| self.scope(id)) {
            for (name, entry) in &current.vars {
                if !ret.iter().any(|(seen, _)| *seen == name.as_str()) {
                    ret.push((name.as_str(), entry));
                }
            }
            cursor = current.parent;
        }
        ret
    }
}
