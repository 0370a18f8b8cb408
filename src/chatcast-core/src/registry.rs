//! Character registry.
//!
//! Binds chat identities to roster characters. Each identity holds at most
//! one character and each character is held by at most one identity until
//! the next [`CharacterRegistry::release_all`].

use std::collections::HashMap;

use crate::character::{Character, ChatIdentity};
use crate::error::ChatCastError;

pub struct CharacterRegistry {
    /// Roster in configured order; indices below point into it.
    roster: Vec<Character>,
    assignments: HashMap<ChatIdentity, usize>,
    /// Roster index -> holder, `None` while free.
    holders: Vec<Option<ChatIdentity>>,
}

impl CharacterRegistry {
    pub fn new(roster: Vec<Character>) -> Self {
        let holders = vec![None; roster.len()];
        Self {
            roster,
            assignments: HashMap::new(),
            holders,
        }
    }

    /// Return the character bound to `identity`, binding the first free
    /// eligible character in roster order if there is none yet.
    pub fn assign(
        &mut self,
        identity: &ChatIdentity,
        is_subscriber: bool,
    ) -> Result<&Character, ChatCastError> {
        if let Some(&index) = self.assignments.get(identity) {
            return Ok(&self.roster[index]);
        }

        let index = self
            .roster
            .iter()
            .enumerate()
            .find(|(i, c)| self.holders[*i].is_none() && c.is_eligible(is_subscriber))
            .map(|(i, _)| i)
            .ok_or_else(|| ChatCastError::NoCharactersAvailable {
                identity: identity.to_string(),
            })?;

        self.holders[index] = Some(identity.clone());
        self.assignments.insert(identity.clone(), index);
        Ok(&self.roster[index])
    }

    /// Drop every assignment, returning the whole roster to the free pool.
    pub fn release_all(&mut self) {
        self.assignments.clear();
        self.holders.iter_mut().for_each(|h| *h = None);
    }

    pub fn character_for(&self, identity: &ChatIdentity) -> Option<&Character> {
        self.assignments.get(identity).map(|&i| &self.roster[i])
    }

    /// Identity currently cast as the character with `character_id`.
    pub fn holder_of(&self, character_id: &str) -> Option<&ChatIdentity> {
        self.roster
            .iter()
            .position(|c| c.id == character_id)
            .and_then(|i| self.holders[i].as_ref())
    }

    pub fn assigned_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn free_count(&self) -> usize {
        self.holders.iter().filter(|h| h.is_none()).count()
    }

    pub fn roster(&self) -> &[Character] {
        &self.roster
    }
}
