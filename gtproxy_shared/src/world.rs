//! World participant tracking.
//!
//! `OnSpawn` and `OnRemove` function calls carry text records describing
//! avatars entering and leaving the world. The tracker keeps them keyed by
//! net-id and remembers which one is the local player.

use std::collections::HashMap;

use crate::text::TextParse;

/// No local participant known.
pub const NO_LOCAL_NET_ID: i32 = -1;

/// One spawned avatar as described by an `OnSpawn` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldParticipant {
    pub net_id: i32,
    pub user_id: i32,
    pub name: String,
    /// `local` marks the proxied player's own avatar.
    pub kind: String,
    pub spawn_tag: String,
}

impl WorldParticipant {
    /// Reads a participant from an `OnSpawn` text record. Returns `None`
    /// when the net-id is missing or negative.
    pub fn from_text(records: &TextParse) -> Option<Self> {
        let net_id = records.get_int("netID", -1);
        if net_id < 0 {
            return None;
        }
        Some(Self {
            net_id: net_id as i32,
            user_id: records.get_int("userID", -1) as i32,
            name: records.get("name", 0).to_string(),
            kind: records.get("type", 0).to_string(),
            spawn_tag: records.get("spawn", 0).to_string(),
        })
    }

    pub fn is_local(&self) -> bool {
        self.kind == "local"
    }
}

/// The set of currently spawned participants.
#[derive(Debug, Default)]
pub struct WorldTracker {
    participants: HashMap<i32, WorldParticipant>,
    local_net_id: i32,
}

impl WorldTracker {
    pub fn new() -> Self {
        Self {
            participants: HashMap::new(),
            local_net_id: NO_LOCAL_NET_ID,
        }
    }

    /// Inserts or overwrites a participant.
    pub fn on_spawn(&mut self, participant: WorldParticipant) {
        if participant.is_local() {
            self.local_net_id = participant.net_id;
        }
        self.participants.insert(participant.net_id, participant);
    }

    /// Removes a participant, clearing the local marker when it matches.
    pub fn on_remove(&mut self, net_id: i32) -> Option<WorldParticipant> {
        let removed = self.participants.remove(&net_id);
        if removed.is_some() && self.local_net_id == net_id {
            self.local_net_id = NO_LOCAL_NET_ID;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_net_id = NO_LOCAL_NET_ID;
    }

    pub fn local_net_id(&self) -> i32 {
        self.local_net_id
    }

    pub fn get(&self, net_id: i32) -> Option<&WorldParticipant> {
        self.participants.get(&net_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldParticipant> {
        self.participants.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_record(net_id: i32, kind: &str) -> WorldParticipant {
        let text = format!(
            "spawn|avatar\nnetID|{net_id}\nuserID|{net_id}\nname|Player{net_id}\ntype|{kind}"
        );
        WorldParticipant::from_text(&TextParse::parse(&text)).unwrap()
    }

    #[test]
    fn local_participant_tracked() {
        let mut world = WorldTracker::new();
        assert_eq!(world.local_net_id(), NO_LOCAL_NET_ID);

        world.on_spawn(spawn_record(3, "remote"));
        assert_eq!(world.local_net_id(), NO_LOCAL_NET_ID);

        world.on_spawn(spawn_record(7, "local"));
        assert_eq!(world.local_net_id(), 7);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn remove_clears_matching_local() {
        let mut world = WorldTracker::new();
        world.on_spawn(spawn_record(7, "local"));
        world.on_spawn(spawn_record(3, "remote"));

        world.on_remove(3);
        assert_eq!(world.local_net_id(), 7);

        world.on_remove(7);
        assert_eq!(world.local_net_id(), NO_LOCAL_NET_ID);
        assert_eq!(world.len(), 0);
    }

    #[test]
    fn negative_net_id_rejected() {
        let records = TextParse::parse("netID|-5\ntype|local");
        assert!(WorldParticipant::from_text(&records).is_none());
        let records = TextParse::parse("name|NoNetId");
        assert!(WorldParticipant::from_text(&records).is_none());
    }

    #[test]
    fn clear_resets_everything() {
        let mut world = WorldTracker::new();
        world.on_spawn(spawn_record(1, "local"));
        world.clear();
        assert!(world.is_empty());
        assert_eq!(world.local_net_id(), NO_LOCAL_NET_ID);
    }
}
