//! Serde helpers for id-keyed arenas that persist as plain arrays.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub trait ArenaItem {
    type Id: Ord + Copy + Display;

    fn arena_id(&self) -> Self::Id;
}

pub fn serialize<S, T>(arena: &BTreeMap<T::Id, T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: ArenaItem + Serialize,
{
    serializer.collect_seq(arena.values())
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeMap<T::Id, T>, D::Error>
where
    D: Deserializer<'de>,
    T: ArenaItem + Deserialize<'de>,
{
    let items = Vec::<T>::deserialize(deserializer)?;
    let mut arena = BTreeMap::new();
    for item in items {
        let id = item.arena_id();
        if arena.insert(id, item).is_some() {
            return Err(D::Error::custom(format!("duplicate id {}", id)));
        }
    }
    Ok(arena)
}
