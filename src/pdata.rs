use ahash::{HashMap, HashMapExt};
use glam::Vec3;

use crate::color::Color;

/// A strongly typed, resizable per-element array inside a [`PData`] store.
#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    Colour(Vec<Color>),
    Vector(Vec<Vec3>),
    Float(Vec<f32>),
}

impl Channel {
    pub fn len(&self) -> usize {
        match self {
            Channel::Colour(v) => v.len(),
            Channel::Vector(v) => v.len(),
            Channel::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Channel::Colour(_) => "colour",
            Channel::Vector(_) => "vector",
            Channel::Float(_) => "float",
        }
    }
}

/// A primitive's attribute store: named, typed per-element arrays.
///
/// Accessors return `None` when a channel is missing or holds a different
/// element type; callers treat that as "skip the operation".
///
/// Instead of handing out cacheable pointers, the store carries an `epoch`
/// that moves on every mutable access or structural change. Consumers that
/// derive data from a channel remember the epoch they last built against and
/// rebuild when it has moved.
#[derive(Debug, Clone, Default)]
pub struct PData {
    channels: HashMap<String, Channel>,
    epoch: u64,
}

impl PData {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            epoch: 0,
        }
    }

    /// The current storage generation. Any mutable access bumps it.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Adds or replaces a channel.
    pub fn add(&mut self, name: impl Into<String>, channel: Channel) {
        self.channels.insert(name.into(), channel);
        self.epoch += 1;
    }

    /// Removes a channel, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        let removed = self.channels.remove(name);
        if removed.is_some() {
            self.epoch += 1;
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn colours(&self, name: &str) -> Option<&[Color]> {
        match self.channels.get(name) {
            Some(Channel::Colour(v)) => Some(v),
            _ => None,
        }
    }

    pub fn colours_mut(&mut self, name: &str) -> Option<&mut Vec<Color>> {
        match self.channels.get_mut(name) {
            Some(Channel::Colour(v)) => {
                self.epoch += 1;
                Some(v)
            }
            _ => None,
        }
    }

    pub fn vectors(&self, name: &str) -> Option<&[Vec3]> {
        match self.channels.get(name) {
            Some(Channel::Vector(v)) => Some(v),
            _ => None,
        }
    }

    pub fn vectors_mut(&mut self, name: &str) -> Option<&mut Vec<Vec3>> {
        match self.channels.get_mut(name) {
            Some(Channel::Vector(v)) => {
                self.epoch += 1;
                Some(v)
            }
            _ => None,
        }
    }

    pub fn floats(&self, name: &str) -> Option<&[f32]> {
        match self.channels.get(name) {
            Some(Channel::Float(v)) => Some(v),
            _ => None,
        }
    }

    pub fn floats_mut(&mut self, name: &str) -> Option<&mut Vec<f32>> {
        match self.channels.get_mut(name) {
            Some(Channel::Float(v)) => {
                self.epoch += 1;
                Some(v)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_reject_wrong_element_type() {
        let mut pdata = PData::new();
        pdata.add("c", Channel::Float(vec![1.0, 2.0]));

        assert!(pdata.colours("c").is_none());
        assert!(pdata.floats("c").is_some());
        assert!(pdata.colours("missing").is_none());
    }

    #[test]
    fn mutable_access_moves_the_epoch() {
        let mut pdata = PData::new();
        pdata.add("c", Channel::Colour(vec![Color::WHITE; 4]));
        let epoch = pdata.epoch();

        pdata.colours_mut("c").unwrap().resize(8, Color::BLACK);
        assert!(pdata.epoch() > epoch);

        // read-only access leaves the epoch alone
        let epoch = pdata.epoch();
        let _ = pdata.colours("c");
        assert_eq!(pdata.epoch(), epoch);
    }

    #[test]
    fn replacing_a_channel_moves_the_epoch() {
        let mut pdata = PData::new();
        pdata.add("p", Channel::Vector(vec![Vec3::ZERO]));
        let epoch = pdata.epoch();
        pdata.add("p", Channel::Vector(vec![Vec3::ONE, Vec3::ZERO]));
        assert!(pdata.epoch() > epoch);
    }

    #[test]
    fn failed_mutable_lookup_keeps_the_epoch() {
        let mut pdata = PData::new();
        pdata.add("w", Channel::Float(vec![0.1]));
        let epoch = pdata.epoch();
        assert!(pdata.colours_mut("w").is_none());
        assert_eq!(pdata.epoch(), epoch);
    }
}
