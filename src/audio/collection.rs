//! Ordered set of tracks with lookup by id, name, index or device handle.

use super::track::{AudioTrack, TrackId};
use crate::gpu::{Accelerator, MemoryHandle};
use crate::pipeline::StretchService;

/// Request a track hands back to its collection instead of mutating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCommand {
    Remove(TrackId),
}

#[derive(Debug, Default)]
pub struct TrackCollection {
    tracks: Vec<AudioTrack>,
}

impl TrackCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, track: AudioTrack) -> TrackId {
        let id = track.id();
        self.tracks.push(track);
        id
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Track names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioTrack> {
        self.tracks.iter()
    }

    pub fn get(&self, id: TrackId) -> Option<&AudioTrack> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut AudioTrack> {
        self.tracks.iter_mut().find(|t| t.id() == id)
    }

    /// First track with the given name.
    pub fn by_name(&self, name: &str) -> Option<&AudioTrack> {
        self.tracks.iter().find(|t| t.name == name)
    }

    pub fn by_index(&self, index: usize) -> Option<&AudioTrack> {
        self.tracks.get(index)
    }

    /// The track whose data lives in the given device group.
    pub fn by_handle(&self, handle: MemoryHandle) -> Option<&AudioTrack> {
        self.tracks
            .iter()
            .find(|t| t.device_handle() == Some(handle))
    }

    /// Remove a track without touching its device data.
    pub fn remove(&mut self, id: TrackId) -> Option<AudioTrack> {
        let index = self.tracks.iter().position(|t| t.id() == id)?;
        Some(self.tracks.remove(index))
    }

    /// Apply a command returned by a track. Removed tracks have their device
    /// group released through `service`.
    pub fn apply<A: Accelerator>(
        &mut self,
        command: TrackCommand,
        service: &StretchService<A>,
    ) -> Option<AudioTrack> {
        match command {
            TrackCommand::Remove(id) => {
                let mut track = self.remove(id)?;
                service.release(&mut track);
                log::debug!("Removed {} ('{}')", id, track.name);
                Some(track)
            }
        }
    }

    /// Remove every track, releasing device data.
    pub fn clear<A: Accelerator>(&mut self, service: &StretchService<A>) {
        for mut track in self.tracks.drain(..) {
            service.release(&mut track);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut tracks = TrackCollection::new();
        let a = tracks.add(AudioTrack::new("kick", vec![0.0; 4], 44_100, 1));
        let b = tracks.add(AudioTrack::new("snare", vec![0.0; 4], 44_100, 1));

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks.names(), vec!["kick", "snare"]);
        assert_eq!(tracks.by_name("snare").map(AudioTrack::id), Some(b));
        assert_eq!(tracks.by_index(0).map(AudioTrack::id), Some(a));
        assert!(tracks.by_name("hat").is_none());

        tracks.get_mut(a).unwrap().name = "kick2".to_string();
        assert!(tracks.by_name("kick2").is_some());
    }

    #[test]
    fn test_remove() {
        let mut tracks = TrackCollection::new();
        let id = tracks.add(AudioTrack::new("x", vec![], 44_100, 1));
        assert!(tracks.remove(id).is_some());
        assert!(tracks.remove(id).is_none());
        assert!(tracks.is_empty());
    }
}
