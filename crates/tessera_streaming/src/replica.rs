//! # Remote Terrain Replica
//!
//! Non-authoritative tile store of a remote viewer. It never generates
//! tiles; it decodes payloads pushed by the authority, keeps the newest
//! revision per coordinate and asks the authority for whatever its viewer
//! needs.

use std::collections::{HashMap, HashSet};

use crossbeam_channel::{Receiver, Sender};
use tessera_procedural::{Tile, TileCoord};
use tessera_shared::Vec2;

use crate::error::CodecResult;
use crate::protocol::{SubscriberId, TileMessage, TilePayload, ViewerMessage};
use crate::replication::{ReplicationHub, Subscription};
use crate::viewer::TileSource;

/// Replica counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    /// Payloads stored.
    pub applied: u64,
    /// Payloads older than the stored copy.
    pub stale: u64,
    /// Payloads that failed to decode.
    pub invalid: u64,
    /// Request messages sent.
    pub requests_sent: u64,
}

/// Tile store fed by the authority.
#[derive(Debug)]
pub struct RemoteTerrain {
    id: SubscriberId,
    inbox: Receiver<TileMessage>,
    outbox: Sender<ViewerMessage>,
    tiles: HashMap<TileCoord, Tile>,
    requested: HashSet<TileCoord>,
    last_focus: Option<Vec2>,
    stats: ReplicaStats,
}

impl RemoteTerrain {
    /// Subscribes to `hub`.
    #[must_use]
    pub fn connect(hub: &ReplicationHub) -> Self {
        Self::from_subscription(hub.subscribe())
    }

    /// Wraps an existing subscription.
    #[must_use]
    pub fn from_subscription(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            inbox: subscription.inbox,
            outbox: subscription.outbox,
            tiles: HashMap::new(),
            requested: HashSet::new(),
            last_focus: None,
            stats: ReplicaStats::default(),
        }
    }

    /// Subscriber id assigned by the authority.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &ReplicaStats {
        &self.stats
    }

    /// Stored tile at `coord`.
    #[inline]
    #[must_use]
    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    /// Number of stored tiles.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns true if no tile was received yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Coordinates requested but not yet received.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.requested.len()
    }

    /// Applies every payload waiting in the inbox. Returns how many were
    /// stored.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.inbox.try_recv() {
            let TileMessage::Payload(payload) = message;
            match self.apply(&payload) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => {
                    self.stats.invalid += 1;
                    tracing::warn!(
                        "Discarding payload for tile ({}, {}): {}",
                        payload.coord.x,
                        payload.coord.z,
                        e
                    );
                }
            }
        }
        applied
    }

    /// Stores a payload.
    ///
    /// Returns `Ok(false)` if the stored copy has a newer revision. An equal
    /// revision replaces the stored copy.
    ///
    /// # Errors
    ///
    /// Returns the decode error of a malformed payload.
    pub fn apply(&mut self, payload: &TilePayload) -> CodecResult<bool> {
        if self
            .tiles
            .get(&payload.coord)
            .is_some_and(|t| t.revision() > payload.revision)
        {
            self.stats.stale += 1;
            return Ok(false);
        }
        let tile = payload.decode()?;
        self.requested.remove(&payload.coord);
        self.tiles.insert(payload.coord, tile);
        self.stats.applied += 1;
        Ok(true)
    }

    /// Asks the authority for tiles not stored and not already requested.
    pub fn request(&mut self, coords: &[TileCoord], focus: Vec2) {
        let fresh: Vec<TileCoord> = coords
            .iter()
            .copied()
            .filter(|c| !self.tiles.contains_key(c) && !self.requested.contains(c))
            .collect();
        if fresh.is_empty() {
            return;
        }
        self.send_request(fresh.clone(), focus);
        self.requested.extend(fresh);
    }

    /// Tells the authority where this viewer is, so its eviction keeps the
    /// tiles around it. Sends nothing if `focus` was the last one sent.
    pub fn report_focus(&mut self, focus: Vec2) {
        if self.last_focus != Some(focus) {
            self.send_request(Vec::new(), focus);
        }
    }

    /// Re-sends every outstanding request.
    pub fn retry_requests(&mut self, focus: Vec2) {
        if self.requested.is_empty() {
            return;
        }
        let mut coords: Vec<TileCoord> = self.requested.iter().copied().collect();
        coords.sort_unstable();
        self.send_request(coords, focus);
    }

    fn send_request(&mut self, coords: Vec<TileCoord>, focus: Vec2) {
        let message = ViewerMessage::RequestTiles {
            subscriber: self.id,
            focus,
            coords,
        };
        if self.outbox.send(message).is_ok() {
            self.last_focus = Some(focus);
            self.stats.requests_sent += 1;
        } else {
            tracing::warn!("Authority unreachable, request dropped");
        }
    }

    /// Tells the authority this viewer is gone.
    pub fn leave(self) {
        let _ = self.outbox.send(ViewerMessage::Leave { subscriber: self.id });
    }
}

impl TileSource for RemoteTerrain {
    fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    fn request(&mut self, coords: &[TileCoord], focus: Vec2) {
        Self::request(self, coords, focus);
    }

    fn report_focus(&mut self, focus: Vec2) {
        Self::report_focus(self, focus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_procedural::GenerationPipeline;
    use tessera_shared::{Rect, TerrainConfig};

    fn pipeline() -> GenerationPipeline {
        GenerationPipeline::new(TerrainConfig {
            interior_resolution: 8,
            ..TerrainConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_newest_revision_wins() {
        let hub = ReplicationHub::new();
        let mut replica = RemoteTerrain::connect(&hub);
        let pipeline = pipeline();

        let original = pipeline.generate_complete(TileCoord::new(0, 0));
        let mut edited = original.clone();
        assert!(edited.flatten(Rect::new(10.0, 10.0, 30.0, 30.0), 7.0));
        pipeline.build_referenced_meshes(&mut edited);

        assert!(replica.apply(&TilePayload::encode(&edited)).unwrap());
        assert!(!replica.apply(&TilePayload::encode(&original)).unwrap());
        assert_eq!(replica.stats().stale, 1);
        assert_eq!(replica.tile(TileCoord::new(0, 0)).unwrap().revision(), 1);

        // Duplicates of the current revision are harmless.
        assert!(replica.apply(&TilePayload::encode(&edited)).unwrap());
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn test_poll_drains_broadcasts() {
        let hub = ReplicationHub::new();
        let mut replica = RemoteTerrain::connect(&hub);
        let pipeline = pipeline();
        for x in 0..3 {
            hub.broadcast(&TilePayload::encode(&pipeline.generate_complete(TileCoord::new(x, 0))));
        }
        assert_eq!(replica.poll(), 3);
        assert_eq!(replica.poll(), 0);
        assert_eq!(replica.len(), 3);
    }

    #[test]
    fn test_corrupt_payload_is_counted() {
        let hub = ReplicationHub::new();
        let mut replica = RemoteTerrain::connect(&hub);
        hub.broadcast(&TilePayload {
            coord: TileCoord::new(0, 0),
            revision: 0,
            bytes: std::sync::Arc::from(vec![0u8; 12]),
        });
        assert_eq!(replica.poll(), 0);
        assert_eq!(replica.stats().invalid, 1);
        assert!(replica.is_empty());
    }

    #[test]
    fn test_requests_are_deduplicated() {
        let hub = ReplicationHub::new();
        let mut replica = RemoteTerrain::connect(&hub);
        let coords = [TileCoord::new(0, 0), TileCoord::new(1, 0)];

        replica.request(&coords, Vec2::ZERO);
        replica.request(&coords, Vec2::ZERO);
        assert_eq!(replica.stats().requests_sent, 1);
        assert_eq!(replica.pending(), 2);

        let Some(ViewerMessage::RequestTiles { subscriber, coords: sent, .. }) = hub.try_recv_request() else {
            panic!("expected a request");
        };
        assert_eq!(subscriber, replica.id());
        assert_eq!(sent, coords.to_vec());
        assert!(hub.try_recv_request().is_none());

        replica.retry_requests(Vec2::ZERO);
        assert!(hub.try_recv_request().is_some());
    }

    #[test]
    fn test_focus_is_reported_once_per_move() {
        let hub = ReplicationHub::new();
        let mut replica = RemoteTerrain::connect(&hub);
        let here = Vec2::new(120.0, -40.0);

        replica.report_focus(here);
        replica.report_focus(here);
        let Some(ViewerMessage::RequestTiles { focus, coords, .. }) = hub.try_recv_request() else {
            panic!("expected a focus update");
        };
        assert_eq!(focus, here);
        assert!(coords.is_empty());
        assert!(hub.try_recv_request().is_none());

        // A tile request carries the focus too.
        replica.request(&[TileCoord::new(3, 3)], Vec2::ZERO);
        let _ = hub.try_recv_request();
        replica.report_focus(Vec2::ZERO);
        assert!(hub.try_recv_request().is_none());
        replica.report_focus(here);
        assert!(hub.try_recv_request().is_some());
    }
}
