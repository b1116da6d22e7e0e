/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Types shared between canvas surface producers and the compositor texture
//! layer: transferable resources, their opaque GPU identities, and the
//! single-shot release protocol through which the compositor hands a borrowed
//! resource back to its producer.

#![deny(unsafe_code)]

use std::fmt;

use euclid::default::Size2D;
use log::warn;
use pixels::PixelFormat;
use serde::{Deserialize, Serialize};

/// Identifies one produced frame resource within a single producer. An id
/// becomes eligible for reuse once the compositor releases it intact; an id
/// released as lost is retired for good.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ResourceId(pub u64);

impl ResourceId {
    pub fn next(&mut self) -> ResourceId {
        let id = *self;
        self.0 += 1;
        id
    }
}

/// Opaque cross-context GPU resource identity. The compositor treats this as
/// a name to import, never as something to inspect.
#[derive(Clone, Copy, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct MailboxName(pub [u8; 16]);

impl MailboxName {
    pub fn generate() -> MailboxName {
        MailboxName(rand::random())
    }
}

impl fmt::Debug for MailboxName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MailboxName({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Opaque synchronization point for cross-context resource access.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SyncToken(pub u64);

/// A handle to pixel data handed to the compositor with an explicit release
/// protocol. The producer retains ownership of the backing storage; the
/// compositor borrows it until it runs the accompanying
/// [`ResourceReleaseCallback`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransferableResource {
    pub id: ResourceId,
    pub mailbox: MailboxName,
    pub sync_token: SyncToken,
    pub size: Size2D<u32>,
    pub format: PixelFormat,
    /// True when the resource is backed by shared CPU memory rather than a
    /// GPU texture.
    pub is_software: bool,
}

/// Single-shot release of a borrowed [`TransferableResource`].
///
/// Dropping the callback without running it counts as releasing the resource
/// as lost, so a compositor that crashes or discards a frame cannot strand
/// the producer's backing storage.
pub struct ResourceReleaseCallback {
    callback: Option<Box<dyn FnOnce(SyncToken, bool)>>,
}

impl ResourceReleaseCallback {
    pub fn new<F: FnOnce(SyncToken, bool) + 'static>(callback: F) -> ResourceReleaseCallback {
        ResourceReleaseCallback {
            callback: Some(Box::new(callback)),
        }
    }

    /// Returns the resource to its producer. `lost` signals that the
    /// compositor can no longer vouch for the resource contents.
    pub fn run(mut self, sync_token: SyncToken, lost: bool) {
        if let Some(callback) = self.callback.take() {
            callback(sync_token, lost);
        }
    }
}

impl Drop for ResourceReleaseCallback {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("Transferable resource dropped without explicit release");
            callback(SyncToken::default(), true);
        }
    }
}

impl fmt::Debug for ResourceReleaseCallback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ResourceReleaseCallback")
    }
}

/// Implemented by anything that can supply frames to a compositor texture
/// layer. The layer pulls a new resource each time it composites a frame in
/// which the producer's contents changed.
pub trait TextureLayerClient {
    /// Packages the latest frame for hand-off. Returns None when the producer
    /// has no valid backing store, in which case the layer keeps the previous
    /// frame.
    fn prepare_transferable_resource(
        &mut self,
    ) -> Option<(TransferableResource, ResourceReleaseCallback)>;
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_resource_id_sequence() {
        let mut next = ResourceId(0);
        assert_eq!(next.next(), ResourceId(0));
        assert_eq!(next.next(), ResourceId(1));
        assert_eq!(next, ResourceId(2));
    }

    #[test]
    fn test_release_callback_runs_once() {
        let released = Rc::new(Cell::new(0));
        let observed = released.clone();
        let callback = ResourceReleaseCallback::new(move |_, lost| {
            assert!(!lost);
            observed.set(observed.get() + 1);
        });
        callback.run(SyncToken(7), false);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_dropped_callback_releases_as_lost() {
        let released = Rc::new(Cell::new(false));
        let observed = released.clone();
        let callback = ResourceReleaseCallback::new(move |_, lost| {
            assert!(lost);
            observed.set(true);
        });
        drop(callback);
        assert!(released.get());
    }
}
