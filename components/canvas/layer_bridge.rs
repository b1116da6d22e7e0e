/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The bridge between a 2D canvas surface and the compositor texture layer.
//!
//! The bridge owns the backing store exclusively and creates it lazily on
//! first use. While the surface is visible it batches draw calls in a
//! recording and rasters them on flush; when the surface is hidden it may
//! evict a GPU backing store into a compressed snapshot (hibernation) and
//! restore it lazily on the next access. Completed frames are packaged as
//! transferable resources that the compositor borrows and hands back through
//! a release callback.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use compositing_traits::{
    MailboxName, ResourceId, ResourceReleaseCallback, SyncToken, TextureLayerClient,
    TransferableResource,
};
use embedder_traits::{EmbedderClient, IdleTaskScheduler, NullEmbedderClient};
use euclid::default::{Point2D, Rect, Size2D};
use log::{debug, warn};
use pixels::{Color, Snapshot};

use crate::recording::{DrawOp, PaintRecord, PaintRecorder};
use crate::resource_provider::{
    CanvasColorParams, CanvasResourceProvider, RasterQueryId, ResourceProviderFactory,
};

/// Hibernation is a memory-pressure optimization, not a correctness
/// requirement; platforms with compositor bugs can turn it off wholesale.
const CANVAS_HIBERNATION_ENABLED: bool = true;

/// Every flushed frame has this chance of getting an end-to-end raster probe.
const RASTER_METRIC_PROBABILITY: f64 = 0.01;

/// Timing probes the GPU has not answered yet. Oldest entries are dropped
/// past this bound so a slow GPU cannot stall frame production.
const MAX_PENDING_RASTER_TIMERS: usize = 8;

/// Frames finalized without a compositor commit before the bridge starts
/// throttling an accelerated provider.
const MAX_UNCOMMITTED_FRAMES: usize = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccelerationMode {
    DisableAcceleration,
    EnableAcceleration,
    ForceAccelerationForTesting,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccelerationHint {
    PreferAcceleration,
    PreferNoAcceleration,
}

/// Why a hibernation attempt ended, aborted, or never ran.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HibernationEvent {
    Scheduled,
    AbortedDueToDestructionWhileHibernatePending,
    AbortedDueToVisibilityChange,
    AbortedDueToGpuContextLoss,
    AbortedDueToSwitchToUnacceleratedRendering,
    AbortedDueToAllocationFailure,
    AbortedDueToSnapshotFailure,
    EndedNormally,
    EndedWithFallbackToSoftware,
    EndedWithTeardown,
}

/// Receives hibernation lifecycle notifications, for metrics and tests.
pub trait HibernationLogger {
    fn report_hibernation_event(&self, event: HibernationEvent) {
        debug!("canvas hibernation event: {event:?}");
    }

    fn did_start_hibernating(&self) {}
}

struct DefaultLogger;

impl HibernationLogger for DefaultLogger {}

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    struct BridgeFlags: u16 {
        const HIDDEN = 1 << 0;
        const CONTEXT_LOST = 1 << 1;
        /// The owner cleared the frame; there is no previous content worth
        /// preserving on the next raster.
        const CLEAR_FRAME = 1 << 2;
        const HAVE_RECORDED_DRAW_COMMANDS = 1 << 3;
        /// A software backing store substitutes for the GPU one while the
        /// surface is hidden; switched back on the next unhide.
        const SOFTWARE_RENDERING_WHILE_HIDDEN = 1 << 4;
        const HIBERNATION_SCHEDULED = 1 << 5;
        /// `write_pixels` bypassed the recording, so the last recording no
        /// longer describes the surface contents.
        const LAST_RECORD_TAINTED_BY_WRITE_PIXELS = 1 << 6;
        const TORN_DOWN = 1 << 7;
    }
}

struct RasterTimer {
    query: RasterQueryId,
    cpu_raster_duration: Duration,
}

pub struct Canvas2dLayerBridge {
    inner: Rc<RefCell<BridgeInner>>,
}

struct BridgeInner {
    size: Size2D<u32>,
    color_params: CanvasColorParams,
    acceleration_mode: AccelerationMode,
    flags: BridgeFlags,
    recorder: PaintRecorder,
    last_recording: Option<Rc<PaintRecord>>,
    /// PNG-compressed surface contents; present exactly while hibernating.
    hibernation_image: Option<Vec<u8>>,
    resource_provider: Option<Box<dyn CanvasResourceProvider>>,
    factory: Box<dyn ResourceProviderFactory>,
    scheduler: Rc<dyn IdleTaskScheduler>,
    client: Rc<dyn EmbedderClient>,
    logger: Box<dyn HibernationLogger>,
    next_resource_id: ResourceId,
    /// The most recently prepared resource, still borrowed by the compositor.
    current_resource: Option<ResourceId>,
    /// Resources superseded by a newer frame whose callbacks have not run.
    retired_resources: HashSet<ResourceId>,
    /// Ids handed back by the compositor, available for reuse.
    recycled_resources: Vec<ResourceId>,
    pending_raster_timers: VecDeque<RasterTimer>,
    raster_metric_probability: f64,
    frames_since_last_commit: usize,
    sync_token_counter: u64,
    weak_self: Weak<RefCell<BridgeInner>>,
}

impl Canvas2dLayerBridge {
    pub fn new(
        size: Size2D<u32>,
        acceleration_mode: AccelerationMode,
        color_params: CanvasColorParams,
        factory: Box<dyn ResourceProviderFactory>,
        scheduler: Rc<dyn IdleTaskScheduler>,
    ) -> Canvas2dLayerBridge {
        let inner = Rc::new_cyclic(|weak_self| {
            let mut recorder = PaintRecorder::new();
            recorder.start();
            RefCell::new(BridgeInner {
                size,
                color_params,
                acceleration_mode,
                flags: BridgeFlags::CLEAR_FRAME,
                recorder,
                last_recording: None,
                hibernation_image: None,
                resource_provider: None,
                factory,
                scheduler,
                client: Rc::new(NullEmbedderClient),
                logger: Box::new(DefaultLogger),
                next_resource_id: ResourceId(0),
                current_resource: None,
                retired_resources: HashSet::new(),
                recycled_resources: Vec::new(),
                pending_raster_timers: VecDeque::new(),
                raster_metric_probability: RASTER_METRIC_PROBABILITY,
                frames_since_last_commit: 0,
                sync_token_counter: 0,
                weak_self: weak_self.clone(),
            })
        });
        Canvas2dLayerBridge { inner }
    }

    pub fn set_embedder_client(&mut self, client: Rc<dyn EmbedderClient>) {
        self.inner.borrow_mut().client = client;
    }

    pub fn set_logger_for_testing(&mut self, logger: Box<dyn HibernationLogger>) {
        self.inner.borrow_mut().logger = logger;
    }

    pub fn size(&self) -> Size2D<u32> {
        self.inner.borrow().size
    }

    pub fn color_params(&self) -> CanvasColorParams {
        self.inner.borrow().color_params
    }

    pub fn is_hidden(&self) -> bool {
        self.inner.borrow().flags.contains(BridgeFlags::HIDDEN)
    }

    pub fn is_hibernating(&self) -> bool {
        self.inner.borrow().hibernation_image.is_some()
    }

    pub fn has_recorded_draw_commands(&self) -> bool {
        self.inner
            .borrow()
            .flags
            .contains(BridgeFlags::HAVE_RECORDED_DRAW_COMMANDS)
    }

    pub fn is_accelerated(&self) -> bool {
        self.inner.borrow().is_accelerated()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.borrow_mut().is_valid()
    }

    /// Appends an operation to the current recording and notifies the
    /// embedder of the dirtied region.
    pub fn draw(&mut self, op: DrawOp) {
        self.inner.borrow_mut().draw(op);
    }

    /// Returns the last flushed recording, or None if a `write_pixels` has
    /// made it stale.
    pub fn last_record(&self) -> Option<Rc<PaintRecord>> {
        let inner = self.inner.borrow();
        if inner
            .flags
            .contains(BridgeFlags::LAST_RECORD_TAINTED_BY_WRITE_PIXELS)
        {
            None
        } else {
            inner.last_recording.clone()
        }
    }

    pub fn flush_recording(&mut self) {
        self.inner.borrow_mut().flush_recording();
    }

    /// Direct raster write bypassing the recording path.
    pub fn write_pixels(
        &mut self,
        source_size: Size2D<u32>,
        pixels: &[u8],
        row_bytes: usize,
        origin: Point2D<i32>,
    ) -> bool {
        self.inner
            .borrow_mut()
            .write_pixels(source_size, pixels, row_bytes, origin)
    }

    /// The owner is about to replace the whole surface; queued draw commands
    /// will never be visible and are dropped unrastered.
    pub fn will_overwrite_canvas(&mut self) {
        self.inner.borrow_mut().skip_queued_draw_commands();
    }

    /// The owner cleared the frame, so there is no previous content on the
    /// resource.
    pub fn clear_frame(&mut self) {
        self.inner.borrow_mut().flags.insert(BridgeFlags::CLEAR_FRAME);
    }

    pub fn finalize_frame(&mut self) {
        self.inner.borrow_mut().finalize_frame();
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.inner.borrow_mut().set_hidden(hidden);
    }

    /// Evicts the GPU backing store into a compressed snapshot. Normally runs
    /// as an idle task some time after the surface is hidden; a no-op unless
    /// the bridge is hidden, accelerated, and not already hibernating.
    pub fn hibernate(&mut self) {
        self.inner.borrow_mut().hibernate();
    }

    /// Returns whether a backing store is available, creating one lazily if
    /// necessary. Restores from the hibernation snapshot first when
    /// hibernating.
    pub fn ensure_resource_provider(&mut self, hint: AccelerationHint) -> bool {
        self.inner.borrow_mut().ensure_resource_provider(hint)
    }

    /// An immutable copy of the current surface contents. Works whether
    /// active (readback) or hibernating (decode from the snapshot).
    pub fn new_image_snapshot(&mut self, hint: AccelerationHint) -> Option<Snapshot> {
        self.inner.borrow_mut().new_image_snapshot(hint)
    }

    /// Reads back a sub-rectangle of the surface. The rectangle is clipped
    /// to the surface bounds; None when nothing remains after clipping or
    /// readback fails.
    pub fn read_pixels(&mut self, size: Size2D<u32>, origin: Point2D<i32>) -> Option<Snapshot> {
        self.inner.borrow_mut().read_pixels(size, origin)
    }

    /// External notification that the GPU context backing the provider was
    /// lost.
    pub fn did_lose_context(&mut self) {
        self.inner.borrow_mut().did_lose_context();
    }

    /// Attempts recovery after context loss by recreating the backing store.
    pub fn restore(&mut self) -> bool {
        self.inner.borrow_mut().restore()
    }

    #[cfg(test)]
    fn set_raster_metric_probability_for_testing(&mut self, probability: f64) {
        self.inner.borrow_mut().raster_metric_probability = probability;
    }
}

impl TextureLayerClient for Canvas2dLayerBridge {
    fn prepare_transferable_resource(
        &mut self,
    ) -> Option<(TransferableResource, ResourceReleaseCallback)> {
        self.inner.borrow_mut().prepare_transferable_resource()
    }
}

impl Drop for Canvas2dLayerBridge {
    fn drop(&mut self) {
        self.inner.borrow_mut().teardown();
    }
}

impl BridgeInner {
    fn is_accelerated(&self) -> bool {
        match self.resource_provider.as_ref() {
            Some(provider) => provider.is_accelerated(),
            // Hibernation only ever evicts accelerated backing stores.
            None if self.hibernation_image.is_some() => true,
            None => self.acceleration_mode != AccelerationMode::DisableAcceleration,
        }
    }

    fn is_valid(&mut self) -> bool {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return false;
        }
        if self.hibernation_image.is_some() {
            return true;
        }
        if self.resource_provider.is_some() {
            return self.check_resource_provider_valid();
        }
        !self.flags.contains(BridgeFlags::CONTEXT_LOST)
    }

    fn should_accelerate(&self, hint: AccelerationHint) -> bool {
        match self.acceleration_mode {
            AccelerationMode::DisableAcceleration => false,
            AccelerationMode::ForceAccelerationForTesting => true,
            AccelerationMode::EnableAcceleration => {
                hint == AccelerationHint::PreferAcceleration &&
                    !self
                        .flags
                        .contains(BridgeFlags::SOFTWARE_RENDERING_WHILE_HIDDEN)
            },
        }
    }

    /// Drops the provider and remembers the loss if its context died since
    /// the last check.
    fn check_resource_provider_valid(&mut self) -> bool {
        match self.resource_provider.as_ref() {
            None => false,
            Some(provider) if provider.is_valid() => true,
            Some(_) => {
                warn!("GPU context loss detected; dropping canvas backing store");
                self.resource_provider = None;
                self.pending_raster_timers.clear();
                self.flags.insert(BridgeFlags::CONTEXT_LOST);
                if self.flags.contains(BridgeFlags::HIBERNATION_SCHEDULED) {
                    self.flags.remove(BridgeFlags::HIBERNATION_SCHEDULED);
                    self.logger
                        .report_hibernation_event(HibernationEvent::AbortedDueToGpuContextLoss);
                }
                false
            },
        }
    }

    fn ensure_resource_provider(&mut self, hint: AccelerationHint) -> bool {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return false;
        }
        if self.resource_provider.is_some() && self.check_resource_provider_valid() {
            return true;
        }
        if self.flags.contains(BridgeFlags::CONTEXT_LOST) {
            // Recovery goes through restore() once the context is back.
            return false;
        }
        if self.hibernation_image.is_some() {
            return self.wake_from_hibernation(hint);
        }
        self.create_provider(self.should_accelerate(hint))
    }

    /// Allocates a backing store, falling back to software when an
    /// accelerated allocation fails.
    fn create_provider(&mut self, accelerated: bool) -> bool {
        let attempts: &[bool] = if accelerated { &[true, false] } else { &[false] };
        for &accel in attempts {
            if let Some(provider) =
                self.factory
                    .create_provider(self.size, &self.color_params, accel)
            {
                if accelerated && !accel {
                    debug!("accelerated canvas allocation failed; using software");
                }
                if self.flags.contains(BridgeFlags::HIDDEN) &&
                    accelerated &&
                    !provider.is_accelerated()
                {
                    self.flags
                        .insert(BridgeFlags::SOFTWARE_RENDERING_WHILE_HIDDEN);
                }
                self.resource_provider = Some(provider);
                self.flags.insert(BridgeFlags::CLEAR_FRAME);
                return true;
            }
        }
        warn!("canvas backing store allocation failed");
        false
    }

    /// Ends hibernation: recreates a backing store and replays the
    /// compressed snapshot into it. On allocation failure the snapshot is
    /// retained and the bridge stays hibernating.
    fn wake_from_hibernation(&mut self, hint: AccelerationHint) -> bool {
        let want_acceleration = self.should_accelerate(hint);
        if !self.create_provider(want_acceleration) {
            return false;
        }
        let png = match self.hibernation_image.take() {
            Some(png) => png,
            None => return true,
        };
        match Snapshot::decode_png(&png, self.color_params.alpha_mode()) {
            Some(snapshot) => {
                if let Some(provider) = self.resource_provider.as_mut() {
                    let row_bytes = snapshot.size().width as usize * 4;
                    provider.write_pixels(
                        snapshot.size(),
                        snapshot.data(),
                        row_bytes,
                        Point2D::zero(),
                    );
                }
                self.flags.remove(BridgeFlags::CLEAR_FRAME);
            },
            // The surface comes back blank; losing content beats crashing.
            None => warn!("hibernation snapshot decode failed"),
        }
        let got_acceleration = self
            .resource_provider
            .as_ref()
            .is_some_and(|provider| provider.is_accelerated());
        let event = if want_acceleration && !got_acceleration {
            HibernationEvent::EndedWithFallbackToSoftware
        } else {
            HibernationEvent::EndedNormally
        };
        self.logger.report_hibernation_event(event);
        true
    }

    fn draw(&mut self, op: DrawOp) {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return;
        }
        let dirty_rect = op.bounds(self.size);
        if self.recorder.record(op).is_ok() {
            self.did_draw(dirty_rect);
        }
    }

    fn did_draw(&mut self, dirty_rect: Rect<f32>) {
        self.flags.insert(BridgeFlags::HAVE_RECORDED_DRAW_COMMANDS);
        self.client.invalidate_rect(dirty_rect.round_out().to_i32());
        self.client.schedule_animation();
    }

    fn skip_queued_draw_commands(&mut self) {
        self.recorder.start();
        self.flags.remove(BridgeFlags::HAVE_RECORDED_DRAW_COMMANDS);
    }

    fn flush_recording(&mut self) {
        if !self.flags.contains(BridgeFlags::HAVE_RECORDED_DRAW_COMMANDS) {
            return;
        }
        if !self.ensure_resource_provider(AccelerationHint::PreferAcceleration) {
            return;
        }
        self.finish_raster_timers();
        let Ok(record) = self.recorder.finish() else {
            return;
        };
        let sample_timing = rand::random_bool(self.raster_metric_probability);
        let Some(provider) = self.resource_provider.as_mut() else {
            return;
        };
        if self.flags.contains(BridgeFlags::CLEAR_FRAME) {
            // The frame was cleared; previous contents are not preserved
            // under the new raster.
            provider.clear(Color::TRANSPARENT);
        }
        let query = if sample_timing {
            provider.begin_raster_query()
        } else {
            None
        };
        let cpu_start = Instant::now();
        provider.apply_record(&record);
        let cpu_raster_duration = cpu_start.elapsed();
        if let Some(query) = query {
            if self.pending_raster_timers.len() >= MAX_PENDING_RASTER_TIMERS {
                // GPU is behind; losing a sample beats stalling the frame.
                self.pending_raster_timers.pop_front();
            }
            self.pending_raster_timers.push_back(RasterTimer {
                query,
                cpu_raster_duration,
            });
        }
        self.last_recording = Some(Rc::new(record));
        self.recorder.start();
        self.flags.remove(
            BridgeFlags::HAVE_RECORDED_DRAW_COMMANDS |
                BridgeFlags::LAST_RECORD_TAINTED_BY_WRITE_PIXELS |
                BridgeFlags::CLEAR_FRAME,
        );
    }

    fn finish_raster_timers(&mut self) {
        let results = match self.resource_provider.as_mut() {
            Some(provider) => provider.poll_raster_queries(),
            None => return,
        };
        for (query, gpu_raster_duration) in results {
            if let Some(position) = self
                .pending_raster_timers
                .iter()
                .position(|timer| timer.query == query)
            {
                if let Some(timer) = self.pending_raster_timers.remove(position) {
                    debug!(
                        "canvas raster sample: cpu {:?}, gpu {:?}, total {:?}",
                        timer.cpu_raster_duration,
                        gpu_raster_duration,
                        timer.cpu_raster_duration + gpu_raster_duration,
                    );
                }
            }
        }
    }

    fn write_pixels(
        &mut self,
        source_size: Size2D<u32>,
        pixels: &[u8],
        row_bytes: usize,
        origin: Point2D<i32>,
    ) -> bool {
        if !self.ensure_resource_provider(AccelerationHint::PreferAcceleration) {
            return false;
        }
        let covers_surface = origin == Point2D::zero() && source_size == self.size;
        if covers_surface {
            self.skip_queued_draw_commands();
        } else {
            self.flush_recording();
        }
        let Some(provider) = self.resource_provider.as_mut() else {
            return false;
        };
        if !provider.write_pixels(source_size, pixels, row_bytes, origin) {
            return false;
        }
        self.flags
            .insert(BridgeFlags::LAST_RECORD_TAINTED_BY_WRITE_PIXELS);
        self.flags.remove(BridgeFlags::CLEAR_FRAME);
        true
    }

    fn finalize_frame(&mut self) {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return;
        }
        self.ensure_resource_provider(AccelerationHint::PreferAcceleration);
        self.flush_recording();
        self.frames_since_last_commit += 1;
        if self.frames_since_last_commit >= MAX_UNCOMMITTED_FRAMES {
            if let Some(provider) = self.resource_provider.as_mut() {
                if provider.is_accelerated() {
                    provider.rate_limit();
                }
            }
        }
    }

    fn set_hidden(&mut self, hidden: bool) {
        if self.flags.contains(BridgeFlags::HIDDEN) == hidden ||
            self.flags.contains(BridgeFlags::TORN_DOWN)
        {
            return;
        }
        self.flags.set(BridgeFlags::HIDDEN, hidden);
        if hidden {
            self.maybe_schedule_hibernation();
        } else {
            if self.flags.contains(BridgeFlags::HIBERNATION_SCHEDULED) {
                self.flags.remove(BridgeFlags::HIBERNATION_SCHEDULED);
                self.logger
                    .report_hibernation_event(HibernationEvent::AbortedDueToVisibilityChange);
            }
            if self
                .flags
                .contains(BridgeFlags::SOFTWARE_RENDERING_WHILE_HIDDEN)
            {
                self.flags
                    .remove(BridgeFlags::SOFTWARE_RENDERING_WHILE_HIDDEN);
                self.switch_back_to_accelerated_rendering();
            }
            // Restoration from hibernation is lazy: the next access to the
            // backing store wakes the surface.
        }
    }

    fn maybe_schedule_hibernation(&mut self) {
        if !CANVAS_HIBERNATION_ENABLED ||
            self.flags.contains(BridgeFlags::HIBERNATION_SCHEDULED) ||
            self.hibernation_image.is_some()
        {
            return;
        }
        let accelerated = self
            .resource_provider
            .as_ref()
            .is_some_and(|provider| provider.is_accelerated());
        if !accelerated {
            return;
        }
        self.flags.insert(BridgeFlags::HIBERNATION_SCHEDULED);
        self.logger
            .report_hibernation_event(HibernationEvent::Scheduled);
        let weak_self = self.weak_self.clone();
        self.scheduler.post_idle_task(Box::new(move || {
            if let Some(inner) = weak_self.upgrade() {
                inner.borrow_mut().run_scheduled_hibernation();
            }
        }));
    }

    /// The deferred half of hibernation. The schedule may have been
    /// superseded by a visibility flip, context loss, or teardown since the
    /// task was posted, so re-check everything before acting.
    fn run_scheduled_hibernation(&mut self) {
        if !self.flags.contains(BridgeFlags::HIBERNATION_SCHEDULED) {
            return;
        }
        self.flags.remove(BridgeFlags::HIBERNATION_SCHEDULED);
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return;
        }
        self.hibernate();
    }

    fn hibernate(&mut self) {
        if self.flags.contains(BridgeFlags::TORN_DOWN) ||
            !self.flags.contains(BridgeFlags::HIDDEN) ||
            self.hibernation_image.is_some()
        {
            return;
        }
        let had_provider = self.resource_provider.is_some();
        if !self.check_resource_provider_valid() {
            if had_provider {
                // check_resource_provider_valid already handled the loss, but
                // the hibernate attempt itself needs its own abort record.
                self.logger
                    .report_hibernation_event(HibernationEvent::AbortedDueToGpuContextLoss);
            }
            return;
        }
        if !self
            .resource_provider
            .as_ref()
            .is_some_and(|provider| provider.is_accelerated())
        {
            self.logger.report_hibernation_event(
                HibernationEvent::AbortedDueToSwitchToUnacceleratedRendering,
            );
            return;
        }
        self.flush_recording();
        let Some(provider) = self.resource_provider.as_mut() else {
            self.logger
                .report_hibernation_event(HibernationEvent::AbortedDueToGpuContextLoss);
            return;
        };
        let Some(snapshot) = provider.snapshot() else {
            self.logger
                .report_hibernation_event(HibernationEvent::AbortedDueToSnapshotFailure);
            return;
        };
        let Some(png) = snapshot.encode_png() else {
            self.logger
                .report_hibernation_event(HibernationEvent::AbortedDueToAllocationFailure);
            return;
        };
        debug!("canvas hibernated: {} bytes compressed", png.len());
        self.hibernation_image = Some(png);
        self.resource_provider = None;
        self.pending_raster_timers.clear();
        self.logger.did_start_hibernating();
        self.client.did_start_hibernating();
    }

    /// Undoes a hidden-time fall back to software by copying the surface
    /// into a fresh accelerated backing store. Failure keeps the software
    /// store; contents are never dropped.
    fn switch_back_to_accelerated_rendering(&mut self) {
        if self.acceleration_mode == AccelerationMode::DisableAcceleration {
            return;
        }
        let snapshot = match self.resource_provider.as_mut() {
            Some(provider) if !provider.is_accelerated() => provider.snapshot(),
            _ => return,
        };
        let Some(snapshot) = snapshot else {
            warn!("software surface readback failed; staying unaccelerated");
            return;
        };
        let Some(mut accelerated) =
            self.factory
                .create_provider(self.size, &self.color_params, true)
        else {
            debug!("accelerated allocation failed on unhide; staying unaccelerated");
            return;
        };
        let row_bytes = snapshot.size().width as usize * 4;
        accelerated.write_pixels(snapshot.size(), snapshot.data(), row_bytes, Point2D::zero());
        self.resource_provider = Some(accelerated);
    }

    fn new_image_snapshot(&mut self, hint: AccelerationHint) -> Option<Snapshot> {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return None;
        }
        // A hidden, hibernating surface is served from the compressed
        // snapshot; waking the GPU for a readback would defeat the eviction.
        if self.flags.contains(BridgeFlags::HIDDEN) {
            if let Some(png) = self.hibernation_image.as_ref() {
                return Snapshot::decode_png(png, self.color_params.alpha_mode());
            }
        }
        if !self.ensure_resource_provider(hint) {
            if let Some(png) = self.hibernation_image.as_ref() {
                return Snapshot::decode_png(png, self.color_params.alpha_mode());
            }
            return None;
        }
        self.flush_recording();
        self.resource_provider.as_mut()?.snapshot()
    }

    fn read_pixels(&mut self, size: Size2D<u32>, origin: Point2D<i32>) -> Option<Snapshot> {
        let clipped = pixels::clip(origin, size, self.size)?;
        let snapshot = self.new_image_snapshot(AccelerationHint::PreferAcceleration)?;
        Some(snapshot.get_rect(clipped))
    }

    fn prepare_transferable_resource(
        &mut self,
    ) -> Option<(TransferableResource, ResourceReleaseCallback)> {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return None;
        }
        if !self.ensure_resource_provider(AccelerationHint::PreferAcceleration) {
            return None;
        }
        self.flush_recording();
        let Some(provider) = self.resource_provider.as_mut() else {
            return None;
        };
        let snapshot = provider.snapshot()?;
        let is_software = !provider.is_accelerated();
        let id = self
            .recycled_resources
            .pop()
            .unwrap_or_else(|| self.next_resource_id.next());
        self.sync_token_counter += 1;
        let resource = TransferableResource {
            id,
            mailbox: MailboxName::generate(),
            sync_token: SyncToken(self.sync_token_counter),
            size: snapshot.size(),
            format: snapshot.format(),
            is_software,
        };
        // Retire the previous frame's resource; only the newest one counts
        // as outstanding.
        if let Some(previous) = self.current_resource.replace(id) {
            self.retired_resources.insert(previous);
        }
        let weak_self = self.weak_self.clone();
        let callback = ResourceReleaseCallback::new(move |_sync_token, lost| {
            if let Some(inner) = weak_self.upgrade() {
                inner.borrow_mut().resource_released(id, lost);
            }
        });
        self.frames_since_last_commit = 0;
        Some((resource, callback))
    }

    fn resource_released(&mut self, id: ResourceId, lost: bool) {
        if self.current_resource == Some(id) {
            self.current_resource = None;
        } else {
            self.retired_resources.remove(&id);
        }
        if !lost && !self.flags.contains(BridgeFlags::TORN_DOWN) {
            self.recycled_resources.push(id);
        }
    }

    fn did_lose_context(&mut self) {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return;
        }
        warn!("canvas notified of GPU context loss");
        self.flags.insert(BridgeFlags::CONTEXT_LOST);
        self.resource_provider = None;
        self.pending_raster_timers.clear();
        if self.flags.contains(BridgeFlags::HIBERNATION_SCHEDULED) {
            self.flags.remove(BridgeFlags::HIBERNATION_SCHEDULED);
            self.logger
                .report_hibernation_event(HibernationEvent::AbortedDueToGpuContextLoss);
        }
    }

    fn restore(&mut self) -> bool {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return false;
        }
        if !self.flags.contains(BridgeFlags::CONTEXT_LOST) {
            return self.is_valid();
        }
        self.flags.remove(BridgeFlags::CONTEXT_LOST);
        self.resource_provider = None;
        self.ensure_resource_provider(AccelerationHint::PreferAcceleration)
    }

    fn teardown(&mut self) {
        if self.flags.contains(BridgeFlags::TORN_DOWN) {
            return;
        }
        self.flags.insert(BridgeFlags::TORN_DOWN);
        if self.flags.contains(BridgeFlags::HIBERNATION_SCHEDULED) {
            self.flags.remove(BridgeFlags::HIBERNATION_SCHEDULED);
            self.logger.report_hibernation_event(
                HibernationEvent::AbortedDueToDestructionWhileHibernatePending,
            );
        }
        if self.hibernation_image.take().is_some() {
            self.logger
                .report_hibernation_event(HibernationEvent::EndedWithTeardown);
        }
        self.resource_provider = None;
        self.pending_raster_timers.clear();
        self.current_resource = None;
        self.retired_resources.clear();
        self.recycled_resources.clear();
    }
}
