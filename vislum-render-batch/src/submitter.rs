use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use ash::vk;
use smallvec::SmallVec;
use vislum_render_rhi::{QueueType, RenderDevice, SubmitInfo};

use crate::{
    batch::PresentRequest,
    debug::{BatchDebugger, DebugCallback},
    error::SubmitError,
    pool::{BatchId, BatchPool},
    state::BatchState,
    stats::BatchStats,
    submission::{Submission, SubmissionId},
};

/// Result of a successful [`Submitter::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: SubmissionId,
    /// Presents queued by the submitted batches, in submission order.
    pub presents: Vec<PresentRequest>,
    /// Signaled when the batches finish. Present requests must wait on it.
    pub present_wait_semaphore: Option<vk::Semaphore>,
}

/// An in-flight slot. The serial tells apart reuses of the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    slot: u32,
    serial: u64,
}

struct SubmitterState {
    submissions: Vec<Submission>,
    free: Vec<u32>,
    /// Submissions in the order they were handed to the device.
    in_flight: VecDeque<InFlight>,
    next_serial: u64,
    stats: BatchStats,
}

/// Moves batches from `Baked` to `Submitted` and completes them once their
/// fences signal.
///
/// Submitting transfers the caller's reference on each batch to the
/// submission, which drops it after completion.
pub struct Submitter {
    device: Arc<dyn RenderDevice>,
    pool: Arc<BatchPool>,
    debugger: Arc<dyn BatchDebugger>,
    state: Mutex<SubmitterState>,
}

impl Submitter {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        pool: Arc<BatchPool>,
        debugger: Arc<dyn BatchDebugger>,
        max_submissions: usize,
    ) -> Self {
        let state = SubmitterState {
            submissions: (0..max_submissions).map(|_| Submission::default()).collect(),
            free: (0..max_submissions as u32).rev().collect(),
            in_flight: VecDeque::with_capacity(max_submissions),
            next_serial: 0,
            stats: BatchStats::default(),
        };

        Self {
            device,
            pool,
            debugger,
            state: Mutex::new(state),
        }
    }

    /// Marks a baked batch as ready.
    ///
    /// Every batch it depends on must already be ready or further along.
    pub fn mark_ready(&self, id: BatchId) -> Result<(), SubmitError> {
        let batch = self.pool.get(id).ok_or(SubmitError::Stale(id))?;
        if batch.state() != BatchState::Baked {
            return Err(SubmitError::NotReady(id));
        }

        for dependency in batch.dependencies() {
            if self.pool.state(dependency) < BatchState::Ready {
                return Err(SubmitError::DependencyNotReady {
                    batch: id,
                    dependency,
                });
            }
        }

        batch.on_ready_to_submit();
        Ok(())
    }

    /// Submits ready batches to `queue` in the given order.
    ///
    /// A batch's dependencies must be submitted already or come earlier in
    /// `batches`. On success the submission owns the batches.
    pub fn submit(&self, queue: QueueType, batches: &[BatchId]) -> Result<Submitted, SubmitError> {
        for (position, &id) in batches.iter().enumerate() {
            self.check_submittable(queue, id, &batches[..position])?;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = state.free.pop() else {
            return Err(SubmitError::TooManyInFlight);
        };

        match self.submit_to_slot(&mut state.submissions[slot as usize], slot, queue, batches) {
            Ok(submitted) => {
                let serial = state.next_serial;
                state.next_serial += 1;
                state.in_flight.push_back(InFlight { slot, serial });
                Ok(submitted)
            }
            Err(e) => {
                state.free.push(slot);
                Err(e)
            }
        }
    }

    fn check_submittable(
        &self,
        queue: QueueType,
        id: BatchId,
        earlier: &[BatchId],
    ) -> Result<(), SubmitError> {
        let batch = self.pool.get(id).ok_or(SubmitError::Stale(id))?;
        if batch.state() != BatchState::Ready {
            return Err(SubmitError::NotReady(id));
        }

        let expected = batch.queue();
        if expected != queue {
            return Err(SubmitError::WrongQueue {
                batch: id,
                queue,
                expected,
            });
        }

        for dependency in batch.dependencies() {
            let submitted = self.pool.state(dependency) >= BatchState::Submitted;
            if !submitted && !earlier.contains(&dependency) {
                return Err(SubmitError::DependencyNotReady {
                    batch: id,
                    dependency,
                });
            }
        }

        Ok(())
    }

    fn submit_to_slot(
        &self,
        submission: &mut Submission,
        slot: u32,
        queue: QueueType,
        batches: &[BatchId],
    ) -> Result<Submitted, SubmitError> {
        let mut infos: SmallVec<[SubmitInfo; 4]> = SmallVec::new();
        let mut has_presents = false;
        for &id in batches {
            let batch = self.pool.get(id).ok_or(SubmitError::Stale(id))?;
            let mut info = SubmitInfo::default();
            batch.on_before_submit(&mut info)?;
            has_presents |= batch.has_presents();
            infos.push(info);
        }

        let mut semaphores: SmallVec<[vk::Semaphore; 2]> = SmallVec::new();
        let present_wait_semaphore = if has_presents {
            let semaphore = self.device.create_semaphore()?;
            semaphores.push(semaphore);
            if let Some(last) = infos.last_mut() {
                last.signal_semaphores.push(semaphore);
            }
            Some(semaphore)
        } else {
            None
        };

        let fence = match submission.construct(&*self.device, queue, batches, &semaphores) {
            Ok(fence) => fence,
            Err(e) => {
                for semaphore in semaphores {
                    self.device.destroy_semaphore(semaphore);
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self.device.submit(queue, &infos, fence) {
            log::error!("queue submit of {} batches failed: {e}", batches.len());
            submission.cancel(&*self.device);
            return Err(e.into());
        }

        let id = SubmissionId(slot);
        let mut presents = Vec::new();
        for &id_batch in batches {
            if let Some(batch) = self.pool.get(id_batch) {
                batch.on_after_submit(&mut presents, id);
            }
        }

        log::debug!(
            "submitted {} batches to {:?} as submission {}",
            batches.len(),
            queue,
            slot
        );

        Ok(Submitted {
            id,
            presents,
            present_wait_semaphore,
        })
    }

    /// Completes finished submissions in submission order.
    ///
    /// With `wait`, blocks until every in-flight submission finished. The
    /// submitter stays usable from other threads while this waits. Returns
    /// the number of completed submissions.
    pub fn poll(&self, wait: bool, callback: &mut DebugCallback<'_>) -> Result<usize, SubmitError> {
        let timeout = if wait { u64::MAX } else { 0 };
        let mut completed = 0;
        let mut result = Ok(());

        loop {
            let (front, fence) = {
                let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(&front) = state.in_flight.front() else {
                    break;
                };
                (front, state.submissions[front.slot as usize].pending_fence())
            };

            // The fence is waited on without the lock so submits and other
            // pollers are not stalled behind the device.
            if let Some(fence) = fence {
                match self.device.wait_fence(fence, timeout) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        log::error!("waiting on submission {} failed: {e}", front.slot);
                        if result.is_ok() {
                            result = Err(e.into());
                        }
                        break;
                    }
                }
            }

            let mut submission = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.in_flight.front() != Some(&front) {
                    // Completed by another poller in the meantime.
                    continue;
                }
                state.in_flight.pop_front();
                std::mem::take(&mut state.submissions[front.slot as usize])
            };

            // Completion runs user callbacks, so the lock is not held across it.
            let mut stats = BatchStats::default();
            let released = submission.release(
                &*self.device,
                &self.pool,
                &mut stats,
                &*self.debugger,
                callback,
            );
            if let Err(e) = released {
                log::error!("failed to complete submission {}: {e}", front.slot);
                if result.is_ok() {
                    result = Err(e.into());
                }
            }

            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.submissions[front.slot as usize] = submission;
            state.free.push(front.slot);
            state.stats.merge(&stats);
            completed += 1;

            log::debug!("submission {} completed", front.slot);
        }

        result.map(|()| completed)
    }

    /// Number of submissions the device has not finished yet.
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .len()
    }

    /// Counters of every batch completed so far.
    pub fn stats(&self) -> BatchStats {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).stats
    }

    /// Waits for and completes everything in flight, then destroys the
    /// submission fences.
    pub fn shutdown(&self, callback: &mut DebugCallback<'_>) -> Result<(), SubmitError> {
        let result = self.poll(true, callback).map(|_| ());

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for submission in state.submissions.iter_mut() {
            if submission.is_empty() {
                submission.teardown(&*self.device);
            } else {
                log::error!("submission still in flight at shutdown");
            }
        }
        result
    }
}
