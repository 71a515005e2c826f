//! Per-stream frame queue.
//!
//! Mutation goes through [`LockedQueue`], which holds the queue mutex and
//! republishes `oldest`, `newest` and `count` into atomics before the lock is
//! released. Lock-free readers may observe a state that is about to change
//! but never one the locked sequence did not hold at some point. Anything
//! that needs an exact answer re-reads under the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::BufferError;
use crate::frame::Frame;
use crate::stats::StreamStats;
use crate::timebase::Timebase;

/// Marks an empty queue in the atomics; real PTS values may be negative.
const EMPTY: i64 = i64::MIN;

fn decode(pts: i64) -> Option<i64> {
    (pts != EMPTY).then_some(pts)
}

/// A buffered frame and its PTS in the buffer's common timebase
#[derive(Debug)]
pub(crate) struct QueuedFrame {
    pub pts: i64,
    pub frame: Frame,
}

/// Ordered frames for one stream
#[derive(Debug)]
pub struct StreamQueue {
    index: usize,
    timebase: Timebase,
    frames: Mutex<VecDeque<QueuedFrame>>,
    oldest: AtomicI64,
    newest: AtomicI64,
    count: AtomicUsize,
    closed: AtomicBool,
}

impl StreamQueue {
    pub fn new(index: usize, timebase: Timebase) -> Self {
        Self {
            index,
            timebase,
            frames: Mutex::new(VecDeque::with_capacity(32)),
            oldest: AtomicI64::new(EMPTY),
            newest: AtomicI64::new(EMPTY),
            count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stream-local timebase, fixed at construction
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// Oldest buffered PTS (common timebase), lock-free
    pub fn oldest_pts(&self) -> Option<i64> {
        decode(self.oldest.load(Ordering::Acquire))
    }

    /// Newest buffered PTS (common timebase), lock-free
    pub fn newest_pts(&self) -> Option<i64> {
        decode(self.newest.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            index: self.index,
            timebase: self.timebase,
            frames: self.len(),
            oldest_pts: self.oldest_pts(),
            newest_pts: self.newest_pts(),
            closed: self.is_closed(),
        }
    }

    pub(crate) fn lock(&self) -> LockedQueue<'_> {
        LockedQueue {
            queue: self,
            frames: self.frames.lock(),
        }
    }
}

/// Exclusive access to a [`StreamQueue`]'s frames
pub(crate) struct LockedQueue<'a> {
    queue: &'a StreamQueue,
    frames: MutexGuard<'a, VecDeque<QueuedFrame>>,
}

impl LockedQueue<'_> {
    pub fn front_pts(&self) -> Option<i64> {
        self.frames.front().map(|f| f.pts)
    }

    pub fn back_pts(&self) -> Option<i64> {
        self.frames.back().map(|f| f.pts)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }

    /// Append a frame whose PTS is already in the common timebase.
    pub fn push(&mut self, pts: i64, frame: Frame) -> Result<(), BufferError> {
        if let Some(newest) = self.back_pts() {
            if pts <= newest {
                return Err(BufferError::OutOfOrder {
                    stream: self.queue.index,
                    pts,
                    newest,
                });
            }
        }

        let was_empty = self.frames.is_empty();
        self.frames.push_back(QueuedFrame { pts, frame });

        if was_empty {
            self.queue.oldest.store(pts, Ordering::Release);
        }
        self.queue.newest.store(pts, Ordering::Release);
        self.queue.count.store(self.frames.len(), Ordering::Release);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        let popped = self.frames.pop_front()?;
        self.publish();
        Some(popped)
    }

    /// Drop every frame with a PTS below `pts`, returning how many went.
    pub fn discard_before(&mut self, pts: i64) -> usize {
        let keep_from = self.frames.partition_point(|f| f.pts < pts);
        self.frames.drain(..keep_from);
        if keep_from > 0 {
            self.publish();
        }
        keep_from
    }

    /// Release every frame and reopen the stream.
    pub fn clear(&mut self) -> usize {
        let released = self.frames.len();
        self.frames.clear();
        self.queue.closed.store(false, Ordering::Release);
        self.publish();
        released
    }

    pub fn close(&mut self) {
        self.queue.closed.store(true, Ordering::Release);
    }

    fn publish(&self) {
        let q = self.queue;
        q.oldest
            .store(self.front_pts().unwrap_or(EMPTY), Ordering::Release);
        q.newest
            .store(self.back_pts().unwrap_or(EMPTY), Ordering::Release);
        q.count.store(self.frames.len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MediaKind;

    fn frame(pts: i64) -> Frame {
        Frame::new(3, pts, Timebase::MPEG, MediaKind::Data)
    }

    #[test]
    fn test_empty_queue() {
        let q = StreamQueue::new(3, Timebase::MPEG);
        assert_eq!(q.index(), 3);
        assert!(q.is_empty());
        assert_eq!(q.oldest_pts(), None);
        assert_eq!(q.newest_pts(), None);
        assert!(!q.is_closed());
    }

    #[test]
    fn test_push_pop_updates_atomics() {
        let q = StreamQueue::new(3, Timebase::MPEG);
        {
            let mut locked = q.lock();
            locked.push(-20, frame(-20)).unwrap();
            locked.push(0, frame(0)).unwrap();
            locked.push(40, frame(40)).unwrap();
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.oldest_pts(), Some(-20));
        assert_eq!(q.newest_pts(), Some(40));

        let popped = q.lock().pop().unwrap();
        assert_eq!(popped.pts, -20);
        assert_eq!(q.oldest_pts(), Some(0));
        assert_eq!(q.len(), 2);

        q.lock().pop();
        q.lock().pop();
        assert!(q.lock().pop().is_none());
        assert_eq!(q.oldest_pts(), None);
        assert_eq!(q.newest_pts(), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_push_enforces_strictly_increasing() {
        let q = StreamQueue::new(3, Timebase::MPEG);
        let mut locked = q.lock();
        locked.push(10, frame(10)).unwrap();

        let err = locked.push(10, frame(10)).unwrap_err();
        assert_eq!(
            err,
            BufferError::OutOfOrder {
                stream: 3,
                pts: 10,
                newest: 10
            }
        );
        assert!(locked.push(5, frame(5)).is_err());
        drop(locked);
        assert_eq!(q.len(), 1);
        assert_eq!(q.newest_pts(), Some(10));
    }

    #[test]
    fn test_discard_before() {
        let q = StreamQueue::new(3, Timebase::MPEG);
        let mut locked = q.lock();
        for pts in [0, 10, 20, 30] {
            locked.push(pts, frame(pts)).unwrap();
        }
        assert_eq!(locked.discard_before(15), 2);
        assert_eq!(locked.discard_before(15), 0);
        drop(locked);
        assert_eq!(q.oldest_pts(), Some(20));
        assert_eq!(q.newest_pts(), Some(30));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_clear_releases_and_reopens() {
        let q = StreamQueue::new(3, Timebase::MPEG);
        let held = frame(0);
        {
            let mut locked = q.lock();
            locked.push(0, held.clone()).unwrap();
            locked.close();
        }
        assert!(q.is_closed());
        assert_eq!(held.ref_count(), 2);

        assert_eq!(q.lock().clear(), 1);
        assert_eq!(held.ref_count(), 1);
        assert!(!q.is_closed());
        assert!(q.is_empty());
        assert_eq!(q.oldest_pts(), None);
    }
}
