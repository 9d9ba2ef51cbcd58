//! Bounded sample queue between the decode, resample and output stages.
//!
//! Producers block when the queue is full; the cpal callback only ever takes what is
//! already there. Closing the queue wakes everybody: producers drop what they hold and
//! consumers drain the rest before seeing `None`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Interleaved `f32` samples with a fixed channel count.
#[derive(Debug)]
pub struct SampleQueue {
    channels: usize,
    capacity: usize,
    state: Mutex<QueueState>,
    changed: Condvar,
}

#[derive(Debug)]
struct QueueState {
    samples: VecDeque<f32>,
    closed: bool,
}

/// How many frames a [`SampleQueue::pop`] waits for.
#[derive(Clone, Copy, Debug)]
pub enum Take {
    /// Wait for exactly `frames`; `None` if the queue closes first.
    Exact(usize),
    /// Wait for at least one frame, return up to `max`.
    UpTo(usize),
    /// Return up to `max` frames without waiting.
    Available(usize),
}

/// Queue capacity in samples for `buffer_seconds` of audio, falling back to two seconds
/// when the setting is not a positive number.
pub fn capacity_for(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, capacity: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity: capacity.max(channels),
            state: Mutex::new(QueueState {
                samples: VecDeque::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the stream finished. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Append samples, waiting for room as needed.
    ///
    /// Returns `false` if the queue was closed before everything was accepted.
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut rest = samples;
        while !rest.is_empty() {
            let mut st = self.lock();
            while st.samples.len() >= self.capacity && !st.closed {
                st = self.changed.wait(st).unwrap_or_else(PoisonError::into_inner);
            }
            if st.closed {
                return false;
            }
            let room = self.capacity - st.samples.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            st.samples.extend(now.iter().copied());
            rest = later;
            drop(st);
            self.changed.notify_all();
        }
        true
    }

    /// Remove whole frames according to `take`.
    pub fn pop(&self, take: Take) -> Option<Vec<f32>> {
        let mut st = self.lock();
        let max_frames = match take {
            Take::Exact(frames) => {
                let want = frames * self.channels;
                while st.samples.len() < want && !st.closed {
                    st = self.changed.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
                if st.samples.len() < want {
                    return None;
                }
                frames
            }
            Take::UpTo(max) => {
                while st.samples.len() < self.channels && !st.closed {
                    st = self.changed.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
                max
            }
            Take::Available(max) => max,
        };

        let n = (st.samples.len() / self.channels).min(max_frames) * self.channels;
        if n == 0 {
            return None;
        }
        let out: Vec<f32> = st.samples.drain(..n).collect();
        drop(st);
        self.changed.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and drained, or `cancel` is raised.
    ///
    /// Returns `true` on a natural drain.
    pub fn wait_drained(&self, cancel: &AtomicBool, poll: Duration) -> bool {
        let mut st = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if st.closed && st.samples.len() < self.channels {
                return true;
            }
            st = self
                .changed
                .wait_timeout(st, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn capacity_for_falls_back_on_bad_duration() {
        assert_eq!(capacity_for(48_000, 2, 2.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, 0.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, f32::NAN), 192_000);
        assert_eq!(capacity_for(44_100, 1, 0.5), 22_050);
    }

    #[test]
    fn available_on_empty_queue_returns_none() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pop(Take::Available(4)).is_none());
    }

    #[test]
    fn available_returns_whole_frames_only() {
        let q = SampleQueue::new(2, 64);
        q.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(q.pop(Take::Available(8)), Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert!(q.pop(Take::Available(8)).is_none());
    }

    #[test]
    fn exact_waits_for_enough_frames() {
        let q = Arc::new(SampleQueue::new(2, 64));
        let barrier = Arc::new(Barrier::new(2));
        let consumer = {
            let q = q.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                q.pop(Take::Exact(3))
            })
        };
        barrier.wait();
        q.push(&[0.1, 0.2, 0.3, 0.4]);
        q.push(&[0.5, 0.6]);
        assert_eq!(consumer.join().unwrap().map(|v| v.len()), Some(6));
    }

    #[test]
    fn up_to_drains_tail_then_sees_close() {
        let q = SampleQueue::new(2, 64);
        q.push(&[1.0, 2.0, 3.0, 4.0]);
        q.close();
        assert_eq!(q.pop(Take::UpTo(8)).map(|v| v.len()), Some(4));
        assert!(q.pop(Take::UpTo(8)).is_none());
        assert!(q.pop(Take::Exact(1)).is_none());
    }

    #[test]
    fn push_blocks_until_room_then_close_releases_it() {
        let q = Arc::new(SampleQueue::new(1, 2));
        q.push(&[1.0, 2.0]);
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push(&[3.0]))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len_frames(), 2);
        q.close();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn wait_drained_reports_drain_and_cancel() {
        let q = SampleQueue::new(2, 16);
        let cancel = AtomicBool::new(false);
        q.close();
        assert!(q.wait_drained(&cancel, Duration::from_millis(5)));

        let q = SampleQueue::new(2, 16);
        q.push(&[1.0, 1.0]);
        cancel.store(true, Ordering::Relaxed);
        assert!(!q.wait_drained(&cancel, Duration::from_millis(5)));
    }
}
