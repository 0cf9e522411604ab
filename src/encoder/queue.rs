use std::collections::VecDeque;

use super::frame::EncodedFrame;

/// Bounded lookback of encoded frames that have not been written yet.
///
/// The newest frame stays here until the next frame has patched it, and trailing frames can
/// be discarded when the stream ends.
#[derive(Debug)]
pub(crate) struct FrameQueue {
    frames: VecDeque<EncodedFrame>,
    capacity: usize,
    drop_trailing: usize,
}

impl FrameQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            drop_trailing: 0,
        }
    }

    /// Appends a frame. When the queue is already full the oldest frame is handed back and
    /// must be written before anything else.
    #[must_use]
    pub(crate) fn enqueue(&mut self, frame: EncodedFrame) -> Option<EncodedFrame> {
        let evicted = if self.frames.len() == self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub(crate) fn most_recent_mut(&mut self) -> Option<&mut EncodedFrame> {
        self.frames.back_mut()
    }

    pub(crate) fn set_drop_trailing(&mut self, count: usize) {
        self.drop_trailing = count;
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    /// Empties the queue, yielding the frames to write in order. The last `drop_trailing`
    /// frames are discarded.
    pub(crate) fn flush(&mut self) -> impl Iterator<Item = EncodedFrame> + '_ {
        let keep = self.frames.len().saturating_sub(self.drop_trailing);
        self.frames.truncate(keep);
        self.frames.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{DisposalMethod, Rect};

    fn frame(tag: u8) -> EncodedFrame {
        EncodedFrame::new(Rect::canvas(1, 1), vec![tag])
    }

    fn tags(frames: impl Iterator<Item = EncodedFrame>) -> Vec<u8> {
        frames.map(|frame| frame.lzw[0]).collect()
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut queue = FrameQueue::new(2);
        assert!(queue.enqueue(frame(1)).is_none());
        assert!(queue.enqueue(frame(2)).is_none());
        assert_eq!(queue.enqueue(frame(3)).map(|f| f.lzw[0]), Some(1));
        assert_eq!(queue.len(), 2);
        assert_eq!(tags(queue.flush()), [2, 3]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn zero_capacity_still_holds_one_frame() {
        let mut queue = FrameQueue::new(0);
        assert!(queue.enqueue(frame(1)).is_none());
        assert_eq!(queue.most_recent_mut().map(|f| f.lzw[0]), Some(1));
        assert_eq!(queue.enqueue(frame(2)).map(|f| f.lzw[0]), Some(1));
    }

    #[test]
    fn most_recent_frame_can_be_patched_before_it_leaves() {
        let mut queue = FrameQueue::new(1);
        assert!(queue.most_recent_mut().is_none());
        let _ = queue.enqueue(frame(1));

        if let Some(pending) = queue.most_recent_mut() {
            pending.set_delay(7);
            pending.add_disposal(DisposalMethod::DoNotDispose);
        }
        let written = queue.enqueue(frame(2)).unwrap();
        assert_eq!(written.delay(), 7);
        assert_eq!(written.disposal(), DisposalMethod::DoNotDispose);
    }

    #[test]
    fn flush_drops_trailing_frames() {
        let mut queue = FrameQueue::new(4);
        for tag in 1..=4 {
            let _ = queue.enqueue(frame(tag));
        }
        queue.set_drop_trailing(2);
        assert_eq!(tags(queue.flush()), [1, 2]);
    }

    #[test]
    fn dropping_more_than_queued_writes_nothing() {
        let mut queue = FrameQueue::new(4);
        let _ = queue.enqueue(frame(1));
        queue.set_drop_trailing(3);
        assert_eq!(queue.flush().count(), 0);
    }
}
