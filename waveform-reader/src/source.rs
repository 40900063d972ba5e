use crate::{error::ReaderResult, framer::Event};
use hrppd_common::{Channel, EventIndex};

/// Anything that can hand out events by index.
///
/// Each implementor owns its file cursors. Workers that need to read in
/// parallel call [EventSource::reopen] to get a source with cursors of their own.
pub trait EventSource: Sized + Send {
    fn num_events(&self) -> usize;

    /// Detector channels carried by every event, in ascending order.
    fn channels(&self) -> Vec<Channel>;

    fn read_event(&mut self, index: EventIndex) -> ReaderResult<Event>;

    fn reopen(&self) -> ReaderResult<Self>;

    /// Iterates every event from the start. Calling this again restarts the sequence.
    fn events(&mut self) -> EventIter<'_, Self> {
        EventIter {
            source: self,
            next: 0,
        }
    }
}

pub struct EventIter<'a, S: EventSource> {
    source: &'a mut S,
    next: EventIndex,
}

impl<S: EventSource> Iterator for EventIter<'_, S> {
    type Item = ReaderResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let num_events = self.source.num_events();
        if self.next >= num_events {
            return None;
        }
        let event = self.source.read_event(self.next);
        // A failed read ends the sequence.
        self.next = if event.is_ok() {
            self.next + 1
        } else {
            num_events
        };
        Some(event)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.source.num_events().saturating_sub(self.next);
        (0, Some(remaining))
    }
}
