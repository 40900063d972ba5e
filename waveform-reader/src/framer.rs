//! Aligns the per-channel raw streams of a run into events.
use crate::{
    error::{ReaderError, ReaderResult},
    layout::RunLayout,
    raw_stream::RawChannelStream,
    source::EventSource,
};
use hrppd_common::{
    Channel, EventIndex, RunNumber, SAMPLES_PER_EVENT, Sample,
    metrics::{
        failures::{self, FailureKind},
        metric_names::{EVENTS_READ, FAILURES},
    },
};
use metrics::counter;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// The trigger waveform and one waveform per detector channel, all from the same acquisition.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub index: EventIndex,
    pub trigger: Vec<Sample>,
    pub channels: BTreeMap<Channel, Vec<Sample>>,
}

impl Event {
    pub fn channel(&self, channel: Channel) -> Option<&[Sample]> {
        self.channels.get(&channel).map(Vec::as_slice)
    }
}

pub(crate) fn zero_block() -> Vec<Sample> {
    vec![0.0; SAMPLES_PER_EVENT]
}

#[derive(Debug)]
pub struct EventFramer {
    trigger: RawChannelStream,
    channels: BTreeMap<Channel, Option<RawChannelStream>>,
}

impl EventFramer {
    pub fn open(
        layout: &RunLayout,
        run: RunNumber,
        channels: impl IntoIterator<Item = Channel>,
    ) -> ReaderResult<Self> {
        Self::from_paths(
            &layout.trigger_path(run),
            channels
                .into_iter()
                .map(|channel| (channel, layout.channel_path(run, channel))),
        )
    }

    /// Opens the trigger stream, which must exist, and every detector channel stream that does.
    /// Channels whose stream cannot be opened are read as zeros.
    pub fn from_paths(
        trigger_path: &Path,
        channel_paths: impl IntoIterator<Item = (Channel, PathBuf)>,
    ) -> ReaderResult<Self> {
        let trigger = RawChannelStream::open(trigger_path).map_err(|e| match e {
            ReaderError::IO(source) => ReaderError::TriggerStreamMissing {
                path: trigger_path.to_owned(),
                source,
            },
            e => e,
        })?;

        let channels = channel_paths
            .into_iter()
            .map(|(channel, path)| {
                let stream = match RawChannelStream::open(&path) {
                    Ok(stream) => {
                        if stream.num_events() < trigger.num_events() {
                            warn!(
                                "Channel {channel} holds {} events but the trigger holds {}, missing events are zero-filled",
                                stream.num_events(),
                                trigger.num_events()
                            );
                        }
                        Some(stream)
                    }
                    Err(e) => {
                        warn!(
                            "Cannot open channel {channel} at {}: {e}, using zero waveforms",
                            path.display()
                        );
                        counter!(
                            FAILURES,
                            &[failures::get_label(FailureKind::ChannelFileMissing)]
                        )
                        .increment(1);
                        None
                    }
                };
                (channel, stream)
            })
            .collect();

        Ok(Self { trigger, channels })
    }

    pub fn is_present(&self, channel: Channel) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|stream| stream.is_some())
    }
}

impl EventSource for EventFramer {
    fn num_events(&self) -> usize {
        self.trigger.num_events()
    }

    fn channels(&self) -> Vec<Channel> {
        self.channels.keys().copied().collect()
    }

    fn read_event(&mut self, index: EventIndex) -> ReaderResult<Event> {
        let trigger = self.trigger.read_block(index)?;
        let channels = self
            .channels
            .iter_mut()
            .map(|(&channel, stream)| {
                let block = match stream {
                    Some(stream) if index < stream.num_events() => stream.read_block(index)?,
                    Some(_) => {
                        debug!("Channel {channel} has no block for event {index}");
                        counter!(
                            FAILURES,
                            &[failures::get_label(FailureKind::ChannelStreamExhausted)]
                        )
                        .increment(1);
                        zero_block()
                    }
                    None => zero_block(),
                };
                Ok::<_, ReaderError>((channel, block))
            })
            .collect::<ReaderResult<_>>()?;
        counter!(EVENTS_READ).increment(1);
        Ok(Event {
            index,
            trigger,
            channels,
        })
    }

    fn reopen(&self) -> ReaderResult<Self> {
        Ok(Self {
            trigger: self.trigger.reopen()?,
            channels: self
                .channels
                .iter()
                .map(|(&channel, stream)| {
                    let stream = stream.as_ref().map(RawChannelStream::reopen).transpose()?;
                    Ok::<_, ReaderError>((channel, stream))
                })
                .collect::<ReaderResult<_>>()?,
        })
    }
}
