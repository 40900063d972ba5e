use metrics::{describe_gauge, gauge};

pub fn component_info_metric(name: &'static str) {
    static NAME: &str = "hrppd_pipeline_component_info";

    describe_gauge!(NAME, "Basic information about the component");

    let git_rev = option_env!("GIT_VERSION").unwrap_or("unknown");
    gauge!(NAME, "component" => name, "git_version" => git_rev).set(1);
}

pub mod metric_names {
    pub const METRIC_NAME_PREFIX: &str = "hrppd_";

    pub const FAILURES: &str = "hrppd_failures";
    pub const EVENTS_READ: &str = "hrppd_events_read";
    pub const EVENTS_PROCESSED: &str = "hrppd_events_processed";
    pub const SIGNALS_ACCEPTED: &str = "hrppd_signals_accepted";
    pub const TIMINGS_EXTRACTED: &str = "hrppd_timings_extracted";
}

pub mod waveform_kind {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum WaveformKind {
        Trigger,
        Detector,
    }

    // Label building function
    pub fn get_label(waveform_kind: WaveformKind) -> (&'static str, &'static str) {
        (
            "waveform_kind",
            match waveform_kind {
                WaveformKind::Trigger => "trigger",
                WaveformKind::Detector => "detector",
            },
        )
    }
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        ChannelFileMissing,
        ChannelStreamExhausted,
        EventReadFailed,
        FileWriteFailed,
        NoZeroCrossing,
        EmptySearchWindow,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::ChannelFileMissing => "channel_file_missing",
                FailureKind::ChannelStreamExhausted => "channel_stream_exhausted",
                FailureKind::EventReadFailed => "event_read_failed",
                FailureKind::FileWriteFailed => "file_write_failed",
                FailureKind::NoZeroCrossing => "no_zero_crossing",
                FailureKind::EmptySearchWindow => "empty_search_window",
            },
        )
    }
}
