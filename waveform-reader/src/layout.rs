//! Where a run's files live on disk.
use hrppd_common::{Channel, RunNumber};
use std::path::{Path, PathBuf};

const TRIGGER_FILE_NAME: &str = "TR_0_0.dat";
const ANGLE_SCAN_DIRECTORY: &str = "1.4T Angle scan";
const LATER_RUNS_DIRECTORY: &str = "Run after 135";

/// Runs before this number sit directly under the raw data path.
const FIRST_LATER_RUN: RunNumber = 136;
const ANGLE_SCAN_RUNS: std::ops::RangeInclusive<RunNumber> = 147..=165;

#[derive(Clone, Debug)]
pub struct RunLayout {
    raw_data_path: PathBuf,
    ntuple_path: PathBuf,
}

impl RunLayout {
    pub fn new(raw_data_path: impl Into<PathBuf>, ntuple_path: impl Into<PathBuf>) -> Self {
        Self {
            raw_data_path: raw_data_path.into(),
            ntuple_path: ntuple_path.into(),
        }
    }

    pub fn raw_data_path(&self) -> &Path {
        &self.raw_data_path
    }

    pub fn ntuple_path(&self) -> &Path {
        &self.ntuple_path
    }

    pub fn run_directory(&self, run: RunNumber) -> PathBuf {
        let run_name = format!("run{run}");
        if run < FIRST_LATER_RUN {
            self.raw_data_path.join(run_name)
        } else if ANGLE_SCAN_RUNS.contains(&run) {
            self.raw_data_path.join(ANGLE_SCAN_DIRECTORY).join(run_name)
        } else {
            self.raw_data_path.join(LATER_RUNS_DIRECTORY).join(run_name)
        }
    }

    pub fn trigger_path(&self, run: RunNumber) -> PathBuf {
        self.run_directory(run).join(TRIGGER_FILE_NAME)
    }

    pub fn channel_path(&self, run: RunNumber, channel: Channel) -> PathBuf {
        self.run_directory(run).join(format!("wave_{channel}.dat"))
    }

    pub fn ntuple_file(&self, run: RunNumber) -> PathBuf {
        self.ntuple_path.join(format!("MCP_Run_{run}_ntuple.bin"))
    }

    pub fn ntuple_exists(&self, run: RunNumber) -> bool {
        self.ntuple_file(run).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> RunLayout {
        RunLayout::new("/data/raw", "/data/ntuples")
    }

    #[test]
    fn early_runs_are_at_top_level() {
        assert_eq!(layout().run_directory(12), PathBuf::from("/data/raw/run12"));
        assert_eq!(
            layout().run_directory(135),
            PathBuf::from("/data/raw/run135")
        );
    }

    #[test]
    fn angle_scan_runs() {
        for run in [147, 150, 165] {
            assert_eq!(
                layout().run_directory(run),
                PathBuf::from(format!("/data/raw/1.4T Angle scan/run{run}"))
            );
        }
    }

    #[test]
    fn later_runs() {
        for run in [136, 146, 166, 400] {
            assert_eq!(
                layout().run_directory(run),
                PathBuf::from(format!("/data/raw/Run after 135/run{run}"))
            );
        }
    }

    #[test]
    fn file_names() {
        assert_eq!(
            layout().trigger_path(7),
            PathBuf::from("/data/raw/run7/TR_0_0.dat")
        );
        assert_eq!(
            layout().channel_path(7, 11),
            PathBuf::from("/data/raw/run7/wave_11.dat")
        );
        assert_eq!(
            layout().ntuple_file(7),
            PathBuf::from("/data/ntuples/MCP_Run_7_ntuple.bin")
        );
        assert!(!layout().ntuple_exists(7));
    }
}
