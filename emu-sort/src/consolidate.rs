//! Result folder consolidation
//!
//! Flattens the sorter's native output into the job folder and writes the
//! recording snapshot plus the `params.py` descriptor the Phy viewer reads.

use crate::error::Result;
use crate::recording::{write_segment, Recording, SampleDtype};
use crate::sorter::SORTER_OUTPUT_DIR;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

pub const PHY_PARAMS_FILE: &str = "params.py";
pub const RECORDING_FILE: &str = "recording.dat";

/// Move every entry of `src` into `dest`, replacing entries of the same name
pub fn move_tree(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if target.is_dir() {
            fs::remove_dir_all(&target)?;
        } else if target.exists() {
            fs::remove_file(&target)?;
        }
        fs::rename(entry.path(), &target)?;
    }
    Ok(())
}

/// Lift `<folder>/sorter_output/*` into `folder` and drop the emptied subfolder
pub fn consolidate_sorter_output(folder: &Path) -> io::Result<()> {
    let sorter_output = folder.join(SORTER_OUTPUT_DIR);
    if !sorter_output.is_dir() {
        debug!(folder = %folder.display(), "No sorter output subfolder to consolidate");
        return Ok(());
    }
    move_tree(&sorter_output, folder)?;
    let _ = fs::remove_dir_all(&sorter_output);
    Ok(())
}

/// Contents of Phy's `params.py`
#[derive(Debug, Clone, PartialEq)]
pub struct PhyParams {
    pub dat_path: String,
    pub n_channels_dat: usize,
    pub dtype: SampleDtype,
    pub offset: usize,
    pub sample_rate: f64,
    pub hp_filtered: bool,
}

impl PhyParams {
    pub fn render(&self) -> String {
        format!(
            "dat_path = r'{}'\nn_channels_dat = {}\ndtype = '{}'\noffset = {}\nsample_rate = {:?}\nhp_filtered = {}",
            self.dat_path,
            self.n_channels_dat,
            self.dtype.name(),
            self.offset,
            self.sample_rate,
            if self.hp_filtered { "True" } else { "False" },
        )
    }
}

/// Write `recording.dat` and a `params.py` pointing at it by relative path
pub fn write_recording_and_params(recording: &dyn Recording, folder: &Path) -> Result<PhyParams> {
    let dtype = recording.dtype();
    write_segment(recording, 0, &folder.join(RECORDING_FILE), dtype)?;

    let params = PhyParams {
        dat_path: RECORDING_FILE.to_string(),
        n_channels_dat: recording.num_channels(),
        dtype,
        offset: 0,
        sample_rate: recording.sampling_frequency(),
        hp_filtered: recording.is_filtered(),
    };
    let path = folder.join(PHY_PARAMS_FILE);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    fs::write(&path, params.render())?;
    debug!(folder = %folder.display(), channels = params.n_channels_dat, "Wrote Phy recording and params");
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::MemoryRecording;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_consolidate_replaces_existing_entries() {
        let temp = TempDir::new().unwrap();
        let job = temp.path();
        let out = job.join(SORTER_OUTPUT_DIR);
        fs::create_dir_all(out.join("nested")).unwrap();
        fs::write(out.join("spike_times.npy"), b"new").unwrap();
        fs::write(out.join("nested").join("a.txt"), b"a").unwrap();
        fs::write(job.join("spike_times.npy"), b"old").unwrap();
        fs::create_dir_all(job.join("nested").join("stale")).unwrap();

        consolidate_sorter_output(job).unwrap();

        assert!(!out.exists());
        assert_eq!(fs::read(job.join("spike_times.npy")).unwrap(), b"new");
        assert!(job.join("nested").join("a.txt").exists());
        assert!(!job.join("nested").join("stale").exists());
    }

    #[test]
    fn test_consolidate_without_sorter_output_is_noop() {
        let temp = TempDir::new().unwrap();
        consolidate_sorter_output(temp.path()).unwrap();
    }

    #[test]
    fn test_params_descriptor() {
        let temp = TempDir::new().unwrap();
        let recording = MemoryRecording::new(vec![array![[1.0f32, -2.0], [3.0, 4.0]]], 30000.0)
            .unwrap()
            .with_dtype(SampleDtype::Int16)
            .with_filtered(true);

        let params = write_recording_and_params(&recording, temp.path()).unwrap();
        assert_eq!(params.n_channels_dat, 2);

        let text = fs::read_to_string(temp.path().join(PHY_PARAMS_FILE)).unwrap();
        assert_eq!(
            text,
            "dat_path = r'recording.dat'\nn_channels_dat = 2\ndtype = 'int16'\noffset = 0\nsample_rate = 30000.0\nhp_filtered = True"
        );
        // 2 samples x 2 channels x int16
        assert_eq!(fs::metadata(temp.path().join(RECORDING_FILE)).unwrap().len(), 8);
    }
}
