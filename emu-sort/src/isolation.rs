//! Per-worker output folders
//!
//! Workers of one group write to `<group_base>_wkr<NN>`, the ordinal padded
//! to the digit count of the worker total so folders sort naturally.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Digits needed to print `total`
pub fn pad_width(total: usize) -> usize {
    total.max(1).to_string().len()
}

/// Folder for `worker` out of `total` workers
pub fn worker_folder(group_base: &Path, worker: usize, total: usize) -> PathBuf {
    let mut name = group_base.as_os_str().to_owned();
    name.push(format!("_wkr{:0width$}", worker, width = pad_width(total)));
    PathBuf::from(name)
}

/// Reserve a fresh folder for `worker`, deleting leftovers from earlier runs
///
/// The folder itself is created by the sorter. Deletion failures are
/// ignored; a stale folder that survives is overwritten by the sorter.
pub fn allocate(group_base: &Path, worker: usize, total: usize) -> PathBuf {
    let folder = worker_folder(group_base, worker, total);
    if folder.exists() {
        debug!(folder = %folder.display(), "Removing stale worker folder");
        let _ = std::fs::remove_dir_all(&folder);
    }
    folder
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_padding_follows_worker_total() {
        let base = Path::new("/out/sorted_g0_session");
        assert_eq!(worker_folder(base, 3, 4), Path::new("/out/sorted_g0_session_wkr3"));
        assert_eq!(worker_folder(base, 3, 12), Path::new("/out/sorted_g0_session_wkr03"));
        assert_eq!(worker_folder(base, 7, 100), Path::new("/out/sorted_g0_session_wkr007"));
        assert_eq!(pad_width(0), 1);
    }

    #[test]
    fn test_allocate_removes_stale_folder() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("sorted_g0_s");
        let stale = worker_folder(&base, 1, 2);
        std::fs::create_dir_all(stale.join("sorter_output")).unwrap();
        std::fs::write(stale.join("old.txt"), "x").unwrap();

        let folder = allocate(&base, 1, 2);
        assert_eq!(folder, stale);
        assert!(!folder.exists());
    }

    #[test]
    fn test_allocate_leaves_sibling_workers_untouched() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("sorted_g0_s");
        let mut siblings: Vec<PathBuf> = [0, 10].iter().map(|&w| worker_folder(&base, w, 11)).collect();
        // Same prefix, left by an earlier run with fewer workers
        siblings.push(worker_folder(&base, 1, 2));
        for folder in &siblings {
            std::fs::create_dir_all(folder.join("sorter_output")).unwrap();
            std::fs::write(folder.join("sorter_output").join("spike_times.npy"), "keep").unwrap();
        }
        let target = worker_folder(&base, 1, 11);
        std::fs::create_dir_all(target.join("sorter_output")).unwrap();

        let folder = allocate(&base, 1, 11);
        assert_eq!(folder, target);
        assert!(!target.exists());
        for folder in &siblings {
            let kept = std::fs::read_to_string(folder.join("sorter_output").join("spike_times.npy")).unwrap();
            assert_eq!(kept, "keep", "{} was modified", folder.display());
        }
    }

    #[test]
    fn test_folders_are_distinct() {
        let base = Path::new("base");
        let folders: HashSet<PathBuf> = (0..16).map(|w| worker_folder(base, w, 16)).collect();
        assert_eq!(folders.len(), 16);
    }
}
