//! Snapshot merge
//!
//! Folds a raw session sample into the previous snapshot of a transfer. The
//! merge is a pure function of its inputs; the registry applies its result
//! as a single map update.

use std::time::Instant;

use thiserror::Error;

use super::types::{RateSample, Transfer, TransferFile};
use crate::identifier::InfoHash;
use crate::session::RawTransferState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("session reported {actual} files for {info_hash}, registry holds {expected}")]
    FileCountMismatch {
        info_hash: InfoHash,
        expected: usize,
        actual: usize,
    },
}

/// Merge `raw` into `previous`, sampled at `now`
pub fn merge(
    previous: Transfer,
    raw: &RawTransferState,
    now: Instant,
) -> Result<Transfer, MergeError> {
    let mut next = previous;
    if let Some(name) = &raw.name {
        next.name = Some(name.clone());
    }

    // Metadata never un-loads; a session that lost it just leaves the snapshot alone
    let Some(raw_files) = &raw.files else {
        return Ok(next);
    };

    if !next.metadata_loaded {
        next.files = raw_files
            .iter()
            .map(|f| TransferFile {
                path: f.path.clone(),
                size: 0,
                chunk_count: 0,
                chunks_completed: 0,
                percent: 0.0,
                selected: true,
                running: next.running,
            })
            .collect();
        next.metadata_loaded = true;
    } else if next.files.len() != raw_files.len() {
        return Err(MergeError::FileCountMismatch {
            info_hash: next.info_hash,
            expected: next.files.len(),
            actual: raw_files.len(),
        });
    }

    let mut selected_chunks = 0usize;
    let mut selected_completed = 0usize;
    let mut size = 0u64;
    let mut downloaded = 0u64;

    for (file, raw_file) in next.files.iter_mut().zip(raw_files) {
        file.size = raw_file.length;
        file.chunk_count = raw_file.chunk_count;
        file.chunks_completed = raw_file.chunks_completed;
        file.percent = percent(file.chunks_completed, file.chunk_count);

        if file.selected {
            size += raw_file.length;
            downloaded += raw_file.completed_bytes;
            selected_chunks += file.chunk_count;
            selected_completed += file.chunks_completed;
        }
    }

    next.size = size;
    next.downloaded = downloaded;
    next.percent = percent(selected_completed, selected_chunks);
    next.peers = raw.stats.active_peers;

    let uploaded = raw.stats.uploaded_bytes;
    if let Some(last) = next.sample {
        if let Some(rate) = rate(last.downloaded, downloaded, last.at, now) {
            next.download_rate = rate;
        }
        if let Some(rate) = rate(last.uploaded, uploaded, last.at, now) {
            next.upload_rate = rate;
        }
    }
    next.sample = Some(RateSample {
        at: now,
        downloaded,
        uploaded,
    });

    Ok(next)
}

/// `floor(n / total * 10000) / 100`, or 0 when `total` is 0
pub fn percent(n: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let scaled = (n as u128 * 10_000) / total as u128;
    scaled as f64 / 100.0
}

/// Bytes per second between two samples; `None` if it cannot be trusted
fn rate(old: u64, new: u64, from: Instant, to: Instant) -> Option<f64> {
    let elapsed = to.checked_duration_since(from)?.as_secs_f64();
    if elapsed <= 0.0 || new < old {
        return None;
    }
    Some((new - old) as f64 / elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{RawFile, SessionStats};
    use std::time::Duration;

    fn id() -> InfoHash {
        InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap()
    }

    fn raw_file(path: &str, length: u64, chunks: usize, done: usize, bytes: u64) -> RawFile {
        RawFile {
            path: path.to_string(),
            length,
            chunk_count: chunks,
            chunks_completed: done,
            completed_bytes: bytes,
        }
    }

    fn loaded(files: Vec<RawFile>) -> RawTransferState {
        RawTransferState {
            name: Some("sample".to_string()),
            total_length: files.iter().map(|f| f.length).sum(),
            files: Some(files),
            stats: SessionStats::default(),
        }
    }

    /// Single 10_000-byte file with `bytes` completed
    fn single(bytes: u64) -> RawTransferState {
        loaded(vec![raw_file("a.bin", 10_000, 10, (bytes / 1000) as usize, bytes)])
    }

    fn three_files() -> RawTransferState {
        loaded(vec![
            raw_file("a.txt", 100, 4, 4, 100),
            raw_file("b.txt", 200, 8, 2, 50),
            raw_file("c.txt", 300, 12, 0, 0),
        ])
    }

    #[test]
    fn test_unloaded_sample_sets_name_only() {
        let raw = RawTransferState {
            name: Some("pending".to_string()),
            ..Default::default()
        };
        let merged = merge(Transfer::new(id()), &raw, Instant::now()).unwrap();

        assert!(!merged.metadata_loaded);
        assert!(merged.files.is_empty());
        assert_eq!(merged.name.as_deref(), Some("pending"));
        assert_eq!(merged.size, 0);
        assert!(merged.sample.is_none());
    }

    #[test]
    fn test_first_load_selects_every_file() {
        let merged = merge(Transfer::new(id()), &three_files(), Instant::now()).unwrap();

        assert!(merged.metadata_loaded);
        assert_eq!(merged.files.len(), 3);
        assert!(merged.files.iter().all(|f| f.selected));
        assert!(merged.files.iter().all(|f| !f.running));
        assert_eq!(merged.size, 600);
        assert_eq!(merged.downloaded, 150);
        // 6 of 24 chunks
        assert_eq!(merged.percent, 25.0);
        assert_eq!(merged.files[1].percent, 25.0);
    }

    #[test]
    fn test_first_load_mirrors_running() {
        let mut previous = Transfer::new(id());
        previous.running = true;
        let merged = merge(previous, &three_files(), Instant::now()).unwrap();
        assert!(merged.files.iter().all(|f| f.running));
    }

    #[test]
    fn test_selection_survives_later_merges() {
        let now = Instant::now();
        let mut transfer = merge(Transfer::new(id()), &three_files(), now).unwrap();
        transfer.files[1].selected = false;

        let merged = merge(transfer, &three_files(), now + Duration::from_secs(1)).unwrap();
        assert!(!merged.files[1].selected);
        assert_eq!(merged.size, 400);
        assert_eq!(merged.downloaded, 100);
        // 4 of 16 chunks
        assert_eq!(merged.percent, 25.0);
    }

    #[test]
    fn test_no_selected_files_zeroes_totals() {
        let now = Instant::now();
        let mut transfer = merge(Transfer::new(id()), &three_files(), now).unwrap();
        transfer.files.iter_mut().for_each(|f| f.selected = false);

        let merged = merge(transfer, &three_files(), now + Duration::from_secs(1)).unwrap();
        assert_eq!(merged.size, 0);
        assert_eq!(merged.downloaded, 0);
        assert_eq!(merged.percent, 0.0);
    }

    #[test]
    fn test_toggle_restores_totals() {
        let now = Instant::now();
        let before = merge(Transfer::new(id()), &three_files(), now).unwrap();
        let (size, percent) = (before.size, before.percent);

        let mut toggled = before;
        toggled.files[1].selected = false;
        let mut toggled = merge(toggled, &three_files(), now + Duration::from_secs(1)).unwrap();
        assert_ne!(toggled.size, size);

        toggled.files[1].selected = true;
        let restored = merge(toggled, &three_files(), now + Duration::from_secs(2)).unwrap();
        assert_eq!(restored.size, size);
        assert_eq!(restored.percent, percent);
    }

    #[test]
    fn test_file_count_mismatch_is_an_error() {
        let now = Instant::now();
        let transfer = merge(Transfer::new(id()), &three_files(), now).unwrap();
        let err = merge(transfer, &single(0), now).unwrap_err();
        assert_eq!(
            err,
            MergeError::FileCountMismatch {
                info_hash: id(),
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn test_metadata_is_irreversible() {
        let now = Instant::now();
        let transfer = merge(Transfer::new(id()), &three_files(), now).unwrap();
        let merged = merge(transfer, &RawTransferState::default(), now).unwrap();
        assert!(merged.metadata_loaded);
        assert_eq!(merged.files.len(), 3);
        assert_eq!(merged.name.as_deref(), Some("sample"));
    }

    #[test]
    fn test_percent_floors() {
        assert_eq!(percent(1, 3), 33.33);
        assert_eq!(percent(2, 3), 66.66);
        assert_eq!(percent(3, 3), 100.0);
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(9_999, 10_000), 99.99);
    }

    #[test]
    fn test_download_rate() {
        let t0 = Instant::now();
        let first = merge(Transfer::new(id()), &single(0), t0).unwrap();
        assert_eq!(first.download_rate, 0.0);

        let second = merge(first, &single(1000), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(second.download_rate, 1000.0);

        // Bytes went down (e.g. a file was deselected): keep the old rate
        let third = merge(second, &single(500), t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(third.download_rate, 1000.0);
        assert_eq!(third.downloaded, 500);

        let fourth = merge(third, &single(2500), t0 + Duration::from_secs(4)).unwrap();
        assert_eq!(fourth.download_rate, 1000.0);
    }

    #[test]
    fn test_zero_elapsed_keeps_rate() {
        let t0 = Instant::now();
        let first = merge(Transfer::new(id()), &single(0), t0).unwrap();
        let second = merge(first, &single(1000), t0 + Duration::from_secs(1)).unwrap();
        let third = merge(second, &single(3000), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(third.download_rate, 1000.0);
    }

    #[test]
    fn test_upload_rate_and_peers() {
        let t0 = Instant::now();
        let mut raw = single(0);
        raw.stats = SessionStats {
            active_peers: 4,
            uploaded_bytes: 100,
        };
        let first = merge(Transfer::new(id()), &raw, t0).unwrap();
        assert_eq!(first.peers, 4);

        raw.stats = SessionStats {
            active_peers: 2,
            uploaded_bytes: 600,
        };
        let second = merge(first, &raw, t0 + Duration::from_millis(500)).unwrap();
        assert_eq!(second.upload_rate, 1000.0);
        assert_eq!(second.peers, 2);
    }

    #[test]
    fn test_repeated_merge_is_stable() {
        let t0 = Instant::now();
        let first = merge(Transfer::new(id()), &three_files(), t0).unwrap();
        let second = merge(first.clone(), &three_files(), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(first.files, second.files);
        assert_eq!(first.percent, second.percent);
        assert_eq!(second.download_rate, 0.0);
    }
}
