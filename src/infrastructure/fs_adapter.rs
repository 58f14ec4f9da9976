//! The concrete `ports::FileStore`: plain `std::fs` underneath a sandbox root,
//! matching `spec.md` §6's `MO_FILENAME_PREFIX` — every logical path
//! (`tx-1-0.jsn`, `bootstats.jsn`, …) is joined under one configured
//! directory so the rest of the crate never has to reason about absolute
//! paths or multi-tenant collisions.

use crate::ports::{FileStat, FileStore};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SandboxedFileStore {
    root: PathBuf,
}

impl SandboxedFileStore {
    /// Creates `root` (and any missing parents) if it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileStore for SandboxedFileStore {
    fn write_all(&mut self, path: &str, contents: &[u8]) -> std::io::Result<()> {
        // `spec.md` §4.G: "opaque text files; no in-place edits" — write to a
        // sibling temp file and rename, so a crash mid-write never leaves a
        // truncated record behind for the next boot's load to stumble over.
        let target = self.resolve(path);
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &target)
    }

    fn read_to_vec(&self, path: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.resolve(path))
    }

    fn stat(&self, path: &str) -> Option<FileStat> {
        fs::metadata(self.resolve(path)).ok().map(|m| FileStat { size: m.len() })
    }

    fn remove(&mut self, path: &str) -> std::io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn list_with_prefix(&self, prefix: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        names
    }
}

/// `spec.md` §6's `ftw_remove_if(predicate)`, expressed the way
/// `ports::filesystem` documents: enumerate, filter, remove. Used by
/// `application::boot_service`'s migration/recovery sweep.
pub fn remove_matching(fs: &mut SandboxedFileStore, prefixes: &[&str]) {
    for &prefix in prefixes {
        for name in fs.list_with_prefix(prefix) {
            let _ = fs.remove(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("ocpp-station-test-{name}-{}", std::process::id()));
        dir
    }

    #[test]
    fn write_read_remove_round_trip() {
        let root = temp_root("fs-roundtrip");
        let mut store = SandboxedFileStore::new(&root).unwrap();
        store.write_all("bootstats.jsn", b"{\"bootNr\":1}").unwrap();
        assert_eq!(store.read_to_vec("bootstats.jsn").unwrap(), b"{\"bootNr\":1}");
        assert!(store.exists("bootstats.jsn"));
        store.remove("bootstats.jsn").unwrap();
        assert!(!store.exists("bootstats.jsn"));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn list_with_prefix_filters_directory_entries() {
        let root = temp_root("fs-prefix");
        let mut store = SandboxedFileStore::new(&root).unwrap();
        store.write_all("tx-1-0.jsn", b"{}").unwrap();
        store.write_all("tx-1-1.jsn", b"{}").unwrap();
        store.write_all("sc-1-0.jsn", b"{}").unwrap();
        let mut found = store.list_with_prefix("tx-1-");
        found.sort();
        assert_eq!(found, vec!["tx-1-0.jsn", "tx-1-1.jsn"]);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn remove_matching_sweeps_every_named_prefix() {
        let root = temp_root("fs-sweep");
        let mut store = SandboxedFileStore::new(&root).unwrap();
        store.write_all("tx-1-0.jsn", b"{}").unwrap();
        store.write_all("sc-1-0.jsn", b"{}").unwrap();
        store.write_all("arduino-ocpp.cnf", b"{}").unwrap();
        remove_matching(&mut store, &["tx", "sc"]);
        assert!(!store.exists("tx-1-0.jsn"));
        assert!(!store.exists("sc-1-0.jsn"));
        assert!(store.exists("arduino-ocpp.cnf"));
        let _ = fs::remove_dir_all(&root);
    }
}
