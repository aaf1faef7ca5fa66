//! Small shared helpers. `atomic_write` generalizes the
//! write-temp-then-rename pattern the teacher used for `jobs.json`
//! (`scheduler/store.rs::atomic_write`) into a reusable utility for the
//! registry and per-group settings writers.

use crate::error::Result;
use std::path::Path;

pub fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let tmp = dest.with_extension(format!(
        "tmp.{}",
        uuid::Uuid::new_v4()
    ));

    std::fs::write(&tmp, bytes)?;

    if let Err(rename_err) = std::fs::rename(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(rename_err.into());
    }

    Ok(())
}

/// Monotonically increasing id generator scoped to a single group's ledger.
/// Ids are formatted as zero-padded decimal strings so lexicographic and
/// numeric order coincide, which keeps ledger file greps and `ls` output
/// human-friendly without changing comparison semantics.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn starting_after(last: u64) -> Self {
        Self { next: last + 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_round_trips() {
        let dir = std::env::temp_dir().join(format!("cccc-test-util-{}", uuid::Uuid::new_v4()));
        let path = dir.join("file.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn id_allocator_is_monotonic() {
        let mut alloc = IdAllocator::starting_after(0);
        assert_eq!(alloc.next_id(), 1);
        assert_eq!(alloc.next_id(), 2);
        assert_eq!(alloc.peek(), 3);
    }
}
