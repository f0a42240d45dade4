use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::ClaimChannel;

/// Absolute paths already attributed to a job, one set per discovery channel.
///
/// Claims never expire: producers do not remove consumed files, so a
/// delivered file must stay excluded for the life of the process.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    history: HashSet<PathBuf>,
    output_scan: HashSet<PathBuf>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, channel: ClaimChannel) -> &HashSet<PathBuf> {
        match channel {
            ClaimChannel::History => &self.history,
            ClaimChannel::OutputScan => &self.output_scan,
        }
    }

    fn channel_mut(&mut self, channel: ClaimChannel) -> &mut HashSet<PathBuf> {
        match channel {
            ClaimChannel::History => &mut self.history,
            ClaimChannel::OutputScan => &mut self.output_scan,
        }
    }

    pub fn is_claimed(&self, channel: ClaimChannel, path: &Path) -> bool {
        self.channel(channel).contains(path)
    }

    /// Returns false if `path` was already claimed on `channel`.
    pub fn claim(&mut self, channel: ClaimChannel, path: &Path) -> bool {
        self.channel_mut(channel).insert(path.to_path_buf())
    }

    /// Only for claims whose content could not be read.
    pub fn release(&mut self, channel: ClaimChannel, path: &Path) -> bool {
        self.channel_mut(channel).remove(path)
    }

    pub fn len(&self, channel: ClaimChannel) -> usize {
        self.channel(channel).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_disjoint() {
        let mut claims = ClaimRegistry::new();
        let path = Path::new("/srv/texts/answer.md");

        assert!(claims.claim(ClaimChannel::History, path));
        assert!(claims.is_claimed(ClaimChannel::History, path));
        assert!(!claims.is_claimed(ClaimChannel::OutputScan, path));

        assert!(claims.claim(ClaimChannel::OutputScan, path));
        assert!(!claims.claim(ClaimChannel::OutputScan, path));
        assert_eq!(claims.len(ClaimChannel::OutputScan), 1);
    }

    #[test]
    fn release_allows_reclaim() {
        let mut claims = ClaimRegistry::new();
        let path = Path::new("/srv/images/a.png");

        claims.claim(ClaimChannel::OutputScan, path);
        assert!(claims.release(ClaimChannel::OutputScan, path));
        assert!(!claims.is_claimed(ClaimChannel::OutputScan, path));
        assert!(!claims.release(ClaimChannel::OutputScan, path));
        assert!(claims.claim(ClaimChannel::OutputScan, path));
    }
}
