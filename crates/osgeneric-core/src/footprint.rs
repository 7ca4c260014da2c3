//! Process footprint sampling for the create/delete cycle tests.
//!
//! Unit tests share one process, so the bounds leave room for whatever the
//! neighbouring tests allocate meanwhile.

/// Resident-set growth tolerated across a cycle loop.
pub(crate) const RSS_SLACK_BYTES: u64 = 4 << 20;
/// Descriptor growth tolerated across a cycle loop.
pub(crate) const FD_SLACK: usize = 4;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Footprint {
    rss_bytes: u64,
    open_fds: usize,
}

impl Footprint {
    #[cfg(target_os = "linux")]
    pub(crate) fn sample() -> Self {
        let statm = std::fs::read_to_string("/proc/self/statm").unwrap();
        let resident_pages: u64 = statm.split_whitespace().nth(1).unwrap().parse().unwrap();
        // SAFETY: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let open_fds = std::fs::read_dir("/proc/self/fd").unwrap().count();
        Self {
            rss_bytes: resident_pages * page_size,
            open_fds,
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn sample() -> Self {
        Self {
            rss_bytes: 0,
            open_fds: 0,
        }
    }

    /// Runs `cycles` once untimed as warm-up, then again between two samples.
    pub(crate) fn assert_bounded(what: &str, mut cycles: impl FnMut()) {
        cycles();
        let before = Self::sample();
        cycles();
        let after = Self::sample();
        let rss_growth = after.rss_bytes.saturating_sub(before.rss_bytes);
        let fd_growth = after.open_fds.saturating_sub(before.open_fds);
        assert!(
            rss_growth <= RSS_SLACK_BYTES,
            "{what}: resident memory grew by {rss_growth} bytes"
        );
        assert!(fd_growth <= FD_SLACK, "{what}: {fd_growth} descriptors leaked");
    }
}
