//! Settle detection: has the membership view stopped changing?

/// Consecutive unchanged polls required before a view counts as settled.
pub const SETTLE_POLLS_REQUIRED: usize = 3;

/// Tracks the run of consecutive polls that observed the same member count.
///
/// The first observation starts a run of length one. Every poll that sees
/// the same count as the previous one extends the run; any change starts a
/// new run at the changed count. The view is settled once the run reaches
/// the required length, so `[1, 1, 1]` settles on the third poll and
/// `[1, 2, 2, 2]` on the fourth.
///
/// Only the count is compared: two different member sets of equal size are
/// indistinguishable.
#[derive(Debug, Clone)]
pub struct SettleTracker {
    required: usize,
    last: Option<usize>,
    run: usize,
    polls: usize,
}

impl SettleTracker {
    /// Create a tracker needing `required` equal polls in a row (at least 1).
    pub fn new(required: usize) -> Self {
        Self {
            required: required.max(1),
            last: None,
            run: 0,
            polls: 0,
        }
    }

    /// Record one poll of the member count. Returns `true` once settled.
    pub fn observe(&mut self, count: usize) -> bool {
        self.polls += 1;
        if self.last == Some(count) {
            self.run += 1;
        } else {
            self.last = Some(count);
            self.run = 1;
        }
        self.is_settled()
    }

    /// Check whether the current run has reached the required length.
    pub fn is_settled(&self) -> bool {
        self.run >= self.required
    }

    /// Total polls observed so far.
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Length of the current run of equal counts.
    pub fn run(&self) -> usize {
        self.run
    }
}

impl Default for SettleTracker {
    fn default() -> Self {
        Self::new(SETTLE_POLLS_REQUIRED)
    }
}
