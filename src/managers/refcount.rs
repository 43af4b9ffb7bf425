// RefCount - holder count with a checked zero transition

/// Result of [`RefCount::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain
    Remaining(usize),
    /// The last holder let go; resources must be torn down now
    ReachedZero,
    /// Nothing was held; the release was ignored
    AlreadyZero,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefCount(usize);

impl RefCount {
    pub fn get(&self) -> usize {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add a holder, returning the new count.
    pub fn acquire(&mut self) -> usize {
        self.0 += 1;
        self.0
    }

    pub fn release(&mut self) -> Release {
        match self.0 {
            0 => Release::AlreadyZero,
            1 => {
                self.0 = 0;
                Release::ReachedZero
            }
            n => {
                self.0 = n - 1;
                Release::Remaining(self.0)
            }
        }
    }

    /// Drop every holder at once. Reserved for forced cleanup, which tears
    /// resources down regardless of who still holds them.
    pub(crate) fn force_zero(&mut self) {
        self.0 = 0;
    }
}
