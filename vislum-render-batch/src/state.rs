/// Lifecycle of a [`crate::CommandBatch`].
///
/// States only ever move to their immediate successor. A completed batch
/// leaves the machine by being torn down back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum BatchState {
    Uninitialized,
    Initial,
    Recording,
    Baked,
    Ready,
    Submitted,
    Complete,
}

impl BatchState {
    pub const ALL: [BatchState; 7] = [
        BatchState::Uninitialized,
        BatchState::Initial,
        BatchState::Recording,
        BatchState::Baked,
        BatchState::Ready,
        BatchState::Submitted,
        BatchState::Complete,
    ];

    /// Returns the only state this one may advance to.
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::Initial),
            Self::Initial => Some(Self::Recording),
            Self::Recording => Some(Self::Baked),
            Self::Baked => Some(Self::Ready),
            Self::Ready => Some(Self::Submitted),
            Self::Submitted => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    #[inline]
    pub fn can_advance(self, to: Self) -> bool {
        self.successor() == Some(to)
    }

    /// Advances to `to`.
    ///
    /// # Panics
    /// If `to` is not the successor of the current state.
    pub(crate) fn advance(&mut self, to: Self) {
        assert!(
            self.can_advance(to),
            "invalid batch state transition {:?} -> {:?}",
            self,
            to
        );
        log::trace!("batch state {:?} -> {:?}", self, to);
        *self = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_successor_is_allowed() {
        for (i, from) in BatchState::ALL.iter().enumerate() {
            for (j, to) in BatchState::ALL.iter().enumerate() {
                assert_eq!(from.can_advance(*to), j == i + 1, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn test_advance_walks_the_whole_machine() {
        let mut state = BatchState::Uninitialized;
        while let Some(next) = state.successor() {
            state.advance(next);
        }
        assert_eq!(state, BatchState::Complete);
    }

    #[test]
    #[should_panic(expected = "invalid batch state transition Recording -> Ready")]
    fn test_skipping_a_state_panics() {
        let mut state = BatchState::Recording;
        state.advance(BatchState::Ready);
    }

    #[test]
    #[should_panic(expected = "invalid batch state transition Baked -> Recording")]
    fn test_going_backwards_panics() {
        let mut state = BatchState::Baked;
        state.advance(BatchState::Recording);
    }
}
