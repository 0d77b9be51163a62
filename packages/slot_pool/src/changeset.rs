//! Per-slot change history compressed into a 16-bit field with logarithmic bucketing.
//!
//! The field is divided into levels. Level 0 has one bit per frame for the newest frames.
//! Each further level has bits that cover progressively more frames:
//!
//! | Level | Bits   | Frames per bit | Frames covered |
//! |-------|--------|----------------|----------------|
//! | 0     | 0..8   | 1              | 8              |
//! | 1     | 8..12  | 2              | 8              |
//! | 2     | 12..14 | 4              | 8              |
//! | 3     | 14..16 | 8              | 16             |
//!
//! When a frame is advanced, level 0 shifts up by one bit and the bit falling out of its top
//! is handed to level 1. A level shifts only when the bucket it receives starts a new aligned
//! group of its own span (e.g. level 1 shifts on every second frame); otherwise the incoming
//! bit is OR-merged into its newest bit. Bits falling out of the top of level 3 are lost.
//!
//! Because the shift cadence depends only on the frame number, every slot shifts in lockstep.
//! [`FrameWindows`] runs the same procedure once per frame on frame ranges instead of bits,
//! which tells queries exactly which frames each bit position covers at the current frame.

use std::ops::Range;

/// Geometry of one level of the changeset bitfield.
#[derive(Clone, Copy, Debug)]
struct Level {
    /// Position of the lowest (newest) bit of the level.
    offset: u32,

    /// Number of bits in the level.
    width: u32,

    /// Number of frames folded into each bit. Always a power of two.
    span: u64,
}

impl Level {
    const fn new(offset: u32, width: u32, span: u64) -> Self {
        Self {
            offset,
            width,
            span,
        }
    }

    /// Mask of the level's bits, not yet shifted to the level's offset.
    const fn mask(self) -> u16 {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "levels are at most 8 bits wide"
        )]
        let mask = ((1_u32 << self.width) - 1) as u16;
        mask
    }

    /// Number of frames the whole level covers.
    fn frames(self) -> u64 {
        // Cannot wrap, levels are a handful of bits wide.
        u64::from(self.width).wrapping_mul(self.span)
    }

    fn range(self) -> Range<usize> {
        let start = self.offset as usize;
        // Cannot wrap, the levels fit in 16 bits.
        start..start.wrapping_add(self.width as usize)
    }
}

const LEVEL_COUNT: usize = 4;

const LEVELS: [Level; LEVEL_COUNT] = [
    Level::new(0, 8, 1),
    Level::new(8, 4, 2),
    Level::new(12, 2, 4),
    Level::new(14, 2, 8),
];

/// Number of bits in a [`Changeset`].
pub(crate) const CHANGESET_BITS: usize = u16::BITS as usize;

/// Recent modification history of one slot.
///
/// Bit 0 always represents the current frame. Older frames are folded into coarser bits;
/// see the [module documentation][self] for the layout. The layout is an implementation
/// detail and is only exposed for diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Changeset(u16);

impl Changeset {
    /// A changeset recording no modifications at all.
    pub const EMPTY: Self = Self(0);

    /// Returns the raw history bits.
    #[must_use]
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Whether no modification is recorded in the tracked window.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether the slot was modified in the current frame.
    #[must_use]
    pub fn is_modified_in_current_frame(self) -> bool {
        self.0 & 1 != 0
    }

    pub(crate) fn mark_current(&mut self) {
        self.0 |= 1;
    }

    pub(crate) fn intersects(self, mask: ChangeMask) -> bool {
        match mask {
            ChangeMask::Bits(bits) => self.0 & bits != 0,
            ChangeMask::Everything => true,
        }
    }

    /// Returns the history as seen after the frame advance described by `cadence`.
    #[must_use]
    pub(crate) fn advance(self, cadence: Cadence) -> Self {
        let mut bits = self.0;

        // The new current frame enters level 0 unmodified.
        let mut carry: u16 = 0;

        for (level_index, level) in LEVELS.iter().enumerate() {
            if !cadence.receives(level_index) {
                break;
            }

            let mut value = (bits >> level.offset) & level.mask();
            let mut carry_out = 0;

            if cadence.shifts(level_index) {
                carry_out = (value >> (level.width - 1)) & 1;
                value = (value << 1) & level.mask();
            }

            value |= carry;

            bits = (bits & !(level.mask() << level.offset)) | (value << level.offset);
            carry = carry_out;
        }

        Self(bits)
    }
}

/// Which levels of the changeset shift when entering a particular frame.
///
/// Computed once per frame advance and applied to every slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Cadence {
    shifts: [bool; LEVEL_COUNT],
}

impl Cadence {
    /// Computes the cadence for advancing into `frame`.
    pub(crate) fn entering(frame: u64) -> Self {
        let mut shifts = [false; LEVEL_COUNT];

        // First frame of the bucket handed to the current level. Frames before zero never
        // existed but still keep their alignment thanks to two's complement wrapping, as
        // every span is a power of two.
        let mut bucket_start = frame;

        for (level, shift) in LEVELS.iter().zip(shifts.iter_mut()) {
            if bucket_start & (level.span - 1) != 0 {
                break;
            }

            *shift = true;

            // The bucket that falls out of this level is the one that started one full
            // level-length before the bucket that just entered it.
            bucket_start = bucket_start.wrapping_sub(level.frames());
        }

        Self { shifts }
    }

    fn shifts(self, level_index: usize) -> bool {
        self.shifts.get(level_index).copied().unwrap_or(false)
    }

    /// Level 0 always receives the new frame; other levels receive input only when the
    /// level below shifted something out.
    fn receives(self, level_index: usize) -> bool {
        match level_index.checked_sub(1) {
            None => true,
            Some(below) => self.shifts(below),
        }
    }
}

/// Inclusive range of frames folded into one changeset bit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FrameWindow {
    pub(crate) oldest: u64,
    pub(crate) newest: u64,
}

impl FrameWindow {
    fn single(frame: u64) -> Self {
        Self {
            oldest: frame,
            newest: frame,
        }
    }

    fn merge(existing: Option<Self>, incoming: Option<Self>) -> Option<Self> {
        match (existing, incoming) {
            (Some(a), Some(b)) => Some(Self {
                oldest: a.oldest.min(b.oldest),
                newest: a.newest.max(b.newest),
            }),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

/// The set of changeset bits that a query for recent modifications must inspect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ChangeMask {
    /// Any of these bits being set means the slot was modified in the queried window.
    Bits(u16),

    /// The queried window reaches past the tracked history; every slot counts as modified.
    Everything,
}

/// Which frames each changeset bit position covers at the current frame.
///
/// Shared by all slots of a pool, as all slots shift in lockstep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FrameWindows {
    windows: [Option<FrameWindow>; CHANGESET_BITS],

    /// Newest frame whose history has been discarded, if any.
    dropped_through: Option<u64>,
}

impl FrameWindows {
    /// Windows for a history that starts at frame 0.
    pub(crate) fn new() -> Self {
        let mut windows = [None; CHANGESET_BITS];
        if let Some(current) = windows.first_mut() {
            *current = Some(FrameWindow::single(0));
        }

        Self {
            windows,
            dropped_through: None,
        }
    }

    /// Applies the frame advance into `frame`, as described by `cadence`.
    pub(crate) fn advance(&mut self, cadence: Cadence, frame: u64) {
        let mut carry = Some(FrameWindow::single(frame));
        let mut last_level_shifted = false;

        for (level_index, level) in LEVELS.iter().enumerate() {
            if !cadence.receives(level_index) {
                break;
            }

            let Some(bits) = self.windows.get_mut(level.range()) else {
                unreachable!("levels are laid out within the changeset width");
            };

            let mut carry_out = None;

            if cadence.shifts(level_index) {
                carry_out = bits.last().copied().flatten();
                bits.rotate_right(1);

                if let Some(newest) = bits.first_mut() {
                    *newest = None;
                }

                // Cannot wrap, LEVEL_COUNT is non-zero.
                last_level_shifted = level_index == LEVEL_COUNT.wrapping_sub(1);
            }

            if let Some(newest) = bits.first_mut() {
                *newest = FrameWindow::merge(*newest, carry);
            }

            carry = carry_out;
        }

        if !last_level_shifted {
            return;
        }

        if let Some(dropped) = carry {
            self.dropped_through = Some(
                self.dropped_through
                    .map_or(dropped.newest, |previous| previous.max(dropped.newest)),
            );
        }
    }

    /// Returns the window of frames folded into bit `bit`, if any frame has reached it.
    #[cfg(test)]
    pub(crate) fn window(&self, bit: usize) -> Option<FrameWindow> {
        self.windows.get(bit).copied().flatten()
    }

    /// Newest frame whose history has been discarded, if any.
    #[cfg(test)]
    pub(crate) fn dropped_through(&self) -> Option<u64> {
        self.dropped_through
    }

    /// Builds the mask of bits covering any frame at or after `since`.
    ///
    /// `since` may be negative, referring to frames before tracking started; no such frames
    /// carry any modifications.
    pub(crate) fn mask_since(&self, since: i64) -> ChangeMask {
        let beyond_horizon = self
            .dropped_through
            .is_some_and(|dropped_through| i128::from(since) <= i128::from(dropped_through));

        if beyond_horizon {
            return ChangeMask::Everything;
        }

        let bits = self
            .windows
            .iter()
            .enumerate()
            .filter(|(_, window)| {
                window.is_some_and(|window| i128::from(window.newest) >= i128::from(since))
            })
            .fold(0_u16, |mask, (bit, _)| mask | (1 << bit));

        ChangeMask::Bits(bits)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_wrap,
    reason = "test code"
)]
mod tests {
    use super::*;

    /// Drives one changeset and the shared windows through frames, like a pool would.
    struct History {
        frame: u64,
        changeset: Changeset,
        windows: FrameWindows,
        modified_frames: Vec<u64>,
    }

    impl History {
        fn new() -> Self {
            Self {
                frame: 0,
                changeset: Changeset::EMPTY,
                windows: FrameWindows::new(),
                modified_frames: Vec::new(),
            }
        }

        fn modify(&mut self) {
            self.changeset.mark_current();
            self.modified_frames.push(self.frame);
        }

        fn advance(&mut self) {
            self.frame += 1;
            let cadence = Cadence::entering(self.frame);
            self.changeset = self.changeset.advance(cadence);
            self.windows.advance(cadence, self.frame);
        }

        fn reports_modified_since(&self, since: i64) -> bool {
            self.changeset.intersects(self.windows.mask_since(since))
        }

        fn truly_modified_since(&self, since: i64) -> bool {
            self.modified_frames
                .iter()
                .any(|frame| *frame as i64 >= since)
        }
    }

    #[test]
    fn level_zero_shifts_every_frame() {
        for frame in 0..100 {
            let cadence = Cadence::entering(frame);
            assert!(cadence.shifts(0));
            assert!(cadence.receives(0));
            assert!(cadence.receives(1));
        }
    }

    #[test]
    fn coarser_levels_shift_on_their_cadence() {
        // Level 1 receives frame - 8 and shifts when that frame is even.
        assert!(Cadence::entering(10).shifts(1));
        assert!(!Cadence::entering(11).shifts(1));

        // Level 2 receives pairs starting at frame - 16 and shifts on quad boundaries.
        assert!(Cadence::entering(20).shifts(2));
        assert!(!Cadence::entering(22).shifts(2));

        // Level 3 receives quads starting at frame - 24 and shifts on octet boundaries.
        assert!(Cadence::entering(32).shifts(3));
        assert!(!Cadence::entering(36).shifts(3));
    }

    #[test]
    fn new_frame_occupies_bit_zero() {
        let mut history = History::new();
        history.modify();
        assert!(history.changeset.is_modified_in_current_frame());

        history.advance();
        assert!(!history.changeset.is_modified_in_current_frame());
        assert_eq!(history.changeset.bits(), 0b10);
        assert_eq!(history.windows.window(0), Some(FrameWindow::single(1)));
        assert_eq!(history.windows.window(1), Some(FrameWindow::single(0)));
    }

    #[test]
    fn windows_never_overlap_and_are_contiguous() {
        let mut windows = FrameWindows::new();

        for frame in 1..500_u64 {
            windows.advance(Cadence::entering(frame), frame);

            let mut expected_newest = frame;
            for bit in 0..CHANGESET_BITS {
                let Some(window) = windows.window(bit) else {
                    continue;
                };

                assert_eq!(
                    window.newest, expected_newest,
                    "bit {bit} at frame {frame} does not continue from the bit before it"
                );
                assert!(window.oldest <= window.newest);
                expected_newest = window.oldest.wrapping_sub(1);
            }

            if let Some(dropped) = windows.dropped_through() {
                assert_eq!(dropped, expected_newest);
            }
        }
    }

    #[test]
    fn horizon_stays_between_thirty_three_and_forty_frames() {
        let mut windows = FrameWindows::new();

        for frame in 1..500_u64 {
            windows.advance(Cadence::entering(frame), frame);

            if let Some(dropped) = windows.dropped_through() {
                assert!(frame - dropped >= 33, "frame {frame} dropped {dropped}");
                assert!(frame - dropped <= 40, "frame {frame} dropped {dropped}");
            }
        }
    }

    #[test]
    fn no_false_negatives_within_horizon() {
        // Modify on a pseudo-random schedule and compare against the exact history.
        let mut history = History::new();
        let mut state = 0x2545_f491_u32;

        for _ in 0..400 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;

            if state % 7 == 0 {
                history.modify();
            }

            for frames_back in 0..64_i64 {
                let since = history.frame as i64 - frames_back;
                if history.truly_modified_since(since) {
                    assert!(
                        history.reports_modified_since(since),
                        "missed modification at frame {} looking back {frames_back}",
                        history.frame
                    );
                }
            }

            history.advance();
        }
    }

    #[test]
    fn unmodified_slot_is_clean_within_horizon() {
        let mut history = History::new();

        for _ in 0..100 {
            history.advance();
            assert!(!history.reports_modified_since(history.frame as i64 - 30));
        }
    }

    #[test]
    fn exact_answers_for_level_zero() {
        let mut history = History::new();

        for _ in 0..10 {
            history.advance();
        }

        history.modify();
        history.advance();
        history.advance();

        // Modified at frame 10, now at frame 12.
        assert!(!history.reports_modified_since(12));
        assert!(!history.reports_modified_since(11));
        assert!(history.reports_modified_since(10));
        assert!(history.reports_modified_since(3));
    }

    #[test]
    fn beyond_horizon_everything_is_modified() {
        let mut history = History::new();

        for _ in 0..50 {
            history.advance();
        }

        assert_eq!(history.windows.mask_since(5), ChangeMask::Everything);
        assert!(history.reports_modified_since(5));
    }

    #[test]
    fn widening_the_window_never_shrinks_the_mask() {
        let mut windows = FrameWindows::new();

        for frame in 1..200_u64 {
            windows.advance(Cadence::entering(frame), frame);

            let mut previous = 0_u16;
            for frames_back in 0..=frame as i64 {
                let mask = windows.mask_since(frame as i64 - frames_back);
                match mask {
                    ChangeMask::Bits(bits) => {
                        assert_eq!(bits & previous, previous);
                        previous = bits;
                    }
                    ChangeMask::Everything => previous = u16::MAX,
                }
            }
        }
    }
}
