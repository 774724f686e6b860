use std::num::NonZero;

/// The size of the header at the start of every slot.
///
/// A pool uses the narrowest width that can address every slot the backing region could ever
/// hold. The width is chosen once when the pool is created, as it determines the position of
/// every slot in the region.
///
/// Every width packs the same information into a little-endian word:
///
/// | bits  | meaning                                    |
/// |-------|--------------------------------------------|
/// | 0     | the slot is in use                         |
/// | 1     | the slot has a successor on the free list  |
/// | 2..   | id of the successor (zero if there is none)|
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum HeaderWidth {
    /// 2-byte header, addressing up to 2^14 slots.
    Bits16,

    /// 4-byte header, addressing up to 2^30 slots.
    Bits32,

    /// 8-byte header, addressing up to 2^62 slots.
    Bits64,
}

/// The headroom used unless configured otherwise: a width class is only used for pools that need
/// at most a quarter of its signed range.
pub(crate) const DEFAULT_HEADROOM: NonZero<u32> = NonZero::new(4).expect("4 is not zero");

const USED_BIT: u8 = 0b01;
const HAS_NEXT_BIT: u8 = 0b10;
const LINK_SHIFT: u32 = 2;

impl HeaderWidth {
    /// The smallest header width, used to estimate the most slots a region could hold.
    pub const NARROWEST: Self = Self::Bits16;

    /// Size of the header in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits16 => 2,
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Number of distinct slot ids the successor field of the header can hold.
    #[must_use]
    pub const fn link_capacity(self) -> u64 {
        match self {
            Self::Bits16 => 1 << (16 - LINK_SHIFT),
            Self::Bits32 => 1 << (32 - LINK_SHIFT),
            Self::Bits64 => 1 << (64 - LINK_SHIFT),
        }
    }

    /// The largest value of the signed integer type of the same width.
    const fn signed_max(self) -> u64 {
        match self {
            Self::Bits16 => 0x7FFF,
            Self::Bits32 => 0x7FFF_FFFF,
            Self::Bits64 => 0x7FFF_FFFF_FFFF_FFFF,
        }
    }

    /// The most slots a pool may have for this width to be selected, given a headroom factor.
    ///
    /// Never exceeds [`link_capacity()`](Self::link_capacity), whatever the headroom.
    #[must_use]
    pub fn slot_limit(self, headroom: NonZero<u32>) -> u64 {
        (self.signed_max() / u64::from(headroom.get())).min(self.link_capacity())
    }

    /// Selects the narrowest width whose slot limit covers `max_slots`.
    ///
    /// The widest class is selected whenever no narrower one fits. Its link field covers more
    /// slots than any addressable region can hold.
    ///
    /// # Example
    ///
    /// ```
    /// use std::num::NonZero;
    ///
    /// use block_pool::HeaderWidth;
    ///
    /// let headroom = NonZero::new(4).unwrap();
    ///
    /// assert_eq!(HeaderWidth::select(62, headroom), HeaderWidth::Bits16);
    /// assert_eq!(HeaderWidth::select(100_000, headroom), HeaderWidth::Bits32);
    /// ```
    #[must_use]
    pub fn select(max_slots: usize, headroom: NonZero<u32>) -> Self {
        // usize is never wider than 64 bits on any supported target.
        let max_slots = u64::try_from(max_slots).unwrap_or(u64::MAX);

        [Self::Bits16, Self::Bits32]
            .into_iter()
            .find(|width| max_slots <= width.slot_limit(headroom))
            .unwrap_or(Self::Bits64)
    }

    /// Writes the encoded form of `header` into `out`, which must be exactly
    /// [`bytes()`](Self::bytes) long.
    ///
    /// # Panics
    ///
    /// Panics if the successor does not fit into the link field of this width. Width selection
    /// rules this out for every id of the pool the width was selected for.
    pub(crate) fn encode(self, header: SlotHeader, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.bytes());

        match self {
            Self::Bits16 => out.copy_from_slice(&pack16(header).to_le_bytes()),
            Self::Bits32 => out.copy_from_slice(&pack32(header).to_le_bytes()),
            Self::Bits64 => out.copy_from_slice(&pack64(header).to_le_bytes()),
        }
    }

    /// Decodes a header from `bytes`, which must be exactly [`bytes()`](Self::bytes) long.
    ///
    /// Returns `None` if the bytes hold a combination the encoder never produces.
    pub(crate) fn decode(self, bytes: &[u8]) -> Option<SlotHeader> {
        match self {
            Self::Bits16 => unpack16(u16::from_le_bytes(bytes.try_into().ok()?)),
            Self::Bits32 => unpack32(u32::from_le_bytes(bytes.try_into().ok()?)),
            Self::Bits64 => unpack64(u64::from_le_bytes(bytes.try_into().ok()?)),
        }
    }
}

/// The decoded contents of a slot header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotHeader {
    /// Whether the slot currently belongs to a caller.
    pub(crate) used: bool,

    /// The next slot on the free list. Always `None` for used slots.
    pub(crate) free_next: Option<usize>,
}

impl SlotHeader {
    /// The header of a slot that has just been handed out.
    pub(crate) const USED: Self = Self {
        used: true,
        free_next: None,
    };

    /// The header of a slot that has just been pushed onto the free list.
    pub(crate) const fn free(free_next: Option<usize>) -> Self {
        Self {
            used: false,
            free_next,
        }
    }
}

/// Generates the pack/unpack pair for one width class.
macro_rules! header_codec {
    ($pack:ident, $unpack:ident, $word:ty) => {
        fn $pack(header: SlotHeader) -> $word {
            let link = header.free_next.map_or(0, |id| {
                <$word>::try_from(id)
                    .ok()
                    .filter(|link| *link < (1 << (<$word>::BITS - LINK_SHIFT)))
                    .expect("width selection keeps every slot id within the link field")
            });

            let mut word = link << LINK_SHIFT;

            if header.free_next.is_some() {
                word |= <$word>::from(HAS_NEXT_BIT);
            }

            if header.used {
                word |= <$word>::from(USED_BIT);
            }

            word
        }

        fn $unpack(word: $word) -> Option<SlotHeader> {
            let used = word & <$word>::from(USED_BIT) != 0;
            let has_next = word & <$word>::from(HAS_NEXT_BIT) != 0;
            let link = word >> LINK_SHIFT;

            let free_next = if has_next {
                Some(usize::try_from(link).ok()?)
            } else if link == 0 {
                None
            } else {
                // A link without the has-next flag is never written by the encoder.
                return None;
            };

            Some(SlotHeader { used, free_next })
        }
    };
}

header_codec!(pack16, unpack16, u16);
header_codec!(pack32, unpack32, u32);
header_codec!(pack64, unpack64, u64);
