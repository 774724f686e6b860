use std::num::NonZero;
use std::ops::Range;

use crate::logging::warn_event;
use crate::{Error, HeaderWidth, Result};

/// The immutable geometry of a pool: where each slot starts and where its payload lives.
///
/// Slot `i` occupies bytes `[i * stride, (i + 1) * stride)` of the backing region. The first
/// `header_width` bytes of a slot hold its header, the rest is payload.
///
/// Everything here is fixed when the pool is created, so the conversions need no lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotLayout {
    total_size: usize,
    slot_size: usize,
    header_width: HeaderWidth,

    /// Header plus payload.
    stride: NonZero<usize>,

    /// How many slots fit into the region at the selected header width.
    max_slots: usize,
}

impl SlotLayout {
    /// Plans the layout of a region of `total_size` bytes divided into `slot_size` byte slots.
    ///
    /// The header width is the narrowest class that can address as many slots as the region
    /// could hold with the narrowest header, after reserving the given headroom.
    pub(crate) fn calculate(
        total_size: usize,
        slot_size: usize,
        headroom: NonZero<u32>,
    ) -> Result<Self> {
        let too_small = |required: usize| Error::RegionTooSmall {
            total_size,
            required,
        };

        let min_stride = HeaderWidth::NARROWEST
            .bytes()
            .checked_add(slot_size)
            .and_then(NonZero::new)
            .ok_or_else(|| too_small(usize::MAX))?;

        if total_size < min_stride.get() {
            return Err(too_small(min_stride.get()));
        }

        let header_width = HeaderWidth::select(total_size / min_stride, headroom);

        let stride = header_width
            .bytes()
            .checked_add(slot_size)
            .and_then(NonZero::new)
            .ok_or_else(|| too_small(usize::MAX))?;

        // A large headroom can select a wider header even for a region that fits a single slot.
        if total_size < stride.get() {
            return Err(too_small(stride.get()));
        }

        Ok(Self {
            total_size,
            slot_size,
            header_width,
            stride,
            max_slots: total_size / stride,
        })
    }

    pub(crate) fn total_size(&self) -> usize {
        self.total_size
    }

    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub(crate) fn header_width(&self) -> HeaderWidth {
        self.header_width
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride.get()
    }

    pub(crate) fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Byte offset of the start (the header) of slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if the offset is not representable in `usize`.
    pub(crate) fn slot_offset(&self, id: usize) -> usize {
        id.checked_mul(self.stride.get())
            .expect("slot offset must be representable in usize")
    }

    /// Byte offset of the payload of slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if the offset is not representable in `usize`.
    pub(crate) fn data_offset(&self, id: usize) -> usize {
        self.slot_offset(id)
            .checked_add(self.header_width.bytes())
            .expect("data offset must be representable in usize")
    }

    /// The bytes holding the payload of slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not representable in `usize`.
    pub(crate) fn data_range(&self, id: usize) -> Range<usize> {
        let start = self.data_offset(id);

        let end = start
            .checked_add(self.slot_size)
            .expect("data range must be representable in usize");

        start..end
    }

    /// Whether slot `id` lies entirely within the region.
    pub(crate) fn fits(&self, id: usize) -> bool {
        id < self.max_slots
    }

    /// End of the last slot that fits into the region. The bytes from here up to `total_size`
    /// are never part of any slot.
    fn slots_end(&self) -> usize {
        // Cannot overflow, `max_slots` strides fit into `total_size`.
        self.max_slots.wrapping_mul(self.stride.get())
    }

    /// The id of the slot starting at byte `offset`.
    pub(crate) fn id_from_slot_offset(&self, offset: usize) -> Result<usize> {
        if offset >= self.slots_end() {
            warn_event!(
                "slot offset {offset} is outside the {} slots of the {} byte region",
                self.max_slots,
                self.total_size
            );
            return Err(Error::OffsetOutOfRange {
                offset,
                total_size: self.total_size,
            });
        }

        let stride = self.stride.get();
        let misalignment = offset % self.stride;

        if misalignment != 0 {
            // Cannot underflow, the remainder is never larger than the dividend.
            let suggested = offset.wrapping_sub(misalignment);

            warn_event!(
                "slot offset {offset} is not aligned with stride {stride}, suggested offset: {suggested}"
            );
            return Err(Error::Misaligned {
                offset,
                stride,
                suggested,
            });
        }

        Ok(offset / self.stride)
    }

    /// The id of the slot whose payload starts at byte `offset`.
    pub(crate) fn id_from_data_offset(&self, offset: usize) -> Result<usize> {
        let header_bytes = self.header_width.bytes();

        let Some(slot_offset) = offset.checked_sub(header_bytes) else {
            warn_event!("data offset {offset} points into the header of slot 0");
            return Err(Error::Misaligned {
                offset,
                stride: self.stride.get(),
                suggested: header_bytes,
            });
        };

        self.id_from_slot_offset(slot_offset).map_err(|error| match error {
            // Report the offsets in the terms the caller used: data offsets, not slot offsets.
            Error::Misaligned {
                stride, suggested, ..
            } => Error::Misaligned {
                offset,
                stride,
                // Cannot overflow, the suggestion is below an offset we just subtracted from.
                suggested: suggested.wrapping_add(header_bytes),
            },
            Error::OffsetOutOfRange { total_size, .. } => Error::OffsetOutOfRange {
                offset,
                total_size,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DEFAULT_HEADROOM;

    fn layout(total_size: usize, slot_size: usize) -> SlotLayout {
        SlotLayout::calculate(total_size, slot_size, DEFAULT_HEADROOM).unwrap()
    }

    #[test]
    fn small_region_uses_narrow_header() {
        let layout = layout(4096, 64);

        assert_eq!(layout.header_width(), HeaderWidth::Bits16);
        assert_eq!(layout.stride(), 66);
        assert_eq!(layout.max_slots(), 62);
        assert_eq!(layout.total_size(), 4096);
        assert_eq!(layout.slot_size(), 64);
    }

    #[test]
    fn many_small_slots_widen_the_header() {
        // 8192 slots of 2 + 6 bytes exceed the 16-bit limit.
        let layout = layout(8192 * 8, 6);

        assert_eq!(layout.header_width(), HeaderWidth::Bits32);
        assert_eq!(layout.stride(), 10);
        assert_eq!(layout.max_slots(), 6553);
    }

    #[test]
    fn region_holding_exactly_one_slot_is_accepted() {
        let layout = layout(66, 64);
        assert_eq!(layout.max_slots(), 1);
    }

    #[test]
    fn undersized_region_is_rejected() {
        assert_eq!(
            SlotLayout::calculate(65, 64, DEFAULT_HEADROOM),
            Err(Error::RegionTooSmall {
                total_size: 65,
                required: 66
            })
        );

        assert!(matches!(
            SlotLayout::calculate(usize::MAX, usize::MAX, DEFAULT_HEADROOM),
            Err(Error::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn zero_sized_slots_are_headers_only() {
        let layout = layout(100, 0);

        assert_eq!(layout.stride(), 2);
        assert_eq!(layout.max_slots(), 50);
        assert_eq!(layout.data_range(3), 8..8);
    }

    #[test]
    fn offsets_follow_stride() {
        let layout = layout(4096, 64);

        assert_eq!(layout.slot_offset(0), 0);
        assert_eq!(layout.slot_offset(1), 66);
        assert_eq!(layout.slot_offset(10), 660);
        assert_eq!(layout.data_offset(0), 2);
        assert_eq!(layout.data_offset(10), 662);
        assert_eq!(layout.data_range(1), 68..132);
    }

    #[test]
    fn offsets_convert_back_to_ids() {
        let layout = layout(4096, 64);

        for id in 0..layout.max_slots() {
            assert_eq!(layout.id_from_slot_offset(layout.slot_offset(id)), Ok(id));
            assert_eq!(layout.id_from_data_offset(layout.data_offset(id)), Ok(id));
        }
    }

    #[test]
    fn misaligned_slot_offset_suggests_boundary() {
        let layout = layout(4096, 64);

        assert_eq!(
            layout.id_from_slot_offset(100),
            Err(Error::Misaligned {
                offset: 100,
                stride: 66,
                suggested: 66
            })
        );
    }

    #[test]
    fn misaligned_data_offset_suggests_data_boundary() {
        let layout = layout(4096, 64);

        assert_eq!(
            layout.id_from_data_offset(66),
            Err(Error::Misaligned {
                offset: 66,
                stride: 66,
                suggested: 2
            })
        );

        assert_eq!(
            layout.id_from_data_offset(1),
            Err(Error::Misaligned {
                offset: 1,
                stride: 66,
                suggested: 2
            })
        );
    }

    #[test]
    fn offset_beyond_region_is_out_of_range() {
        let layout = layout(4096, 64);

        assert_eq!(
            layout.id_from_slot_offset(4096),
            Err(Error::OffsetOutOfRange {
                offset: 4096,
                total_size: 4096
            })
        );
        assert_eq!(
            layout.id_from_data_offset(5000),
            Err(Error::OffsetOutOfRange {
                offset: 5000,
                total_size: 4096
            })
        );
    }

    #[test]
    fn fits_stops_at_max_slots() {
        let layout = layout(4096, 64);

        assert!(layout.fits(61));
        assert!(!layout.fits(62));
    }

    #[test]
    fn offset_in_unused_tail_is_out_of_range() {
        // 62 slots end at byte 4092, the last 4 bytes belong to no slot.
        let layout = layout(4096, 64);

        assert_eq!(
            layout.id_from_slot_offset(4092),
            Err(Error::OffsetOutOfRange {
                offset: 4092,
                total_size: 4096
            })
        );
        assert_eq!(
            layout.id_from_slot_offset(4093),
            Err(Error::OffsetOutOfRange {
                offset: 4093,
                total_size: 4096
            })
        );
        assert_eq!(
            layout.id_from_data_offset(4094),
            Err(Error::OffsetOutOfRange {
                offset: 4094,
                total_size: 4096
            })
        );

        // The last slot that fits is still found.
        assert_eq!(layout.id_from_slot_offset(4026), Ok(61));
        assert_eq!(layout.id_from_data_offset(4028), Ok(61));
    }

    #[test]
    fn headroom_widening_beyond_region_is_rejected() {
        // One slot fits with a 2-byte header but not with the 4-byte header this headroom selects.
        let headroom = NonZero::new(65_536).unwrap();

        assert_eq!(
            SlotLayout::calculate(66, 64, headroom),
            Err(Error::RegionTooSmall {
                total_size: 66,
                required: 68
            })
        );
        assert!(SlotLayout::calculate(68, 64, headroom).is_ok());
    }

    #[test]
    #[should_panic]
    fn unrepresentable_offset_panics() {
        let layout = layout(4096, 64);
        _ = layout.slot_offset(usize::MAX);
    }

    #[test]
    #[should_panic]
    fn unrepresentable_data_range_panics() {
        let layout = layout(4096, 64);

        // The payload starts within usize but ends beyond it.
        _ = layout.data_range((usize::MAX - 2) / 66);
    }
}
