//! ADMA2 descriptor tables and DMA bounce buffers.
//!
//! The controller walks a table of descriptors in system memory. Each
//! descriptor names one physically contiguous run of bytes. We build tables
//! two ways:
//!
//! * from a caller's scatter/gather list, into descriptor memory the caller
//!   provides ([`build_descriptor_table`]), or
//! * once, over the pages of a preallocated bounce buffer, moving the End
//!   marker for each transfer ([`BouncePages`]).

use byteorder::{ByteOrder, LittleEndian};

use crate::{debug, error, Error};

// ****************************************************************************
// Constants
// ****************************************************************************

/// The most bytes one descriptor can move. Encoded as a length of zero.
pub const MAX_LENGTH_PER_DESCRIPTOR: u32 = 0x1_0000;

/// Size of a bounce-buffer page, which is also the length of each bounce
/// descriptor.
pub const PAGE_SIZE: usize = 4096;

/// Size of a descriptor with a 32-bit address.
pub const DESCRIPTOR_SIZE_32: usize = 8;

/// Size of a descriptor with a 64-bit address.
pub const DESCRIPTOR_SIZE_64: usize = 12;

/// The most scatter/gather elements one request may carry.
pub const MAX_SG_ELEMENTS: usize = 257;

/// Action field value: transfer data.
pub const ACTION_TRAN: u8 = 4;

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

define_register!(
    /// One ADMA2 descriptor with a 32-bit address.
    ///
    /// The low word holds the attributes and the length, the high word holds
    /// the address.
    Adma2Descriptor,
    u64
);

impl Adma2Descriptor {
    define_field!(valid, set_valid, u64, bool, 0);
    define_field!(end, set_end, u64, bool, 1);
    define_field!(interrupt, set_interrupt, u64, bool, 2);
    define_field!(action, set_action, u64, u8, 3, 3);
    define_field!(length_upper, set_length_upper, u64, u16, 6, 10);
    define_field!(length, set_length, u64, u16, 16, 16);
    define_field!(address, set_address, u64, u32, 32, 32);

    /// A valid data-transfer descriptor.
    ///
    /// `length` must be between 1 and [`MAX_LENGTH_PER_DESCRIPTOR`].
    pub fn transfer(address: u32, length: u32) -> Adma2Descriptor {
        let mut desc = Adma2Descriptor(0);
        desc.set_valid(true)
            .set_action(ACTION_TRAN)
            .set_address(address)
            .set_byte_len(length);
        desc
    }

    /// Set the length in bytes, 1 to [`MAX_LENGTH_PER_DESCRIPTOR`].
    pub fn set_byte_len(&mut self, length: u32) -> &mut Self {
        assert!(length > 0 && length <= MAX_LENGTH_PER_DESCRIPTOR);
        self.set_length_upper(0).set_length(length as u16)
    }

    /// The number of bytes this descriptor moves.
    pub fn byte_len(&self) -> u32 {
        match self.length() {
            0 => MAX_LENGTH_PER_DESCRIPTOR,
            n => u32::from(n),
        }
    }

    /// The descriptor as the controller sees it in memory.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE_32] {
        let mut bytes = [0u8; DESCRIPTOR_SIZE_32];
        LittleEndian::write_u64(&mut bytes, self.0);
        bytes
    }

    /// Decode the attribute and length word of a descriptor of either size.
    ///
    /// For 64-bit descriptors the address field of the result holds only the
    /// low 32 bits of the address.
    pub fn from_bytes(bytes: &[u8]) -> Adma2Descriptor {
        let low = u64::from(LittleEndian::read_u32(&bytes[0..4]));
        let address = u64::from(LittleEndian::read_u32(&bytes[4..8]));
        Adma2Descriptor(low | (address << 32))
    }
}

/// One physically contiguous run of a scatter/gather list.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SgElement {
    /// Bus address of the first byte.
    pub address: u64,
    /// Number of bytes.
    pub length: u32,
}

/// A scatter/gather list describing a request's data buffer.
pub type ScatterGatherList = heapless::Vec<SgElement, MAX_SG_ELEMENTS>;

/// What [`build_descriptor_table`] produced.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// The number of descriptors written.
    pub descriptors: usize,
    /// The total number of bytes the table moves.
    pub total_length: u64,
}

/// Build an ADMA2 descriptor table from a scatter/gather list.
///
/// Elements longer than [`MAX_LENGTH_PER_DESCRIPTOR`] are split across
/// several descriptors. The final descriptor carries the End attribute.
///
/// # Panics
///
/// Panics if `elements` is empty or any element has zero length.
pub fn build_descriptor_table(
    elements: &[SgElement],
    address_64bit: bool,
    table: &mut [u8],
) -> Result<TableInfo, Error> {
    assert!(
        !elements.is_empty(),
        "ADMA2 table needs at least one scatter/gather element"
    );
    let entry_size = if address_64bit {
        DESCRIPTOR_SIZE_64
    } else {
        DESCRIPTOR_SIZE_32
    };

    let mut info = TableInfo {
        descriptors: 0,
        total_length: 0,
    };
    let mut offset = 0;
    for element in elements {
        assert!(element.length > 0, "zero-length scatter/gather element");
        let mut address = element.address;
        let mut remaining = element.length;
        while remaining > 0 {
            let length = remaining.min(MAX_LENGTH_PER_DESCRIPTOR);
            remaining -= length;

            let entry = table
                .get_mut(offset..offset + entry_size)
                .ok_or(Error::InsufficientResources)?;
            let attributes = Adma2Descriptor::transfer(0, length).0 as u32;
            LittleEndian::write_u32(&mut entry[0..4], attributes);
            if address_64bit {
                LittleEndian::write_u64(&mut entry[4..12], address);
            } else {
                let address = u32::try_from(address).map_err(|_| Error::NotSupported)?;
                LittleEndian::write_u32(&mut entry[4..8], address);
            }

            offset += entry_size;
            address += u64::from(length);
            info.descriptors += 1;
            info.total_length += u64::from(length);
        }
    }

    // Set the END bit on the last descriptor
    let last = offset - entry_size;
    let mut desc = Adma2Descriptor(u64::from(LittleEndian::read_u32(&table[last..last + 4])));
    desc.set_end(true);
    LittleEndian::write_u32(&mut table[last..last + 4], desc.0 as u32);

    Ok(info)
}

/// Memory for DMA bounce transfers.
///
/// The data pages and the descriptor array must both be reachable by the
/// controller (on the BCM2711, below 1 GiB) and the descriptor array must be
/// physically contiguous. Addresses are untranslated: the slot adds the
/// controller's DMA translation offset itself.
pub trait BounceBuffer {
    /// The data pages, mapped for the CPU. A multiple of [`PAGE_SIZE`] long.
    fn data(&mut self) -> &mut [u8];

    /// Bus address of one data page.
    fn page_address(&self, page: usize) -> u32;

    /// The descriptor array, mapped for the CPU. At least one descriptor per
    /// data page.
    fn descriptors(&mut self) -> &mut [Adma2Descriptor];

    /// Bus address of the first descriptor.
    fn descriptor_address(&self) -> u32;
}

/// Something that can hand out DMA bounce buffers.
pub trait DmaAllocator {
    /// The buffer type handed out.
    type Buffer: BounceBuffer;

    /// Allocate a buffer of at least `length` bytes, or `None` if that isn't
    /// possible right now.
    fn allocate(&mut self, length: usize) -> Option<Self::Buffer>;
}

/// A bounce buffer that can never exist.
#[derive(Debug)]
pub enum NoBuffer {}

impl BounceBuffer for NoBuffer {
    fn data(&mut self) -> &mut [u8] {
        match *self {}
    }

    fn page_address(&self, _page: usize) -> u32 {
        match *self {}
    }

    fn descriptors(&mut self) -> &mut [Adma2Descriptor] {
        match *self {}
    }

    fn descriptor_address(&self) -> u32 {
        match *self {}
    }
}

/// An allocator for controllers that never bounce.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoBounceBuffer;

impl DmaAllocator for NoBounceBuffer {
    type Buffer = NoBuffer;

    fn allocate(&mut self, _length: usize) -> Option<NoBuffer> {
        None
    }
}

/// A bounce buffer with a descriptor for every page.
///
/// Exactly one descriptor carries End. Moving it is all it takes to set up
/// a transfer of a different length.
pub struct BouncePages<B> {
    buffer: B,
    capacity: usize,
    end_index: usize,
    translation: u32,
}

impl<B> BouncePages<B>
where
    B: BounceBuffer,
{
    /// Point one descriptor at each page of `buffer`, with End on the first.
    ///
    /// Fails with [`Error::InsufficientResources`] if the buffer has no whole
    /// page or too few descriptors, or if a translated address doesn't fit
    /// in 32 bits.
    pub fn new(mut buffer: B, translation: u32) -> Result<BouncePages<B>, Error> {
        let pages = buffer.data().len() / PAGE_SIZE;
        debug!("Setting up {} bounce pages", pages);
        if pages == 0 || buffer.descriptors().len() < pages {
            error!(
                "Bounce buffer has {} pages and {} descriptors",
                pages,
                buffer.descriptors().len()
            );
            return Err(Error::InsufficientResources);
        }
        buffer
            .descriptor_address()
            .checked_add(translation)
            .ok_or(Error::InsufficientResources)?;
        for page in 0..pages {
            let address = buffer
                .page_address(page)
                .checked_add(translation)
                .ok_or(Error::InsufficientResources)?;
            let desc = buffer
                .descriptors()
                .get_mut(page)
                .ok_or(Error::InsufficientResources)?;
            *desc = Adma2Descriptor::transfer(address, PAGE_SIZE as u32);
        }
        if let Some(first) = buffer.descriptors().first_mut() {
            first.set_end(true);
        }
        Ok(BouncePages {
            buffer,
            capacity: pages * PAGE_SIZE,
            end_index: 0,
            translation,
        })
    }

    /// The most bytes one transfer can move.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The index of the descriptor currently carrying End.
    pub fn end_index(&self) -> usize {
        self.end_index
    }

    /// Move the End marker so the table covers exactly `length` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero or larger than the capacity.
    pub fn prepare(&mut self, length: usize) {
        assert!(length > 0 && length <= self.capacity);
        let descriptors = self.buffer.descriptors();

        // Clean up the end descriptor from the previous transfer
        descriptors[self.end_index]
            .set_end(false)
            .set_byte_len(PAGE_SIZE as u32);

        self.end_index = (length - 1) / PAGE_SIZE;
        let tail = length - self.end_index * PAGE_SIZE;
        descriptors[self.end_index]
            .set_end(true)
            .set_byte_len(tail as u32);
    }

    /// The address to program into the ADMA System Address register.
    pub fn table_address(&self) -> u32 {
        self.buffer
            .descriptor_address()
            .wrapping_add(self.translation)
    }

    /// The bounce buffer's data pages.
    pub fn data(&mut self) -> &mut [u8] {
        self.buffer.data()
    }

    /// The descriptor array.
    pub fn descriptors(&mut self) -> &mut [Adma2Descriptor] {
        self.buffer.descriptors()
    }

    /// Give the buffer back.
    pub fn into_inner(self) -> B {
        self.buffer
    }
}

// ****************************************************************************
// Unit Tests
// ****************************************************************************


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
