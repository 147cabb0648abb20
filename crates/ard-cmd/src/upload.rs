//! Linear scratch memory for per-draw data.
//!
//! Allocations bump an offset through the current backing buffer. When a request does not fit,
//! a larger buffer replaces the current one and the old one is retired. Retired buffers stay
//! referenced by the instruction stream (and mapped) until the owning command buffer is reset, so
//! addresses already handed out remain valid for as long as the recorded commands can read them.

use std::ptr::NonNull;

use api::{
    types::BufferUsage,
    winsys::{BufferCreateError, BufferCreateInfo, BufferMapError},
    Winsys,
};
use ard_log::debug;

use crate::{command_buffer::RecordError, device::Device};

pub struct UploadAllocator<W: Winsys> {
    device: Device<W>,
    /// Never empty. The last buffer is the current one, every other buffer is retired.
    buffers: Vec<UploadBuffer<W>>,
    /// Next free byte of the current buffer.
    offset: u64,
    min_size: u64,
    alignment: u64,
}

struct UploadBuffer<W: Winsys> {
    buffer: W::Buffer,
    ptr: NonNull<u8>,
    size: u64,
    address: u64,
}

// SAFETY: The mapping is only accessed through the owning allocator, which is used by one thread
// at a time.
unsafe impl<W: Winsys> Send for UploadBuffer<W> {}

/// A region of upload memory.
pub struct UploadAllocation<'a> {
    /// GPU address of the first byte.
    pub address: u64,
    /// Offset of the region within its backing buffer.
    pub offset: u64,
    /// Host view of the region.
    pub data: &'a mut [u8],
}

impl From<BufferCreateError> for RecordError {
    fn from(err: BufferCreateError) -> Self {
        match err {
            BufferCreateError::OutOfDeviceMemory => RecordError::OutOfDeviceMemory,
            BufferCreateError::OutOfHostMemory => RecordError::OutOfHostMemory,
        }
    }
}

impl<W: Winsys> UploadAllocator<W> {
    /// Creates an allocator with an initial backing buffer of the configured minimum size.
    pub fn new(device: Device<W>) -> Result<Self, BufferCreateError> {
        let min_size = device.settings().upload_min_size.max(1);
        let alignment = device.settings().upload_alignment.max(1);
        assert!(
            alignment.is_power_of_two(),
            "upload alignment {alignment} is not a power of two"
        );

        let current = UploadBuffer::new(&device, min_size)?;

        Ok(Self {
            device,
            buffers: vec![current],
            offset: 0,
            min_size,
            alignment,
        })
    }

    #[inline(always)]
    fn current(&self) -> &UploadBuffer<W> {
        // `buffers` is never empty.
        &self.buffers[self.buffers.len() - 1]
    }

    /// Size of the current backing buffer.
    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.current().size
    }

    /// Bytes left in the current backing buffer.
    #[inline(always)]
    pub fn remaining(&self) -> u64 {
        self.current().size - self.offset
    }

    #[inline(always)]
    pub fn retired_buffers(&self) -> usize {
        self.buffers.len() - 1
    }

    /// GPU address of the current backing buffer.
    #[inline(always)]
    pub fn base_address(&self) -> u64 {
        self.current().address
    }

    /// Allocates `size` bytes aligned to at least `alignment`.
    ///
    /// # Panics
    /// - If `alignment` is not a power of two.
    pub fn alloc(
        &mut self,
        stream: &mut W::InstructionStream,
        size: u64,
        alignment: u64,
    ) -> Result<UploadAllocation<'_>, RecordError> {
        let alignment = alignment.max(self.alignment);
        assert!(
            alignment.is_power_of_two(),
            "upload alignment {alignment} is not a power of two"
        );

        // Sizes that do not fit the address space can never be satisfied.
        let fits = self
            .offset
            .checked_next_multiple_of(alignment)
            .and_then(|offset| Some((offset, offset.checked_add(size)?)));
        let (mut offset, mut end) = fits.ok_or(RecordError::OutOfHostMemory)?;
        if end > self.current().size {
            self.grow(stream, size)?;
            (offset, end) = (0, size);
        }
        self.offset = end;

        let current = self.current();
        // SAFETY: `offset + size` is within the mapped buffer and the region is handed out once
        // per reset, so no other live slice aliases it.
        let data = unsafe {
            std::slice::from_raw_parts_mut(current.ptr.as_ptr().add(offset as usize), size as usize)
        };

        Ok(UploadAllocation {
            address: current.address + offset,
            offset,
            data,
        })
    }

    /// Copies `data` into upload memory and returns its GPU address.
    pub fn upload(
        &mut self,
        stream: &mut W::InstructionStream,
        data: &[u8],
        alignment: u64,
    ) -> Result<u64, RecordError> {
        let allocation = self.alloc(stream, data.len() as u64, alignment)?;
        allocation.data.copy_from_slice(data);
        Ok(allocation.address)
    }

    fn grow(&mut self, stream: &mut W::InstructionStream, needed: u64) -> Result<(), RecordError> {
        let size = needed
            .max(self.current().size.saturating_mul(2))
            .max(self.min_size);
        let buffer = UploadBuffer::new(&self.device, size)?;
        self.device
            .winsys()
            .add_buffer_reference(stream, &buffer.buffer);

        debug!(
            "upload buffer grown from {} to {size} bytes ({} retired)",
            self.current().size,
            self.buffers.len()
        );

        self.buffers.push(buffer);
        Ok(())
    }

    /// Releases retired buffers and rewinds the current one. The current buffer is referenced by
    /// `stream` again, since resetting the stream drops its references.
    pub fn reset(&mut self, stream: &mut W::InstructionStream) {
        let winsys = self.device.winsys();
        let retired = self.buffers.len() - 1;
        for buffer in self.buffers.drain(..retired) {
            // SAFETY: The owning command buffer is being reset, so no recorded command that
            // reads the buffer can still execute.
            unsafe {
                winsys.destroy_buffer(buffer.buffer);
            }
        }
        self.offset = 0;
        winsys.add_buffer_reference(stream, &self.current().buffer);
    }

    /// Registers every live backing buffer with another stream. Used when a secondary command
    /// buffer is executed from a primary.
    pub fn add_references(&self, stream: &mut W::InstructionStream) {
        let winsys = self.device.winsys();
        for buffer in &self.buffers {
            winsys.add_buffer_reference(stream, &buffer.buffer);
        }
    }
}

impl<W: Winsys> UploadBuffer<W> {
    fn new(device: &Device<W>, size: u64) -> Result<Self, BufferCreateError> {
        let winsys = device.winsys();
        let mut buffer = winsys.create_buffer(BufferCreateInfo {
            size,
            usage: BufferUsage::UNIFORM_BUFFER
                | BufferUsage::STORAGE_BUFFER
                | BufferUsage::VERTEX_BUFFER
                | BufferUsage::INDEX_BUFFER
                | BufferUsage::INDIRECT_BUFFER,
            debug_name: Some(String::from("upload_buffer")),
        })?;

        // SAFETY: The buffer was just created and is not in use.
        let (ptr, size) = match unsafe { winsys.map_buffer(&mut buffer) } {
            Ok(mapping) => mapping,
            Err(err) => {
                unsafe {
                    winsys.destroy_buffer(buffer);
                }
                return Err(match err {
                    BufferMapError::NotHostVisible | BufferMapError::OutOfHostMemory => {
                        BufferCreateError::OutOfHostMemory
                    }
                });
            }
        };
        let address = winsys.buffer_address(&buffer);

        Ok(Self {
            buffer,
            ptr,
            size,
            address,
        })
    }
}

impl<W: Winsys> Drop for UploadAllocator<W> {
    fn drop(&mut self) {
        let winsys = self.device.winsys();
        for buffer in self.buffers.drain(..) {
            unsafe {
                winsys.destroy_buffer(buffer.buffer);
            }
        }
    }
}
