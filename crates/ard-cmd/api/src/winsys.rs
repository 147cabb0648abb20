use std::ptr::NonNull;

use thiserror::Error;

use crate::types::{BufferUsage, RingType};

pub struct BufferCreateInfo {
    /// The size in bytes of the buffer to create.
    pub size: u64,
    /// Describes the supported usage types of this buffer.
    pub usage: BufferUsage,
    /// The winsys *should* use the provided debug name for easy identification.
    pub debug_name: Option<String>,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum BufferCreateError {
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("out of host memory")]
    OutOfHostMemory,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum BufferMapError {
    #[error("buffer is not host visible")]
    NotHostVisible,
    #[error("out of host memory")]
    OutOfHostMemory,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum StreamCreateError {
    #[error("ring type `{0:?}` is not supported")]
    UnsupportedRing(RingType),
    #[error("out of host memory")]
    OutOfHostMemory,
}

/// The kernel/submission layer the recording engine sits on top of.
///
/// The engine allocates GPU-visible buffers through the winsys and tells it which buffers an
/// instruction stream references, but never allocates GPU memory or submits work itself.
#[allow(clippy::missing_safety_doc)]
pub trait Winsys: Send + Sync + Sized + 'static {
    type Buffer: Send;
    type InstructionStream: Send;

    fn create_buffer(&self, create_info: BufferCreateInfo)
        -> Result<Self::Buffer, BufferCreateError>;

    /// The buffer must not be referenced by an instruction stream that may still execute.
    unsafe fn destroy_buffer(&self, buffer: Self::Buffer);

    /// Maps the buffer into host memory. Returns the pointer to the start of the buffer and the
    /// mapped size. The pointer stays valid until the buffer is destroyed.
    unsafe fn map_buffer(&self, buffer: &mut Self::Buffer)
        -> Result<(NonNull<u8>, u64), BufferMapError>;

    /// GPU virtual address of the first byte of the buffer.
    fn buffer_address(&self, buffer: &Self::Buffer) -> u64;

    fn create_instruction_stream(
        &self,
        ring: RingType,
    ) -> Result<Self::InstructionStream, StreamCreateError>;

    /// Registers `buffer` as used by `stream`. Referenced buffers stay resident for as long as
    /// the stream may execute.
    fn add_buffer_reference(&self, stream: &mut Self::InstructionStream, buffer: &Self::Buffer);

    /// Drops every buffer reference held by `stream`.
    fn reset_instruction_stream(&self, stream: &mut Self::InstructionStream);
}
