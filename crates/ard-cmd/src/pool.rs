use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use api::{
    types::QueueFamily,
    winsys::{BufferCreateError, StreamCreateError},
    Winsys,
};
use ard_log::debug;
use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::{
    command_buffer::{CommandBuffer, CommandBufferLevel, CommandBufferParts, CommandBufferState},
    device::Device,
    packet::CmdStream,
    upload::UploadAllocator,
};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("unable to create instruction stream: {0}")]
    Stream(#[from] StreamCreateError),
    #[error("unable to create upload buffer: {0}")]
    UploadBuffer(#[from] BufferCreateError),
}

/// Hands out command buffers for one queue family and recycles their streams and upload memory.
///
/// Allocation and reset may happen from any thread. Freed command buffers are sent back over a
/// channel and only folded into the free list when the pool is next used.
pub struct CommandPool<W: Winsys> {
    device: Device<W>,
    queue_family: QueueFamily,
    free: Mutex<Vec<CommandBufferParts<W>>>,
    sender: Sender<CommandBufferParts<W>>,
    receiver: Receiver<CommandBufferParts<W>>,
    /// Bumped by every pool reset.
    epoch: Arc<AtomicU64>,
}

impl<W: Winsys> CommandPool<W> {
    pub fn new(device: Device<W>, queue_family: QueueFamily) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            device,
            queue_family,
            free: Mutex::new(Vec::default()),
            sender,
            receiver,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline(always)]
    pub fn queue_family(&self) -> QueueFamily {
        self.queue_family
    }

    /// Number of recycled command buffers waiting for reuse.
    pub fn cached(&self) -> usize {
        let mut free = self.free.lock().unwrap();
        free.extend(self.receiver.try_iter());
        free.len()
    }

    pub fn allocate(&self, level: CommandBufferLevel) -> Result<CommandBuffer<W>, PoolError> {
        let recycled = {
            let mut free = self.free.lock().unwrap();
            free.extend(self.receiver.try_iter());
            free.pop()
        };

        let parts = match recycled {
            Some(parts) => parts,
            None => {
                let winsys = self.device.winsys();
                let mut stream =
                    CmdStream::new(winsys.create_instruction_stream(self.queue_family.ring())?);
                let mut upload = UploadAllocator::new(self.device.clone())?;
                upload.reset(stream.raw_mut());
                debug!("created {level:?} command buffer for {:?}", self.queue_family);
                CommandBufferParts { stream, upload }
            }
        };

        Ok(CommandBuffer::new(
            self.device.clone(),
            level,
            self.queue_family,
            parts,
            self.epoch.clone(),
        ))
    }

    /// Returns a command buffer to the pool.
    ///
    /// # Panics
    /// - If the command buffer is pending.
    pub fn free(&self, mut command_buffer: CommandBuffer<W>) {
        assert_ne!(
            command_buffer.state(),
            CommandBufferState::Pending,
            "cannot free a pending command buffer"
        );
        command_buffer.reset();
        debug!("freed {:?} command buffer", command_buffer.level());
        // The receiver lives as long as the pool, so sending cannot fail.
        let _ = self.sender.send(command_buffer.into_parts());
    }

    /// Moves every command buffer allocated from this pool back to the initial state. Their
    /// contents are discarded on their next `begin`.
    pub fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let mut free = self.free.lock().unwrap();
        free.extend(self.receiver.try_iter());
        debug!(
            "reset command pool for {:?} (epoch {epoch}, {} cached)",
            self.queue_family,
            free.len()
        );
    }

    /// Releases the memory of every cached command buffer.
    pub fn trim(&self) {
        let mut free = self.free.lock().unwrap();
        free.extend(self.receiver.try_iter());
        let count = free.len();
        free.clear();
        debug!("trimmed {count} cached command buffers");
    }
}
