use ash::vk;

/// Logical queue a command list is recorded for and submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    AsyncCompute,
    AsyncTransfer,
}

impl QueueType {
    pub const COUNT: usize = 3;
    pub const ALL: [QueueType; Self::COUNT] =
        [QueueType::Graphics, QueueType::AsyncCompute, QueueType::AsyncTransfer];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::AsyncCompute => 1,
            QueueType::AsyncTransfer => 2,
        }
    }

    /// Pipeline stages a wait on this queue's work should block by default.
    pub fn default_wait_stage(self) -> vk::PipelineStageFlags2 {
        match self {
            QueueType::Graphics => vk::PipelineStageFlags2::ALL_COMMANDS,
            QueueType::AsyncCompute => vk::PipelineStageFlags2::COMPUTE_SHADER,
            QueueType::AsyncTransfer => vk::PipelineStageFlags2::TRANSFER,
        }
    }
}

/// A queue wrapper that carries its family index.
#[derive(Clone, Copy, Debug)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub fn new(handle: vk::Queue, family_index: u32) -> Self {
        Self { handle, family_index }
    }

    pub fn handle(&self) -> vk::Queue { self.handle }

    pub fn family_index(&self) -> u32 { self.family_index }
}
