//! Error types and the fatal-condition macros.
//!
//! Usage errors and native resource exhaustion are fatal: they are logged and the current
//! thread panics. Only shader reflection and swapchain acquisition report ordinary errors.

use ash::vk;

/// Log an unrecoverable condition and abort the current operation.
macro_rules! rhi_fatal {
    ($($arg:tt)+) => {{
        ::lumen_core::log::error!($($arg)+);
        panic!($($arg)+)
    }};
}

/// Usage check. Always on with the `validation` feature, debug builds only otherwise.
macro_rules! rhi_assert {
    ($cond:expr, $($arg:tt)+) => {
        if cfg!(any(feature = "validation", debug_assertions)) && !($cond) {
            rhi_fatal!($($arg)+);
        }
    };
}

/// Unwrap a native result, treating failure as device loss / exhaustion.
macro_rules! vk_check {
    ($result:expr, $what:expr) => {
        match $result {
            Ok(value) => value,
            Err(err) => rhi_fatal!("{} failed: {:?}", $what, err),
        }
    };
}

/// Shader reflection errors.
#[derive(Debug)]
pub enum ShaderError {
    ReflectionFailed(String),
    Unsupported(String),
    VulkanError(vk::Result),
}

impl From<vk::Result> for ShaderError {
    fn from(e: vk::Result) -> Self {
        ShaderError::VulkanError(e)
    }
}

impl std::fmt::Display for ShaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderError::ReflectionFailed(msg) => write!(f, "Shader reflection failed: {}", msg),
            ShaderError::Unsupported(msg) => write!(f, "Unsupported shader: {}", msg),
            ShaderError::VulkanError(e) => write!(f, "Vulkan error: {:?}", e),
        }
    }
}

impl std::error::Error for ShaderError {}

/// Resource layout merge errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Two stages declare the same slot with a different type or array size.
    IncompatibleBinding {
        set: u32,
        binding: u32,
        existing: (vk::DescriptorType, u32),
        incoming: (vk::DescriptorType, u32),
    },
    /// An array binding runs into another declared binding or past the slot table.
    ArrayOverlap { set: u32, binding: u32, count: u32 },
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutError::IncompatibleBinding { set, binding, existing, incoming } => write!(
                f,
                "Incompatible binding at (set {}, binding {}): {:?}[{}] vs {:?}[{}]",
                set, binding, existing.0, existing.1, incoming.0, incoming.1
            ),
            LayoutError::ArrayOverlap { set, binding, count } => write!(
                f,
                "Array binding (set {}, binding {}) with {} elements overlaps another slot",
                set, binding, count
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Command list binding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// A slot the active pipeline layout declares has nothing bound.
    MissingResource { set: u32, binding: u32, index: u32 },
    /// A buffer bound to a slot lacks the usage that slot requires.
    MissingUsage { set: u32, binding: u32, required: vk::BufferUsageFlags, actual: vk::BufferUsageFlags },
    /// An image bound to a slot lacks the usage that slot requires.
    MissingImageUsage { set: u32, binding: u32, required: vk::ImageUsageFlags, actual: vk::ImageUsageFlags },
    /// The bound pipeline renders into different attachments than the active render pass.
    RenderPassMismatch { pipeline: String },
}

impl std::fmt::Display for BindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingError::MissingResource { set, binding, index } => write!(
                f,
                "Nothing bound at (set {}, binding {}, element {})",
                set, binding, index
            ),
            BindingError::MissingUsage { set, binding, required, actual } => write!(
                f,
                "Buffer bound at (set {}, binding {}) needs {:?} usage, has {:?}",
                set, binding, required, actual
            ),
            BindingError::MissingImageUsage { set, binding, required, actual } => write!(
                f,
                "Image bound at (set {}, binding {}) needs {:?} usage, has {:?}",
                set, binding, required, actual
            ),
            BindingError::RenderPassMismatch { pipeline } => write!(
                f,
                "Pipeline '{}' is incompatible with the active render pass attachments",
                pipeline
            ),
        }
    }
}

impl std::error::Error for BindingError {}
