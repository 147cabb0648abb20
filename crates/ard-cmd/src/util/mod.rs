pub mod id_gen;
#[cfg(feature = "vulkan")]
pub mod vk;
