pub mod barrier;
pub mod command_list;
pub mod recording;
pub mod vk_command_list;
