pub mod resource;
pub mod state;
pub mod texture_library;
