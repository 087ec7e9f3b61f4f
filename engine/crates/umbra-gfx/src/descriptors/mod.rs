pub mod heap;
pub mod view;
