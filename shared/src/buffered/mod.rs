pub mod group_buffer;
pub mod visibility;
