pub mod codec;
pub mod frame;
pub mod handler;
pub mod peer;
