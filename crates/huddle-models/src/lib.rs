pub mod gateway;
pub mod id;
pub mod message;
pub mod room;
pub mod user;
