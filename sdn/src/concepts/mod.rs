pub mod interface;
pub mod message;
pub mod packet;
pub mod route;
