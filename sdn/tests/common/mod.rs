#![allow(dead_code)]

pub mod virtual_network;
