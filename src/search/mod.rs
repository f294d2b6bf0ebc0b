pub mod client;
pub mod web;
