//! Chatstore - versioned, indexed local storage for a chat client's agents and conversations

pub mod cli;
pub mod config;
pub mod db;
