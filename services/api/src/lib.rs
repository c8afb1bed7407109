pub mod adapters;
pub mod config;
pub mod error;
pub mod identity;
pub mod realtime;
pub mod services;
pub mod web;
