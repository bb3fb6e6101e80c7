pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod menu;
pub mod order;
pub mod pcm;
pub mod playback;
pub mod session;
pub mod transcript;

pub use error::{Result, SessionError};
