//! Social-payment intake & claim-settlement engine.
//!
//! A background scanner polls a message feed for `send @user $amount`
//! commands, records them as pending payments with replay and duplicate
//! suppression, and a claim API settles each record through a custodial
//! vault exactly once after a fresh on-chain authorization check.

pub mod api;
pub mod chain;
pub mod claim;
pub mod command;
pub mod config;
pub mod db;
pub mod errors;
pub mod feed;
pub mod filter;
pub mod models;
pub mod scanner;
pub mod units;
