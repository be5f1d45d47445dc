//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! The transfer engine owns the atomic money movement; the account service
//! validates ownership and currency around it.

pub mod account_service;
pub mod transfer_engine;
