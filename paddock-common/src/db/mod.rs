//! Shared database access for paddock services

pub mod init;
