//! QuizChain backend: wallet-identified classroom polls backed by a shared key/value store.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
