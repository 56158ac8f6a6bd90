//! Garment generation and virtual try-on pipeline
//!
//! This library provides the customization backend for the Imagine storefront:
//! it turns a prompt and a template garment into a generated design through an
//! external image editing service, hands that design to a try-on engine, and
//! keeps a durable job record in step with both services.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
