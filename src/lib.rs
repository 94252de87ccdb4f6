//! coursedesk - an online course catalogue
//!
//! Subjects group courses; courses hold ordered modules; modules hold ordered
//! contents, each pointing at one text, file, image or video item. Subjects
//! and courses get unique slugs generated from their titles.

pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
