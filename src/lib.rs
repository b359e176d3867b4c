//! Subscription downloader for the MediathekView broadcast archive.

pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;
