pub mod announcements;
pub mod api;
pub mod attendance;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod notify;
pub mod queries;
pub mod rooms;
pub mod users;
