pub mod config;
pub mod playback;
pub mod reader;
pub mod session;
pub mod timestep;
pub mod tracks;
pub mod visibility;

/// Track file extensions we can read
pub const SUPPORTED_EXTENSIONS: &[&str] = &["npy", "json"];

/// Application name for XDG paths
pub const APP_NAME: &str = "frappe";
