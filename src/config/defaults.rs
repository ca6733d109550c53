//! Built-in configuration defaults
//!
//! The defaults describe a plain toolchain promotion: the usual target
//! and component matrix, the Linux target as the authoritative one, and
//! production-grade compression effort. Local runs override the knobs
//! that matter for iteration speed.

pub fn repository() -> String {
    "rust-lang/rust".to_string()
}

pub fn targets() -> Vec<String> {
    [
        "x86_64-unknown-linux-gnu",
        "x86_64-pc-windows-msvc",
        "x86_64-apple-darwin",
        "aarch64-unknown-linux-gnu",
        "aarch64-apple-darwin",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn required_target() -> String {
    "x86_64-unknown-linux-gnu".to_string()
}

pub fn components() -> Vec<String> {
    [
        "rustc",
        "rust-std",
        "cargo",
        "clippy",
        "rustfmt",
        "rust-docs",
        "rust-analyzer",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn required_components() -> Vec<String> {
    ["rustc", "rust-std", "cargo"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn authoritative_component() -> String {
    "rustc".to_string()
}

pub fn derived_version_components() -> Vec<String> {
    vec!["cargo".to_string()]
}

pub fn download_prefix() -> String {
    "rustc-builds".to_string()
}

pub fn upload_prefix() -> String {
    "dist".to_string()
}

pub fn storage_class() -> String {
    "INTELLIGENT_TIERING".to_string()
}

pub fn cache_control() -> Option<String> {
    Some("public".to_string())
}

pub fn gzip_level() -> u32 {
    9
}

pub fn xz_preset() -> u32 {
    9
}

pub fn work_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("work")
}

pub fn retry_attempts() -> u32 {
    3
}

pub fn retry_base_delay_ms() -> u64 {
    500
}

pub fn http_timeout_secs() -> u64 {
    30
}
