//! CI platform implementations

pub mod github;

pub use github::GitHubPlatform;
