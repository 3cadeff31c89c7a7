pub mod agents;
pub mod config;
pub mod diff;
pub mod github;
pub mod http;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod style;
pub mod text;
pub mod tools;
