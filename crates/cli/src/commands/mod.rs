// CLI subcommands

pub mod chat;
pub mod resume;
pub mod transcript;
