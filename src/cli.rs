use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "statusline-tail",
    version,
    about = "Keep Claude session counters in sync with the transcript for statusline scripts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the persisted cache record for a session.
    Inspect {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },
    /// Check that configuration and cache directory are usable.
    Doctor,
}
