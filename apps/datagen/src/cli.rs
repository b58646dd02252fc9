use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Synthetic failed/processed message generator")]
pub struct Cli {
    /// Log messages instead of publishing them
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Emit the run summary as JSON
    #[arg(long, global = true)]
    pub json: bool,
    /// NATS server (falls back to NATS_URL)
    #[arg(long, global = true)]
    pub nats_url: Option<String>,
    /// Subject prefix; messages go to `{prefix}.{destination}`
    #[arg(long, global = true)]
    pub subject_prefix: Option<String>,
    /// Maximum in-flight dispatches (falls back to DATAGEN_CAPACITY)
    #[arg(long, global = true)]
    pub capacity: Option<usize>,
    /// Filler bytes in the message body
    #[arg(long, global = true)]
    pub payload_padding: Option<usize>,
    /// Progress cadence in messages (error) or batches (audit)
    #[arg(long, global = true)]
    pub progress_every: Option<u64>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a fixed number of failed messages
    Error {
        #[arg(long, default_value_t = 300_000)]
        count: u64,
        /// Exception kinds to cycle through, comma separated
        #[arg(long, value_delimiter = ',', default_value = "invalid-operation,argument,timeout")]
        kinds: Vec<String>,
        /// Failed queue reported in the headers
        #[arg(long)]
        failed_queue: Option<String>,
    },
    /// Send batches of processed messages until interrupted
    Audit {
        #[arg(long, default_value_t = 200)]
        batch_size: usize,
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
    },
}
