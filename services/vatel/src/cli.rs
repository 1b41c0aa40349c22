use clap::{Parser, Subcommand, ValueEnum};
use vatel_session::MalformedFramePolicy;

#[derive(Parser, Debug)]
#[command(name = "vatel", version, about = "Talk to a Vatel voice agent from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the agents visible to the API key
    Agents {
        /// Print the raw agent records as JSON
        #[arg(long)]
        json: bool,
    },
    /// List audio input and output devices
    Devices,
    /// Start a voice session with the default microphone and speaker
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Agent to talk to; falls back to VATEL_AGENT_ID
    #[arg(long)]
    pub agent_id: Option<String>,

    /// What to do with frames from the agent that fail to decode
    #[arg(long, value_enum, default_value_t = OnMalformed::Skip)]
    pub on_malformed: OnMalformed,

    /// Drop queued agent audio when the agent reports an interruption
    #[arg(long)]
    pub flush_on_interruption: bool,

    /// How long playback may keep draining after the session ends
    #[arg(long, default_value_t = 400)]
    pub drain_grace_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnMalformed {
    Skip,
    Terminate,
}

impl From<OnMalformed> for MalformedFramePolicy {
    fn from(value: OnMalformed) -> Self {
        match value {
            OnMalformed::Skip => MalformedFramePolicy::Skip,
            OnMalformed::Terminate => MalformedFramePolicy::Terminate,
        }
    }
}
