use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Huddle real-time chat server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/huddle.toml")]
    pub config: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long)]
    pub log_json: bool,
}
