use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "courier-server", about = "Courier realtime delivery gateway")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/courier.toml")]
    pub config: String,

    /// Address to listen on (overrides config)
    #[arg(long)]
    pub bind_address: Option<String>,
}
