use clap::Parser;
use log::info;
use server::network::Gateway;

/// Parses command-line arguments, builds the gateway and runs it until the
/// listener fails or the process receives Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Simulation tick rate (updates per second)
        #[clap(short, long, default_value_t = shared::DEFAULT_TICK_RATE)]
        tick_rate: f32,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let gateway = Gateway::new(args.tick_rate);

    // Handle shutdown gracefully
    tokio::select! {
        result = gateway.run(&address) => {
            if let Err(e) = result {
                eprintln!("Server exited with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
