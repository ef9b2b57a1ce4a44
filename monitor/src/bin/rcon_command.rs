use clap::Parser;
use log::{debug, info};
use rcon::{authenticate, read_packet, Packet, RconError, FIRST_COMMAND_ID, SERVERDATA_RESPONSE_VALUE};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Runs a single RCON command and prints the reply.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RCON host
    #[arg(short = 'H', long, env = "RCON_HOST", default_value = "localhost")]
    host: String,

    /// RCON port
    #[arg(short, long, env = "RCON_PORT", default_value = "27015")]
    port: u16,

    /// RCON password
    #[arg(long, env = "RCON_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Seconds to wait for the reply
    #[arg(short, long, default_value = "10")]
    timeout: u64,

    /// Command to run, e.g. /players
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let command = args.command.join(" ");
    let wait = Duration::from_secs(args.timeout);

    info!("Connecting to {}", address);
    let mut stream = timeout(wait, TcpStream::connect(&address))
        .await
        .map_err(|_| RconError::ConnectTimeout(address.clone()))??;
    authenticate(&mut stream, &args.password).await?;
    info!("Authenticated");

    stream
        .write_all(&Packet::command(FIRST_COMMAND_ID, &command).encode()?)
        .await?;

    // Skip anything the server pushes before our reply.
    let reply = timeout(wait, async {
        loop {
            match read_packet(&mut stream).await? {
                Some(packet)
                    if packet.kind == SERVERDATA_RESPONSE_VALUE && packet.id == FIRST_COMMAND_ID =>
                {
                    return Ok(Some(packet.body));
                }
                Some(packet) => debug!("Skipping packet: {:?}", packet),
                None => return Ok::<_, RconError>(None),
            }
        }
    })
    .await
    .map_err(|_| format!("no reply to {:?} within {:?}", command, wait))??;

    match reply {
        Some(body) => println!("{}", body.trim_end()),
        None => return Err("server closed the connection before replying".into()),
    }

    stream.shutdown().await?;
    Ok(())
}
