use anyhow::{Result, bail};
use clap::Parser;
use minisocks::{AuthConfig, Credential, Socks5Server};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Accepted user as USERNAME:PASSWORD, may be repeated
    #[arg(long = "user", value_name = "USERNAME:PASSWORD")]
    users: Vec<Credential>,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// auth_config builds the authentication policy from the command line
    fn auth_config(&self) -> Result<AuthConfig> {
        let mut users = self.users.clone();

        match (&self.username, &self.password) {
            (Some(u), Some(p)) => users.push(Credential::new(u, p)),
            (None, None) => (),
            _ => bail!("[ERR] must provide both username and password (or neither)"),
        }

        if users.is_empty() {
            Ok(AuthConfig::no_auth())
        } else {
            Ok(AuthConfig::user_pass(users))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let auth = args.auth_config()?;
    if !auth.credentials().is_empty() {
        info!("Authentication enabled for {} user(s)", auth.credentials().len());
    }

    // Instantiate server
    let mut server = Socks5Server::new(args.listen).with_auth(auth);

    // Run it
    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await
}
