use clap::{Parser, Subcommand};

/// meli-sync: keeps Mercado Libre listings in step with the product catalogue
#[derive(Parser)]
#[command(name = "meli-sync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to MELI_SYNC_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Push one product's current state to its listing
    Sync {
        #[arg(long)]
        product_id: i64,
    },

    /// Inspect or refresh the stored marketplace token
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// OAuth authorization helpers
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Browse the sync log
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Show expiry of the stored token (never prints the secret)
    Show,
    /// Refresh now, regardless of expiry
    Refresh,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Print the URL the seller opens to grant access
    Url,
    /// Exchange an authorization code for a token pair
    Exchange {
        #[arg(long)]
        code: String,
    },
}

#[derive(Subcommand)]
pub enum LogCommands {
    /// List recent entries, newest first
    List {
        #[arg(long)]
        product_id: Option<i64>,
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["meli-sync"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_sync_and_log_list() {
        let cli = Cli::try_parse_from(["meli-sync", "sync", "--product-id", "42"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Sync { product_id: 42 })));

        let cli = Cli::try_parse_from(["meli-sync", "log", "list", "--product-id", "7"]).unwrap();
        match cli.command {
            Some(Commands::Log {
                command: LogCommands::List { product_id, limit },
            }) => {
                assert_eq!(product_id, Some(7));
                assert_eq!(limit, 20);
            }
            _ => panic!("expected log list"),
        }
    }

    #[test]
    fn exchange_requires_code() {
        assert!(Cli::try_parse_from(["meli-sync", "auth", "exchange"]).is_err());
    }
}
