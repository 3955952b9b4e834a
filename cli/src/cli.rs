use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[command(name = "bic", about = "Generate images with Bing Image Creator")]
pub struct Cli {
    /// Config file, defaults to bing_image_creator.ron in the local config dir
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Value of the `_U` cookie
    #[arg(short, long, env = "BIC_USER_TOKEN", hide_env_values = true)]
    pub user_token: Option<String>,

    /// Fixed IPv4 address or CIDR range sent as x-forwarded-for
    #[arg(long)]
    pub x_forwarded_for: Option<String>,

    /// Log page bodies at info level
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Print the URLs of the generated images
    List {
        prompt: String,
        /// Full resolution instead of thumbnails
        #[arg(long)]
        full_size: bool,
    },
    /// Print an iframe with the whole creation page rendered server side
    Ssr { prompt: String },
    /// Print an iframe with only the rendered result
    SsrLite { prompt: String },
    /// Print an iframe pointing at the creation page
    Csr { prompt: String },
    /// Look for an inline image request in a chat message
    Inline { message: String },
    /// Resolve a fixed address or CIDR range
    Ip { spec: String },
}
