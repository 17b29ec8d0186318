use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikisave_core::{ArchiveConfig, DEFAULT_ARCHIVE_FORMAT, Wiki, WikiConfig};

mod server;

/// Wikisave - serve a single-file wiki and accept saves over PUT
#[derive(Parser, Debug)]
#[command(name = "wikisave")]
#[command(about = "Serve one HTML document and accept conditional saves", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "WIKISAVE_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "WIKISAVE_PORT", default_value_t = 8080)]
    port: u16,

    /// Document to serve and save
    #[arg(long, env = "WIKISAVE_WIKI", default_value = "index.html")]
    wiki: PathBuf,

    /// Keep a copy of the document before each save
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    archive: bool,

    /// Directory holding archived copies
    #[arg(long, default_value = "old")]
    archive_dir: PathBuf,

    /// strftime format for archive entry names
    #[arg(long, default_value = DEFAULT_ARCHIVE_FORMAT)]
    archive_format: String,

    /// Serve the archive read-only over HTTP
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    serve_archive: bool,

    /// URL prefix the archive is served under
    #[arg(long, default_value = "/old/")]
    archive_path: String,

    /// Keep gzip and zstd copies of the document for clients that accept them
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    compress: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn wiki_config(&self) -> WikiConfig {
        let mut config = WikiConfig::new(&self.wiki).with_compress(self.compress);
        if self.archive {
            config = config.with_archive(
                ArchiveConfig::new(&self.archive_dir).with_format(&self.archive_format),
            );
        }
        config
    }

    /// URL prefix for archive browsing, if it is enabled.
    fn archive_prefix(&self) -> Result<Option<String>> {
        if !(self.archive && self.serve_archive) {
            return Ok(None);
        }

        let prefix = server::normalize_prefix(&self.archive_path);
        if prefix == "/" {
            bail!(
                "--archive-path {:?} would hide the document; choose a sub-path such as /old/",
                self.archive_path
            );
        }
        Ok(Some(prefix))
    }

    fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let archive_prefix = cli.archive_prefix()?;
    let wiki = tokio::task::spawn_blocking({
        let config = cli.wiki_config();
        move || Wiki::open(config)
    })
    .await
    .context("Startup task failed")?
    .with_context(|| format!("Failed to open {}", cli.wiki.display()))?;

    let addr = cli.addr();
    info!("serving {} at http://{}/", cli.wiki.display(), addr);
    if let Some(prefix) = &archive_prefix {
        info!(
            "serving archive {} at http://{}{}",
            cli.archive_dir.display(),
            addr,
            prefix
        );
    }

    let router = server::router(Arc::new(wiki), archive_prefix.as_deref());
    server::serve(addr, router)
        .await
        .with_context(|| format!("Failed to serve on {}", addr))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("wikisave").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--wiki", "index.html"]);
        assert_eq!(cli.addr(), "127.0.0.1:8080".parse().unwrap());

        let config = cli.wiki_config();
        assert_eq!(config.document, PathBuf::from("index.html"));
        assert!(config.compress);
        let archive = config.archive.unwrap();
        assert_eq!(archive.dir, PathBuf::from("old"));
        assert_eq!(archive.format, DEFAULT_ARCHIVE_FORMAT);

        assert_eq!(cli.archive_prefix().unwrap().as_deref(), Some("/old/"));
    }

    #[test]
    fn test_flags() {
        let cli = parse(&[
            "--bind",
            "0.0.0.0",
            "--port",
            "9000",
            "--wiki",
            "notes/wiki.html",
            "--archive-dir",
            "history",
            "--archive-path",
            "history",
            "--compress",
            "false",
        ]);
        assert_eq!(cli.addr(), "0.0.0.0:9000".parse().unwrap());

        let config = cli.wiki_config();
        assert!(!config.compress);
        assert_eq!(config.archive.unwrap().dir, PathBuf::from("history"));
        assert_eq!(cli.archive_prefix().unwrap().as_deref(), Some("/history/"));
    }

    #[test]
    fn test_archive_disabled() {
        let cli = parse(&["--archive", "false"]);
        assert!(cli.wiki_config().archive.is_none());
        assert_eq!(cli.archive_prefix().unwrap(), None);

        let cli = parse(&["--serve-archive", "false"]);
        assert!(cli.wiki_config().archive.is_some());
        assert_eq!(cli.archive_prefix().unwrap(), None);
    }

    #[test]
    fn test_root_archive_path_rejected() {
        let cli = parse(&["--archive-path", "/"]);
        assert!(cli.archive_prefix().is_err());
    }

    #[test]
    fn test_bad_bind_address() {
        let result = Cli::try_parse_from(["wikisave", "--bind", "localhost"]);
        assert!(result.is_err());
    }
}
