use std::{fs, io, path, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "https://localhost:4433/counter")]
    url: http::Uri,

    /// The number of messages to send.
    #[arg(short, long, default_value_t = 10)]
    count: u64,

    /// The EWMA smoothing factor, in (0, 1].
    #[arg(short, long, default_value_t = webtransport_rtt::DEFAULT_ALPHA)]
    alpha: f64,

    /// Trust the certificates at this path, encoded as PEM.
    #[arg(long, conflicts_with = "insecure")]
    tls_cert: Option<path::PathBuf>,

    /// Skip certificate verification.
    #[arg(long)]
    insecure: bool,

    /// Give up if the session isn't established within this many seconds.
    #[arg(long)]
    connect_timeout: Option<f64>,

    /// Stop early if a reply takes longer than this many seconds.
    #[arg(long)]
    reply_timeout: Option<f64>,

    /// Close the session on a datagram that arrives before it was established.
    #[arg(long)]
    strict: bool,

    /// Write every round trip in milliseconds to this CSV file.
    #[arg(long)]
    csv: Option<path::PathBuf>,

    /// Write the summary to this JSON file.
    #[arg(long)]
    json: Option<path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable info logging.
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args = Args::parse();

    let config = webtransport_rtt::ClientConfig {
        count: args.count,
        alpha: args.alpha,
        establish_timeout: seconds(args.connect_timeout)?,
        reply_timeout: seconds(args.reply_timeout)?,
        strict: args.strict,
        ..Default::default()
    };

    // Fail before touching the network.
    config.validate()?;

    // Standard quinn setup.
    let tls_config = rustls::ClientConfig::builder().with_safe_defaults();

    let mut tls_config = match (&args.tls_cert, args.insecure) {
        (_, true) => tls_config
            .with_custom_certificate_verifier(SkipServerVerification::new()) // WARNING: Don't use this in production
            .with_no_client_auth(),
        (Some(path), false) => tls_config.with_root_certificates(roots(path)?).with_no_client_auth(),
        (None, false) => anyhow::bail!("either --tls-cert or --insecure is required"),
    };

    tls_config.alpn_protocols = vec![webtransport_rtt::ALPN.to_vec()]; // this one is important

    let config_quinn = quinn::ClientConfig::new(Arc::new(tls_config));

    let addr = "[::]:0".parse()?;
    let mut client = quinn::Endpoint::client(addr)?;
    client.set_default_client_config(config_quinn);

    log::info!("connecting to {}", args.url);

    let conn = webtransport_rtt::dial(&client, &args.url).await?;
    let conn = conn.await.context("failed to establish QUIC connection")?;

    let report = webtransport_rtt::run(conn, &args.url, &config).await?;
    println!("{}", report);

    if let Some(path) = &args.csv {
        let file = fs::File::create(path).context("failed to create csv file")?;
        webtransport_rtt::write_samples(io::BufWriter::new(file), &report.samples)?;
        log::info!("wrote {} samples to {}", report.samples.len(), path.display());
    }

    if let Some(path) = &args.json {
        let file = fs::File::create(path).context("failed to create json file")?;
        webtransport_rtt::write_summary(io::BufWriter::new(file), &report.summary)?;
        log::info!("wrote summary to {}", path.display());
    }

    client.wait_idle().await;

    Ok(())
}

fn seconds(value: Option<f64>) -> anyhow::Result<Option<Duration>> {
    value
        .map(|secs| Duration::try_from_secs_f64(secs).context("invalid timeout"))
        .transpose()
}

fn roots(path: &path::Path) -> anyhow::Result<rustls::RootCertStore> {
    let chain = fs::File::open(path).context("failed to open cert file")?;
    let mut chain = io::BufReader::new(chain);

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut chain)? {
        roots.add(&rustls::Certificate(cert))?;
    }

    anyhow::ensure!(!roots.is_empty(), "could not find certificate");

    Ok(roots)
}

// Implementation of `ServerCertVerifier` that verifies everything as trustworthy.
// WARNING: Don't use this in production.
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
