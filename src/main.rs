//! Courier - fetch one upstream resource and deliver part of the response

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};

use courier::{
    config::Args,
    job::{
        Delivery, DownstreamSink, HttpUpstream, JsonLinesEncoder, PlaceholderReplacer, RequestJob,
        WriterSink,
    },
    logging,
    pipe::{self, keys, ContextStore, ContextValue},
    signing::{AuthParams, Signer},
    worker::WorkerPool,
};

/// Exit code for failures reported by the upstream exchange itself
const EXIT_JOB_FAILED: i32 = 1;
/// Exit code for configuration and local failures
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json)?;

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(EXIT_USAGE);
    }

    info!(
        "Courier {} ({} built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_SHORT"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Target: {}", args.url);
    if let Some(base_url) = &args.base_url {
        info!("Upstream: {}", base_url);
    }
    info!("Route: {} -> {}", args.out_key, args.out_name);

    let ctx = ContextStore::new();

    match args.credentials() {
        Some((key, secret)) => {
            let signer = Signer::new(key, secret)?;
            ctx.insert(keys::AUTH, ContextValue::Auth(AuthParams::Signer(signer)));
        }
        None if args.cookies.is_empty() => {
            warn!("No APP_KEY/APP_SECRET configured, requests go out unsigned")
        }
        None => {}
    }

    if let Some(node) = args.node_json.clone() {
        let (writer, node_pipe) = pipe::channel();
        ctx.insert(keys::NODE, ContextValue::pipe(node_pipe));
        tokio::spawn(async move {
            if let Err(e) = writer.write(node.as_bytes()).await {
                warn!("Could not feed resolved node: {}", e);
            }
            writer.close();
        });
    }

    let sink: Box<dyn DownstreamSink> = match &args.output {
        Some(path) => {
            debug!("Writing body to {}", path.display());
            Box::new(WriterSink::new(tokio::fs::File::create(path).await?))
        }
        None => Box::new(WriterSink::new(tokio::io::stdout())),
    };

    let delivery = Delivery {
        sink,
        encoder: Box::new(JsonLinesEncoder::new(std::io::stdout())),
        close: Box::new(|| {
            debug!("Downstream closed");
            Ok(())
        }),
        cancel: Box::new(|| warn!("Request job cancelled")),
    };

    let upstream = Arc::new(HttpUpstream::new(&args.client_config())?);
    let mut replacer = PlaceholderReplacer::new();

    let job = match RequestJob::build(&ctx, args.job_spec()?, &mut replacer, delivery, upstream)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            error!("Could not build request: {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };
    let job_id = job.id();

    let pool = WorkerPool::new(args.pool_config())?;
    match pool.execute(Box::new(job)).await {
        Ok(()) => {
            info!("Job {} delivered", job_id);
            Ok(())
        }
        Err(e) if e.is_terminal() => {
            error!("Job {} failed: {}", job_id, e);
            std::process::exit(EXIT_JOB_FAILED);
        }
        Err(e) => {
            error!("Job {} aborted: {}", job_id, e);
            std::process::exit(EXIT_USAGE);
        }
    }
}
