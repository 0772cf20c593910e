use std::{
    io::{self, Error, ErrorKind},
    sync::Arc,
};

use crate::{flags, handler, registry::ChainRegistry, source::GlacierSource};

pub async fn execute(opts: flags::Options) -> io::Result<()> {
    println!("starting {} with {:?}", crate::APP_NAME, opts);

    // ref. <https://github.com/env-logger-rs/env_logger/issues/47>
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, opts.log_level),
    );

    let registry = ChainRegistry::load_or_init(opts.chains_file.as_deref())?;
    registry.validate()?;
    for c in registry.chains.iter() {
        log::info!("serving chain {} ({})", c.chain_id, c.name);
    }

    if opts.data_api_key.is_none() {
        log::warn!("no Data API key set; requests are subject to the public rate limit");
    }
    let source = GlacierSource::new(&opts.data_api_url, opts.data_api_key.clone())
        .map_err(|e| Error::new(ErrorKind::Other, format!("failed to create Data API client ({e})")))?;

    let routes = handler::routes(Arc::new(registry), Arc::new(source));

    log::info!("listening on {}", opts.http_host);
    warp::serve(routes).run(opts.http_host).await;

    Ok(())
}
