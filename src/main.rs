use std::sync::Arc;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use softpoints::config::Settings;
use softpoints::currency::create_currency_converter;
use softpoints::ledger::{LedgerStore, MemoryLedger};
use softpoints::routes::AppData;

#[cfg(feature = "postgres")]
fn open_ledger(settings: &Settings) -> anyhow::Result<Arc<dyn LedgerStore>> {
    use softpoints::database::connect::{create_db_connection_pool, run_migrations};
    use softpoints::database::PgLedger;

    match settings.database_url.as_deref() {
        Some(url) => {
            let pool = create_db_connection_pool(url)?;
            run_migrations(&pool)?;
            info!("using postgres ledger");
            Ok(Arc::new(PgLedger::new(pool)))
        }
        None => {
            warn!("DATABASE_URL is not set, balances will not survive a restart");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
fn open_ledger(settings: &Settings) -> anyhow::Result<Arc<dyn LedgerStore>> {
    if settings.database_url.is_some() {
        warn!("DATABASE_URL is ignored, built without the postgres feature");
    }
    warn!("using in-memory ledger, balances will not survive a restart");
    Ok(Arc::new(MemoryLedger::new()))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("softpoints".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(|metadata| *metadata.level() <= tracing::Level::INFO))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::from_env()?;
    let ledger = open_ledger(&settings)?;
    let currency_converter = create_currency_converter()?;
    let app_data = AppData::new(&settings, ledger, currency_converter);

    info!(bind_address = %settings.bind_address, "starting server");
    let server = actix_web::HttpServer::new(move || {
        let app_data = app_data.clone();

        actix_web::App::new()
            .wrap(TracingLogger::default())
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .configure(|cfg| app_data.configure(cfg))
    });

    server.bind(&settings.bind_address)?.run().await?;
    Ok(())
}
