//! MySQL Logical Dump Tool
//!
//! Exports MySQL databases to SQL or CSV files with concurrent writers and
//! a configurable consistency guarantee.
//!
//! # Usage
//!
//! ```bash
//! # Dump one database to ./export
//! sqldump mysql://root@localhost:3306 -B shop
//!
//! # Specific tables, gzip-compressed CSV, table-level read locks
//! sqldump -T shop.users -T shop.orders --filetype csv --compress --consistency lock
//! ```

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use sqldump::cli::{CliInterface, Selection};
use sqldump::dump::{self, Dumper};
use sqldump::error::Result;
use sqldump::connection;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands (version, config)
/// 4. Connect, resolve the dump selection, and run the export
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(());
    }

    let selection = cli.selection()?;
    let config = cli.config().clone();

    let (pool, server_info) = connection::connect(
        &config.connection.uri,
        config.connection.max_pool_size,
        config.connection.timeout,
    )
    .await?;

    let tables = resolve_tables(&pool, selection).await?;
    let export = config.into_export(server_info, tables)?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let dumper = Dumper::new(export, pool);
    dumper.run(cancel).await?;
    info!("export complete");
    Ok(())
}

/// Expand the CLI selection into the full database-to-tables map.
async fn resolve_tables(
    pool: &sqlx::MySqlPool,
    selection: Selection,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();
    match selection {
        Selection::Tables(pairs) => {
            for (db, table) in pairs {
                tables.entry(db).or_default().push(table);
            }
        }
        Selection::Databases(names) => {
            for db in names {
                let discovered = dump::list_tables(pool, &db).await?;
                tables.insert(db, discovered);
            }
        }
    }
    Ok(tables)
}

/// Cancel the run on the first Ctrl+C.
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("interrupt received, stopping the export");
                cancel.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C: {}", err);
            }
        }
    });
}

/// Initialize logging based on verbosity flags and configuration.
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else if cli.args().quiet {
        Level::ERROR
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    // Build subscriber with level filter
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    // Configure timestamps
    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
