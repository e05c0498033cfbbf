use clap::{Parser, Subcommand};
use laundry_core::application::orders::{CreateOrderRequest, OrderEngine};
use laundry_core::application::pricing::PricingResolver;
use laundry_core::application::quote::{QuoteEngine, QuoteRequest};
use laundry_core::config::Config;
use laundry_core::domain::order::{OrderFilter, OrderSortKey, OrderStatus};
use laundry_core::domain::page::{Pagination, SortOrder};
use laundry_core::domain::payment::notification_signature;
use laundry_core::domain::ports::{LockerRef, OrderStoreRef};
use laundry_core::infrastructure::in_memory::{InMemoryCatalog, InMemoryOrderStore};
use laundry_core::infrastructure::lock::select_locker;
#[cfg(feature = "storage-rocksdb")]
use laundry_core::infrastructure::rocksdb::RocksDBStore;
use laundry_core::interfaces::json::catalog_reader::CatalogSeed;
use laundry_core::interfaces::json::read_json_file;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Price a cart against the catalog without persisting anything
    Quote {
        /// Catalog seed JSON file
        #[arg(long)]
        catalog: PathBuf,
        /// Quote request JSON file
        #[arg(long)]
        request: PathBuf,
    },
    /// Create an order from a request file
    CreateOrder {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        request: PathBuf,
    },
    /// List stored orders
    ListOrders {
        #[arg(long)]
        customer_id: Option<Uuid>,
        #[arg(long)]
        status: Option<OrderStatus>,
        /// Case-insensitive match on order number and notes
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// created_at, order_no, grand_total or status
        #[arg(long)]
        sort_by: Option<String>,
        /// asc or desc
        #[arg(long)]
        sort_order: Option<String>,
    },
    /// Move a stored order to another status
    UpdateStatus {
        #[arg(long)]
        order_id: Uuid,
        #[arg(long)]
        status: OrderStatus,
        #[arg(long)]
        note: Option<String>,
    },
    /// Print the notification signature for the configured server key
    SignWebhook {
        #[arg(long)]
        order_id: String,
        #[arg(long)]
        status_code: String,
        #[arg(long)]
        gross_amount: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_order_store(db_path: Option<&Path>) -> Result<OrderStoreRef> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store = RocksDBStore::open(path).into_diagnostic()?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok(Arc::new(InMemoryOrderStore::new()))
}

async fn load_catalog(path: &Path) -> Result<Arc<InMemoryCatalog>> {
    let file = File::open(path).into_diagnostic()?;
    let seed = CatalogSeed::from_reader(file).into_diagnostic()?;
    Ok(Arc::new(seed.into_catalog().await))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

async fn order_engine(
    config: &Config,
    locker: LockerRef,
    catalog: Arc<InMemoryCatalog>,
) -> Result<OrderEngine> {
    let orders = open_order_store(config.db_path.as_deref())?;
    Ok(OrderEngine::new(
        orders,
        catalog.clone(),
        PricingResolver::new(catalog),
        locker,
        config.lock_policy(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.config.log_json);

    let config = cli.config;
    let locker = select_locker(config.redis_url.as_deref()).await;

    match cli.command {
        Command::Quote { catalog, request } => {
            let catalog = load_catalog(&catalog).await?;
            let request: QuoteRequest = read_json_file(request).into_diagnostic()?;
            let engine = QuoteEngine::new(PricingResolver::new(catalog), locker, config.lock_policy());
            let quote = engine.calculate_quote(request).await.into_diagnostic()?;
            print_json(&quote)
        }
        Command::CreateOrder { catalog, request } => {
            let catalog = load_catalog(&catalog).await?;
            let request: CreateOrderRequest = read_json_file(request).into_diagnostic()?;
            let engine = order_engine(&config, locker, catalog).await?;
            let order = engine.create_order(None, request).await.into_diagnostic()?;
            print_json(&order)
        }
        Command::ListOrders {
            customer_id,
            status,
            search,
            page,
            limit,
            sort_by,
            sort_order,
        } => {
            let engine = order_engine(&config, locker, Arc::new(InMemoryCatalog::new())).await?;
            let filter = OrderFilter {
                customer_id,
                status,
                search,
                sort_by: OrderSortKey::from_param(sort_by.as_deref()),
                sort_order: SortOrder::from_param(sort_order.as_deref()),
                ..Default::default()
            };
            let page = engine
                .list(&filter, Pagination::new(page, limit))
                .await
                .into_diagnostic()?;
            print_json(&page)
        }
        Command::UpdateStatus {
            order_id,
            status,
            note,
        } => {
            let engine = order_engine(&config, locker, Arc::new(InMemoryCatalog::new())).await?;
            let order = engine
                .update_status(order_id, status, None, note)
                .await
                .into_diagnostic()?;
            print_json(&order)
        }
        Command::SignWebhook {
            order_id,
            status_code,
            gross_amount,
        } => {
            let settings = config.gateway_settings();
            if settings.server_key.is_empty() {
                miette::bail!("--gateway-server-key (or GATEWAY_SERVER_KEY) is required");
            }
            println!(
                "{}",
                notification_signature(&order_id, &status_code, &gross_amount, &settings.server_key)
            );
            Ok(())
        }
    }
}
