//! pagecore - inspect and manage a page store from the command line

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use pagecore::catalog::{ColumnDefinition, MetadataManager};
use pagecore::storage::buffer::BufferPoolManager;
use pagecore::storage::page::{ItemPage, Page, PageId, PageType};
use pagecore::storage::wal::{LogManager, WalConfig};
use pagecore::StorageConfig;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data file
    #[arg(short = 'f', long, default_value = "./pagecore.db")]
    file: PathBuf,

    /// Page size in bytes (power of two)
    #[arg(short = 'p', long, default_value = "4096")]
    page_size: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show file size, page count and whether the file is initialized
    Info,
    /// Create a table, columns given as NAME:TYPE or NAME:string:LEN
    CreateTable {
        name: String,
        #[arg(required = true)]
        columns: Vec<String>,
    },
    /// List every table in the catalog
    ListTables,
    /// Print the header and contents of one page
    DumpPage { id: u64, page_type: PageType },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let read_only = matches!(args.command, Command::Info | Command::DumpPage { .. });
    if read_only && !args.file.exists() {
        anyhow::bail!("{} does not exist", args.file.display());
    }

    let config = StorageConfig::default().with_page_size(args.page_size);
    let pool = BufferPoolManager::open(&args.file, config, false)
        .await
        .with_context(|| format!("Failed to open {:?}", args.file))?;

    match args.command {
        Command::Info => {
            let file_size = pool.file_size().await;
            println!("file:        {}", args.file.display());
            println!("page size:   {}", pool.page_size());
            println!("file size:   {}", file_size);
            println!("pages:       {}", file_size / pool.page_size() as u64);
            println!("initialized: {}", pool.is_initialized().await);
        }
        Command::CreateTable { name, columns } => {
            let columns = columns
                .iter()
                .map(|c| ColumnDefinition::parse(c))
                .collect::<Result<Vec<_>, _>>()?;

            let log_manager = open_log(&args.file).await?;
            let catalog = MetadataManager::open(pool.clone(), &log_manager).await?;
            let tran = log_manager.create_transaction(&pool, "create-table");
            let table = catalog.create_table(&name, &columns, &tran).await?;
            tran.commit().await?;
            catalog.flush().await?;
            println!("created {} '{}' at {}", table.id, table.name, table.root);
        }
        Command::ListTables => {
            let log_manager = open_log(&args.file).await?;
            let catalog = MetadataManager::open(pool.clone(), &log_manager).await?;
            let tran = log_manager.create_transaction(&pool, "list-tables");
            for table in catalog.tables().iterate(&tran).await? {
                let columns = catalog.columns().columns_of(table.id, &tran).await?;
                let columns: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{}:{:?}", c.name, c.info.column_type))
                    .collect();
                println!("{}\t{}\t{}\t{}", table.id, table.name, table.root, columns.join(", "));
            }
            tran.commit().await?;
            catalog.flush().await?;
        }
        Command::DumpPage { id, page_type } => {
            if page_type == PageType::Mixed {
                anyhow::bail!("mixed pages need a schema; use list-tables to inspect table contents");
            }
            let guard = pool.get_page(PageId(id), page_type, &[]).await?;
            let page = guard.read();
            println!("{:?}", page.header());
            match &*page {
                Page::Int(p) => println!("{:?}", p.fetch()),
                Page::Long(p) => println!("{:?}", p.fetch()),
                Page::Double(p) => println!("{:?}", p.fetch()),
                Page::String(p) => {
                    for item in p.fetch() {
                        println!("{}", String::from_utf8_lossy(&item));
                    }
                }
                Page::Mixed(p) => println!("{} rows", p.iterate().count()),
            }
        }
    }

    Ok(())
}

async fn open_log(data_file: &std::path::Path) -> Result<Arc<LogManager>> {
    let path = data_file.with_extension("log");
    let log_manager = LogManager::new(WalConfig::file(&path))
        .await
        .with_context(|| format!("Failed to open log {:?}", path))?;
    Ok(Arc::new(log_manager))
}
