use anyhow::{anyhow, bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wedhub_api::BackendClient;
use wedhub_core::providers::{LocalGateway, RestGateway};
use wedhub_core::router::ApplicationStatus;
use wedhub_core::{
    resolve_route, Config, ProfileStatus, RecentlyViewed, Route, SavedItem, SavedItemCache,
    SavedItemsGateway, SavedVendorsView, Session, UserRole, VendorSnapshot,
};
use wedhub_store::LocalStore;

type Gateway = dyn SavedItemsGateway<i64, VendorSnapshot>;

#[derive(Parser)]
#[command(name = "wedhub")]
#[command(version, about = "Saved and recently viewed wedding vendors", long_about = None)]
struct Cli {
    /// Use the hosted backend instead of the local database
    #[arg(long, global = true)]
    remote: bool,

    /// User to act as
    #[arg(long, global = true, env = "WEDHUB_USER")]
    user: Option<String>,

    /// Access token for the hosted backend
    #[arg(long, global = true, env = "WEDHUB_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Manage saved vendors
    Saved {
        #[command(subcommand)]
        action: SavedAction,
    },
    /// Recently viewed vendors
    Recent {
        #[command(subcommand)]
        action: RecentAction,
    },
    /// Show where a navigation would end up
    Route {
        /// Path such as /saved or /vendors/42
        path: String,

        #[arg(long, value_parser = clap::value_parser!(UserRole))]
        role: Option<UserRole>,

        /// Pretend onboarding is not finished
        #[arg(long)]
        incomplete: bool,

        /// Vendor application state
        #[arg(long, value_enum)]
        application: Option<Application>,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand)]
enum SavedAction {
    /// List saved vendors, newest first
    List {
        /// Fuzzy filter on name, category and location
        #[arg(short, long)]
        filter: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Save a vendor
    Add {
        vendor_id: i64,
        #[command(flatten)]
        snapshot: SnapshotArgs,
    },
    /// Remove a saved vendor
    Remove { vendor_id: i64 },
    /// Save if not saved, remove otherwise
    Toggle {
        vendor_id: i64,
        #[command(flatten)]
        snapshot: SnapshotArgs,
    },
}

#[derive(clap::Subcommand)]
enum RecentAction {
    /// List recently viewed vendors
    List {
        #[arg(long)]
        json: bool,
    },
    /// Record a vendor page view
    View {
        vendor_id: i64,
        #[command(flatten)]
        snapshot: SnapshotArgs,
    },
    /// Forget the recently viewed list
    Clear,
}

#[derive(clap::Subcommand)]
enum ConfigAction {
    /// Print the effective config
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Display fields stored alongside the saved row
#[derive(Clone, clap::Args)]
struct SnapshotArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    location: Option<String>,
}

impl SnapshotArgs {
    fn into_snapshot(self) -> Option<VendorSnapshot> {
        let name = self.name?;
        Some(VendorSnapshot {
            name,
            category: self.category.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            ..Default::default()
        })
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Application {
    Pending,
    Approved,
    Rejected,
}

impl From<Application> for ApplicationStatus {
    fn from(app: Application) -> Self {
        match app {
            Application::Pending => ApplicationStatus::Pending,
            Application::Approved => ApplicationStatus::Approved,
            Application::Rejected => ApplicationStatus::Rejected,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wedhub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Some(Commands::Saved { ref action }) => run_saved(&cli, &config, action).await,
        Some(Commands::Recent { ref action }) => run_recent(&cli, &config, action),
        Some(Commands::Route {
            ref path,
            role,
            incomplete,
            application,
        }) => {
            let requested = Route::from_path(path).ok_or_else(|| anyhow!("Unknown path: {}", path))?;
            let session = cli
                .user
                .as_deref()
                .map(|user| Session::new(user, role.unwrap_or_default()));
            let profile = ProfileStatus {
                completed: !incomplete,
                vendor_application: application.map(Into::into),
            };

            let resolved = resolve_route(session.as_ref(), &profile, requested);
            tracing::debug!("{} resolved to {:?}", path, resolved);
            println!("{}", resolved.path());
            Ok(())
        }
        Some(Commands::Config { ref action }) => run_config(&cli, &config, action),
        None => {
            println!("No command specified. Try --help");
            Ok(())
        }
    }
}

async fn run_saved(cli: &Cli, config: &Config, action: &SavedAction) -> anyhow::Result<()> {
    let session = session_for(cli)?;
    let gateway = open_gateway(cli, config)?;
    let cache = SavedItemCache::new(gateway, &config.guard);
    cache.set_session(Some(&session));
    let view = SavedVendorsView::new(Arc::new(cache));

    match action {
        SavedAction::List { filter, json } => {
            if !view.refresh().await {
                bail!("Could not load saved vendors for {}", session.user_id);
            }
            let items = view.filter_saved(filter.as_deref().unwrap_or(""));
            if *json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No saved vendors");
            } else {
                for item in &items {
                    print_saved(item);
                }
            }
        }
        SavedAction::Add {
            vendor_id,
            snapshot,
        } => {
            let snapshot = snapshot_of(snapshot);
            if !view.cache().save_item(*vendor_id, snapshot).await {
                bail!("Could not save vendor {}", vendor_id);
            }
            println!("Saved vendor {}", vendor_id);
        }
        SavedAction::Remove { vendor_id } => {
            if !view.remove(vendor_id).await {
                bail!("Could not remove vendor {}", vendor_id);
            }
            println!("Removed vendor {}", vendor_id);
        }
        SavedAction::Toggle {
            vendor_id,
            snapshot,
        } => {
            // Toggle decides from the snapshot, so it has to be current
            if !view.refresh().await {
                bail!("Could not load saved vendors for {}", session.user_id);
            }
            let snapshot = snapshot_of(snapshot);
            if !view.cache().toggle_saved_item(*vendor_id, snapshot).await {
                bail!("Could not toggle vendor {}", vendor_id);
            }
            if view.is_saved(vendor_id) {
                println!("Saved vendor {}", vendor_id);
            } else {
                println!("Removed vendor {}", vendor_id);
            }
        }
    }

    Ok(())
}

fn run_recent(cli: &Cli, config: &Config, action: &RecentAction) -> anyhow::Result<()> {
    let session = session_for(cli)?;
    let store = open_store(config)?;
    let recent = RecentlyViewed::<i64, VendorSnapshot>::new(store, config.store.recent_limit);

    match action {
        RecentAction::List { json } => {
            let views = recent.list(&session.user_id);
            if *json {
                let rows: Vec<serde_json::Value> = views
                    .iter()
                    .map(|v| {
                        serde_json::json!({
                            "vendor_id": v.vendor_id,
                            "vendor_data": v.vendor,
                            "viewed_at": v.viewed_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if views.is_empty() {
                println!("Nothing viewed yet");
            } else {
                for v in &views {
                    let name = v.vendor.as_ref().map(|s| s.name.as_str()).unwrap_or("-");
                    println!(
                        "{:>8}  {:<30}  {}",
                        v.vendor_id,
                        name,
                        v.viewed_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        RecentAction::View {
            vendor_id,
            snapshot,
        } => {
            let snapshot = snapshot_of(snapshot);
            if !recent.record_view(&session.user_id, vendor_id, snapshot.as_ref()) {
                bail!("Could not record view of vendor {}", vendor_id);
            }
        }
        RecentAction::Clear => {
            if !recent.clear(&session.user_id) {
                bail!("Could not clear recently viewed vendors");
            }
            println!("Cleared");
        }
    }

    Ok(())
}

fn run_config(cli: &Cli, config: &Config, action: &ConfigAction) -> anyhow::Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };

    match action {
        ConfigAction::Show => {
            println!("# {}", path.display());
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn session_for(cli: &Cli) -> anyhow::Result<Session> {
    let user = cli
        .user
        .as_deref()
        .ok_or_else(|| anyhow!("No user given; pass --user or set WEDHUB_USER"))?;

    let mut session = Session::new(user, UserRole::Couple);
    if let Some(token) = &cli.access_token {
        session.access_token = token.clone();
    }
    Ok(session)
}

fn open_gateway(cli: &Cli, config: &Config) -> anyhow::Result<Arc<Gateway>> {
    if !cli.remote {
        let gateway: Arc<Gateway> = Arc::new(LocalGateway::new(open_store(config)?));
        return Ok(gateway);
    }

    let backend = &config.backend;
    let (Some(url), Some(api_key)) = (&backend.url, &backend.api_key) else {
        bail!("Backend url and api_key must be set in the config to use --remote");
    };

    let token = cli.access_token.clone().or_else(|| backend.access_token.clone());
    if token.is_none() {
        tracing::warn!("No access token; the backend will only allow public reads");
    }

    let client = BackendClient::with_timeout(
        url.as_str(),
        api_key.as_str(),
        Duration::from_secs(backend.timeout_secs),
    )?
    .with_access_token(token);

    let gateway: Arc<Gateway> = Arc::new(
        RestGateway::with_table(client, backend.saved_table.as_str())
            .with_vendor_join(Some(backend.vendor_join.clone())),
    );
    Ok(gateway)
}

fn open_store(config: &Config) -> anyhow::Result<Arc<LocalStore>> {
    let path = config.store.resolved_path()?;
    let store = LocalStore::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn snapshot_of(args: &SnapshotArgs) -> Option<VendorSnapshot> {
    args.clone().into_snapshot()
}

fn print_saved(item: &SavedItem<i64, VendorSnapshot>) {
    let saved_on = item.created_at.format("%Y-%m-%d");
    match &item.vendor {
        Some(v) => println!(
            "{:>8}  {:<30}  {:<14}  {:<20}  {}",
            item.vendor_id, v.name, v.category, v.location, saved_on
        ),
        None => println!("{:>8}  {:<30}  {:<14}  {:<20}  {}", item.vendor_id, "-", "", "", saved_on),
    }
}
