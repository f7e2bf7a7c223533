use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use noilexel_lib::config::Config;
use noilexel_lib::dashboard::Dashboard;
use noilexel_lib::error::{DashboardError, GateError};
use noilexel_lib::export::{format_amount, PdfExporter};
use noilexel_lib::gate::FileFlagStore;
use noilexel_lib::router::Tab;
use noilexel_lib::types::LogKind;
use noilexel_lib::view::{invoiceable, DashboardView, Trend};

#[derive(Parser)]
#[command(name = "noilexel", about = "Noile Xel personal dashboard", version)]
struct Cli {
    /// Config file (defaults to ~/.noilexel/config.json)
    #[arg(long, env = "NOILEXEL_CONFIG")]
    config: Option<PathBuf>,

    /// Serve data from a JSON fixture instead of the backend
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Session flag file (defaults to ~/.noilexel/flags.json)
    #[arg(long)]
    flags: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Unlock the dashboard on this device
    Unlock { secret: String },
    /// Lock the dashboard and forget the session
    Logout,
    /// Refresh once and print a panel
    Show {
        #[arg(default_value = "finance")]
        tab: Tab,
    },
    /// Print a panel and reprint it on every change until Ctrl-C
    Watch {
        #[arg(default_value = "finance")]
        tab: Tab,
    },
    /// Flip a task's completion flag
    Toggle {
        task_id: String,
        /// The task is currently completed
        #[arg(long)]
        completed: bool,
    },
    /// Write the invoice PDF for an agenda event
    Invoice { event_id: String },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, String> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path).map_err(|e| e.to_string())?;
            config.apply_env();
            Ok(config)
        }
        None => Config::load().map_err(|e| e.to_string()),
    }
}

fn build_dashboard(cli: &Cli) -> Result<Dashboard, String> {
    let config = load_config(cli.config.as_ref())?;
    let gateway =
        noilexel_lib::open_gateway(&config, cli.fixture.as_deref()).map_err(|e| e.to_string())?;
    let flags = match &cli.flags {
        Some(path) => FileFlagStore::new(path),
        None => FileFlagStore::default_location().map_err(|e| e.to_string())?,
    };
    let exporter = Arc::new(PdfExporter::new(config.export_dir()));
    Ok(Dashboard::new(config, gateway, Box::new(flags), exporter))
}

fn print_panel(tab: Tab, view: &DashboardView) {
    println!("== {} ==", tab.label());
    match tab {
        Tab::Finance => {
            println!("Património projectado: {} Kz", format_amount(view.net_profit));
            if let Some(progress) = view.billing_progress {
                println!(
                    "Facturado: {} Kz ({:.0}%)",
                    format_amount(view.finance.current_billing),
                    progress
                );
            }
            if view.total_expenses > 0.0 {
                println!("Despesas: {} Kz", format_amount(view.total_expenses));
            }
            println!("Insight: {}", view.latest_insight);
            for (price, trend) in &view.market {
                let arrow = match trend {
                    Trend::Up => "▲",
                    Trend::Down => "▼",
                };
                println!(
                    "  {:<6} {:>12} {} {:+.2}%",
                    price.symbol,
                    price.price.map(|p| p.to_string()).unwrap_or_else(|| "---".into()),
                    arrow,
                    price.change_24h.unwrap_or_default()
                );
            }
        }
        Tab::Projects => {
            for project in &view.projects {
                let completion = view.completion.get(&project.id).copied().unwrap_or_default();
                println!(
                    "{} [{}] {} Kz, {}% ({}/{} tarefas)",
                    project.name,
                    project.status,
                    project.value.map(format_amount).unwrap_or_else(|| "---".into()),
                    project.progress.map(|p| format!("{:.0}", p)).unwrap_or_else(|| "---".into()),
                    completion.done,
                    completion.total
                );
                for task in view.tasks_by_project.get(&project.id).into_iter().flatten() {
                    let mark = if task.is_completed { "x" } else { " " };
                    println!("  [{}] {} ({})", mark, task.title, task.id);
                }
            }
        }
        Tab::Agenda => {
            println!("Próximos:");
            for event in &view.upcoming_events {
                let date = event
                    .date
                    .map(|d| d.format("%d/%m/%Y").to_string())
                    .unwrap_or_else(|| "---".into());
                let invoice = if invoiceable(event) { "  [fatura]" } else { "" };
                println!("  {} {} ({}){}", date, event.title, event.id, invoice);
            }
            println!("Histórico:");
            for event in &view.past_events {
                println!("  ✓ {}", event.title);
            }
        }
        Tab::System => {
            if let Some(insight) = &view.strategic_insight {
                println!("Análise: {}: {}", insight.title, insight.analysis);
            }
            for log in &view.logs {
                let time = log
                    .created_at
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "--:--:--".into());
                let tag = match log.kind {
                    LogKind::Insight => "*",
                    LogKind::Error => "!",
                    LogKind::Info | LogKind::Unknown => ">",
                };
                println!("{} [{}] {}", tag, time, log.message);
            }
        }
    }
}

fn render(dashboard: &Dashboard) {
    if let Some(view) = dashboard.view(Utc::now()) {
        print_panel(dashboard.selected_tab(), &view);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut dashboard = build_dashboard(&cli)?;

    match cli.command {
        Command::Unlock { secret } => match dashboard.unlock(&secret).await {
            Ok(report) => {
                println!("Desbloqueado.");
                if !report.is_complete() {
                    println!("Leituras falhadas: {}", report.failed.join(", "));
                }
                dashboard.shutdown().await;
            }
            Err(DashboardError::Gate(GateError::Rejected)) => {
                return Err("Acesso negado.".to_string());
            }
            Err(e) => return Err(e.to_string()),
        },
        Command::Logout => {
            dashboard.logout().await.map_err(|e| e.to_string())?;
            println!("Sessão terminada.");
        }
        Command::Show { tab } => {
            start(&mut dashboard).await?;
            dashboard.select_tab(tab);
            render(&dashboard);
            dashboard.shutdown().await;
        }
        Command::Watch { tab } => {
            start(&mut dashboard).await?;
            dashboard.select_tab(tab);
            render(&dashboard);

            let mut ticks = match dashboard.controller() {
                Some(sync) => sync.watch_refreshes(),
                None => return Err("Sync did not start".to_string()),
            };
            loop {
                tokio::select! {
                    changed = ticks.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        render(&dashboard);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            dashboard.shutdown().await;
        }
        Command::Toggle { task_id, completed } => {
            start(&mut dashboard).await?;
            let result = dashboard.toggle_task(&task_id, completed).await;
            dashboard.shutdown().await;
            result.map_err(|e| e.to_string())?;
            println!("Tarefa {} actualizada.", task_id);
        }
        Command::Invoice { event_id } => {
            start(&mut dashboard).await?;
            let handle = dashboard
                .export_invoice(&event_id, Utc::now())
                .map_err(|e| e.to_string())?;
            let written = handle.await.map_err(|e| e.to_string())?;
            dashboard.shutdown().await;
            let path = written.map_err(|e| e.to_string())?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn start(dashboard: &mut Dashboard) -> Result<(), String> {
    match dashboard.start().await {
        Ok(report) => {
            if !report.is_complete() {
                log::warn!("Refresh incomplete: {}", report.failed.join(", "));
            }
            Ok(())
        }
        Err(DashboardError::Locked) => {
            Err("Bloqueado. Use `noilexel unlock <segredo>` primeiro.".to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    noilexel_lib::init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}
