use colored::Colorize;
use prettytable::{format, row, Table};

use crate::engine::{Engine, HealthReport};
use crate::mcp::RegistryStats;
use crate::providers::ProviderRegistryStats;
use crate::session::SessionStats;

fn yes_no(flag: bool) -> colored::ColoredString {
    if flag {
        "yes".green()
    } else {
        "no".red()
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// Print component health as a table
pub async fn print_health(engine: &Engine) {
    print_health_report(&engine.health_check().await);
}

pub fn print_health_report(report: &HealthReport) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Component".bold(), "Name".bold(), "Healthy".bold()]);
    table.add_row(row!["engine", "-", yes_no(report.engine_running)]);
    for (name, healthy) in &report.providers {
        table.add_row(row!["provider", name.cyan(), yes_no(*healthy)]);
    }
    for (name, healthy) in &report.servers {
        table.add_row(row!["server", name.cyan(), yes_no(*healthy)]);
    }

    println!("\nHealth:");
    table.printstd();
}

/// Print session, provider and server statistics
pub async fn print_stats(engine: &Engine) {
    print_session_stats(&engine.session_stats().await);
    print_provider_stats(&engine.provider_stats().await);
    print_server_stats(&engine.server_stats().await);
    println!();
}

fn print_session_stats(stats: &SessionStats) {
    println!(
        "\nSessions: {} total, {} active, {} expired, {} users",
        stats.total_sessions, stats.active_sessions, stats.expired_sessions, stats.unique_users
    );
}

fn print_provider_stats(stats: &ProviderRegistryStats) {
    if stats.providers.is_empty() {
        println!("{}", "No providers configured.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Provider".bold(),
        "Type".bold(),
        "Model".bold(),
        "Connected".bold(),
        "Requests".bold(),
        "Errors".bold(),
        "Success".bold()
    ]);
    for (name, p) in &stats.providers {
        let label = if *name == stats.default_provider {
            format!("{} (default)", name)
        } else {
            name.clone()
        };
        table.add_row(row![
            label.cyan(),
            p.provider_type,
            p.model,
            yes_no(p.connected),
            p.request_count,
            p.error_count,
            percent(p.success_rate)
        ]);
    }

    println!("\nProviders ({}/{} connected):", stats.connected, stats.total);
    table.printstd();
}

fn print_server_stats(stats: &RegistryStats) {
    if stats.servers.is_empty() {
        println!("{}", "No tool servers configured.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Server".bold(),
        "Type".bold(),
        "Transport".bold(),
        "Connected".bold(),
        "Requests".bold(),
        "Errors".bold(),
        "Success".bold()
    ]);
    for (name, s) in &stats.servers {
        table.add_row(row![
            name.cyan(),
            s.server_type,
            s.transport,
            yes_no(s.connected),
            s.request_count,
            s.error_count,
            percent(s.success_rate)
        ]);
    }

    println!("\nTool servers ({}/{} connected):", stats.connected, stats.total);
    table.printstd();
}
