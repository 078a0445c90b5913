//! Terminal output helpers

use std::io::Write;
use std::sync::Arc;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use hl_core::HopInfo;
use hl_remote::Tunnel;

fn print_tagged(out: &mut impl Write, color: Color, tag: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(tag),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_success(msg: &str) {
    print_tagged(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

pub fn print_info(msg: &str) {
    print_tagged(&mut std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

/// Goes to stderr
pub fn print_warning(msg: &str) {
    print_tagged(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Goes to stderr
pub fn print_error(msg: &str) {
    print_tagged(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Hops of a session, outermost first
pub fn format_hops(hops: &[HopInfo]) -> String {
    #[derive(Tabled)]
    struct HopRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "USER")]
        user: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "PORT")]
        port: u16,
    }

    let rows: Vec<HopRow> = hops
        .iter()
        .enumerate()
        .map(|(index, hop)| HopRow {
            index,
            user: hop.user.clone(),
            host: hop.host.clone(),
            port: hop.port,
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_tunnels(tunnels: &[Arc<Tunnel>]) -> String {
    if tunnels.is_empty() {
        return "No tunnels".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "MODE")]
        mode: String,
        #[tabled(rename = "ROUTE")]
        route: String,
        #[tabled(rename = "STATUS")]
        status: &'static str,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            id: t.id().to_string(),
            mode: t.mode().to_string(),
            route: t.to_string(),
            status: if t.is_running() { "running" } else { "stopped" },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hops() {
        let table = format_hops(&[
            HopInfo::new("bastion", 22, "ops"),
            HopInfo::new("10.0.0.8", 2222, "deploy"),
        ]);
        assert!(table.contains("bastion"));
        assert!(table.contains("2222"));
        assert!(table.contains("deploy"));
    }

    #[test]
    fn test_format_no_tunnels() {
        assert_eq!(format_tunnels(&[]), "No tunnels");
    }
}
