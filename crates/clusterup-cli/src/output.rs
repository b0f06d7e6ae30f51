use clusterup_core::lifecycle::StatusReport;
use serde::Serialize;
use std::fmt::Write as _;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// Human-readable `status` output: a field block, then installed components.
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Base dir:  {}", report.base_dir.display());
    if !report.initialized {
        out.push_str("Cluster:   not initialized\n");
        return out;
    }
    let _ = writeln!(out, "Kubelet:   {}", report.kubelet.as_deref().unwrap_or("not found"));
    let _ = writeln!(out, "Healthy:   {}", if report.healthy { "yes" } else { "no" });
    if let Some(url) = &report.server_url {
        let _ = writeln!(out, "Server:    {url}");
    }
    if !report.components.is_empty() {
        out.push('\n');
        let rows = report.components.iter().map(|c| vec![c.clone()]).collect();
        out.push_str(&render_table(&["COMPONENT"], rows));
    }
    out
}

pub fn render_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    // Column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    let _ = writeln!(out, "{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let _ = writeln!(out, "{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join("  ").trim_end());
    }
    out
}
