//! `status`: one line per replica of every requested base DN.

use super::Executor;
use crate::directory::Directory;
use crate::error::{Result, ReturnCode};
use crate::user_data::ServerData;
use dsrepl_topology::status::{status_groups, StatusGroup, StatusRow};

const HEADERS: [&str; 10] = [
    "Suffix DN",
    "Server",
    "Entries",
    "Replication enabled",
    "DS ID",
    "RS ID",
    "RS Port",
    "M.C.",
    "A.O.M.C.",
    "Security",
];

const NOT_A_REPLICATION_DOMAIN: &str = "[2]";
const NOT_A_REPLICATION_SERVER: &str = "[3]";

const LEGEND: &str = "[2] The server is a replication server but holds no replica of the base DN.\n\
[3] The server is not a replication server.\n\
M.C.: missing changes. A.O.M.C.: age of the oldest missing change, in milliseconds.";

pub(super) async fn run(exec: &Executor<'_>, data: &ServerData, script_friendly: bool) -> Result<ReturnCode> {
    let dir = exec.connect(&data.server).await?;
    let result = status(exec, data, &*dir, script_friendly).await;
    exec.close(dir).await;
    result
}

async fn status(exec: &Executor<'_>, data: &ServerData, dir: &dyn Directory, script_friendly: bool) -> Result<ReturnCode> {
    let server = exec.read_server(dir, &data.server).await?;
    let registry = exec.read_registry(dir).await?;
    let cache = exec.load_topology(registry.as_ref(), &data.admin, &server, &[]).await?;

    let groups = status_groups(&cache.snapshot, &data.base_dns);
    if groups.is_empty() {
        exec.console
            .println(&format!("No replicated base DN found on {}.", server.id()));
        return Ok(ReturnCode::Successful);
    }
    let output = if script_friendly {
        render_script(&groups)
    } else {
        render_table(&groups)
    };
    exec.console.print_output(&output);
    Ok(ReturnCode::Successful)
}

fn optional<T: ToString>(value: Option<T>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Cells of one row; `Err(marker)` stands for a cell that does not apply.
fn cells(base_dn: &str, row: &StatusRow<'_>) -> Vec<std::result::Result<Option<String>, &'static str>> {
    let rs = row.server.replication_server.as_ref();
    let domain = |value: Option<String>| match row.replica {
        Some(_) => Ok(value),
        None => Err(NOT_A_REPLICATION_DOMAIN),
    };
    let server = |value: Option<String>| match rs {
        Some(_) => Ok(value),
        None => Err(NOT_A_REPLICATION_SERVER),
    };
    vec![
        Ok(Some(base_dn.to_string())),
        Ok(Some(row.server.id())),
        domain(row.replica.and_then(|r| optional(r.entries))),
        domain(row.replica.map(|r| r.replicated.to_string())),
        domain(row.replica.and_then(|r| optional(r.domain_id))),
        server(rs.map(|r| r.id.to_string())),
        server(rs.map(|r| r.port.to_string())),
        domain(row.replica.and_then(|r| optional(r.missing_changes))),
        domain(row.replica.and_then(|r| optional(r.age_of_oldest_missing_change))),
        server(rs.map(|r| if r.secure { "Enabled" } else { "Disabled" }.to_string())),
    ]
}

/// Aligned table with markers and their legend.
pub fn render_table(groups: &[StatusGroup<'_>]) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut markers = false;
    for group in groups {
        for row in &group.rows {
            rows.push(
                cells(&group.base_dn, row)
                    .into_iter()
                    .map(|cell| match cell {
                        Ok(value) => value.unwrap_or_else(|| "N/A".to_string()),
                        Err(marker) => {
                            markers = true;
                            marker.to_string()
                        }
                    })
                    .collect(),
            );
        }
    }

    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" : ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(HEADERS.to_vec())];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-:-"),
    );
    for row in &rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    if markers {
        out.push(String::new());
        out.push(LEGEND.to_string());
    }
    out.join("\n")
}

/// Tab-separated lines after a header line; cells that do not apply are empty.
pub fn render_script(groups: &[StatusGroup<'_>]) -> String {
    let mut out = vec![HEADERS.join("\t")];
    for group in groups {
        for row in &group.rows {
            out.push(
                cells(&group.base_dn, row)
                    .into_iter()
                    .map(|cell| cell.ok().flatten().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("\t"),
            );
        }
    }
    out.join("\n")
}
