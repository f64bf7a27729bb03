//! Text-table and JSON rendering of the call list, standing in for the
//! interactive terminal frontend that would normally drive this data.

use anyhow::Result;
use sipgrep_storage::Call;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct CallRow {
    #[tabled(rename = "Call-ID")]
    call_id: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Msgs")]
    msgcnt: usize,
    #[tabled(rename = "Dur(s)")]
    duration_s: String,
}

fn duration_secs(call: &Call) -> String {
    match call.convdur_us() {
        Some(us) => format!("{:.1}", us as f64 / 1_000_000.0),
        None => "-".to_string(),
    }
}

fn to_row(call: &Call) -> CallRow {
    CallRow {
        call_id: call.call_id.to_string(),
        from: call.source_user().unwrap_or("-").to_string(),
        to: call.destination_user().unwrap_or("-").to_string(),
        state: call.state.as_str().to_string(),
        msgcnt: call.msgcnt(),
        duration_s: duration_secs(call),
    }
}

pub fn print_table(calls: &[Call]) {
    let rows: Vec<CallRow> = calls.iter().map(to_row).collect();
    println!("{}", Table::new(rows));
}

pub fn print_json(calls: &[Call]) -> Result<()> {
    let json = serde_json::to_string_pretty(calls)?;
    println!("{json}");
    Ok(())
}
