use crate::output::{print_json, print_table};
use anyhow::Context;
use soundscan_link::ports;

pub fn run(json: bool) -> anyhow::Result<()> {
    let available = ports::available().context("failed to list serial ports")?;

    if json {
        return print_json(&available);
    }
    if available.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }

    let rows = available
        .iter()
        .map(|p| {
            vec![
                if p.is_candidate() { "*" } else { "" }.to_string(),
                p.name.clone(),
                format!("{:?}", p.kind).to_lowercase(),
                p.manufacturer.clone().unwrap_or_default(),
                p.product.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["", "PORT", "KIND", "MANUFACTURER", "PRODUCT"], rows);
    Ok(())
}
