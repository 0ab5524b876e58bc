//! Tables command: list configured content tables.

use anyhow::Result;
use illustrator_core::AppConfig;
use serde_json::json;

pub(crate) fn run_tables_command(config: &AppConfig, json_output: bool) -> Result<()> {
    if json_output {
        let tables: Vec<_> = config
            .tables
            .values()
            .map(|spec| {
                json!({
                    "table": spec.name,
                    "view": spec.view,
                    "default": spec.name == config.default_table,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&tables)?);
        return Ok(());
    }

    for spec in config.tables.values() {
        let marker = if spec.name == config.default_table { " (default)" } else { "" };
        println!("{}\t{}{marker}", spec.name, spec.view);
    }
    Ok(())
}
