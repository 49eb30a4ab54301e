//! Cache subcommand handlers.

use githelm_config::Config;
use githelm_core::{CacheService, CacheStats, DurableStore};

use crate::cli::{CacheArgs, CacheCommand, GlobalOpts};
use crate::error::CliError;
use crate::output::{self, Painter};

pub fn handle(args: &CacheArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let store = DurableStore::new(config.storage_backend());
    let cache = CacheService::new(&store).with_default_ttl(config.freshness().default_cache_ttl);
    let painter = Painter::new(global.color);

    match args.command {
        CacheCommand::Stats => {
            let stats = cache.stats();
            output::emit(global.output, &stats, |s| render_stats(s, painter))
        }
        CacheCommand::Cleanup => {
            let before = cache.stats().total_entries;
            cache.cleanup();
            let removed = before.saturating_sub(cache.stats().total_entries);
            output::emit(
                global.output,
                &serde_json::json!({ "removed": removed }),
                |_| format!("Removed {removed} expired entries"),
            )
        }
        CacheCommand::Clear => {
            let before = cache.stats().total_entries;
            cache.clear();
            let removed = before.saturating_sub(cache.stats().total_entries);
            output::emit(
                global.output,
                &serde_json::json!({ "removed": removed }),
                |_| format!("Cleared {removed} cached responses"),
            )
        }
    }
}

fn render_stats(stats: &CacheStats, painter: Painter) -> String {
    format!(
        "{}  {}\n{}  {}\n{}  {}\n{}  {} bytes",
        painter.dim("total  "),
        stats.total_entries,
        painter.dim("valid  "),
        painter.good(&stats.valid_entries.to_string()),
        painter.dim("expired"),
        painter.bad(&stats.expired_entries.to_string()),
        painter.dim("size   "),
        stats.total_size,
    )
}
