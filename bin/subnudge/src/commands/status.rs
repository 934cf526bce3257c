use subnudge_browser::session::{list_targets, pick_page_target};
use subnudge_core::types::any_match;
use subnudge_core::{Config, Paths};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("subnudge status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (defaults)" }
    );

    let config = Config::load_or_default(&paths)?;
    let n = &config.nudge;
    println!(
        "Nudge:     >= {}x every {} ms, restore after {} ms",
        n.speed_threshold, n.interval_ms, n.restore_delay_ms
    );

    let host = &config.browser.debug_host;
    let port = config.browser.debug_port;
    let patterns = config.browser.patterns()?;
    println!("Matches:   {}", config.browser.match_urls.join(", "));
    println!();

    match list_targets(host, port).await {
        Ok(targets) => {
            println!("DevTools:  http://{}:{} ✓", host, port);
            let pages: Vec<_> = targets.iter().filter(|t| t.kind == "page").collect();
            if pages.is_empty() {
                println!("  (no pages open)");
            }
            let chosen = pick_page_target(&targets, &patterns).map(|t| t.id);
            for page in pages {
                let marker = if chosen.as_deref() == Some(page.id.as_str()) {
                    "→"
                } else if any_match(&patterns, &page.url) {
                    "✓"
                } else {
                    " "
                };
                println!("  {} {:<40} {}", marker, truncate(&page.title, 40), page.url);
            }
        }
        Err(e) => {
            println!("DevTools:  http://{}:{} ✗ ({})", host, port, e);
            println!();
            println!(
                "Start your browser with --remote-debugging-port={} or use `subnudge run --launch`.",
                port
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}…", cut)
    }
}
